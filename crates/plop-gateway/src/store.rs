//! Storage contracts the gateway depends on, and their SQLite implementation.
//!
//! All methods are blocking; async callers go through `spawn_blocking`.

use anyhow::Result;
use tracing::warn;

use plop_db::Database;
use plop_types::Message;

/// Identifies one stored write. An overwrite gets a new id.
pub type RecordId = i64;

/// One pending message as read from the queue.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub id: RecordId,
    pub sender: String,
    pub message: Message,
}

/// Everything pending for a recipient at the time of the read.
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    pub records: Vec<PendingRecord>,
    /// Stored records that no longer decode. Cleared with the batch.
    pub undecodable: Vec<RecordId>,
}

impl PendingBatch {
    /// Deliverable records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every id this read saw, deliverable or not.
    pub fn ids(&self) -> Vec<RecordId> {
        self.records
            .iter()
            .map(|r| r.id)
            .chain(self.undecodable.iter().copied())
            .collect()
    }
}

/// Durable (recipient, sender) -> latest undelivered message.
pub trait OfflineQueue: Send + Sync {
    /// Insert or overwrite the record for this pair.
    fn upsert(&self, recipient: &str, sender: &str, message: &Message) -> Result<()>;

    /// Every pending record for `recipient`, oldest write first.
    fn get_all(&self, recipient: &str) -> Result<PendingBatch>;

    /// Clear a batch returned by [`get_all`](Self::get_all) in one step.
    /// Records written after that read are kept. Returns records removed.
    fn delete_batch(&self, recipient: &str, ids: &[RecordId]) -> Result<usize>;
}

/// Push destinations per user. Append-only under dedup, pruned on invalidation.
pub trait DeviceTokenStore: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Vec<String>>;

    /// Returns true if the token was not already stored.
    fn add_if_absent(&self, user_id: &str, token: &str) -> Result<bool>;

    fn remove_tokens(&self, user_id: &str, tokens: &[String]) -> Result<usize>;
}

/// Display names, used as push notification titles.
pub trait PseudoStore: Send + Sync {
    fn pseudo(&self, user_id: &str) -> Result<Option<String>>;

    fn save_pseudo(&self, user_id: &str, pseudo: &str) -> Result<()>;
}

/// Run a blocking store call off the async runtime.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}

impl OfflineQueue for Database {
    fn upsert(&self, recipient: &str, sender: &str, message: &Message) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.upsert_pending_message(recipient, sender, &json)
    }

    fn get_all(&self, recipient: &str) -> Result<PendingBatch> {
        let rows = self.get_pending_messages(recipient)?;
        let mut batch = PendingBatch::default();
        for row in rows {
            match serde_json::from_str::<Message>(&row.message) {
                Ok(message) => batch.records.push(PendingRecord {
                    id: row.id,
                    sender: row.sender_id,
                    message,
                }),
                Err(e) => {
                    warn!(
                        "Corrupt pending message {} -> {} (stored {}): {}",
                        row.sender_id, row.recipient_id, row.updated_at, e
                    );
                    batch.undecodable.push(row.id);
                }
            }
        }
        Ok(batch)
    }

    fn delete_batch(&self, recipient: &str, ids: &[RecordId]) -> Result<usize> {
        self.delete_pending_messages(recipient, ids)
    }
}

impl DeviceTokenStore for Database {
    fn get(&self, user_id: &str) -> Result<Vec<String>> {
        self.get_device_tokens(user_id)
    }

    fn add_if_absent(&self, user_id: &str, token: &str) -> Result<bool> {
        self.add_device_token(user_id, token)
    }

    fn remove_tokens(&self, user_id: &str, tokens: &[String]) -> Result<usize> {
        self.remove_device_tokens(user_id, tokens)
    }
}

impl PseudoStore for Database {
    fn pseudo(&self, user_id: &str) -> Result<Option<String>> {
        self.get_user_pseudo(user_id)
    }

    fn save_pseudo(&self, user_id: &str, pseudo: &str) -> Result<()> {
        self.save_user_pseudo(user_id, pseudo)
    }
}
