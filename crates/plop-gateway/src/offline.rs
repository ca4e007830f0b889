//! Offline delivery: persisting undeliverable plops, escalating them to push,
//! and flushing the queue to a device when it reconnects.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use plop_types::Message;

use crate::presence::Connection;
use crate::push::Escalation;
use crate::store::{OfflineQueue, PendingRecord, RecordId, blocking};

/// Result of one reconnect flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing deliverable was pending. Undecodable records, if any, were cleared.
    Empty,
    /// Every record was written to the connection and the batch was cleared.
    Delivered(usize),
    /// A write failed. Nothing was deleted; the whole batch is retried on the
    /// next connection.
    Aborted { sent: usize, pending: usize },
}

pub struct OfflineDelivery {
    queue: Arc<dyn OfflineQueue>,
    escalation: Escalation,
    push_slots: Arc<Semaphore>,
    tasks: TaskTracker,
}

impl OfflineDelivery {
    pub fn new(queue: Arc<dyn OfflineQueue>, escalation: Escalation, max_concurrent_pushes: usize) -> Self {
        Self {
            queue,
            escalation,
            push_slots: Arc::new(Semaphore::new(max_concurrent_pushes.max(1))),
            tasks: TaskTracker::new(),
        }
    }

    /// Background work spawned by [`dispatch`](Self::dispatch). Close and wait
    /// on it to drain in-flight persistence and pushes.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Store `msg` for its recipient and escalate it to push. Returns
    /// immediately; both run as detached tasks with their own error logging.
    pub fn dispatch(&self, msg: Message) {
        let (Some(recipient), Some(sender)) = (msg.recipient(), msg.from.as_deref()) else {
            warn!("Dropping offline '{}' without sender or recipient", msg.kind.as_str());
            return;
        };
        let (recipient, sender) = (recipient.to_string(), sender.to_string());

        let queue = self.queue.clone();
        let stored = msg.clone();
        self.tasks.spawn(async move {
            let (r, s) = (recipient.clone(), sender.clone());
            match blocking(move || queue.upsert(&r, &s, &stored)).await {
                Ok(()) => debug!("Stored pending plop {} -> {}", sender, recipient),
                Err(e) => error!(
                    "Failed to store pending plop {} -> {}: {:#}",
                    sender, recipient, e
                ),
            }
        });

        let Ok(permit) = self.push_slots.clone().try_acquire_owned() else {
            warn!("Push capacity exhausted, skipping escalation (message stays queued)");
            return;
        };
        let escalation = self.escalation.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            escalation.escalate(&msg).await;
        });
    }

    /// Deliver every pending record for `user_id` to `conn`, then clear them.
    ///
    /// Writes go to this one connection only. The first failed write aborts
    /// the flush and leaves the store untouched, so delivery is at-least-once.
    /// The clear covers exactly the records read here; anything stored while
    /// the flush runs stays for the next connection.
    pub async fn flush(&self, user_id: &str, conn: &Connection) -> Result<FlushOutcome> {
        let queue = self.queue.clone();
        let user = user_id.to_string();
        let batch = blocking(move || queue.get_all(&user)).await?;
        let ids = batch.ids();

        if batch.is_empty() {
            if !ids.is_empty() {
                self.clear(user_id, ids).await?;
            }
            return Ok(FlushOutcome::Empty);
        }

        let total = batch.len();
        info!("Flushing {} pending message(s) to {} ({})", total, user_id, conn.id());

        for (sent, record) in batch.records.into_iter().enumerate() {
            let PendingRecord { sender, mut message, .. } = record;
            message.from = Some(sender.clone());
            message.to = Some(user_id.to_string());
            message.is_pending = true;

            if let Err(e) = conn.send(message) {
                warn!(
                    "Pending message {} -> {} not delivered ({}), will retry on next connection",
                    sender, user_id, e
                );
                return Ok(FlushOutcome::Aborted {
                    sent,
                    pending: total - sent,
                });
            }
        }

        self.clear(user_id, ids).await?;
        info!("All {} pending message(s) for {} delivered and cleared", total, user_id);
        Ok(FlushOutcome::Delivered(total))
    }

    async fn clear(&self, user_id: &str, ids: Vec<RecordId>) -> Result<()> {
        let queue = self.queue.clone();
        let user = user_id.to_string();
        let removed = blocking(move || queue.delete_batch(&user, &ids)).await?;
        debug!("Cleared {} pending record(s) for {}", removed, user_id);
        Ok(())
    }
}
