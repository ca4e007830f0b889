use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use plop_types::Message;

use crate::error::DeliveryError;

/// Frames buffered per connection before writes start failing as `Full`.
pub const OUTBOUND_BUFFER: usize = 256;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one physical connection (one device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Non-owning handle to a live connection. The session that owns the socket
/// holds the receiving end; dropping it makes every handle's writes fail.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnId,
    tx: mpsc::Sender<Message>,
}

impl Connection {
    /// Create a handle plus the receiver the socket writer drains.
    pub fn open(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Non-blocking write. A slow peer yields `Full` instead of stalling the caller.
    pub fn send(&self, msg: Message) -> Result<(), DeliveryError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Authoritative map of user -> live connections.
///
/// A user key exists iff it has at least one connection. The lock guards only
/// the map itself; writes to connections always happen after it is released.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    users: Arc<Mutex<HashMap<String, HashMap<ConnId, Connection>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device. Returns whether the user already had other devices online.
    pub async fn register(&self, user_id: &str, conn: Connection) -> bool {
        let mut users = self.users.lock().await;
        let devices = users.entry(user_id.to_string()).or_default();
        let had_others = !devices.is_empty();
        let conn_id = conn.id();
        devices.insert(conn_id, conn);

        info!(
            "{} registered for {} ({} device(s) online)",
            conn_id,
            user_id,
            devices.len()
        );
        had_others
    }

    /// Remove a device; drops the user entry once the last device is gone.
    pub async fn unregister(&self, user_id: &str, conn_id: ConnId) -> bool {
        let mut users = self.users.lock().await;
        let Some(devices) = users.get_mut(user_id) else {
            return false;
        };

        let removed = devices.remove(&conn_id).is_some();
        if devices.is_empty() {
            users.remove(user_id);
            info!("Last device for {} disconnected, user is offline", user_id);
        }
        removed
    }

    /// Write `msg` to every device of `user_id` except `exclude`.
    /// Returns how many writes succeeded; a failed write is logged and skipped.
    pub async fn send_to_user(
        &self,
        user_id: &str,
        msg: &Message,
        exclude: Option<ConnId>,
    ) -> usize {
        let targets = self.snapshot(user_id, exclude).await;
        if targets.is_empty() {
            debug!("No device to receive '{}' for {}", msg.kind.as_str(), user_id);
            return 0;
        }

        let mut delivered = 0;
        for conn in &targets {
            match conn.send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Write of '{}' to {} ({}) failed: {}",
                    msg.kind.as_str(),
                    user_id,
                    conn.id(),
                    e
                ),
            }
        }

        debug!(
            "Sent '{}' to {}/{} device(s) of {}",
            msg.kind.as_str(),
            delivered,
            targets.len(),
            user_id
        );
        delivered
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.users.lock().await.contains_key(user_id)
    }

    pub async fn device_count(&self, user_id: &str) -> usize {
        self.users
            .lock()
            .await
            .get(user_id)
            .map_or(0, |devices| devices.len())
    }

    pub async fn online_user_count(&self) -> usize {
        self.users.lock().await.len()
    }

    async fn snapshot(&self, user_id: &str, exclude: Option<ConnId>) -> Vec<Connection> {
        let users = self.users.lock().await;
        users
            .get(user_id)
            .map(|devices| {
                devices
                    .values()
                    .filter(|c| Some(c.id()) != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
