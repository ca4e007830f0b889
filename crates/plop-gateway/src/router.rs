use std::sync::Arc;

use tracing::{debug, info, warn};

use plop_types::{Message, MessageType};

use crate::offline::OfflineDelivery;
use crate::presence::{Connection, PresenceRegistry};
use crate::rate_limit::RateLimiter;
use crate::store::PseudoStore;
use crate::util::truncate;

/// What happened to one inbound frame. Every outcome is terminal for that frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Undecodable frame, dropped.
    Malformed,
    /// Liveness only.
    Ping,
    /// Plop with no `to`. Acked and counted against the cooldown, then
    /// dropped before any delivery attempt.
    NoRecipient,
    /// Plop inside the sender's cooldown window, silently dropped.
    Throttled,
    /// Plop written to this many of the recipient's devices.
    Delivered(usize),
    /// Plop handed to the offline queue and push escalation.
    Queued,
    /// Sync data rebroadcast to this many of the sender's other devices.
    Relayed(usize),
    /// Type the relay does not route, dropped.
    Unknown,
}

/// Classifies inbound frames and decides where each one goes.
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    presence: PresenceRegistry,
    limiter: RateLimiter,
    offline: OfflineDelivery,
    pseudos: Arc<dyn PseudoStore>,
}

impl MessageRouter {
    pub fn new(
        presence: PresenceRegistry,
        limiter: RateLimiter,
        offline: OfflineDelivery,
        pseudos: Arc<dyn PseudoStore>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                presence,
                limiter,
                offline,
                pseudos,
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    pub fn offline(&self) -> &OfflineDelivery {
        &self.inner.offline
    }

    pub fn pseudos(&self) -> Arc<dyn PseudoStore> {
        self.inner.pseudos.clone()
    }

    /// Decode and route one text frame received on `origin` from `sender`.
    pub async fn handle_frame(&self, sender: &str, origin: &Connection, text: &str) -> RouteOutcome {
        match serde_json::from_str::<Message>(text) {
            Ok(msg) => self.route(sender, origin, msg).await,
            Err(e) => {
                warn!(
                    "{} ({}) bad frame: {} -- raw: {}",
                    sender,
                    origin.id(),
                    e,
                    truncate(text, 200)
                );
                RouteOutcome::Malformed
            }
        }
    }

    /// Route a decoded frame. The sender identity and pending flag are always
    /// reassigned here; clients cannot set them.
    pub async fn route(&self, sender: &str, origin: &Connection, mut msg: Message) -> RouteOutcome {
        msg.from = Some(sender.to_string());
        msg.is_pending = false;
        debug!("Received '{}' from {} ({})", msg.kind.as_str(), sender, origin.id());

        match msg.kind {
            MessageType::Ping => RouteOutcome::Ping,
            MessageType::Plop => self.handle_plop(sender, origin, msg).await,
            MessageType::SyncDataBroadcast => {
                let n = self
                    .inner
                    .presence
                    .send_to_user(sender, &msg, Some(origin.id()))
                    .await;
                debug!("Relayed sync data from {} to {} other device(s)", sender, n);
                RouteOutcome::Relayed(n)
            }
            other => {
                warn!("Unknown message type '{}' from {}", other.as_str(), sender);
                RouteOutcome::Unknown
            }
        }
    }

    /// Cooldown and ack come first for every plop, addressed or not; only
    /// delivery needs a recipient.
    async fn handle_plop(&self, sender: &str, origin: &Connection, msg: Message) -> RouteOutcome {
        if !self.inner.limiter.allow(sender) {
            debug!("Cooldown active for {}, plop ignored", sender);
            return RouteOutcome::Throttled;
        }

        let to = msg.to.as_deref().unwrap_or_default();
        if let Err(e) = origin.send(Message::ack(sender, to)) {
            warn!("Could not ack plop to {} ({}): {}", sender, origin.id(), e);
        }

        let Some(recipient) = msg.recipient().map(str::to_string) else {
            warn!("Dropping plop from {}: recipient 'to' field is empty", sender);
            return RouteOutcome::NoRecipient;
        };

        self.deliver(&recipient, msg).await
    }

    /// Online delivery to every device of the recipient, falling back to the
    /// offline path when no device accepted the write.
    async fn deliver(&self, recipient: &str, msg: Message) -> RouteOutcome {
        let presence = &self.inner.presence;
        if presence.is_online(recipient).await {
            let n = presence.send_to_user(recipient, &msg, None).await;
            if n > 0 {
                info!(
                    "Plop from {} delivered to {} device(s) of {}",
                    msg.from.as_deref().unwrap_or_default(),
                    n,
                    recipient
                );
                return RouteOutcome::Delivered(n);
            }
            warn!("{} is registered but no device accepted the plop, queueing", recipient);
        }

        info!(
            "{} is offline, queueing plop from {}",
            recipient,
            msg.from.as_deref().unwrap_or_default()
        );
        self.inner.offline.dispatch(msg);
        RouteOutcome::Queued
    }
}
