//! Push-notification escalation for plops that found no live connection.
//!
//! The offline queue is the durability guarantee; pushing is best effort and
//! never retried here.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use plop_types::Message;

use crate::store::{DeviceTokenStore, PseudoStore, blocking};

/// Title used when the sender has no known pseudo.
pub const FALLBACK_TITLE: &str = "Someone";

/// Body used when the plop carries no text.
pub const FALLBACK_BODY: &str = "You received a plop!";

/// A rendered notification for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    /// Sender display name.
    pub title: String,
    pub body: String,
    pub sender_id: String,
    pub is_default: bool,
}

/// Push transport. Looks up the recipient's device tokens itself, attempts one
/// push per token, and returns the tokens the transport reported as
/// permanently invalid.
#[async_trait]
pub trait PushEscalator: Send + Sync {
    async fn notify(&self, user_id: &str, notification: &PushNotification) -> Result<Vec<String>>;
}

/// Escalator used when no push transport is configured.
pub struct DisabledEscalator;

#[async_trait]
impl PushEscalator for DisabledEscalator {
    async fn notify(&self, user_id: &str, _notification: &PushNotification) -> Result<Vec<String>> {
        debug!("Push disabled, not notifying {}", user_id);
        Ok(Vec::new())
    }
}

/// Renders a plop into a notification, hands it to the escalator and prunes
/// whatever tokens come back invalid.
#[derive(Clone)]
pub struct Escalation {
    escalator: Arc<dyn PushEscalator>,
    tokens: Arc<dyn DeviceTokenStore>,
    pseudos: Arc<dyn PseudoStore>,
}

impl Escalation {
    pub fn new(
        escalator: Arc<dyn PushEscalator>,
        tokens: Arc<dyn DeviceTokenStore>,
        pseudos: Arc<dyn PseudoStore>,
    ) -> Self {
        Self {
            escalator,
            tokens,
            pseudos,
        }
    }

    /// Escalate one undeliverable plop. Returns the number of tokens pruned.
    /// Failures are logged; nothing here is retried.
    pub async fn escalate(&self, msg: &Message) -> usize {
        let (Some(recipient), Some(sender)) = (msg.recipient(), msg.from.as_deref()) else {
            warn!("Not escalating '{}' without both sender and recipient", msg.kind.as_str());
            return 0;
        };

        let notification = self.render(sender, msg).await;
        info!("Escalating plop from {} to {} via push", sender, recipient);

        let invalid = match self.escalator.notify(recipient, &notification).await {
            Ok(invalid) => invalid,
            Err(e) => {
                warn!("Push to {} failed: {:#}", recipient, e);
                return 0;
            }
        };

        if invalid.is_empty() {
            return 0;
        }

        info!("Pruning {} invalid push token(s) for {}", invalid.len(), recipient);
        let tokens = self.tokens.clone();
        let user = recipient.to_string();
        match blocking(move || tokens.remove_tokens(&user, &invalid)).await {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to prune push tokens for {}: {:#}", recipient, e);
                0
            }
        }
    }

    async fn render(&self, sender: &str, msg: &Message) -> PushNotification {
        let pseudos = self.pseudos.clone();
        let sender_id = sender.to_string();
        let title = match blocking(move || pseudos.pseudo(&sender_id)).await {
            Ok(Some(pseudo)) if !pseudo.is_empty() => pseudo,
            Ok(_) => FALLBACK_TITLE.to_string(),
            Err(e) => {
                warn!("Pseudo lookup for {} failed, using fallback: {:#}", sender, e);
                FALLBACK_TITLE.to_string()
            }
        };

        let body = msg
            .text()
            .filter(|t| !t.is_empty())
            .unwrap_or(FALLBACK_BODY)
            .to_string();

        PushNotification {
            title,
            body,
            sender_id: sender.to_string(),
            is_default: msg.is_default,
        }
    }
}
