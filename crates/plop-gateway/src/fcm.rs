//! Firebase Cloud Messaging (HTTP v1) push transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::push::{PushEscalator, PushNotification};
use crate::store::{DeviceTokenStore, blocking};
use crate::util::truncate;

pub const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com";

const ANDROID_CHANNEL_ID: &str = "plop_channel_id";
const APNS_SOUND: &str = "plop.aiff";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub endpoint: String,
    pub project_id: String,
    /// OAuth2 bearer token with the firebase.messaging scope.
    pub access_token: String,
}

pub struct FcmEscalator {
    client: reqwest::Client,
    config: FcmConfig,
    tokens: Arc<dyn DeviceTokenStore>,
}

/// What a single send told us about its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendOutcome {
    Delivered,
    InvalidToken,
    Transient,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(default)]
    error_code: Option<String>,
}

impl FcmEscalator {
    pub fn new(config: FcmConfig, tokens: Arc<dyn DeviceTokenStore>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project_id
        )
    }

    async fn send_one(&self, token: &str, n: &PushNotification) -> SendOutcome {
        let body = json!({
            "message": {
                "token": token,
                "notification": { "title": n.title, "body": n.body },
                "data": {
                    "senderId": n.sender_id,
                    "payload": n.body,
                    "isDefault": n.is_default.to_string(),
                },
                "android": {
                    "notification": { "channel_id": ANDROID_CHANNEL_ID, "icon": "icon" }
                },
                "apns": {
                    "payload": {
                        "aps": {
                            "alert": { "title": n.title, "body": n.body },
                            "badge": 1,
                            "sound": APNS_SOUND,
                        }
                    }
                }
            }
        });

        let resp = match self
            .client
            .post(self.send_url())
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("FCM request failed: {}", e);
                return SendOutcome::Transient;
            }
        };

        let status = resp.status();
        if status.is_success() {
            return SendOutcome::Delivered;
        }

        let text = resp.text().await.unwrap_or_default();
        let outcome = classify(status, &text);
        let snippet = truncate(&text, 200);
        warn!("FCM send failed ({}): {}", status, snippet);
        outcome
    }
}

/// Map a failed FCM response to whether its token should be dropped.
fn classify(status: StatusCode, body: &str) -> SendOutcome {
    if status == StatusCode::NOT_FOUND {
        return SendOutcome::InvalidToken;
    }

    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return SendOutcome::Transient;
    };

    let unregistered = parsed
        .error
        .details
        .iter()
        .filter_map(|d| d.error_code.as_deref())
        .any(|code| code == "UNREGISTERED" || code == "INVALID_ARGUMENT");

    if unregistered || parsed.error.status == "INVALID_ARGUMENT" {
        SendOutcome::InvalidToken
    } else {
        SendOutcome::Transient
    }
}

#[async_trait]
impl PushEscalator for FcmEscalator {
    async fn notify(&self, user_id: &str, notification: &PushNotification) -> Result<Vec<String>> {
        let store = self.tokens.clone();
        let user = user_id.to_string();
        let tokens = blocking(move || store.get(&user)).await?;

        if tokens.is_empty() {
            debug!("No push tokens for {}, skipping push", user_id);
            return Ok(Vec::new());
        }

        let mut invalid = Vec::new();
        for token in tokens {
            match self.send_one(&token, notification).await {
                SendOutcome::Delivered => {
                    debug!("Push delivered to a device of {}", user_id)
                }
                SendOutcome::InvalidToken => {
                    info!("Push token for {} is no longer valid", user_id);
                    invalid.push(token);
                }
                SendOutcome::Transient => {}
            }
        }

        Ok(invalid)
    }
}
