//! Device linking. Sync codes live in memory only; a restart invalidates them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::{
    Json,
    extract::{Query, State},
};
use tracing::{info, warn};

use plop_gateway::store::{PseudoStore, blocking};
use plop_types::Message;
use plop_types::api::{ContactResponse, CreateSyncCodeParams, SyncCodeResponse, UseSyncCodeRequest};

use crate::AppState;
use crate::codes::generate_code;
use crate::error::{ApiError, ApiResult};

struct SyncCode {
    user_id: String,
    /// `None` when the ttl runs past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl SyncCode {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now <= at)
    }
}

/// Short-lived code -> user id map.
#[derive(Clone, Default)]
pub struct SyncCodes {
    codes: Arc<Mutex<HashMap<String, SyncCode>>>,
}

impl SyncCodes {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SyncCode>> {
        self.codes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Issue a fresh code for `user_id`, valid for `ttl`.
    pub fn create(&self, user_id: &str, ttl: Duration) -> String {
        let mut codes = self.lock();
        let code = loop {
            let candidate = generate_code();
            if !codes.contains_key(&candidate) {
                break candidate;
            }
        };
        codes.insert(
            code.clone(),
            SyncCode {
                user_id: user_id.to_string(),
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        code
    }

    /// Consume `code`. Returns the owning user unless it is unknown or expired.
    pub fn take(&self, code: &str, now: Instant) -> Option<String> {
        self.lock()
            .remove(code)
            .filter(|c| c.is_live(now))
            .map(|c| c.user_id)
    }

    /// Drop expired codes. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut codes = self.lock();
        let before = codes.len();
        codes.retain(|_, c| c.is_live(now));
        before - codes.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub async fn create_sync_code(
    State(state): State<AppState>,
    Query(params): Query<CreateSyncCodeParams>,
) -> ApiResult<Json<SyncCodeResponse>> {
    let Some(user_id) = params.user_id.filter(|s| !s.is_empty()) else {
        return Err(ApiError::BadRequest("userId is required".into()));
    };

    let code = state.sync_codes.create(&user_id, state.sync_code_ttl);
    info!("Sync code created for {}", user_id);
    Ok(Json(SyncCodeResponse { code }))
}

/// Redeem a sync code from a new device: the user's live devices are asked to
/// push their state, and the new device learns which identity it joined.
pub async fn use_sync_code(
    State(state): State<AppState>,
    Json(req): Json<UseSyncCodeRequest>,
) -> ApiResult<Json<ContactResponse>> {
    let Some(user_id) = state.sync_codes.take(&req.code, Instant::now()) else {
        return Err(ApiError::NotFound("Sync code is invalid or has expired".into()));
    };

    let n = state
        .presence
        .send_to_user(&user_id, &Message::sync_request(), None)
        .await;

    let db = state.db.clone();
    let user = user_id.clone();
    let pseudo = match blocking(move || db.pseudo(&user)).await {
        Ok(pseudo) => pseudo.unwrap_or_default(),
        Err(e) => {
            warn!("Pseudo lookup for {} failed: {:#}", user_id, e);
            String::new()
        }
    };

    info!("Sync code used, linking to {} ({} device(s) asked to sync)", user_id, n);
    Ok(Json(ContactResponse { user_id, pseudo }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{get, post, state};
    use axum::http::StatusCode;
    use plop_gateway::Connection;
    use plop_types::MessageType;
    use serde_json::json;

    #[test]
    fn codes_expire_and_are_single_use() {
        let codes = SyncCodes::default();
        let ttl = Duration::from_secs(60);
        let live = codes.create("a", ttl);
        let stale = codes.create("b", ttl);

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(codes.take(&stale, later), None);
        assert_eq!(codes.take(&live, Instant::now()).as_deref(), Some("a"));
        assert_eq!(codes.take(&live, Instant::now()), None);
        assert!(codes.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let codes = SyncCodes::default();
        codes.create("a", Duration::from_secs(10));
        codes.create("b", Duration::from_secs(600));

        assert_eq!(codes.sweep(Instant::now() + Duration::from_secs(60)), 1);
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn unrepresentable_ttl_never_expires() {
        let codes = SyncCodes::default();
        let code = codes.create("a", Duration::MAX);

        let much_later = Instant::now() + Duration::from_secs(10 * 365 * 24 * 3600);
        assert_eq!(codes.sweep(much_later), 0);
        assert_eq!(codes.take(&code, much_later).as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn using_a_code_asks_every_device_to_sync() {
        let s = state();
        s.db.save_user_pseudo("a", "Alice").unwrap();
        let (d1, mut rx1) = Connection::open(8);
        let (d2, mut rx2) = Connection::open(8);
        s.presence.register("a", d1).await;
        s.presence.register("a", d2).await;

        let (status, body) = get(&s, "/sync/create?userId=a").await;
        assert_eq!(status, StatusCode::OK);
        let code = body["code"].as_str().unwrap().to_string();

        let (status, body) = post(&s, "/sync/use", json!({"code": code})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"userId": "a", "pseudo": "Alice"}));
        assert_eq!(rx1.try_recv().unwrap().kind, MessageType::SyncRequest);
        assert_eq!(rx2.try_recv().unwrap().kind, MessageType::SyncRequest);

        let (status, _) = post(&s, "/sync/use", json!({"code": code})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_requires_user_id() {
        let s = state();
        let (status, body) = get(&s, "/sync/create").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "userId is required");
    }
}
