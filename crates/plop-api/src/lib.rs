pub mod cleanup;
pub mod codes;
pub mod error;
pub mod invitations;
pub mod sync;
pub mod users;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};

use plop_db::Database;
use plop_gateway::PresenceRegistry;

use crate::sync::SyncCodes;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    /// Shared with the gateway; used to notify live devices.
    pub presence: PresenceRegistry,
    pub sync_codes: SyncCodes,
    pub invitation_ttl: Duration,
    pub sync_code_ttl: Duration,
}

/// HTTP routes for identity, contacts and device linking.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(users::ping))
        .route("/users/generate-id", get(users::generate_id))
        .route("/users/get-pseudos", post(users::get_pseudos))
        .route("/users/update-token", post(users::update_token))
        .route("/invitations/create", get(invitations::create_invitation))
        .route("/invitations/use", post(invitations::use_invitation))
        .route("/sync/create", get(sync::create_sync_code))
        .route("/sync/use", post(sync::use_sync_code))
        .with_state(state)
}
