pub mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::rejection::WebSocketUpgradeRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use plop_api::sync::SyncCodes;
use plop_api::{AppState, AppStateInner};
use plop_db::Database;
use plop_gateway::connection;
use plop_gateway::offline::OfflineDelivery;
use plop_gateway::push::{Escalation, PushEscalator};
use plop_gateway::rate_limit::RateLimiter;
use plop_gateway::{MessageRouter, PresenceRegistry};
use plop_types::api::{ConnectParams, HealthResponse};

use crate::config::Config;

#[derive(Clone)]
pub struct ServerState {
    pub app: AppState,
    pub router: MessageRouter,
}

/// Wire the relay core and the HTTP collaborators around one database and one
/// presence registry.
pub fn assemble(db: Arc<Database>, config: &Config, escalator: Arc<dyn PushEscalator>) -> ServerState {
    let presence = PresenceRegistry::new();

    let escalation = Escalation::new(escalator, db.clone(), db.clone());
    let offline = OfflineDelivery::new(db.clone(), escalation, config.max_concurrent_pushes);
    let router = MessageRouter::new(
        presence.clone(),
        RateLimiter::new(config.message_cooldown),
        offline,
        db.clone(),
    );

    let app = Arc::new(AppStateInner {
        db,
        presence,
        sync_codes: SyncCodes::default(),
        invitation_ttl: config.invitation_ttl,
        sync_code_ttl: config.sync_code_ttl,
    });

    ServerState { app, router }
}

pub fn build_app(state: ServerState) -> Router {
    let relay_routes = Router::new()
        .route("/connect", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state.clone());

    Router::new()
        .merge(plop_api::router(state.app))
        .merge(relay_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(params): Query<ConnectParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(user_id) = params.user_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "userId is missing").into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!("Non-WebSocket request to /connect for {}", user_id);
            return rejection.into_response();
        }
    };

    let pseudo = params.pseudo;
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.router, user_id, pseudo))
        .into_response()
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        online_users: state.router.presence().online_user_count().await,
    })
}
