use axum::{Json, extract::State};
use tracing::{debug, info};
use uuid::Uuid;

use plop_gateway::store::{DeviceTokenStore, blocking};
use plop_types::api::{
    GenerateIdResponse, GetPseudosRequest, PseudosResponse, SuccessResponse, UpdateTokenRequest,
};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn generate_id() -> Json<GenerateIdResponse> {
    let user_id = Uuid::new_v4();
    info!("Generated new user id {}", user_id);
    Json(GenerateIdResponse { user_id })
}

/// Known pseudos for the requested ids; unknown ids are simply absent.
pub async fn get_pseudos(
    State(state): State<AppState>,
    Json(req): Json<GetPseudosRequest>,
) -> ApiResult<Json<PseudosResponse>> {
    let db = state.db.clone();
    let pseudos = blocking(move || db.get_user_pseudos(&req.user_ids)).await?;
    Ok(Json(pseudos))
}

pub async fn update_token(
    State(state): State<AppState>,
    Json(req): Json<UpdateTokenRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    if req.user_id.is_empty() || req.token.is_empty() {
        return Err(ApiError::BadRequest("userId and token are required".into()));
    }

    let db = state.db.clone();
    let user = req.user_id.clone();
    let added = blocking(move || db.add_if_absent(&user, &req.token)).await?;
    if added {
        info!("New push token stored for {}", req.user_id);
    } else {
        debug!("Push token for {} already known", req.user_id);
    }

    Ok(Json(SuccessResponse { success: true }))
}
