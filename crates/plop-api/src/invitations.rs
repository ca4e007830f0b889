//! Single-use contact invitations. A code is consumed by its first use,
//! even when that use finds it expired.

use axum::{
    Json,
    extract::{Query, State},
};
use tracing::info;

use plop_db::models::InvitationRow;
use plop_gateway::store::blocking;
use plop_types::Message;
use plop_types::api::{
    ContactResponse, CreateInvitationParams, CreateInvitationResponse, UseInvitationRequest,
};

use crate::AppState;
use crate::codes::generate_code;
use crate::error::{ApiError, ApiResult};

pub async fn create_invitation(
    State(state): State<AppState>,
    Query(params): Query<CreateInvitationParams>,
) -> ApiResult<Json<CreateInvitationResponse>> {
    let (Some(user_id), Some(pseudo)) = (
        params.user_id.filter(|s| !s.is_empty()),
        params.pseudo.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("'userId' and 'pseudo' are required".into()));
    };

    let ttl = state.invitation_ttl;
    let expires_at = i64::try_from(ttl.as_secs())
        .ok()
        .and_then(|secs| chrono::Utc::now().timestamp().checked_add(secs))
        .unwrap_or(i64::MAX);
    let row = InvitationRow {
        code: generate_code(),
        creator_user_id: user_id,
        creator_pseudo: pseudo,
        expires_at,
    };
    let code = row.code.clone();
    let creator = row.creator_user_id.clone();

    let db = state.db.clone();
    blocking(move || db.insert_invitation(&row)).await?;

    info!("Invitation code {} created for {}", code, creator);
    Ok(Json(CreateInvitationResponse {
        code,
        validity_minutes: ttl.as_secs() / 60,
    }))
}

pub async fn use_invitation(
    State(state): State<AppState>,
    Json(req): Json<UseInvitationRequest>,
) -> ApiResult<Json<ContactResponse>> {
    let db = state.db.clone();
    let code = req.code.clone();
    let invitation = blocking(move || db.take_invitation(&code)).await?;

    let now = chrono::Utc::now().timestamp();
    let Some(invitation) = invitation.filter(|inv| !inv.is_expired(now)) else {
        return Err(ApiError::NotFound("Invitation code is invalid or has expired".into()));
    };

    let notice = Message::new_contact(&req.user_id, &req.pseudo);
    let n = state
        .presence
        .send_to_user(&invitation.creator_user_id, &notice, None)
        .await;

    info!(
        "Invitation {} used by {} to reach {} ({} device(s) notified)",
        req.code, req.user_id, invitation.creator_user_id, n
    );
    Ok(Json(ContactResponse {
        user_id: invitation.creator_user_id,
        pseudo: invitation.creator_pseudo,
    }))
}
