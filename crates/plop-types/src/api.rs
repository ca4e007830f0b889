use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Connect --

/// Query string of the `/connect` WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub pseudo: Option<String>,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateIdResponse {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPseudosRequest {
    #[serde(default)]
    pub user_ids: Vec<String>,
}

pub type PseudosResponse = HashMap<String, String>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTokenRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// -- Invitations --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationParams {
    pub user_id: Option<String>,
    pub pseudo: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvitationResponse {
    pub code: String,
    pub validity_minutes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseInvitationRequest {
    pub code: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub pseudo: String,
}

/// Identity of the other side of a redeemed invitation or sync code.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactResponse {
    pub user_id: String,
    pub pseudo: String,
}

// -- Device sync --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSyncCodeParams {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncCodeResponse {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UseSyncCodeRequest {
    pub code: String,
}

// -- Health --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub online_users: usize,
}
