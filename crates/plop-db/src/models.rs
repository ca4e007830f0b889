//! Database row types. These map directly to SQLite rows and stay separate
//! from the plop-types wire models.

pub struct PendingMessageRow {
    /// Replaced on every overwrite, never reused.
    pub id: i64,
    pub recipient_id: String,
    pub sender_id: String,
    /// Serialized message JSON, stored verbatim.
    pub message: String,
    pub updated_at: String,
}

pub struct InvitationRow {
    pub code: String,
    pub creator_user_id: String,
    pub creator_pseudo: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl InvitationRow {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}
