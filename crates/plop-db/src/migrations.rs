use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            -- At most one undelivered message per (recipient, sender); last write wins.
            -- Every write gets a fresh id, so a flush can clear exactly what it read.
            CREATE TABLE pending_messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id    TEXT NOT NULL,
                sender_id       TEXT NOT NULL,
                message         TEXT NOT NULL,
                updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (recipient_id, sender_id)
            );

            CREATE TABLE device_tokens (
                user_id     TEXT NOT NULL,
                token       TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (user_id, token)
            );

            CREATE TABLE user_pseudos (
                user_id     TEXT PRIMARY KEY,
                pseudo      TEXT NOT NULL
            );

            CREATE TABLE invitations (
                code            TEXT PRIMARY KEY,
                creator_user_id TEXT NOT NULL,
                creator_pseudo  TEXT NOT NULL,
                expires_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_invitations_expiry ON invitations(expires_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
