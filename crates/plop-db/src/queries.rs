use std::collections::HashMap;

use crate::Database;
use crate::models::{InvitationRow, PendingMessageRow};
use anyhow::Result;
use rusqlite::OptionalExtension;

const PSEUDO_LOOKUP_CHUNK: usize = 500;

impl Database {
    // -- Pending messages --

    /// Insert or overwrite the undelivered message from `sender_id` to `recipient_id`.
    /// An overwrite replaces the row, so it gets a new id.
    pub fn upsert_pending_message(
        &self,
        recipient_id: &str,
        sender_id: &str,
        message: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pending_messages (recipient_id, sender_id, message)
                 VALUES (?1, ?2, ?3)",
                (recipient_id, sender_id, message),
            )?;
            Ok(())
        })
    }

    pub fn get_pending_messages(&self, recipient_id: &str) -> Result<Vec<PendingMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient_id, sender_id, message, updated_at
                 FROM pending_messages
                 WHERE recipient_id = ?1
                 ORDER BY id",
            )?;

            let rows = stmt
                .query_map([recipient_id], |row| {
                    Ok(PendingMessageRow {
                        id: row.get(0)?,
                        recipient_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        message: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Clear a previously read batch for a recipient in one transaction. Rows
    /// overwritten or added since the read have other ids and are kept.
    /// Returns rows removed.
    pub fn delete_pending_messages(&self, recipient_id: &str, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM pending_messages WHERE recipient_id = ?1 AND id = ?2")?;
                for id in ids {
                    removed += stmt.execute((recipient_id, id))?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    // -- Device tokens --

    /// Tokens in registration order.
    pub fn get_device_tokens(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT token FROM device_tokens WHERE user_id = ?1 ORDER BY rowid")?;
            let tokens = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(tokens)
        })
    }

    /// Returns true if the token was new for this user.
    pub fn add_device_token(&self, user_id: &str, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO device_tokens (user_id, token) VALUES (?1, ?2)",
                (user_id, token),
            )?;
            Ok(n == 1)
        })
    }

    /// Remove exactly the listed tokens for a user. Returns how many existed.
    pub fn remove_device_tokens(&self, user_id: &str, tokens: &[String]) -> Result<usize> {
        if tokens.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM device_tokens WHERE user_id = ?1 AND token = ?2")?;
                for token in tokens {
                    removed += stmt.execute((user_id, token))?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    // -- Pseudos --

    pub fn save_user_pseudo(&self, user_id: &str, pseudo: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_pseudos (user_id, pseudo) VALUES (?1, ?2)
                 ON CONFLICT (user_id) DO UPDATE SET pseudo = excluded.pseudo",
                (user_id, pseudo),
            )?;
            Ok(())
        })
    }

    pub fn get_user_pseudo(&self, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let pseudo = conn
                .query_row(
                    "SELECT pseudo FROM user_pseudos WHERE user_id = ?1",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(pseudo)
        })
    }

    /// Batch-fetch pseudos. Unknown ids are simply absent from the map.
    /// Ids are queried in chunks to stay under SQLite's bound-variable limit.
    pub fn get_user_pseudos(&self, user_ids: &[String]) -> Result<HashMap<String, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let mut pseudos = HashMap::new();
            for chunk in user_ids.chunks(PSEUDO_LOOKUP_CHUNK) {
                let placeholders: Vec<String> =
                    (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
                let sql = format!(
                    "SELECT user_id, pseudo FROM user_pseudos WHERE user_id IN ({})",
                    placeholders.join(", ")
                );

                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<&dyn rusqlite::types::ToSql> = chunk
                    .iter()
                    .map(|id| id as &dyn rusqlite::types::ToSql)
                    .collect();

                let rows = stmt.query_map(params.as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (user_id, pseudo) = row?;
                    pseudos.insert(user_id, pseudo);
                }
            }

            Ok(pseudos)
        })
    }

    // -- Invitations --

    pub fn insert_invitation(&self, invitation: &InvitationRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO invitations (code, creator_user_id, creator_pseudo, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    invitation.code,
                    invitation.creator_user_id,
                    invitation.creator_pseudo,
                    invitation.expires_at
                ],
            )?;
            Ok(())
        })
    }

    /// Remove and return an invitation. Codes are single-use whether or not
    /// they turn out to be expired.
    pub fn take_invitation(&self, code: &str) -> Result<Option<InvitationRow>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    "SELECT code, creator_user_id, creator_pseudo, expires_at
                     FROM invitations WHERE code = ?1",
                    [code],
                    |row| {
                        Ok(InvitationRow {
                            code: row.get(0)?,
                            creator_user_id: row.get(1)?,
                            creator_pseudo: row.get(2)?,
                            expires_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;

            if row.is_some() {
                tx.execute("DELETE FROM invitations WHERE code = ?1", [code])?;
            }
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn delete_expired_invitations(&self, now: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM invitations WHERE expires_at < ?1", [now])?;
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn pending_message_upsert_overwrites_same_sender() {
        let db = db();
        db.upsert_pending_message("bob", "alice", r#"{"n":1}"#).unwrap();
        db.upsert_pending_message("bob", "alice", r#"{"n":2}"#).unwrap();
        db.upsert_pending_message("bob", "carol", r#"{"n":3}"#).unwrap();

        let rows = db.get_pending_messages("bob").unwrap();
        assert_eq!(rows.len(), 2);

        let from_alice = rows.iter().find(|r| r.sender_id == "alice").unwrap();
        assert_eq!(from_alice.message, r#"{"n":2}"#);
        assert_eq!(from_alice.recipient_id, "bob");
    }

    #[test]
    fn pending_messages_cleared_per_recipient() {
        let db = db();
        db.upsert_pending_message("bob", "alice", "{}").unwrap();
        db.upsert_pending_message("bob", "carol", "{}").unwrap();
        db.upsert_pending_message("dave", "alice", "{}").unwrap();

        let ids: Vec<i64> = db.get_pending_messages("bob").unwrap().iter().map(|r| r.id).collect();
        let dave: Vec<i64> = db.get_pending_messages("dave").unwrap().iter().map(|r| r.id).collect();

        // Another recipient's ids never match.
        assert_eq!(db.delete_pending_messages("bob", &dave).unwrap(), 0);
        assert_eq!(db.delete_pending_messages("bob", &ids).unwrap(), 2);
        assert!(db.get_pending_messages("bob").unwrap().is_empty());
        assert_eq!(db.get_pending_messages("dave").unwrap().len(), 1);
        assert_eq!(db.delete_pending_messages("nobody", &[]).unwrap(), 0);
    }

    #[test]
    fn clearing_a_read_batch_keeps_later_writes() {
        let db = db();
        db.upsert_pending_message("bob", "alice", r#"{"n":1}"#).unwrap();
        let read: Vec<i64> = db.get_pending_messages("bob").unwrap().iter().map(|r| r.id).collect();

        db.upsert_pending_message("bob", "alice", r#"{"n":2}"#).unwrap();
        db.upsert_pending_message("bob", "carol", r#"{"n":3}"#).unwrap();

        assert_eq!(db.delete_pending_messages("bob", &read).unwrap(), 0);
        let left = db.get_pending_messages("bob").unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].message, r#"{"n":2}"#);
        assert_eq!(left[1].sender_id, "carol");
    }

    #[test]
    fn device_tokens_dedup_and_prune() {
        let db = db();
        assert!(db.add_device_token("u", "t1").unwrap());
        assert!(db.add_device_token("u", "t2").unwrap());
        assert!(!db.add_device_token("u", "t1").unwrap());
        assert!(db.add_device_token("u", "t3").unwrap());
        assert!(db.add_device_token("other", "t1").unwrap());

        assert_eq!(db.get_device_tokens("u").unwrap(), vec!["t1", "t2", "t3"]);

        let removed = db
            .remove_device_tokens("u", &["t2".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.get_device_tokens("u").unwrap(), vec!["t1", "t3"]);
        assert_eq!(db.get_device_tokens("other").unwrap(), vec!["t1"]);
    }

    #[test]
    fn pseudos_upsert_and_batch_lookup() {
        let db = db();
        assert_eq!(db.get_user_pseudo("u1").unwrap(), None);

        db.save_user_pseudo("u1", "Ana").unwrap();
        db.save_user_pseudo("u1", "Anna").unwrap();
        db.save_user_pseudo("u2", "Ben").unwrap();

        assert_eq!(db.get_user_pseudo("u1").unwrap().as_deref(), Some("Anna"));

        let map = db
            .get_user_pseudos(&["u1".into(), "u2".into(), "u3".into()])
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["u2"], "Ben");
        assert!(db.get_user_pseudos(&[]).unwrap().is_empty());
    }

    #[test]
    fn pseudo_lookup_handles_more_ids_than_sqlite_binds() {
        let db = db();
        db.save_user_pseudo("u7", "Gus").unwrap();
        db.save_user_pseudo("u39999", "Zed").unwrap();

        let ids: Vec<String> = (0..40_000).map(|i| format!("u{}", i)).collect();
        let map = db.get_user_pseudos(&ids).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["u7"], "Gus");
        assert_eq!(map["u39999"], "Zed");
    }

    #[test]
    fn invitations_are_single_use() {
        let db = db();
        db.insert_invitation(&InvitationRow {
            code: "ABC123".into(),
            creator_user_id: "u1".into(),
            creator_pseudo: "Ana".into(),
            expires_at: 1_000,
        })
        .unwrap();

        let inv = db.take_invitation("ABC123").unwrap().unwrap();
        assert_eq!(inv.creator_user_id, "u1");
        assert!(!inv.is_expired(999));
        assert!(inv.is_expired(1_001));

        assert!(db.take_invitation("ABC123").unwrap().is_none());
    }

    #[test]
    fn expired_invitations_swept() {
        let db = db();
        for (code, expires_at) in [("OLD", 10), ("NEW", 100)] {
            db.insert_invitation(&InvitationRow {
                code: code.into(),
                creator_user_id: "u".into(),
                creator_pseudo: "p".into(),
                expires_at,
            })
            .unwrap();
        }

        assert_eq!(db.delete_expired_invitations(50).unwrap(), 1);
        assert!(db.take_invitation("OLD").unwrap().is_none());
        assert!(db.take_invitation("NEW").unwrap().is_some());
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = db();
        db.with_conn(|conn| crate::migrations::run(conn)).unwrap();
        db.upsert_pending_message("a", "b", "{}").unwrap();
    }
}
