use super::{FeedEntry, FeedRepository, FeedWriteError};
use crate::db::{from_db_time, parse_uuid, to_db_time, Database};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode};
use std::sync::Arc;
use uuid::Uuid;

/// Feed rows in the service database.
///
/// # Schema
/// ```sql
/// CREATE TABLE feed_entries (
///     id         INTEGER PRIMARY KEY AUTOINCREMENT,
///     user_id    TEXT NOT NULL,
///     post_id    TEXT NOT NULL,
///     created_at TEXT NOT NULL,
///     UNIQUE(user_id, post_id)
/// );
/// ```
#[derive(Clone)]
pub struct FeedStore {
    db: Arc<Database>,
}

impl FeedStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Number of rows for a post (test and ops helper)
    pub fn count_for_post(&self, post_id: Uuid) -> Result<u64> {
        let conn = self.db.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM feed_entries WHERE post_id = ?1",
                params![post_id.to_string()],
                |row| row.get(0),
            )
            .context("Failed to count feed entries")?;
        Ok(count as u64)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl FeedRepository for FeedStore {
    fn insert_batch(
        &self,
        post_id: Uuid,
        created_at: DateTime<Utc>,
        user_ids: &[Uuid],
    ) -> Result<usize, FeedWriteError> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.conn()?;
        let tx = conn
            .transaction()
            .context("Failed to begin feed batch")?;
        let post = post_id.to_string();
        let ts = to_db_time(&created_at);

        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO feed_entries (user_id, post_id, created_at) VALUES (?1, ?2, ?3)",
                )
                .context("Failed to prepare feed insert")?;

            for user_id in user_ids {
                if let Err(e) = stmt.execute(params![user_id.to_string(), post, ts]) {
                    // Dropping the transaction rolls the batch back
                    return Err(if is_unique_violation(&e) {
                        FeedWriteError::Duplicate
                    } else {
                        FeedWriteError::Other(
                            anyhow::Error::new(e).context("Failed to insert feed entry"),
                        )
                    });
                }
            }
        }

        tx.commit().context("Failed to commit feed batch")?;
        Ok(user_ids.len())
    }

    fn delete_by_post(&self, post_id: Uuid) -> Result<Vec<Uuid>> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction().context("Failed to begin feed delete")?;
        let post = post_id.to_string();

        let users = {
            let mut stmt = tx
                .prepare("SELECT user_id FROM feed_entries WHERE post_id = ?1")
                .context("Failed to prepare feed owner query")?;
            let rows = stmt
                .query_map(params![post], |row| row.get::<_, String>(0))
                .context("Failed to query feed owners")?
                .collect::<Result<Vec<String>, _>>()
                .context("Failed to read feed owners")?;
            rows.iter()
                .map(|raw| parse_uuid(raw))
                .collect::<Result<Vec<Uuid>>>()?
        };

        tx.execute("DELETE FROM feed_entries WHERE post_id = ?1", params![post])
            .context("Failed to delete feed entries")?;
        tx.commit().context("Failed to commit feed delete")?;
        Ok(users)
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        let conn = self.db.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM feed_entries WHERE id IN (
                    SELECT id FROM feed_entries
                    WHERE created_at < ?1
                    ORDER BY created_at ASC
                    LIMIT ?2
                )",
                params![to_db_time(&cutoff), limit as i64],
            )
            .context("Failed to delete expired feed entries")?;
        Ok(deleted)
    }

    fn list_for_user(&self, user_id: Uuid, offset: usize, limit: usize) -> Result<Vec<FeedEntry>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, post_id, created_at FROM feed_entries
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
            )
            .context("Failed to prepare feed page query")?;

        let rows = stmt
            .query_map(
                params![user_id.to_string(), limit as i64, offset as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .context("Failed to query feed page")?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, user, post, created_at) = row.context("Failed to read feed row")?;
            entries.push(FeedEntry {
                id,
                user_id: parse_uuid(&user)?,
                post_id: parse_uuid(&post)?,
                created_at: from_db_time(&created_at)?,
            });
        }
        Ok(entries)
    }
}
