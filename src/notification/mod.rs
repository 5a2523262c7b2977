//! Notification rows derived from consumed events.
//!
//! One row per `(recipient, kind, actor, entity)`; recording the same
//! notification twice is a no-op, so redelivered events are harmless.
//! Like and comment notifications also carry the post they concern, so a
//! removed post takes them with it.

use crate::db::{from_db_time, parse_uuid, to_db_time, Database};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
            NotificationKind::Follow => "follow",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "like" => Ok(NotificationKind::Like),
            "comment" => Ok(NotificationKind::Comment),
            "follow" => Ok(NotificationKind::Follow),
            other => Err(anyhow!("unknown notification kind '{}'", other)),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: Uuid,
    pub actor_id: Uuid,
    pub kind: NotificationKind,
    /// Post id for likes and comments, follow id for follows
    pub entity_id: Uuid,
    /// Post the notification concerns; `None` for follows
    pub post_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationStore {
    db: Arc<Database>,
}

impl NotificationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Records a notification. Returns false when it already existed.
    pub fn record(
        &self,
        recipient_id: Uuid,
        actor_id: Uuid,
        kind: NotificationKind,
        entity_id: Uuid,
        post_id: Option<Uuid>,
    ) -> Result<bool> {
        let conn = self.db.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO notifications
                 (recipient_id, actor_id, kind, entity_id, post_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    recipient_id.to_string(),
                    actor_id.to_string(),
                    kind.as_str(),
                    entity_id.to_string(),
                    post_id.map(|id| id.to_string()),
                    to_db_time(&Utc::now())
                ],
            )
            .context("Failed to record notification")?;
        if inserted == 0 {
            debug!(recipient_id = %recipient_id, kind = %kind, "Notification already recorded");
        }
        Ok(inserted > 0)
    }

    /// Removes a notification. Returns false when there was none.
    pub fn remove(
        &self,
        recipient_id: Uuid,
        actor_id: Uuid,
        kind: NotificationKind,
        entity_id: Uuid,
    ) -> Result<bool> {
        let conn = self.db.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM notifications
                 WHERE recipient_id = ?1 AND actor_id = ?2 AND kind = ?3 AND entity_id = ?4",
                params![
                    recipient_id.to_string(),
                    actor_id.to_string(),
                    kind.as_str(),
                    entity_id.to_string()
                ],
            )
            .context("Failed to remove notification")?;
        Ok(deleted > 0)
    }

    /// Removes every notification about `post_id`; returns how many.
    pub fn remove_for_post(&self, post_id: Uuid) -> Result<usize> {
        let conn = self.db.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM notifications WHERE post_id = ?1",
                params![post_id.to_string()],
            )
            .context("Failed to remove notifications for post")?;
        Ok(deleted)
    }

    /// Newest first
    pub fn list_for(&self, recipient_id: Uuid, limit: usize) -> Result<Vec<Notification>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, recipient_id, actor_id, kind, entity_id, post_id, created_at
                 FROM notifications WHERE recipient_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )
            .context("Failed to prepare notification query")?;

        let rows = stmt
            .query_map(params![recipient_id.to_string(), limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to query notifications")?;

        let mut out = Vec::new();
        for row in rows {
            let (id, recipient, actor, kind, entity, post, created_at) =
                row.context("Failed to read notification row")?;
            out.push(Notification {
                id,
                recipient_id: parse_uuid(&recipient)?,
                actor_id: parse_uuid(&actor)?,
                kind: NotificationKind::parse(&kind)?,
                entity_id: parse_uuid(&entity)?,
                post_id: post.as_deref().map(parse_uuid).transpose()?,
                created_at: from_db_time(&created_at)?,
            });
        }
        Ok(out)
    }
}
