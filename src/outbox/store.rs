use super::{EventId, OutboxEvent};
use crate::db::{from_db_time, to_db_time, Database};
use crate::event::DomainEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Transaction};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Pending-row summary for operators.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OutboxBacklog {
    pub pending: u64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    /// (event_type, pending count), sorted by event type
    pub pending_by_type: Vec<(String, u64)>,
}

/// Persists outbox rows in the service database.
///
/// # Schema
/// ```sql
/// CREATE TABLE outbox_events (
///     id             INTEGER PRIMARY KEY AUTOINCREMENT,
///     aggregate_type TEXT NOT NULL,
///     aggregate_id   TEXT NOT NULL,
///     event_type     TEXT NOT NULL,
///     payload        TEXT NOT NULL,   -- JSON body
///     sent           INTEGER NOT NULL DEFAULT 0,
///     created_at     TEXT NOT NULL,
///     sent_at        TEXT
/// );
/// ```
#[derive(Clone)]
pub struct OutboxStore {
    db: Arc<Database>,
}

impl OutboxStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Appends a typed event inside the caller's transaction.
    ///
    /// Taking a `Transaction` ties the row to the domain write it documents:
    /// both commit or neither does.
    pub fn append(tx: &Transaction<'_>, event: &DomainEvent) -> Result<EventId> {
        let payload = event
            .to_payload()
            .context("Failed to serialize event payload")?;
        Self::append_raw(
            tx,
            event.aggregate_type().as_str(),
            &event.aggregate_id().to_string(),
            event.event_type().as_str(),
            &payload,
        )
    }

    /// Appends a row from its raw columns inside the caller's transaction.
    pub fn append_raw(
        tx: &Transaction<'_>,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: &Value,
    ) -> Result<EventId> {
        let body = serde_json::to_string(payload).context("Failed to encode payload")?;
        tx.execute(
            "INSERT INTO outbox_events (aggregate_type, aggregate_id, event_type, payload, sent, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                aggregate_type,
                aggregate_id,
                event_type,
                body,
                to_db_time(&Utc::now())
            ],
        )
        .context("Failed to append outbox event")?;
        Ok(tx.last_insert_rowid())
    }

    /// Fetches up to `limit` unsent rows with id greater than `after`, oldest first.
    ///
    /// Ids are assigned in creation order, so ordering by id is ordering by
    /// creation time.
    pub fn fetch_unsent(&self, after: EventId, limit: usize) -> Result<Vec<OutboxEvent>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, aggregate_type, aggregate_id, event_type, payload, sent, created_at
                 FROM outbox_events
                 WHERE sent = 0 AND id > ?1
                 ORDER BY id ASC
                 LIMIT ?2",
            )
            .context("Failed to prepare unsent query")?;

        let rows = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to query unsent events")?;

        let mut events = Vec::new();
        for row in rows {
            let (id, aggregate_type, aggregate_id, event_type, payload, sent, created_at) =
                row.context("Failed to read outbox row")?;
            // A body that is not valid JSON is kept as a string; the relay will
            // refuse to decode it and leave the row unsent.
            let payload = serde_json::from_str(&payload).unwrap_or(Value::String(payload));
            events.push(OutboxEvent {
                id,
                aggregate_type,
                aggregate_id,
                event_type,
                payload,
                sent,
                created_at: from_db_time(&created_at)?,
            });
        }
        Ok(events)
    }

    /// Marks the given rows sent in one statement. Returns rows actually flipped.
    ///
    /// Rows already marked by a racing instance are left alone, so `sent`
    /// transitions false→true at most once.
    pub fn mark_sent(&self, ids: &[EventId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE outbox_events SET sent = 1, sent_at = ?
             WHERE sent = 0 AND id IN ({})",
            placeholders
        );

        let now = to_db_time(&Utc::now());
        let values: Vec<SqlValue> = std::iter::once(SqlValue::from(now))
            .chain(ids.iter().map(|id| SqlValue::from(*id)))
            .collect();

        let conn = self.db.conn()?;
        let updated = conn
            .execute(&sql, params_from_iter(values))
            .context("Failed to mark outbox events sent")?;
        Ok(updated)
    }

    /// Number of rows still waiting to be published.
    pub fn count_unsent(&self) -> Result<u64> {
        let conn = self.db.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM outbox_events WHERE sent = 0",
                [],
                |row| row.get(0),
            )
            .context("Failed to count unsent events")?;
        Ok(count as u64)
    }

    /// Summary of unsent rows, grouped by event type.
    pub fn backlog(&self) -> Result<OutboxBacklog> {
        let conn = self.db.conn()?;
        let oldest: Option<String> = conn
            .query_row(
                "SELECT MIN(created_at) FROM outbox_events WHERE sent = 0",
                [],
                |row| row.get(0),
            )
            .context("Failed to read oldest pending event")?;

        let mut stmt = conn
            .prepare(
                "SELECT event_type, COUNT(*) FROM outbox_events
                 WHERE sent = 0 GROUP BY event_type ORDER BY event_type",
            )
            .context("Failed to prepare backlog query")?;
        let pending_by_type = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .context("Failed to query backlog")?
            .collect::<Result<Vec<(String, u64)>, _>>()
            .context("Failed to read backlog")?;

        Ok(OutboxBacklog {
            pending: pending_by_type.iter().map(|(_, n)| n).sum(),
            oldest_pending_at: oldest.as_deref().map(from_db_time).transpose()?,
            pending_by_type,
        })
    }
}
