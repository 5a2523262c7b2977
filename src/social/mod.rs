//! System-of-record tables for posts, comments, likes and follows.

use crate::cache::{CountSource, CounterKey};
use crate::db::{from_db_time, parse_uuid, Database};
use crate::feed::SubscriberSource;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

mod service;


pub use service::{WriteError, WriteService};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Read side of the social tables.
#[derive(Clone)]
pub struct SocialStore {
    db: Arc<Database>,
}

impl SocialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<Post>> {
        let conn = self.db.conn()?;
        load_post(&conn, id)
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Option<Comment>> {
        let conn = self.db.conn()?;
        load_comment(&conn, id)
    }

    /// Users following `user_id`
    pub fn followers_of(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.user_column(
            "SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY created_at, rowid",
            user_id,
        )
    }

    /// Users `user_id` follows
    pub fn following_of(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.user_column(
            "SELECT followee_id FROM follows WHERE follower_id = ?1 ORDER BY created_at, rowid",
            user_id,
        )
    }

    fn user_column(&self, sql: &str, user_id: Uuid) -> Result<Vec<Uuid>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(sql).context("Failed to prepare follow query")?;
        let rows = stmt
            .query_map(params![user_id.to_string()], |row| row.get::<_, String>(0))
            .context("Failed to query follows")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read follows")?;
        rows.iter().map(|raw| parse_uuid(raw)).collect()
    }
}

impl SubscriberSource for SocialStore {
    fn subscribers_of(&self, creator_id: Uuid) -> Result<Vec<Uuid>> {
        self.followers_of(creator_id)
    }
}

impl CountSource for SocialStore {
    fn count(&self, key: &CounterKey) -> Result<i64> {
        let (sql, id) = match key {
            CounterKey::PostLikes(id) => ("SELECT COUNT(*) FROM likes WHERE post_id = ?1", id),
            CounterKey::PostComments(id) => {
                ("SELECT COUNT(*) FROM comments WHERE post_id = ?1", id)
            }
            CounterKey::UserFollowers(id) => {
                ("SELECT COUNT(*) FROM follows WHERE followee_id = ?1", id)
            }
            CounterKey::UserFollowing(id) => {
                ("SELECT COUNT(*) FROM follows WHERE follower_id = ?1", id)
            }
            CounterKey::UserPosts(id) => ("SELECT COUNT(*) FROM posts WHERE author_id = ?1", id),
        };
        let conn = self.db.conn()?;
        conn.query_row(sql, params![id.to_string()], |row| row.get(0))
            .with_context(|| format!("Failed to count {}", key))
    }
}

pub(crate) fn load_post(conn: &Connection, id: Uuid) -> Result<Option<Post>> {
    let row = conn
        .query_row(
            "SELECT id, author_id, body, created_at FROM posts WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .context("Failed to load post")?;

    match row {
        Some((id, author_id, body, created_at)) => Ok(Some(Post {
            id: parse_uuid(&id)?,
            author_id: parse_uuid(&author_id)?,
            body,
            created_at: from_db_time(&created_at)?,
        })),
        None => Ok(None),
    }
}

pub(crate) fn load_comment(conn: &Connection, id: Uuid) -> Result<Option<Comment>> {
    let row = conn
        .query_row(
            "SELECT id, post_id, author_id, body, created_at FROM comments WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .context("Failed to load comment")?;

    match row {
        Some((id, post_id, author_id, body, created_at)) => Ok(Some(Comment {
            id: parse_uuid(&id)?,
            post_id: parse_uuid(&post_id)?,
            author_id: parse_uuid(&author_id)?,
            body,
            created_at: from_db_time(&created_at)?,
        })),
        None => Ok(None),
    }
}
