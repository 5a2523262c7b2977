use anyhow::{Context, Result};
use rusqlite::Connection;

pub(super) fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = OFF;

        CREATE TABLE IF NOT EXISTS outbox_events (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            aggregate_type TEXT NOT NULL,
            aggregate_id   TEXT NOT NULL,
            event_type     TEXT NOT NULL,
            payload        TEXT NOT NULL,
            sent           INTEGER NOT NULL DEFAULT 0,
            created_at     TEXT NOT NULL,
            sent_at        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_unsent ON outbox_events(sent, id);

        CREATE TABLE IF NOT EXISTS feed_entries (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            post_id    TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(user_id, post_id)
        );
        CREATE INDEX IF NOT EXISTS idx_feed_post ON feed_entries(post_id);
        CREATE INDEX IF NOT EXISTS idx_feed_created ON feed_entries(created_at);
        CREATE INDEX IF NOT EXISTS idx_feed_user ON feed_entries(user_id, created_at);

        CREATE TABLE IF NOT EXISTS posts (
            id         TEXT PRIMARY KEY,
            author_id  TEXT NOT NULL,
            body       TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id);

        CREATE TABLE IF NOT EXISTS comments (
            id         TEXT PRIMARY KEY,
            post_id    TEXT NOT NULL,
            author_id  TEXT NOT NULL,
            body       TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);

        CREATE TABLE IF NOT EXISTS likes (
            id         TEXT PRIMARY KEY,
            post_id    TEXT NOT NULL,
            user_id    TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS follows (
            id          TEXT PRIMARY KEY,
            follower_id TEXT NOT NULL,
            followee_id TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(follower_id, followee_id)
        );
        CREATE INDEX IF NOT EXISTS idx_follows_followee ON follows(followee_id);

        CREATE TABLE IF NOT EXISTS notifications (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_id TEXT NOT NULL,
            actor_id     TEXT NOT NULL,
            kind         TEXT NOT NULL,
            entity_id    TEXT NOT NULL,
            post_id      TEXT,
            created_at   TEXT NOT NULL,
            UNIQUE(recipient_id, kind, actor_id, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_post ON notifications(post_id);",
    )
    .context("Failed to create tables")?;
    Ok(())
}
