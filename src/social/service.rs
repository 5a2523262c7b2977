use super::{load_comment, load_post, Comment, Post};
use crate::db::{to_db_time, Database};
use crate::event::{
    CommentCreated, CommentRemoved, DomainEvent, FollowChanged, LikeChanged, PostCreated,
    PostRemoved,
};
use crate::outbox::OutboxStore;
use crate::rate_limit::{Action, RateDecision, RateLimiter};
use anyhow::Context;
use chrono::{SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Caller-facing outcome of a rejected write
#[derive(Debug)]
pub enum WriteError {
    RateLimited {
        action: Action,
        retry_after: Option<Duration>,
    },
    NotFound {
        entity: &'static str,
        id: Uuid,
    },
    AlreadyExists(&'static str),
    /// The caller does not own the entity it tried to remove
    NotOwner,
    InvalidInput(String),
    Storage(anyhow::Error),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::RateLimited {
                action,
                retry_after: Some(after),
            } => write!(f, "rate limit exceeded for {}, retry in {}s", action, after.as_secs()),
            WriteError::RateLimited { action, .. } => {
                write!(f, "rate limit exceeded for {}", action)
            }
            WriteError::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id),
            WriteError::AlreadyExists(entity) => write!(f, "{} already exists", entity),
            WriteError::NotOwner => write!(f, "only the author can remove this"),
            WriteError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            WriteError::Storage(e) => write!(f, "storage error: {:#}", e),
        }
    }
}

impl std::error::Error for WriteError {}

impl From<anyhow::Error> for WriteError {
    fn from(e: anyhow::Error) -> Self {
        WriteError::Storage(e)
    }
}

/// Domain write path.
///
/// Every write is admitted by the rate limiter, then the row change and its
/// outbox event commit in one transaction.
pub struct WriteService {
    db: Arc<Database>,
    limiter: Arc<RateLimiter>,
}

impl WriteService {
    pub fn new(db: Arc<Database>, limiter: Arc<RateLimiter>) -> Self {
        Self { db, limiter }
    }

    pub async fn create_post(&self, author_id: Uuid, body: &str) -> Result<Post, WriteError> {
        let body = non_empty(body)?;
        self.admit(Action::CreatePost, author_id).await?;

        let post = Post {
            id: Uuid::now_v7(),
            author_id,
            body: body.to_string(),
            created_at: Utc::now().trunc_subsecs(6),
        };
        self.unit_of_work(|tx| {
            tx.execute(
                "INSERT INTO posts (id, author_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    post.id.to_string(),
                    author_id.to_string(),
                    post.body,
                    to_db_time(&post.created_at)
                ],
            )
            .context("Failed to insert post")?;
            OutboxStore::append(
                tx,
                &DomainEvent::PostCreated(PostCreated {
                    post_id: post.id,
                    author_id,
                    created_at: post.created_at,
                }),
            )?;
            Ok(())
        })?;

        info!(post_id = %post.id, author_id = %author_id, "Post created");
        Ok(post)
    }

    /// Removes a post with its comments and likes.
    pub async fn remove_post(&self, author_id: Uuid, post_id: Uuid) -> Result<(), WriteError> {
        self.unit_of_work(|tx| {
            let post = load_post(tx, post_id)?.ok_or(WriteError::NotFound {
                entity: "post",
                id: post_id,
            })?;
            if post.author_id != author_id {
                return Err(WriteError::NotOwner);
            }
            let id = post_id.to_string();
            tx.execute("DELETE FROM comments WHERE post_id = ?1", params![id])
                .context("Failed to delete post comments")?;
            tx.execute("DELETE FROM likes WHERE post_id = ?1", params![id])
                .context("Failed to delete post likes")?;
            tx.execute("DELETE FROM posts WHERE id = ?1", params![id])
                .context("Failed to delete post")?;
            OutboxStore::append(
                tx,
                &DomainEvent::PostRemoved(PostRemoved { post_id, author_id }),
            )?;
            Ok(())
        })?;

        info!(post_id = %post_id, "Post removed");
        Ok(())
    }

    pub async fn add_comment(
        &self,
        author_id: Uuid,
        post_id: Uuid,
        body: &str,
    ) -> Result<Comment, WriteError> {
        let body = non_empty(body)?;
        self.admit(Action::CreateComment, author_id).await?;

        let comment = Comment {
            id: Uuid::now_v7(),
            post_id,
            author_id,
            body: body.to_string(),
            created_at: Utc::now().trunc_subsecs(6),
        };
        self.unit_of_work(|tx| {
            let post = load_post(tx, post_id)?.ok_or(WriteError::NotFound {
                entity: "post",
                id: post_id,
            })?;
            tx.execute(
                "INSERT INTO comments (id, post_id, author_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    comment.id.to_string(),
                    post_id.to_string(),
                    author_id.to_string(),
                    comment.body,
                    to_db_time(&comment.created_at)
                ],
            )
            .context("Failed to insert comment")?;
            OutboxStore::append(
                tx,
                &DomainEvent::CommentCreated(CommentCreated {
                    comment_id: comment.id,
                    post_id,
                    post_author_id: post.author_id,
                    author_id,
                    created_at: comment.created_at,
                }),
            )?;
            Ok(())
        })?;

        debug!(comment_id = %comment.id, post_id = %post_id, "Comment added");
        Ok(comment)
    }

    pub async fn remove_comment(&self, author_id: Uuid, comment_id: Uuid) -> Result<(), WriteError> {
        self.unit_of_work(|tx| {
            let comment = load_comment(tx, comment_id)?.ok_or(WriteError::NotFound {
                entity: "comment",
                id: comment_id,
            })?;
            if comment.author_id != author_id {
                return Err(WriteError::NotOwner);
            }
            // The post may already be gone; the author is then unknown
            let post_author_id = load_post(tx, comment.post_id)?
                .map(|p| p.author_id)
                .unwrap_or(Uuid::nil());
            tx.execute(
                "DELETE FROM comments WHERE id = ?1",
                params![comment_id.to_string()],
            )
            .context("Failed to delete comment")?;
            OutboxStore::append(
                tx,
                &DomainEvent::CommentRemoved(CommentRemoved {
                    comment_id,
                    post_id: comment.post_id,
                    post_author_id,
                    author_id,
                }),
            )?;
            Ok(())
        })
    }

    /// Returns the new like's id.
    pub async fn add_like(&self, user_id: Uuid, post_id: Uuid) -> Result<Uuid, WriteError> {
        self.admit(Action::AddLike, user_id).await?;

        let like_id = Uuid::now_v7();
        self.unit_of_work(|tx| {
            let post = load_post(tx, post_id)?.ok_or(WriteError::NotFound {
                entity: "post",
                id: post_id,
            })?;
            if find_like(tx, post_id, user_id)?.is_some() {
                return Err(WriteError::AlreadyExists("like"));
            }
            tx.execute(
                "INSERT INTO likes (id, post_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    like_id.to_string(),
                    post_id.to_string(),
                    user_id.to_string(),
                    to_db_time(&Utc::now())
                ],
            )
            .context("Failed to insert like")?;
            OutboxStore::append(
                tx,
                &DomainEvent::LikeAdded(LikeChanged {
                    like_id,
                    post_id,
                    post_author_id: post.author_id,
                    user_id,
                }),
            )?;
            Ok(())
        })?;
        Ok(like_id)
    }

    pub async fn remove_like(&self, user_id: Uuid, post_id: Uuid) -> Result<(), WriteError> {
        self.unit_of_work(|tx| {
            let like_id = find_like(tx, post_id, user_id)?.ok_or(WriteError::NotFound {
                entity: "like",
                id: post_id,
            })?;
            let post_author_id = load_post(tx, post_id)?
                .map(|p| p.author_id)
                .unwrap_or(Uuid::nil());
            tx.execute("DELETE FROM likes WHERE id = ?1", params![like_id.to_string()])
                .context("Failed to delete like")?;
            OutboxStore::append(
                tx,
                &DomainEvent::LikeRemoved(LikeChanged {
                    like_id,
                    post_id,
                    post_author_id,
                    user_id,
                }),
            )?;
            Ok(())
        })
    }

    /// Returns the new follow's id.
    pub async fn follow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<Uuid, WriteError> {
        if follower_id == followee_id {
            return Err(WriteError::InvalidInput("cannot follow yourself".to_string()));
        }
        self.admit(Action::Follow, follower_id).await?;

        let follow_id = Uuid::now_v7();
        self.unit_of_work(|tx| {
            if find_follow(tx, follower_id, followee_id)?.is_some() {
                return Err(WriteError::AlreadyExists("follow"));
            }
            tx.execute(
                "INSERT INTO follows (id, follower_id, followee_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    follow_id.to_string(),
                    follower_id.to_string(),
                    followee_id.to_string(),
                    to_db_time(&Utc::now())
                ],
            )
            .context("Failed to insert follow")?;
            OutboxStore::append(
                tx,
                &DomainEvent::FollowCreated(FollowChanged {
                    follow_id,
                    follower_id,
                    followee_id,
                }),
            )?;
            Ok(())
        })?;
        Ok(follow_id)
    }

    pub async fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<(), WriteError> {
        self.unit_of_work(|tx| {
            let follow_id = find_follow(tx, follower_id, followee_id)?.ok_or(
                WriteError::NotFound {
                    entity: "follow",
                    id: followee_id,
                },
            )?;
            tx.execute(
                "DELETE FROM follows WHERE id = ?1",
                params![follow_id.to_string()],
            )
            .context("Failed to delete follow")?;
            OutboxStore::append(
                tx,
                &DomainEvent::FollowRemoved(FollowChanged {
                    follow_id,
                    follower_id,
                    followee_id,
                }),
            )?;
            Ok(())
        })
    }

    async fn admit(&self, action: Action, subject: Uuid) -> Result<(), WriteError> {
        match self
            .limiter
            .check_and_consume(action, &subject.to_string())
            .await?
        {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Rejected { retry_after, .. } => {
                Err(WriteError::RateLimited { action, retry_after })
            }
        }
    }

    /// Runs `f` in one transaction; any error rolls back the row change and
    /// its outbox event together.
    fn unit_of_work<T, F>(&self, f: F) -> Result<T, WriteError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, WriteError>,
    {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction().context("Failed to begin write")?;
        let value = f(&tx)?;
        tx.commit().context("Failed to commit write")?;
        Ok(value)
    }
}

fn non_empty(body: &str) -> Result<&str, WriteError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(WriteError::InvalidInput("body must not be empty".to_string()));
    }
    Ok(trimmed)
}

fn find_like(tx: &Transaction<'_>, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Uuid>> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT id FROM likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to look up like")?;
    raw.map(|id| crate::db::parse_uuid(&id)).transpose()
}

fn find_follow(
    tx: &Transaction<'_>,
    follower_id: Uuid,
    followee_id: Uuid,
) -> anyhow::Result<Option<Uuid>> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT id FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id.to_string(), followee_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to look up follow")?;
    raw.map(|id| crate::db::parse_uuid(&id)).transpose()
}
