use crate::cache::{CounterCache, CounterKey};
use crate::event::{DomainEvent, EventEnvelope};
use crate::feed::FanoutDistributor;
use crate::notification::{NotificationKind, NotificationStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Applies consumed events to the feed, counters and notifications.
///
/// Every handler tolerates redelivery: feed writes and notification rows are
/// idempotent, counter adjustments are approximate by contract.
pub struct EventDispatcher {
    fanout: Arc<FanoutDistributor>,
    counters: CounterCache,
    notifications: NotificationStore,
}

impl EventDispatcher {
    pub fn new(
        fanout: Arc<FanoutDistributor>,
        counters: CounterCache,
        notifications: NotificationStore,
    ) -> Self {
        Self {
            fanout,
            counters,
            notifications,
        }
    }

    /// Handles one envelope. An error means the message should be redelivered.
    pub async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        debug!(
            id = envelope.id,
            event_type = %envelope.event_type(),
            aggregate_id = %envelope.aggregate_id,
            "Dispatching event"
        );

        match &envelope.event {
            DomainEvent::PostCreated(e) => {
                self.fanout
                    .distribute(e.author_id, e.post_id, e.created_at)
                    .await
                    .context("Fan-out failed")?;
                self.counters.increment(&CounterKey::UserPosts(e.author_id)).await;
            }
            DomainEvent::PostRemoved(e) => {
                self.fanout
                    .remove_by_entity(e.post_id)
                    .await
                    .context("Feed removal failed")?;
                self.counters.decrement(&CounterKey::UserPosts(e.author_id)).await;
                self.counters.invalidate(&CounterKey::PostLikes(e.post_id)).await;
                self.counters.invalidate(&CounterKey::PostComments(e.post_id)).await;
                // Likes and comments went with the post without events of their own
                self.notifications
                    .remove_for_post(e.post_id)
                    .context("Notification cleanup failed")?;
            }
            DomainEvent::CommentCreated(e) => {
                self.counters.increment(&CounterKey::PostComments(e.post_id)).await;
                self.notify(
                    e.post_author_id,
                    e.author_id,
                    NotificationKind::Comment,
                    e.comment_id,
                    Some(e.post_id),
                )?;
            }
            DomainEvent::CommentRemoved(e) => {
                self.counters.decrement(&CounterKey::PostComments(e.post_id)).await;
                self.unnotify(e.post_author_id, e.author_id, NotificationKind::Comment, e.comment_id)?;
            }
            DomainEvent::LikeAdded(e) => {
                self.counters.increment(&CounterKey::PostLikes(e.post_id)).await;
                self.notify(e.post_author_id, e.user_id, NotificationKind::Like, e.post_id, Some(e.post_id))?;
            }
            DomainEvent::LikeRemoved(e) => {
                self.counters.decrement(&CounterKey::PostLikes(e.post_id)).await;
                self.unnotify(e.post_author_id, e.user_id, NotificationKind::Like, e.post_id)?;
            }
            DomainEvent::FollowCreated(e) => {
                self.counters.increment(&CounterKey::UserFollowers(e.followee_id)).await;
                self.counters.increment(&CounterKey::UserFollowing(e.follower_id)).await;
                self.notify(e.followee_id, e.follower_id, NotificationKind::Follow, e.follow_id, None)?;
            }
            DomainEvent::FollowRemoved(e) => {
                self.counters.decrement(&CounterKey::UserFollowers(e.followee_id)).await;
                self.counters.decrement(&CounterKey::UserFollowing(e.follower_id)).await;
                self.unnotify(e.followee_id, e.follower_id, NotificationKind::Follow, e.follow_id)?;
            }
        }
        Ok(())
    }

    fn notify(
        &self,
        recipient: Uuid,
        actor: Uuid,
        kind: NotificationKind,
        entity: Uuid,
        post: Option<Uuid>,
    ) -> Result<()> {
        // No notifications for acting on your own content, or for a post
        // whose author was unknown when the event was written
        if recipient == actor || recipient.is_nil() {
            return Ok(());
        }
        self.notifications.record(recipient, actor, kind, entity, post)?;
        Ok(())
    }

    fn unnotify(
        &self,
        recipient: Uuid,
        actor: Uuid,
        kind: NotificationKind,
        entity: Uuid,
    ) -> Result<()> {
        if recipient == actor || recipient.is_nil() {
            return Ok(());
        }
        self.notifications.remove(recipient, actor, kind, entity)?;
        Ok(())
    }
}
