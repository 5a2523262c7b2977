use super::*;
use crate::cache::{CounterCache, CounterKey, MemoryKvStore};
use crate::db::Database;
use crate::event::{
    CommentCreated, DomainEvent, EventEnvelope, FollowChanged, LikeChanged, PostCreated,
    PostRemoved,
};
use crate::feed::{FanoutDistributor, FeedPageCache, FeedStore};
use crate::notification::{NotificationKind, NotificationStore};
use chrono::Utc;
use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Harness {
    db: Arc<Database>,
    feed: Arc<FeedStore>,
    counters: CounterCache,
    notifications: NotificationStore,
    dispatcher: EventDispatcher,
}

fn harness() -> Harness {
    let db = Arc::new(Database::in_memory().unwrap());
    let kv = Arc::new(MemoryKvStore::new());
    let feed = Arc::new(FeedStore::new(db.clone()));
    let fanout = Arc::new(FanoutDistributor::new(
        Arc::new(crate::social::SocialStore::new(db.clone())),
        feed.clone(),
        FeedPageCache::new(kv.clone(), Duration::from_secs(300)),
        50,
    ));
    let counters = CounterCache::new(kv, CounterCache::DEFAULT_TTL);
    let notifications = NotificationStore::new(db.clone());
    let dispatcher = EventDispatcher::new(fanout, counters.clone(), notifications.clone());
    Harness {
        db,
        feed,
        counters,
        notifications,
        dispatcher,
    }
}

fn envelope(event: DomainEvent) -> EventEnvelope {
    EventEnvelope {
        id: 1,
        aggregate_type: event.aggregate_type(),
        aggregate_id: event.aggregate_id().to_string(),
        created_at: Utc::now(),
        event,
    }
}

fn add_follower(db: &Database, follower: Uuid, followee: Uuid) {
    db.conn()
        .unwrap()
        .execute(
            "INSERT INTO follows (id, follower_id, followee_id, created_at)
             VALUES (?1, ?2, ?3, '2026-01-01T00:00:00.000000Z')",
            params![Uuid::now_v7().to_string(), follower.to_string(), followee.to_string()],
        )
        .unwrap();
}

#[tokio::test]
async fn test_post_created_fans_out_and_counts() {
    let h = harness();
    let author = Uuid::now_v7();
    for _ in 0..3 {
        add_follower(&h.db, Uuid::now_v7(), author);
    }
    h.counters.read_through(&CounterKey::UserPosts(author), || Ok(4)).await.unwrap();

    let post_id = Uuid::now_v7();
    let event = envelope(DomainEvent::PostCreated(PostCreated {
        post_id,
        author_id: author,
        created_at: Utc::now(),
    }));
    h.dispatcher.handle(&event).await.unwrap();

    assert_eq!(h.feed.count_for_post(post_id).unwrap(), 3);
    assert_eq!(h.counters.get(&CounterKey::UserPosts(author)).await.unwrap(), Some(5));

    // Redelivery does not duplicate feed rows
    h.dispatcher.handle(&event).await.unwrap();
    assert_eq!(h.feed.count_for_post(post_id).unwrap(), 3);
}

#[tokio::test]
async fn test_post_removed_clears_feeds() {
    let h = harness();
    let author = Uuid::now_v7();
    add_follower(&h.db, Uuid::now_v7(), author);
    let post_id = Uuid::now_v7();
    h.dispatcher
        .handle(&envelope(DomainEvent::PostCreated(PostCreated {
            post_id,
            author_id: author,
            created_at: Utc::now(),
        })))
        .await
        .unwrap();

    h.dispatcher
        .handle(&envelope(DomainEvent::PostRemoved(PostRemoved {
            post_id,
            author_id: author,
        })))
        .await
        .unwrap();

    assert_eq!(h.feed.count_for_post(post_id).unwrap(), 0);
}

#[tokio::test]
async fn test_post_removed_drops_its_notifications() {
    let h = harness();
    let (author, fan, post_id) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());

    h.dispatcher
        .handle(&envelope(DomainEvent::LikeAdded(LikeChanged {
            like_id: Uuid::now_v7(),
            post_id,
            post_author_id: author,
            user_id: fan,
        })))
        .await
        .unwrap();
    h.dispatcher
        .handle(&envelope(DomainEvent::CommentCreated(CommentCreated {
            comment_id: Uuid::now_v7(),
            post_id,
            post_author_id: author,
            author_id: fan,
            created_at: Utc::now(),
        })))
        .await
        .unwrap();
    h.dispatcher
        .handle(&envelope(DomainEvent::FollowCreated(FollowChanged {
            follow_id: Uuid::now_v7(),
            follower_id: fan,
            followee_id: author,
        })))
        .await
        .unwrap();
    assert_eq!(h.notifications.list_for(author, 10).unwrap().len(), 3);

    h.dispatcher
        .handle(&envelope(DomainEvent::PostRemoved(PostRemoved {
            post_id,
            author_id: author,
        })))
        .await
        .unwrap();

    let left = h.notifications.list_for(author, 10).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].kind, NotificationKind::Follow);
}

#[tokio::test]
async fn test_like_adjusts_counter_and_notifies_author() {
    let h = harness();
    let (author, fan, post_id) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
    let key = CounterKey::PostLikes(post_id);
    h.counters.read_through(&key, || Ok(0)).await.unwrap();

    let like = LikeChanged {
        like_id: Uuid::now_v7(),
        post_id,
        post_author_id: author,
        user_id: fan,
    };
    h.dispatcher
        .handle(&envelope(DomainEvent::LikeAdded(like.clone())))
        .await
        .unwrap();

    assert_eq!(h.counters.get(&key).await.unwrap(), Some(1));
    let listed = h.notifications.list_for(author, 10).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].kind, NotificationKind::Like);

    h.dispatcher
        .handle(&envelope(DomainEvent::LikeRemoved(like)))
        .await
        .unwrap();
    assert_eq!(h.counters.get(&key).await.unwrap(), Some(0));
    assert!(h.notifications.list_for(author, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_self_comment_is_not_notified() {
    let h = harness();
    let author = Uuid::now_v7();
    let post_id = Uuid::now_v7();

    h.dispatcher
        .handle(&envelope(DomainEvent::CommentCreated(CommentCreated {
            comment_id: Uuid::now_v7(),
            post_id,
            post_author_id: author,
            author_id: author,
            created_at: Utc::now(),
        })))
        .await
        .unwrap();

    assert!(h.notifications.list_for(author, 10).unwrap().is_empty());
    // Counter was not cached, so nothing was created
    assert_eq!(h.counters.get(&CounterKey::PostComments(post_id)).await.unwrap(), None);
}

#[tokio::test]
async fn test_follow_updates_both_sides() {
    let h = harness();
    let (follower, followee) = (Uuid::now_v7(), Uuid::now_v7());
    h.counters
        .read_through(&CounterKey::UserFollowers(followee), || Ok(10))
        .await
        .unwrap();
    h.counters
        .read_through(&CounterKey::UserFollowing(follower), || Ok(2))
        .await
        .unwrap();

    h.dispatcher
        .handle(&envelope(DomainEvent::FollowCreated(FollowChanged {
            follow_id: Uuid::now_v7(),
            follower_id: follower,
            followee_id: followee,
        })))
        .await
        .unwrap();

    assert_eq!(
        h.counters.get(&CounterKey::UserFollowers(followee)).await.unwrap(),
        Some(11)
    );
    assert_eq!(
        h.counters.get(&CounterKey::UserFollowing(follower)).await.unwrap(),
        Some(3)
    );
    assert_eq!(
        h.notifications.list_for(followee, 10).unwrap()[0].kind,
        NotificationKind::Follow
    );
}
