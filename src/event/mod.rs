use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;


/// Closed set of event kinds carried through the outbox.
///
/// The string form (`as_str`) is what lands in the `event_type` column and
/// doubles as the broker topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "post.created")]
    PostCreated,
    #[serde(rename = "post.removed")]
    PostRemoved,
    #[serde(rename = "comment.created")]
    CommentCreated,
    #[serde(rename = "comment.removed")]
    CommentRemoved,
    #[serde(rename = "like.added")]
    LikeAdded,
    #[serde(rename = "like.removed")]
    LikeRemoved,
    #[serde(rename = "follow.created")]
    FollowCreated,
    #[serde(rename = "follow.removed")]
    FollowRemoved,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::PostCreated,
        EventType::PostRemoved,
        EventType::CommentCreated,
        EventType::CommentRemoved,
        EventType::LikeAdded,
        EventType::LikeRemoved,
        EventType::FollowCreated,
        EventType::FollowRemoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PostCreated => "post.created",
            EventType::PostRemoved => "post.removed",
            EventType::CommentCreated => "comment.created",
            EventType::CommentRemoved => "comment.removed",
            EventType::LikeAdded => "like.added",
            EventType::LikeRemoved => "like.removed",
            EventType::FollowCreated => "follow.created",
            EventType::FollowRemoved => "follow.removed",
        }
    }

    /// Broker topic for this event kind
    pub fn topic(&self) -> &'static str {
        self.as_str()
    }

    /// Aggregate that owns events of this kind
    pub fn aggregate_type(&self) -> AggregateType {
        match self {
            EventType::PostCreated | EventType::PostRemoved => AggregateType::Post,
            EventType::CommentCreated | EventType::CommentRemoved => AggregateType::Comment,
            EventType::LikeAdded | EventType::LikeRemoved => AggregateType::Like,
            EventType::FollowCreated | EventType::FollowRemoved => AggregateType::Follow,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an `event_type` column holds a value outside the closed set.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized event type '{}'", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Post,
    Comment,
    Like,
    Follow,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Post => "post",
            AggregateType::Comment => "comment",
            AggregateType::Like => "like",
            AggregateType::Follow => "follow",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostCreated {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostRemoved {
    pub post_id: Uuid,
    pub author_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommentCreated {
    pub comment_id: Uuid,
    pub post_id: Uuid,
    pub post_author_id: Uuid,
    pub author_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommentRemoved {
    pub comment_id: Uuid,
    pub post_id: Uuid,
    pub post_author_id: Uuid,
    pub author_id: Uuid,
}

/// Body shared by `like.added` and `like.removed`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LikeChanged {
    pub like_id: Uuid,
    pub post_id: Uuid,
    pub post_author_id: Uuid,
    pub user_id: Uuid,
}

/// Body shared by `follow.created` and `follow.removed`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FollowChanged {
    pub follow_id: Uuid,
    pub follower_id: Uuid,
    pub followee_id: Uuid,
}

/// Every state change that propagates between services.
///
/// Serialized adjacently tagged so the wire body names its kind:
/// `{"type": "post.created", "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DomainEvent {
    #[serde(rename = "post.created")]
    PostCreated(PostCreated),
    #[serde(rename = "post.removed")]
    PostRemoved(PostRemoved),
    #[serde(rename = "comment.created")]
    CommentCreated(CommentCreated),
    #[serde(rename = "comment.removed")]
    CommentRemoved(CommentRemoved),
    #[serde(rename = "like.added")]
    LikeAdded(LikeChanged),
    #[serde(rename = "like.removed")]
    LikeRemoved(LikeChanged),
    #[serde(rename = "follow.created")]
    FollowCreated(FollowChanged),
    #[serde(rename = "follow.removed")]
    FollowRemoved(FollowChanged),
}

impl DomainEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::PostCreated(_) => EventType::PostCreated,
            DomainEvent::PostRemoved(_) => EventType::PostRemoved,
            DomainEvent::CommentCreated(_) => EventType::CommentCreated,
            DomainEvent::CommentRemoved(_) => EventType::CommentRemoved,
            DomainEvent::LikeAdded(_) => EventType::LikeAdded,
            DomainEvent::LikeRemoved(_) => EventType::LikeRemoved,
            DomainEvent::FollowCreated(_) => EventType::FollowCreated,
            DomainEvent::FollowRemoved(_) => EventType::FollowRemoved,
        }
    }

    pub fn aggregate_type(&self) -> AggregateType {
        self.event_type().aggregate_type()
    }

    /// Id of the aggregate this event belongs to; used as the partition key.
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            DomainEvent::PostCreated(e) => e.post_id,
            DomainEvent::PostRemoved(e) => e.post_id,
            DomainEvent::CommentCreated(e) => e.comment_id,
            DomainEvent::CommentRemoved(e) => e.comment_id,
            DomainEvent::LikeAdded(e) | DomainEvent::LikeRemoved(e) => e.like_id,
            DomainEvent::FollowCreated(e) | DomainEvent::FollowRemoved(e) => e.follow_id,
        }
    }

    /// Serialize the body only (without the type tag) for the outbox payload column.
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        match self {
            DomainEvent::PostCreated(e) => serde_json::to_value(e),
            DomainEvent::PostRemoved(e) => serde_json::to_value(e),
            DomainEvent::CommentCreated(e) => serde_json::to_value(e),
            DomainEvent::CommentRemoved(e) => serde_json::to_value(e),
            DomainEvent::LikeAdded(e) | DomainEvent::LikeRemoved(e) => serde_json::to_value(e),
            DomainEvent::FollowCreated(e) | DomainEvent::FollowRemoved(e) => {
                serde_json::to_value(e)
            }
        }
    }

    /// Rebuild an event from its type and stored body.
    pub fn decode(event_type: EventType, payload: &Value) -> serde_json::Result<Self> {
        let payload = payload.clone();
        Ok(match event_type {
            EventType::PostCreated => DomainEvent::PostCreated(serde_json::from_value(payload)?),
            EventType::PostRemoved => DomainEvent::PostRemoved(serde_json::from_value(payload)?),
            EventType::CommentCreated => {
                DomainEvent::CommentCreated(serde_json::from_value(payload)?)
            }
            EventType::CommentRemoved => {
                DomainEvent::CommentRemoved(serde_json::from_value(payload)?)
            }
            EventType::LikeAdded => DomainEvent::LikeAdded(serde_json::from_value(payload)?),
            EventType::LikeRemoved => DomainEvent::LikeRemoved(serde_json::from_value(payload)?),
            EventType::FollowCreated => {
                DomainEvent::FollowCreated(serde_json::from_value(payload)?)
            }
            EventType::FollowRemoved => {
                DomainEvent::FollowRemoved(serde_json::from_value(payload)?)
            }
        })
    }
}

/// Message body published to the broker for one outbox row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Outbox row id in the emitting service
    pub id: i64,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub created_at: DateTime<Utc>,
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }
}
