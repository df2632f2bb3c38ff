//! DTOS for the platform events that can be fanned out to webhook subscribers
//! and appended to contact timelines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// kind of a platform event, the string representation is what is persisted
/// on contact timelines and matched against webhook subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum EventKind {
    #[strum(serialize = "message.sent")]
    #[serde(rename = "message.sent")]
    MessageSent,

    #[strum(serialize = "message.failed")]
    #[serde(rename = "message.failed")]
    MessageFailed,

    #[strum(serialize = "message.opened")]
    #[serde(rename = "message.opened")]
    MessageOpened,

    #[strum(serialize = "message.clicked")]
    #[serde(rename = "message.clicked")]
    MessageClicked,

    #[strum(serialize = "message.bounced")]
    #[serde(rename = "message.bounced")]
    MessageBounced,

    #[strum(serialize = "contact.unsubscribed")]
    #[serde(rename = "contact.unsubscribed")]
    ContactUnsubscribed,

    #[strum(serialize = "segment.joined")]
    #[serde(rename = "segment.joined")]
    SegmentJoined,

    #[strum(serialize = "segment.left")]
    #[serde(rename = "segment.left")]
    SegmentLeft,
}

/// A platform event, produced by message history mutations, list membership
/// changes and segment membership diffs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppEvent {
    pub kind: EventKind,

    pub workspace_id: i32,

    /// email address of the contact the event refers to
    pub email: String,

    pub occurred_at: DateTime<Utc>,

    /// event specific fields, eg: `message_id` and `broadcast_id`
    /// for message events or `segment_id` for segment events
    pub payload: serde_json::Value,
}

impl AppEvent {
    pub fn new(kind: EventKind, workspace_id: i32, email: &str, payload: serde_json::Value) -> Self {
        AppEvent {
            kind,
            workspace_id,
            email: String::from(email),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

/// The JSON envelope POSTed to webhook subscribers, the body bytes of this
/// envelope are what gets signed on the `webhook-signature` header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// unique id of this delivery, also sent on the `webhook-id` header
    pub id: Uuid,

    #[serde(rename = "type")]
    pub kind: EventKind,

    pub workspace_id: i32,

    /// RFC3339 timestamp of the wrapped event
    pub timestamp: DateTime<Utc>,

    pub data: serde_json::Value,
}
