//! Webhook callback envelope and event types.
//!
//! A callback body is `{ "destination": ..., "events": [ ... ] }`. Each event is
//! decoded once into a closed [`EventKind`]; event kinds this service does not
//! recognize are dropped during decoding so that platform additions never fail
//! a delivery.

use crate::channels::source::{self, Source};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Decoded callback: the events of one webhook delivery, in wire order.
#[derive(Debug, Clone, Default)]
pub struct CallbackEnvelope {
    /// Bot user id the callback was sent for.
    pub destination: Option<String>,
    pub events: Vec<Event>,
}

/// One recognized event from a callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub source: Option<Source>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub reply_token: Option<String>,
    pub webhook_event_id: Option<String>,
    pub kind: EventKind,
}

impl Event {
    /// Event time as UTC; None if the timestamp is out of range.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Short name of the event kind, as used on the wire.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::Follow => "follow",
            EventKind::Join => "join",
            EventKind::MemberJoined { .. } => "memberJoined",
            EventKind::MemberLeft { .. } => "memberLeft",
            EventKind::Message(_) => "message",
            EventKind::Unsend { .. } => "unsend",
        }
    }

    /// Message id this event refers to (message and unsend events only).
    pub fn message_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message(content) => Some(content.id()),
            EventKind::Unsend { message_id } => Some(message_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Follow,
    Join,
    MemberJoined { joined_ids: Vec<String> },
    MemberLeft { left_ids: Vec<String> },
    Message(MessageContent),
    Unsend { message_id: String },
}

/// Content of a message event, tagged by `type`.
///
/// Only the known types are decoded by serde; anything else becomes
/// [`MessageContent::Unrecognized`] in [`MessageContent::from_value`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text {
        #[serde(default)]
        id: String,
        #[serde(default)]
        text: String,
    },
    Image {
        #[serde(default)]
        id: String,
    },
    Video {
        #[serde(default)]
        id: String,
        /// Length in milliseconds.
        #[serde(default)]
        duration: Option<u64>,
    },
    Audio {
        #[serde(default)]
        id: String,
        #[serde(default)]
        duration: Option<u64>,
    },
    Location {
        #[serde(default)]
        id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        address: Option<String>,
        latitude: f64,
        longitude: f64,
    },
    Sticker {
        #[serde(default)]
        id: String,
        #[serde(rename = "packageId", default)]
        package_id: String,
        #[serde(rename = "stickerId", default)]
        sticker_id: String,
    },
    File {
        #[serde(default)]
        id: String,
        #[serde(rename = "fileName", default)]
        file_name: String,
        #[serde(rename = "fileSize", default)]
        file_size: u64,
    },
    /// Content type this service does not know about; routed to the fallback handler method.
    #[serde(skip)]
    Unrecognized {
        id: String,
        /// Wire `type` of the content.
        content_type: String,
    },
}

const KNOWN_CONTENT_TYPES: &[&str] = &[
    "text", "image", "video", "audio", "location", "sticker", "file",
];

impl MessageContent {
    /// Decode a wire `message` object. Known content types are decoded strictly;
    /// other types keep their `id` and `type` as [`MessageContent::Unrecognized`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let content_type = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        match content_type {
            Some(t) if !KNOWN_CONTENT_TYPES.contains(&t.as_str()) => {
                let id = value
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(MessageContent::Unrecognized {
                    id,
                    content_type: t,
                })
            }
            // Known type, or no usable `type` at all: let serde report what is wrong.
            _ => serde_json::from_value(value),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            MessageContent::Text { id, .. }
            | MessageContent::Image { id }
            | MessageContent::Video { id, .. }
            | MessageContent::Audio { id, .. }
            | MessageContent::Location { id, .. }
            | MessageContent::Sticker { id, .. }
            | MessageContent::File { id, .. }
            | MessageContent::Unrecognized { id, .. } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    destination: Option<String>,
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(flatten)]
    kind: RawKind,
    #[serde(default, deserialize_with = "source::deserialize_lenient")]
    source: Option<Source>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    reply_token: Option<String>,
    #[serde(default)]
    webhook_event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum RawKind {
    Follow,
    Join,
    MemberJoined { joined: Members },
    MemberLeft { left: Members },
    Message { message: serde_json::Value },
    Unsend { unsend: UnsendDetail },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Deserialize)]
struct Members {
    #[serde(default)]
    members: Vec<serde_json::Value>,
}

impl Members {
    fn user_ids(self) -> Vec<String> {
        self.members
            .into_iter()
            .map(|m| source::classify(Source::from_value(m).as_ref()).2)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnsendDetail {
    message_id: String,
}

impl RawEvent {
    fn into_event(self) -> Result<Option<Event>, serde_json::Error> {
        let kind = match self.kind {
            RawKind::Follow => EventKind::Follow,
            RawKind::Join => EventKind::Join,
            RawKind::MemberJoined { joined } => EventKind::MemberJoined {
                joined_ids: joined.user_ids(),
            },
            RawKind::MemberLeft { left } => EventKind::MemberLeft {
                left_ids: left.user_ids(),
            },
            RawKind::Message { message } => {
                EventKind::Message(MessageContent::from_value(message)?)
            }
            RawKind::Unsend { unsend } => EventKind::Unsend {
                message_id: unsend.message_id,
            },
            // Forward compatibility: new platform event kinds are skipped, not rejected.
            RawKind::Unrecognized => return Ok(None),
        };
        Ok(Some(Event {
            source: self.source,
            timestamp: self.timestamp,
            reply_token: self.reply_token,
            webhook_event_id: self.webhook_event_id,
            kind,
        }))
    }
}

impl CallbackEnvelope {
    /// Decode a callback body. Fails if the body is not a JSON object with an
    /// `events` array or a recognized event is malformed; unrecognized event kinds
    /// are dropped.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let raw: RawEnvelope = serde_json::from_slice(body)?;
        let received = raw.events.len();
        let mut events = Vec::with_capacity(received);
        for raw_event in raw.events {
            if let Some(event) = raw_event.into_event()? {
                events.push(event);
            }
        }
        if events.len() < received {
            log::debug!(
                "webhook: dropped {} unrecognized event(s)",
                received - events.len()
            );
        }
        Ok(Self {
            destination: raw.destination,
            events,
        })
    }
}
