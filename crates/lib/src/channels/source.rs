//! Event source and conversation classification.
//!
//! The platform reports where an event happened as a `source` object tagged by
//! `type`. Handlers only see the normalized [`ConversationContext`]: a chat type,
//! the conversation id to reply into, and the user who acted.

use serde::{Deserialize, Deserializer};

/// Where an event came from (`source` object on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Source {
    /// One-on-one chat with a user.
    User {
        #[serde(rename = "userId", default)]
        user_id: String,
    },
    /// Group chat. `userId` is omitted when the member has not consented to share it.
    Group {
        #[serde(rename = "groupId", default)]
        group_id: String,
        #[serde(rename = "userId", default)]
        user_id: String,
    },
    /// Multi-person chat (legacy "room").
    Room {
        #[serde(rename = "roomId", default)]
        room_id: String,
        #[serde(rename = "userId", default)]
        user_id: String,
    },
    /// Any source type this service does not know about.
    #[serde(other)]
    Unrecognized,
}

impl Source {
    /// Decode a wire `source` value. `null` is no source; any object that does not
    /// match a known shape becomes [`Source::Unrecognized`] rather than an error.
    pub(crate) fn from_value(value: serde_json::Value) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        Some(serde_json::from_value(value).unwrap_or(Source::Unrecognized))
    }
}

/// `deserialize_with` helper for optional `source` fields; never fails on shape.
pub(crate) fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<Source>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(Source::from_value))
}

/// Normalized chat type. Rooms are reported as [`ChatType::Group`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChatType {
    OneOnOne,
    Group,
    /// Source absent or unrecognized.
    #[default]
    Unknown,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::OneOnOne => "one_on_one",
            ChatType::Group => "group",
            ChatType::Unknown => "",
        }
    }
}

impl std::fmt::Display for ChatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a source to (chat type, conversation id, actor user id). Never fails:
/// an absent or unrecognized source yields empty fields.
pub fn classify(source: Option<&Source>) -> (ChatType, String, String) {
    match source {
        Some(Source::User { user_id }) => (ChatType::OneOnOne, user_id.clone(), user_id.clone()),
        Some(Source::Group { group_id, user_id }) => {
            (ChatType::Group, group_id.clone(), user_id.clone())
        }
        Some(Source::Room { room_id, user_id }) => {
            (ChatType::Group, room_id.clone(), user_id.clone())
        }
        Some(Source::Unrecognized) | None => (ChatType::Unknown, String::new(), String::new()),
    }
}

/// Conversation metadata handed to every handler call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    pub chat_type: ChatType,
    pub conversation_id: String,
    pub actor_user_id: String,
    /// Present only for message events.
    pub reply_token: Option<String>,
    /// Source as received, for handlers that need more than the chat type
    /// (e.g. telling a room from a group).
    pub source: Option<Source>,
}

impl ConversationContext {
    pub fn new(source: Option<&Source>, reply_token: Option<String>) -> Self {
        let (chat_type, conversation_id, actor_user_id) = classify(source);
        Self {
            chat_type,
            conversation_id,
            actor_user_id,
            reply_token,
            source: source.cloned(),
        }
    }
}
