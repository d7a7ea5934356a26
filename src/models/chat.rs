//! Chat channel and message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named conversation between a set of actors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatChannel {
    /// Unique record identifier.
    pub id: String,
    /// Channel display name.
    pub name: String,
    /// Actors allowed to post; empty means everyone.
    #[serde(default)]
    pub members: Vec<String>,
    /// Creator.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ChatChannel {
    /// Construct a channel with a generated identifier.
    #[must_use]
    pub fn new(name: String, members: Vec<String>, created_by: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            members,
            created_by,
            created_at: Utc::now(),
        }
    }

    /// Whether `actor` may post to this channel.
    #[must_use]
    pub fn admits(&self, actor: &str) -> bool {
        self.members.is_empty() || self.members.iter().any(|m| m == actor)
    }
}

/// A single message in a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique record identifier.
    pub id: String,
    /// Channel the message belongs to.
    pub channel_id: String,
    /// Author.
    pub sender: String,
    /// Message body.
    pub text: String,
    /// Post timestamp.
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Construct a message with a generated identifier.
    #[must_use]
    pub fn new(channel_id: String, sender: String, text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel_id,
            sender,
            text,
            sent_at: Utc::now(),
        }
    }
}
