//! Transcript messages.
//!
//! A session's transcript is an ordered sequence of messages. Narrator
//! messages are mutable only while their generation stream is in flight;
//! everything else is append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Generated story prose.
    Narrator,
    /// The player's locked-in action text.
    Player,
    /// Short engine-synthesized notices (item gained, roll demanded, ...).
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Narrator => write!(f, "narrator"),
            Role::Player => write!(f, "player"),
            Role::System => write!(f, "system"),
        }
    }
}

/// A single transcript entry.
///
/// A narrator message with empty content signals "generation in progress"
/// to presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Landed d20 value, attached once and immutable thereafter.
    #[serde(default)]
    pub roll: Option<u8>,
}

impl Message {
    /// Create a message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            roll: None,
        }
    }

    /// Create an empty narrator message to stream a generation into.
    pub fn pending_narration() -> Self {
        Self::new(Role::Narrator, "")
    }

    /// Create a player action message.
    pub fn player(content: impl Into<String>) -> Self {
        Self::new(Role::Player, content)
    }

    /// Create a system notice.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Whether this narrator message is still waiting on its stream.
    pub fn is_pending(&self) -> bool {
        self.role == Role::Narrator && self.content.is_empty()
    }
}
