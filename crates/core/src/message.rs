//! Message and chat history domain types.
//!
//! Two shapes of conversation data flow through the system:
//! - [`ChatTurn`]/[`ChatHistory`]: what the user and the assistant said in a
//!   session, append-only, owned by exactly one session.
//! - [`Message`]: a role-tagged entry of an assembled prompt sent to a provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message in an assembled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

/// A single role-tagged message sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }
}

/// Who spoke a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Human,
    Ai,
}

/// One turn of a chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Human,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Ai,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Convert to a prompt message (human → user, ai → assistant).
    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::Human => Message::user(&self.content),
            TurnRole::Ai => Message::assistant(&self.content),
        }
    }
}

/// The ordered turns of one session.
///
/// Append-only: turns are never removed or edited. The
/// history is dropped together with the session that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistory {
    /// The owning session
    pub session_id: SessionId,

    turns: Vec<ChatTurn>,

    /// When this history was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was appended
    pub updated_at: DateTime<Utc>,
}

impl ChatHistory {
    /// Create a new empty history for a fresh session.
    pub fn new() -> Self {
        Self::for_session(SessionId::new())
    }

    /// Create a new empty history owned by `session_id`.
    pub fn for_session(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn.
    pub fn push(&mut self, turn: ChatTurn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(ChatTurn::human(content));
    }

    pub fn add_ai_message(&mut self, content: impl Into<String>) {
        self.push(ChatTurn::ai(content));
    }

    /// All turns in the order they were appended.
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of human turns.
    pub fn human_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.role == TurnRole::Human)
            .count()
    }

    /// The history as role-tagged prompt messages.
    pub fn to_messages(&self) -> Vec<Message> {
        self.turns.iter().map(ChatTurn::to_message).collect()
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new()
    }
}
