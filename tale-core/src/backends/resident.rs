//! In-process resident model backend.
//!
//! A resident engine is a model loaded into this process once and queried
//! in-process thereafter. The engine handle is a process-wide singleton:
//! installed at most once, never persisted, rebuilt on every launch.

use super::{Backend, BackendError, GenerateTurn, TextStream};
use crate::message::Role;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Role in a chat-completion-shaped request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One ordered turn of a chat-shaped request.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A model resident in this process.
///
/// Implementations must serialize their own internal queue if more than one
/// chat call can be in flight at once; callers do not coordinate access.
#[async_trait]
pub trait ResidentEngine: Send + Sync {
    /// Run a chat completion, yielding delta fragments.
    async fn chat(&self, turns: Vec<ChatTurn>) -> Result<TextStream, BackendError>;
}

static RESIDENT_ENGINE: OnceCell<Arc<dyn ResidentEngine>> = OnceCell::new();

/// Install the process-wide resident engine.
///
/// Returns false when an engine was already installed; the first install
/// wins for the life of the process.
pub fn install_resident_engine(engine: Arc<dyn ResidentEngine>) -> bool {
    RESIDENT_ENGINE.set(engine).is_ok()
}

/// The process-wide resident engine, when one has been installed.
pub fn resident_engine() -> Option<Arc<dyn ResidentEngine>> {
    RESIDENT_ENGINE.get().cloned()
}

/// Backend over a resident engine handle.
pub struct ResidentBackend {
    engine: Arc<dyn ResidentEngine>,
    label: String,
}

impl ResidentBackend {
    /// Wrap a specific engine handle.
    pub fn new(engine: Arc<dyn ResidentEngine>) -> Self {
        Self {
            engine,
            label: "resident".to_string(),
        }
    }

    /// Wrap the process-wide engine, when one has been installed.
    pub fn from_process_engine() -> Option<Self> {
        resident_engine().map(Self::new)
    }

    /// Map a generation request to chat turns: system context first, then
    /// the transcript (narrator as assistant, player as user), then the
    /// prompt as the final user turn.
    fn build_turns(turn: &GenerateTurn) -> Vec<ChatTurn> {
        let mut turns = vec![ChatTurn::system(&turn.system)];

        for message in &turn.history {
            match message.role {
                Role::Narrator => turns.push(ChatTurn::assistant(&message.content)),
                Role::Player => turns.push(ChatTurn::user(&message.content)),
                Role::System => {}
            }
        }

        turns.push(ChatTurn::user(&turn.prompt));
        turns
    }
}

#[async_trait]
impl Backend for ResidentBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn is_available(&self) -> bool {
        // Loading already happened; holding a handle is being ready.
        true
    }

    async fn generate(&self, turn: GenerateTurn) -> Result<TextStream, BackendError> {
        let turns = Self::build_turns(&turn);
        tracing::debug!(turns = turns.len(), "generating via resident engine");
        self.engine.chat(turns).await
    }
}
