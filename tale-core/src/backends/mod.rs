//! Generation backends.
//!
//! A backend is any concrete source of model-generated text meeting one
//! streaming contract: hand it a prompt, a system context, and the
//! transcript so far, get back a finite, non-restartable sequence of text
//! fragments. Callers select backends by an explicit preference order and
//! must not depend on identity beyond the informational label.

use crate::message::{Message, Role};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

mod hosted;
mod local;
mod resident;

pub use hosted::HostedBackend;
pub use local::LocalServiceBackend;
pub use resident::{
    install_resident_engine, resident_engine, ChatRole, ChatTurn, ResidentBackend, ResidentEngine,
};

/// Sampling temperature for narration and extraction alike.
pub(crate) const TEMPERATURE: f32 = 0.8;

/// Token budget per generated response.
pub(crate) const MAX_TOKENS: u32 = 1024;

/// Failures a backend can signal. Both are expected and non-fatal; the
/// orchestrator converts them into fallback.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Pre-flight: the backend cannot take this request at all.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Mid-stream: generation started but did not complete.
    #[error("Generation failed: {0}")]
    Generation(String),
}

/// What kind of turn a generation serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// Opening narration of a fresh story.
    Start,
    /// Continuation after a player action.
    Continue,
    /// Non-narrative memory extraction, drained rather than streamed.
    Extract,
}

impl TurnKind {
    /// Action name on the hosted wire, which only knows start and continue;
    /// extraction travels as an ordinary continuation.
    pub fn wire_action(&self) -> &'static str {
        match self {
            TurnKind::Start => "start",
            TurnKind::Continue | TurnKind::Extract => "continue",
        }
    }
}

/// One generation request, backend-agnostic.
#[derive(Debug, Clone)]
pub struct GenerateTurn {
    pub kind: TurnKind,
    pub prompt: String,
    pub system: String,
    pub history: Vec<Message>,
}

/// A finite stream of text fragments. Not restartable; consumed once.
pub type TextStream = BoxStream<'static, Result<String, BackendError>>;

/// The uniform streaming-generation capability.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Informational label for UI attribution. Never used for dispatch.
    fn label(&self) -> &str;

    /// Cheap, time-bounded probe. Must never fail; any internal error reads
    /// as "not available".
    async fn is_available(&self) -> bool;

    /// Start a generation. Errors before the first fragment surface here;
    /// errors after that arrive inside the stream.
    async fn generate(&self, turn: GenerateTurn) -> Result<TextStream, BackendError>;
}

/// Serialize transcript history for prompt-shaped backends.
///
/// System notices are engine bookkeeping and stay out of the model's view.
pub(crate) fn flatten_history(history: &[Message]) -> String {
    history
        .iter()
        .filter_map(|m| match m.role {
            Role::Narrator => Some(format!("[Narrator]: {}", m.content)),
            Role::Player => Some(format!("[Player Action]: {}", m.content)),
            Role::System => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_history_skips_system_messages() {
        let history = vec![
            Message::new(Role::Narrator, "You wake."),
            Message::system("Gained: Torch"),
            Message::player("I stand up"),
        ];

        let flat = flatten_history(&history);
        assert_eq!(flat, "[Narrator]: You wake.\n\n[Player Action]: I stand up");
    }

    #[test]
    fn test_turn_kind_wire_names() {
        assert_eq!(TurnKind::Start.wire_action(), "start");
        assert_eq!(TurnKind::Continue.wire_action(), "continue");
        assert_eq!(TurnKind::Extract.wire_action(), "continue");
    }
}
