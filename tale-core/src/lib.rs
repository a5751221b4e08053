//! Interactive fiction engine with LLM narration.
//!
//! This crate provides:
//! - Streaming generation over heterogeneous backends with ordered fallback
//! - An inline control-tag protocol for model-signaled state changes
//! - A d20 outcome mechanic woven back into subsequent generation
//! - Periodic compression of the transcript into a bounded memory record
//! - A persistent session store over all of it
//!
//! # Quick Start
//!
//! ```ignore
//! use tale_core::{StoryConfig, StoryEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut engine = StoryEngine::from_config(StoryConfig::from_env()).await?;
//!
//!     let opening = engine.begin_story().await?;
//!     println!("{}", opening.text);
//!
//!     engine.lock_action("I follow the lantern light").await?;
//!     let turn = engine.resolve_roll().await?;
//!     println!("[{}] {}", turn.roll.unwrap(), turn.text);
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod config;
pub mod dice;
pub mod memory;
pub mod message;
pub mod narrator;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod tags;
pub mod testing;

// Primary public API
pub use config::StoryConfig;
pub use dice::{RollOutcome, RollPhase, RollTier};
pub use memory::{Keepsake, StoryMemory};
pub use message::{Message, MessageId, Role};
pub use narrator::ExtractionOutcome;
pub use orchestrator::{Orchestrator, OrchestratorStatus};
pub use session::{SessionError, StoryEngine, TurnReport};
pub use store::{Session, SessionId, SessionStore, SharedStore, StoreError};
pub use tags::{extract_tags, ControlTag};
