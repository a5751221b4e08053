//! The story session engine.
//!
//! Ties the store, orchestrator, tag protocol, dice, and memory extraction
//! into the turn loop: player input or story start → orchestrated streaming
//! narration → tag interpretation with store side effects → optional roll
//! suspension → threshold-triggered memory extraction.
//!
//! # Turn shape
//!
//! Every player action is rolled: `lock_action` records the action and
//! suspends, `resolve_roll` lands the die, generates the narration, and
//! interprets its tags. A narration can itself demand a roll via
//! `[ROLL_REQUIRED: ...]`, suspending the turn again until the next
//! `resolve_roll`.

use crate::backends::{
    HostedBackend, LocalServiceBackend, ResidentBackend, GenerateTurn, TurnKind,
};
use crate::config::StoryConfig;
use crate::dice::{RollOutcome, RollPhase};
use crate::message::{Message, MessageId};
use crate::narrator::{self, ExtractionOutcome, SingleFlight, EXTRACTION_THRESHOLD};
use crate::orchestrator::Orchestrator;
use crate::store::{SessionId, SessionStore, SharedStore, StoreError};
use crate::tags::ControlTag;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No active story")]
    NoActiveStory,

    #[error("A roll is already pending")]
    RollPending,

    #[error("No roll is pending")]
    NoPendingRoll,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// What one completed turn produced.
#[derive(Debug)]
pub struct TurnReport {
    pub session: SessionId,
    /// The narrator message the turn streamed into.
    pub narration: MessageId,
    /// Cleaned narration text, tags removed.
    pub text: String,
    /// Label of the servicing backend; None when every backend failed and
    /// the diegetic error line was written instead.
    pub llm_source: Option<String>,
    /// The roll landed for this turn, when there was one.
    pub roll: Option<RollOutcome>,
    /// Set when the narration demanded another roll; the turn is suspended
    /// until the next `resolve_roll`.
    pub roll_demand: Option<String>,
}

/// The high-level session API.
pub struct StoryEngine {
    store: SharedStore,
    orchestrator: Arc<Orchestrator>,
    single_flight: SingleFlight,
    phase: RollPhase,
    /// Message the next landed player roll attaches to.
    pending_origin: Option<MessageId>,
    identity: Option<String>,
    data_path: Option<PathBuf>,
}

impl StoryEngine {
    /// Build an engine over an already-wired store and orchestrator.
    pub fn new(store: SharedStore, orchestrator: Orchestrator) -> Self {
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
            single_flight: SingleFlight::new(),
            phase: RollPhase::Idle,
            pending_origin: None,
            identity: None,
            data_path: None,
        }
    }

    /// Build an engine from configuration: load the store from disk and
    /// wire backends in preference order (local service, resident engine,
    /// hosted fallback; `prefer_local = false` swaps the first two).
    pub async fn from_config(config: StoryConfig) -> Result<Self, SessionError> {
        let store = match &config.data_path {
            Some(path) => SessionStore::load_or_default(path).await?,
            None => SessionStore::new(),
        };
        let store: SharedStore = Arc::new(tokio::sync::Mutex::new(store));

        let local = Arc::new(LocalServiceBackend::new(
            &config.local_url,
            &config.local_model,
        ));
        let resident = ResidentBackend::from_process_engine().map(Arc::new);

        let mut orchestrator = Orchestrator::new(Arc::clone(&store));
        if config.prefer_local {
            orchestrator = orchestrator.with_backend(local);
            if let Some(resident) = resident {
                orchestrator = orchestrator.with_backend(resident);
            }
        } else {
            if let Some(resident) = resident {
                orchestrator = orchestrator.with_backend(resident);
            }
            orchestrator = orchestrator.with_backend(local);
        }
        if let Some(url) = &config.hosted_url {
            let mut hosted = HostedBackend::new(url);
            if let Some(identity) = &config.identity {
                hosted = hosted.with_identity(identity);
            }
            orchestrator = orchestrator.with_backend(Arc::new(hosted));
        }

        let mut engine = Self::new(store, orchestrator);
        engine.identity = config.identity;
        engine.data_path = config.data_path;
        Ok(engine)
    }

    /// Set the persistent identity woven into prompts.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Persist the store to this path after every turn and extraction.
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Shared handle to the store, for presentation layers.
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// The orchestrator, for status probes.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Where the active turn stands with respect to rolling.
    pub fn roll_phase(&self) -> &RollPhase {
        &self.phase
    }

    // ========================================================================
    // Story lifecycle
    // ========================================================================

    /// Start a fresh story: create the session, stream the opening
    /// narration, and force the first memory extraction.
    pub async fn begin_story(&mut self) -> Result<TurnReport, SessionError> {
        self.phase = RollPhase::Idle;
        self.pending_origin = None;

        let (session, narration) = {
            let mut store = self.store.lock().await;
            let session = store.create_session();
            let narration = store
                .push_message(session, Message::pending_narration())
                .ok_or(SessionError::NoActiveStory)?;
            (session, narration)
        };

        // A fresh story has empty memory; no store read needed.
        let turn = GenerateTurn {
            kind: TurnKind::Start,
            prompt: narrator::start_prompt().to_string(),
            system: narrator::system_context(&Default::default(), self.identity.as_deref()),
            history: Vec::new(),
        };

        let llm_source = self
            .orchestrator
            .smart_generate(session, turn, narration)
            .await;
        let (text, roll_demand) = self.interpret_narration(session, narration).await;

        self.spawn_extraction(session);
        self.autosave().await;

        Ok(TurnReport {
            session,
            narration,
            text,
            llm_source,
            roll: None,
            roll_demand,
        })
    }

    /// Switch to an existing story. The roll phase resets; a roll pending in
    /// a story that was left behind is abandoned, not carried over.
    pub async fn resume_story(&mut self, id: SessionId) -> Result<(), SessionError> {
        let mut store = self.store.lock().await;
        if !store.set_active(id) {
            return Err(SessionError::NoActiveStory);
        }
        drop(store);
        self.phase = RollPhase::Idle;
        self.pending_origin = None;
        Ok(())
    }

    /// Detach from the active story. An in-flight generation is allowed to
    /// finish writing into it.
    pub async fn leave_story(&mut self) {
        self.store.lock().await.clear_active();
        self.phase = RollPhase::Idle;
        self.pending_origin = None;
    }

    /// Delete a story outright.
    pub async fn delete_story(&mut self, id: SessionId) {
        let mut store = self.store.lock().await;
        let was_active = store.active_id() == Some(id);
        store.delete_session(id);
        drop(store);
        if was_active {
            self.phase = RollPhase::Idle;
            self.pending_origin = None;
        }
        self.autosave().await;
    }

    /// Persist the store now.
    pub async fn save(&self) -> Result<(), SessionError> {
        if let Some(path) = &self.data_path {
            self.store.lock().await.save_json(path).await?;
        }
        Ok(())
    }

    // ========================================================================
    // The turn loop
    // ========================================================================

    /// Lock in a player action. The turn suspends pending the action's
    /// outcome roll.
    pub async fn lock_action(&mut self, action: &str) -> Result<(), SessionError> {
        if self.phase.is_pending() {
            return Err(SessionError::RollPending);
        }

        let mut store = self.store.lock().await;
        let session = store.active_id().ok_or(SessionError::NoActiveStory)?;
        let origin = store
            .push_message(session, Message::player(action))
            .ok_or(SessionError::NoActiveStory)?;
        drop(store);

        self.phase = RollPhase::PendingPlayerRoll {
            action: action.to_string(),
        };
        self.pending_origin = Some(origin);
        Ok(())
    }

    /// Land the pending roll and run the turn to completion.
    pub async fn resolve_roll(&mut self) -> Result<TurnReport, SessionError> {
        self.resolve_roll_with_rng(&mut rand::thread_rng()).await
    }

    /// Land the pending roll with a specific RNG (useful for testing).
    pub async fn resolve_roll_with_rng<R: Rng>(
        &mut self,
        rng: &mut R,
    ) -> Result<TurnReport, SessionError> {
        let phase = std::mem::replace(&mut self.phase, RollPhase::Idle);
        let origin = self.pending_origin.take();

        match phase {
            RollPhase::Idle => Err(SessionError::NoPendingRoll),
            RollPhase::PendingPlayerRoll { action } => {
                let outcome = RollOutcome::land_with_rng(rng);
                let prompt = narrator::continue_prompt(&action, &outcome);
                self.run_generation_turn(origin, None, outcome, prompt).await
            }
            RollPhase::PendingModelRequestedRoll { reason } => {
                let outcome = RollOutcome::land_with_rng(rng);
                let prompt = narrator::model_roll_prompt(&reason, &outcome);
                let notice = format!("The fates weigh the outcome: {reason}.");
                self.run_generation_turn(None, Some(notice), outcome, prompt)
                    .await
            }
        }
    }

    /// Shared tail of both roll branches: attach the roll, push the pending
    /// narration, generate, interpret tags, maybe extract, autosave.
    async fn run_generation_turn(
        &mut self,
        origin: Option<MessageId>,
        roll_notice: Option<String>,
        outcome: RollOutcome,
        prompt: String,
    ) -> Result<TurnReport, SessionError> {
        let (session, narration, system, history) = {
            let mut store = self.store.lock().await;
            let session = store.active_id().ok_or(SessionError::NoActiveStory)?;

            // Model-requested rolls attach to a synthesized system notice;
            // player rolls attach to the player message that started the turn.
            let origin = match roll_notice {
                Some(notice) => store.push_message(session, Message::system(notice)),
                None => origin,
            };
            if let Some(origin) = origin {
                store.attach_roll(session, origin, outcome.value);
            }

            let memory = store
                .session(session)
                .map(|s| s.memory.clone())
                .unwrap_or_default();
            let history = store
                .session(session)
                .map(|s| s.messages.clone())
                .unwrap_or_default();

            let narration = store
                .push_message(session, Message::pending_narration())
                .ok_or(SessionError::NoActiveStory)?;

            (
                session,
                narration,
                narrator::system_context(&memory, self.identity.as_deref()),
                history,
            )
        };

        let turn = GenerateTurn {
            kind: TurnKind::Continue,
            prompt,
            system,
            history,
        };

        let llm_source = self
            .orchestrator
            .smart_generate(session, turn, narration)
            .await;
        let (text, roll_demand) = self.interpret_narration(session, narration).await;

        self.maybe_extract(session).await;
        self.autosave().await;

        Ok(TurnReport {
            session,
            narration,
            text,
            llm_source,
            roll: Some(outcome),
            roll_demand,
        })
    }

    /// Strip tags from a finished narration, apply their side effects, and
    /// synthesize notification messages.
    ///
    /// Side effects hit the store before their notices are pushed. A
    /// re-gained item is a no-op and gets no notice. Only the first
    /// `ROLL_REQUIRED` of a response suspends the turn; extras are ignored.
    async fn interpret_narration(
        &mut self,
        session: SessionId,
        narration: MessageId,
    ) -> (String, Option<String>) {
        let raw = {
            let store = self.store.lock().await;
            store
                .session(session)
                .and_then(|s| s.messages.iter().find(|m| m.id == narration))
                .map(|m| m.content.clone())
                .unwrap_or_default()
        };

        let parsed = crate::tags::extract_tags(&raw);
        let mut roll_demand = None;

        let mut store = self.store.lock().await;
        if !parsed.tags.is_empty() {
            store.set_message_content(session, narration, &parsed.text);
        }

        for tag in parsed.tags {
            match tag {
                ControlTag::ItemGained { name, description } => {
                    if store.add_item(session, &name, &description) {
                        let notice = if description.is_empty() {
                            format!("Gained: {name}")
                        } else {
                            format!("Gained: {name} - {description}")
                        };
                        store.push_message(session, Message::system(notice));
                    }
                }
                ControlTag::ItemLost { name } => {
                    if store.remove_item(session, &name) {
                        store.push_message(session, Message::system(format!("Lost: {name}")));
                    }
                }
                ControlTag::SpellLearned { name, description } => {
                    if store.add_spell(session, &name, &description) {
                        let notice = if description.is_empty() {
                            format!("Spell learned: {name}")
                        } else {
                            format!("Spell learned: {name} - {description}")
                        };
                        store.push_message(session, Message::system(notice));
                    }
                }
                ControlTag::SpellLost { name } => {
                    if store.remove_spell(session, &name) {
                        store.push_message(
                            session,
                            Message::system(format!("Spell forgotten: {name}")),
                        );
                    }
                }
                ControlTag::RollRequired { reason } => {
                    if roll_demand.is_none() {
                        roll_demand = Some(reason);
                    }
                }
            }
        }
        drop(store);

        if let Some(reason) = &roll_demand {
            self.phase = RollPhase::PendingModelRequestedRoll {
                reason: reason.clone(),
            };
            self.pending_origin = None;
        }

        (parsed.text, roll_demand)
    }

    // ========================================================================
    // Memory extraction
    // ========================================================================

    /// Whether the active story has accumulated enough messages for another
    /// extraction.
    pub async fn extraction_due(&self) -> bool {
        let store = self.store.lock().await;
        let Some(session) = store.active_id() else {
            return false;
        };
        let Some(s) = store.session(session) else {
            return false;
        };
        s.messages.len().saturating_sub(s.message_count_at_last_extraction)
            >= EXTRACTION_THRESHOLD
    }

    /// Run an extraction for the active story right now, awaiting the
    /// result. Returns None when there is no active story or one is already
    /// in flight (single-flight: skipped, not queued).
    pub async fn extract_now(&self) -> Option<ExtractionOutcome> {
        eprintln!("DBG extract_now start");
        let session = self.store.lock().await.active_id()?;
        eprintln!("DBG extract_now got active id");
        let _guard = self.single_flight.try_begin(session)?;
        eprintln!("DBG extract_now got flight guard");
        Some(narrator::refresh_memory(&self.orchestrator, &self.store, session).await)
    }

    async fn maybe_extract(&self, session: SessionId) {
        let due = {
            let store = self.store.lock().await;
            store
                .session(session)
                .map(|s| {
                    s.messages.len().saturating_sub(s.message_count_at_last_extraction)
                        >= EXTRACTION_THRESHOLD
                })
                .unwrap_or(false)
        };
        if due {
            self.spawn_extraction(session);
        }
    }

    /// Kick off an extraction in the background. Silently skipped when one
    /// is already in flight for this session.
    fn spawn_extraction(&self, session: SessionId) {
        let Some(guard) = self.single_flight.try_begin(session) else {
            tracing::debug!(%session, "extraction already in flight; skipping");
            return;
        };

        let orchestrator = Arc::clone(&self.orchestrator);
        let store = Arc::clone(&self.store);
        let data_path = self.data_path.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let outcome = narrator::refresh_memory(&orchestrator, &store, session).await;
            tracing::debug!(%session, ?outcome, "background extraction finished");

            if let Some(path) = data_path {
                if let Err(e) = store.lock().await.save_json(&path).await {
                    tracing::warn!(error = %e, "persisting after extraction failed");
                }
            }
        });
    }

    async fn autosave(&self) {
        if let Some(path) = &self.data_path {
            if let Err(e) = self.store.lock().await.save_json(path).await {
                tracing::warn!(error = %e, "autosave failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockScript};

    fn engine_with(backends: Vec<Arc<MockBackend>>) -> StoryEngine {
        let store: SharedStore = Arc::new(tokio::sync::Mutex::new(SessionStore::new()));
        let mut orchestrator = Orchestrator::new(Arc::clone(&store));
        for backend in backends {
            orchestrator = orchestrator.with_backend(backend);
        }
        StoryEngine::new(store, orchestrator)
    }

    #[tokio::test]
    async fn test_lock_action_requires_active_story() {
        let mut engine = engine_with(vec![]);
        let result = engine.lock_action("I look around").await;
        assert!(matches!(result, Err(SessionError::NoActiveStory)));
    }

    #[tokio::test]
    async fn test_resolve_without_pending_roll_errors() {
        let mut engine = engine_with(vec![]);
        let result = engine.resolve_roll().await;
        assert!(matches!(result, Err(SessionError::NoPendingRoll)));
    }

    #[tokio::test]
    async fn test_double_lock_rejected() {
        let backend = Arc::new(
            MockBackend::new("mock").with_script(MockScript::fragments(&["You wake."])),
        );
        let mut engine = engine_with(vec![backend]);
        engine.begin_story().await.unwrap();

        engine.lock_action("I stand").await.unwrap();
        let result = engine.lock_action("I run").await;
        assert!(matches!(result, Err(SessionError::RollPending)));
    }
}
