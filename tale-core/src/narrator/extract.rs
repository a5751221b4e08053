//! Memory extraction.
//!
//! Compresses an unbounded transcript into the bounded memory record by
//! asking a model for one structured JSON object. Model output is treated
//! as hostile: fenced, malformed, or partial responses degrade gracefully
//! and never cost the session its existing memory.

use crate::backends::{flatten_history, GenerateTurn, TurnKind};
use crate::memory::{cap_summary, StoryMemory};
use crate::orchestrator::Orchestrator;
use crate::store::{SessionId, SharedStore};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Messages accumulated since the last extraction before a new one fires.
pub const EXTRACTION_THRESHOLD: usize = 10;

/// What one extraction attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// Fresh structured memory replaced the record wholesale.
    Replaced,
    /// The response would not parse; only the prose summary was refreshed
    /// from the raw text. The watermark still advances.
    Degraded,
    /// No backend produced a response. Record and watermark untouched so a
    /// later trigger retries.
    Unreachable,
    /// The session was deleted before or during extraction.
    SessionGone,
}

/// Per-session single-flight gate.
///
/// A second extraction for a session already being extracted is skipped,
/// not queued.
#[derive(Clone, Default)]
pub struct SingleFlight {
    inflight: Arc<Mutex<HashSet<SessionId>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flight for a session. None means one is already running.
    pub fn try_begin(&self, session: SessionId) -> Option<FlightGuard> {
        let mut inflight = self.inflight.lock().expect("single-flight lock poisoned");
        if inflight.insert(session) {
            Some(FlightGuard {
                inflight: Arc::clone(&self.inflight),
                session,
            })
        } else {
            None
        }
    }
}

/// Releases the single-flight claim on drop.
pub struct FlightGuard {
    inflight: Arc<Mutex<HashSet<SessionId>>>,
    session: SessionId,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(&self.session);
        }
    }
}

/// Run one extraction for a session and fold the result into the store.
///
/// Single-flight is the caller's job (see [`SingleFlight`]); this function
/// only does the work.
pub async fn refresh_memory(
    orchestrator: &Orchestrator,
    store: &SharedStore,
    session: SessionId,
) -> ExtractionOutcome {
    let messages = {
        let store = store.lock().await;
        match store.session(session) {
            Some(s) => s.messages.clone(),
            None => return ExtractionOutcome::SessionGone,
        }
    };

    let turn = GenerateTurn {
        kind: TurnKind::Extract,
        prompt: extraction_prompt(&messages),
        system: "You are a meticulous record-keeper. Respond only with the requested JSON object."
            .to_string(),
        history: Vec::new(),
    };

    eprintln!("DBG before drain_generate");
    let raw = match orchestrator.drain_generate(turn).await {
        Some(raw) => raw,
        None => {
            tracing::warn!(%session, "memory extraction unreachable; will retry later");
            return ExtractionOutcome::Unreachable;
        }
    };
    eprintln!("DBG after drain_generate raw={raw:?}");

    let mut store = store.lock().await;
    eprintln!("DBG acquired store lock");
    // The structured fields that survive a degraded parse are the ones on
    // the record now, not a pre-generation snapshot; a turn that landed
    // while the model was thinking keeps its side effects.
    let previous = match store.session(session) {
        Some(s) => s.memory.clone(),
        None => return ExtractionOutcome::SessionGone,
    };
    eprintln!("DBG before parse_extraction");
    let (memory, parsed) = parse_extraction(&raw, &previous);
    eprintln!("DBG after parse_extraction parsed={parsed}");

    store.update_memory(session, memory.clone());
    eprintln!("DBG after update_memory");

    // Advance unconditionally, parsed or not, so a model that reliably
    // emits garbage cannot put extraction into a tight retry loop.
    let count = store.message_count(session);
    eprintln!("DBG message_count={count}");
    store.set_message_count_at_last_extraction(session, count);
    eprintln!("DBG after set watermark");

    let placeholder = store
        .session(session)
        .map(|s| s.has_placeholder_title())
        .unwrap_or(false);
    eprintln!("DBG placeholder={placeholder}");
    if placeholder {
        if let Some(title) = derive_title(&memory) {
            store.update_title(session, title);
        }
    }

    eprintln!("DBG refresh_memory returning");
    if parsed {
        tracing::debug!(%session, "memory record replaced");
        ExtractionOutcome::Replaced
    } else {
        tracing::warn!(%session, "extraction response unparseable; kept structured memory");
        ExtractionOutcome::Degraded
    }
}

/// The fixed instructional prompt plus the flattened transcript.
pub fn extraction_prompt(messages: &[crate::message::Message]) -> String {
    format!(
        "{}\n\n## TRANSCRIPT\n\n{}",
        include_str!("prompts/extraction.txt"),
        flatten_history(messages)
    )
}

/// Interpret a model response as a memory record.
///
/// On success the returned record replaces the old one wholesale, with
/// every missing key defaulted. On failure the previous structured fields
/// survive and only the summary is overwritten with the capped raw text.
/// The bool reports which case happened.
pub fn parse_extraction(raw: &str, previous: &StoryMemory) -> (StoryMemory, bool) {
    let cleaned = strip_code_fences(raw);

    match serde_json::from_str::<ExtractedMemory>(cleaned) {
        Ok(extracted) => (extracted.into_memory(), true),
        Err(e) => {
            tracing::debug!(error = %e, "extraction JSON parse failed");
            let mut memory = previous.clone();
            memory.summary = cap_summary(raw.trim());
            (memory, false)
        }
    }
}

/// Remove surrounding Markdown code fences, info string included.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Derive a human-readable title from what extraction learned.
pub fn derive_title(memory: &StoryMemory) -> Option<String> {
    match (&memory.character_name, &memory.current_location) {
        (Some(name), Some(location)) => Some(format!("{name} in {location}")),
        (Some(name), None) => Some(format!("The Tale of {name}")),
        (None, Some(location)) => Some(format!("Somewhere in {location}")),
        (None, None) => None,
    }
}

/// The JSON schema extraction demands, every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ExtractedMemory {
    character_name: Option<String>,
    current_location: Option<String>,
    key_events: Vec<String>,
    npcs_encountered: Vec<String>,
    beliefs: Vec<String>,
    faction: Option<String>,
    summary: String,
    inventory: Vec<ExtractedKeepsake>,
    spells: Vec<ExtractedKeepsake>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedKeepsake {
    name: String,
    description: String,
}

impl ExtractedMemory {
    fn into_memory(self) -> StoryMemory {
        let mut memory = StoryMemory {
            character_name: none_if_empty(self.character_name),
            current_location: none_if_empty(self.current_location),
            key_events: self.key_events,
            npcs_encountered: self.npcs_encountered,
            beliefs: self.beliefs,
            faction: none_if_empty(self.faction),
            summary: self.summary,
            ..StoryMemory::default()
        };

        // Fold keepsakes through the set-semantics adders so duplicates and
        // nameless entries from a sloppy model collapse away.
        for item in self.inventory {
            if !item.name.is_empty() {
                memory.add_item(&item.name, &item.description);
            }
        }
        for spell in self.spells {
            if !spell.name.is_empty() {
                memory.add_spell(&spell.name, &spell.description);
            }
        }

        memory.enforce_caps();
        memory
    }
}

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
