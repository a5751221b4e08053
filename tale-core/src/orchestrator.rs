//! Generation orchestrator.
//!
//! Owns the backend preference order and the fallback ladder: first backend
//! that is available and completes its stream wins. Backend failures never
//! escape this module; the worst outcome of a turn is a fixed in-fiction
//! error line written into the target message.

use crate::backends::{Backend, GenerateTurn};
use crate::message::MessageId;
use crate::store::{SessionId, SharedStore};
use futures::StreamExt;
use std::sync::Arc;

/// Written into the target message when every backend is exhausted. Terminal
/// for the turn, not retryable by the orchestrator.
pub const DIEGETIC_ERROR: &str = "The threads of the story tangle and go slack... \
something interferes with the telling. (No narrator could be reached - please try again.)";

/// Probe result for one backend.
#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub label: String,
    pub available: bool,
}

/// Probe results for every backend plus the preference-order winner.
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub backends: Vec<BackendStatus>,
    pub active: Option<String>,
}

/// Selects among backends and streams their output into the store.
pub struct Orchestrator {
    backends: Vec<Arc<dyn Backend>>,
    store: SharedStore,
}

impl Orchestrator {
    /// Create an orchestrator with no backends yet.
    pub fn new(store: SharedStore) -> Self {
        Self {
            backends: Vec::new(),
            store,
        }
    }

    /// Append a backend to the preference order.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Labels in preference order.
    pub fn backend_labels(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.label().to_string()).collect()
    }

    /// Generate into a transcript message, falling through backends until
    /// one completes.
    ///
    /// Every received fragment is appended to the target message
    /// immediately. A backend that fails mid-stream has its partial output
    /// cleared before the next backend is tried. Returns the servicing
    /// backend's label, or None when every backend was exhausted (in which
    /// case the diegetic error line has been written into the message).
    ///
    /// Precondition, not defended here: at most one in-flight generation per
    /// message id.
    pub async fn smart_generate(
        &self,
        session: SessionId,
        turn: GenerateTurn,
        target: MessageId,
    ) -> Option<String> {
        for backend in &self.backends {
            let label = backend.label();

            if !backend.is_available().await {
                tracing::debug!(backend = label, "skipping unavailable backend");
                continue;
            }

            let mut stream = match backend.generate(turn.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(backend = label, error = %e, "backend refused generation");
                    continue;
                }
            };

            let mut failed = false;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(fragment) => {
                        self.store
                            .lock()
                            .await
                            .append_message_content(session, target, &fragment);
                    }
                    Err(e) => {
                        tracing::warn!(backend = label, error = %e, "stream broke mid-generation");
                        failed = true;
                        break;
                    }
                }
            }

            if failed {
                // Discard the partial stream; the next backend starts clean.
                self.store
                    .lock()
                    .await
                    .clear_message_content(session, target);
                continue;
            }

            let label = label.to_string();
            self.store.lock().await.set_llm_source(session, &label);
            tracing::debug!(backend = %label, "generation complete");
            return Some(label);
        }

        tracing::warn!("all backends exhausted; writing diegetic error");
        let mut store = self.store.lock().await;
        store.clear_message_content(session, target);
        store.append_message_content(session, target, DIEGETIC_ERROR);
        None
    }

    /// Generate without streaming into the store: drain the winning
    /// backend's full output and return it.
    ///
    /// Used by memory extraction, which wants the complete response before
    /// doing anything. Returns None when every backend was exhausted.
    pub async fn drain_generate(&self, turn: GenerateTurn) -> Option<String> {
        for backend in &self.backends {
            let label = backend.label();

            if !backend.is_available().await {
                continue;
            }

            let mut stream = match backend.generate(turn.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(backend = label, error = %e, "backend refused generation");
                    continue;
                }
            };

            let mut text = String::new();
            let mut failed = false;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(fragment) => text.push_str(&fragment),
                    Err(e) => {
                        tracing::warn!(backend = label, error = %e, "stream broke mid-generation");
                        failed = true;
                        break;
                    }
                }
            }

            if !failed {
                tracing::debug!(backend = label, "drained generation complete");
                return Some(text);
            }
        }

        None
    }

    /// Probe every backend concurrently and report availability plus the
    /// preference-order winner. Read-only; never errors.
    pub async fn status(&self) -> OrchestratorStatus {
        let probes = self.backends.iter().map(|b| async {
            BackendStatus {
                label: b.label().to_string(),
                available: b.is_available().await,
            }
        });

        let backends = futures::future::join_all(probes).await;
        let active = backends
            .iter()
            .find(|s| s.available)
            .map(|s| s.label.clone());

        OrchestratorStatus { backends, active }
    }
}
