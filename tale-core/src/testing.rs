//! Testing utilities.
//!
//! `MockBackend` plays scripted fragment streams through the real
//! orchestrator and turn flow, so generation behavior can be tested
//! deterministically without any model.

use crate::backends::{Backend, BackendError, GenerateTurn, TextStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// One scripted generation: fragments to emit, optionally followed by a
/// mid-stream failure.
#[derive(Debug, Clone)]
pub struct MockScript {
    fragments: Vec<String>,
    fails_after: bool,
}

impl MockScript {
    /// A stream that emits these fragments and completes.
    pub fn fragments(parts: &[&str]) -> Self {
        Self {
            fragments: parts.iter().map(|p| p.to_string()).collect(),
            fails_after: false,
        }
    }

    /// A stream that emits these fragments and then breaks mid-generation.
    pub fn fails_after(parts: &[&str]) -> Self {
        Self {
            fragments: parts.iter().map(|p| p.to_string()).collect(),
            fails_after: true,
        }
    }
}

/// A backend that returns scripted responses in order.
///
/// When the script queue runs dry it falls back to a fixed line, so a test
/// that forgets to queue enough responses fails loudly on content rather
/// than hanging.
pub struct MockBackend {
    label: String,
    available: AtomicBool,
    scripts: Mutex<VecDeque<MockScript>>,
    extraction_scripts: Mutex<VecDeque<MockScript>>,
    generation_calls: AtomicUsize,
    extraction_calls: AtomicUsize,
}

impl MockBackend {
    /// An available backend with no scripts queued yet.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            available: AtomicBool::new(true),
            scripts: Mutex::new(VecDeque::new()),
            extraction_scripts: Mutex::new(VecDeque::new()),
            generation_calls: AtomicUsize::new(0),
            extraction_calls: AtomicUsize::new(0),
        }
    }

    /// A backend whose availability probe reports false.
    pub fn unavailable(label: impl Into<String>) -> Self {
        let backend = Self::new(label);
        backend.available.store(false, Ordering::SeqCst);
        backend
    }

    /// Queue a script (builder form).
    pub fn with_script(self, script: MockScript) -> Self {
        self.queue_script(script);
        self
    }

    /// Queue a script.
    pub fn queue_script(&self, script: MockScript) {
        self.scripts
            .lock()
            .expect("mock script lock poisoned")
            .push_back(script);
    }

    /// Queue a script served only to extraction turns (builder form).
    ///
    /// Narration and extraction consume separate queues so a background
    /// extraction never races a test's scripted narration. With no
    /// extraction script queued, extraction turns get a deliberately
    /// unparseable line, which exercises the graceful-degradation path and
    /// leaves structured memory alone.
    pub fn with_extraction_script(self, script: MockScript) -> Self {
        self.extraction_scripts
            .lock()
            .expect("mock script lock poisoned")
            .push_back(script);
        self
    }

    /// Flip availability at runtime.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// How many times generate() was called for narration turns.
    pub fn generation_calls(&self) -> usize {
        self.generation_calls.load(Ordering::SeqCst)
    }

    /// How many times generate() was called for extraction turns.
    pub fn extraction_calls(&self) -> usize {
        self.extraction_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn label(&self) -> &str {
        &self.label
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn generate(&self, turn: GenerateTurn) -> Result<TextStream, BackendError> {
        let script = if turn.kind == crate::backends::TurnKind::Extract {
            self.extraction_calls.fetch_add(1, Ordering::SeqCst);
            self.extraction_scripts
                .lock()
                .expect("mock script lock poisoned")
                .pop_front()
                .unwrap_or_else(|| MockScript::fragments(&["The mock has no memory to offer."]))
        } else {
            self.generation_calls.fetch_add(1, Ordering::SeqCst);
            self.scripts
                .lock()
                .expect("mock script lock poisoned")
                .pop_front()
                .unwrap_or_else(|| MockScript::fragments(&["The mock has nothing more to tell."]))
        };

        let mut items: Vec<Result<String, BackendError>> =
            script.fragments.into_iter().map(Ok).collect();
        if script.fails_after {
            items.push(Err(BackendError::Generation(
                "scripted mid-stream failure".to_string(),
            )));
        }

        // Yield between fragments so overlapping flows genuinely interleave
        // the way a network stream would.
        let stream = futures::stream::iter(items).then(|item| async move {
            tokio::task::yield_now().await;
            item
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_mock_plays_scripts_in_order() {
        let backend = MockBackend::new("mock")
            .with_script(MockScript::fragments(&["first"]))
            .with_script(MockScript::fragments(&["second"]));

        let turn = GenerateTurn {
            kind: crate::backends::TurnKind::Start,
            prompt: String::new(),
            system: String::new(),
            history: Vec::new(),
        };

        let first: Vec<_> = backend
            .generate(turn.clone())
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(first, vec!["first"]);

        let second: Vec<_> = backend
            .generate(turn)
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(second, vec!["second"]);
        assert_eq!(backend.generation_calls(), 2);
    }

    #[tokio::test]
    async fn test_failing_script_ends_with_error() {
        let backend =
            MockBackend::new("mock").with_script(MockScript::fails_after(&["partial"]));

        let turn = GenerateTurn {
            kind: crate::backends::TurnKind::Start,
            prompt: String::new(),
            system: String::new(),
            history: Vec::new(),
        };

        let items: Vec<_> = backend.generate(turn).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
