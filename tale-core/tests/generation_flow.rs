//! Integration tests for backend selection, fallback, and streaming.
//!
//! These drive the real orchestrator and store with scripted mock backends:
//! - Preference order and label attribution
//! - Mid-stream failure falling through to the next backend
//! - Fragment concatenation into the target message
//! - The diegetic error line when every backend is exhausted

use std::sync::Arc;
use tale_core::backends::{GenerateTurn, TurnKind};
use tale_core::orchestrator::DIEGETIC_ERROR;
use tale_core::testing::{MockBackend, MockScript};
use tale_core::{Message, Orchestrator, SessionStore, SharedStore};

fn shared_store() -> SharedStore {
    Arc::new(tokio::sync::Mutex::new(SessionStore::new()))
}

fn start_turn() -> GenerateTurn {
    GenerateTurn {
        kind: TurnKind::Start,
        prompt: "Begin.".to_string(),
        system: "You narrate.".to_string(),
        history: Vec::new(),
    }
}

#[tokio::test]
async fn test_unavailable_backend_is_skipped() {
    let store = shared_store();
    let a = Arc::new(MockBackend::unavailable("a"));
    let b = Arc::new(MockBackend::new("b").with_script(MockScript::fragments(&["From B."])));

    let orchestrator = Orchestrator::new(Arc::clone(&store))
        .with_backend(a.clone())
        .with_backend(b.clone());

    let (session, target) = {
        let mut store = store.lock().await;
        let session = store.create_session();
        let target = store
            .push_message(session, Message::pending_narration())
            .unwrap();
        (session, target)
    };

    let label = orchestrator
        .smart_generate(session, start_turn(), target)
        .await;

    assert_eq!(label.as_deref(), Some("b"));
    assert_eq!(a.generation_calls(), 0);
    assert_eq!(b.generation_calls(), 1);

    let store = store.lock().await;
    let session = store.session(session).unwrap();
    assert_eq!(session.messages[0].content, "From B.");
    assert_eq!(session.llm_source.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_mid_stream_failure_falls_through() {
    let store = shared_store();
    let a = Arc::new(
        MockBackend::new("a").with_script(MockScript::fails_after(&["partial ", "output "])),
    );
    let b = Arc::new(
        MockBackend::new("b").with_script(MockScript::fragments(&["A clean", " telling."])),
    );

    let orchestrator = Orchestrator::new(Arc::clone(&store))
        .with_backend(a.clone())
        .with_backend(b.clone());

    let (session, target) = {
        let mut store = store.lock().await;
        let session = store.create_session();
        let target = store
            .push_message(session, Message::pending_narration())
            .unwrap();
        (session, target)
    };

    let label = orchestrator
        .smart_generate(session, start_turn(), target)
        .await;

    assert_eq!(label.as_deref(), Some("b"));
    assert_eq!(a.generation_calls(), 1);

    // The failed backend's partial output must not survive anywhere.
    let store = store.lock().await;
    assert_eq!(
        store.session(session).unwrap().messages[0].content,
        "A clean telling."
    );
}

#[tokio::test]
async fn test_fragments_concatenate_in_order() {
    let store = shared_store();
    let backend = Arc::new(
        MockBackend::new("mock").with_script(MockScript::fragments(&["You wake...", "...to ash."])),
    );

    let orchestrator = Orchestrator::new(Arc::clone(&store)).with_backend(backend);

    let (session, target) = {
        let mut store = store.lock().await;
        let session = store.create_session();
        let target = store
            .push_message(session, Message::pending_narration())
            .unwrap();
        (session, target)
    };

    let label = orchestrator
        .smart_generate(session, start_turn(), target)
        .await;

    assert_eq!(label.as_deref(), Some("mock"));

    let store = store.lock().await;
    let session = store.session(session).unwrap();
    assert_eq!(session.messages[0].content, "You wake......to ash.");
    assert_eq!(session.llm_source.as_deref(), Some("mock"));
}

#[tokio::test]
async fn test_exhaustion_writes_diegetic_error() {
    let store = shared_store();
    let a = Arc::new(MockBackend::unavailable("a"));
    let b = Arc::new(MockBackend::new("b").with_script(MockScript::fails_after(&["almost "])));

    let orchestrator = Orchestrator::new(Arc::clone(&store))
        .with_backend(a)
        .with_backend(b);

    let (session, target) = {
        let mut store = store.lock().await;
        let session = store.create_session();
        let target = store
            .push_message(session, Message::pending_narration())
            .unwrap();
        (session, target)
    };

    let label = orchestrator
        .smart_generate(session, start_turn(), target)
        .await;

    // Terminal for the turn, not an error to the caller.
    assert!(label.is_none());

    let store = store.lock().await;
    let message = &store.session(session).unwrap().messages[0];
    assert_eq!(message.content, DIEGETIC_ERROR);
}

#[tokio::test]
async fn test_drain_generate_falls_through_and_collects() {
    let store = shared_store();
    let a = Arc::new(MockBackend::new("a").with_script(MockScript::fails_after(&["junk"])));
    let b = Arc::new(
        MockBackend::new("b").with_script(MockScript::fragments(&["whole ", "answer"])),
    );

    let orchestrator = Orchestrator::new(store).with_backend(a).with_backend(b);

    let text = orchestrator.drain_generate(start_turn()).await;
    assert_eq!(text.as_deref(), Some("whole answer"));
}

#[tokio::test]
async fn test_drain_generate_none_when_exhausted() {
    let store = shared_store();
    let a = Arc::new(MockBackend::unavailable("a"));

    let orchestrator = Orchestrator::new(store).with_backend(a);
    assert!(orchestrator.drain_generate(start_turn()).await.is_none());
}

#[tokio::test]
async fn test_status_reports_preference_winner() {
    let store = shared_store();
    let a = Arc::new(MockBackend::unavailable("local"));
    let b = Arc::new(MockBackend::new("resident"));
    let c = Arc::new(MockBackend::new("hosted"));

    let orchestrator = Orchestrator::new(store)
        .with_backend(a)
        .with_backend(b)
        .with_backend(c);

    let status = orchestrator.status().await;
    assert_eq!(status.backends.len(), 3);
    assert!(!status.backends[0].available);
    assert!(status.backends[1].available);
    assert_eq!(status.active.as_deref(), Some("resident"));
}

#[tokio::test]
async fn test_empty_orchestrator_reports_no_active() {
    let store = shared_store();
    let orchestrator = Orchestrator::new(store);
    let status = orchestrator.status().await;
    assert!(status.backends.is_empty());
    assert!(status.active.is_none());
}
