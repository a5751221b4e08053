//! Integration tests for the full turn loop.
//!
//! These drive StoryEngine end-to-end with scripted backends:
//! - Story start and transcript shape
//! - Player action → roll → narration → tag side effects
//! - Model-requested rolls suspending and resuming the turn
//! - Set-by-name inventory semantics through real narrations

use std::sync::Arc;
use tale_core::testing::{MockBackend, MockScript};
use tale_core::{
    Orchestrator, Role, RollPhase, SessionStore, SharedStore, SessionError, StoryEngine,
};

fn engine_with(backend: Arc<MockBackend>) -> StoryEngine {
    let store: SharedStore = Arc::new(tokio::sync::Mutex::new(SessionStore::new()));
    let orchestrator = Orchestrator::new(Arc::clone(&store)).with_backend(backend);
    StoryEngine::new(store, orchestrator)
}

#[tokio::test]
async fn test_begin_story_streams_opening() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .with_script(MockScript::fragments(&["You wake...", "...to ash."])),
    );
    let mut engine = engine_with(Arc::clone(&backend));

    let report = engine.begin_story().await.unwrap();
    assert_eq!(report.text, "You wake......to ash.");
    assert_eq!(report.llm_source.as_deref(), Some("mock"));
    assert!(report.roll.is_none());

    let store = engine.store();
    let store = store.lock().await;
    let session = store.session(report.session).unwrap();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].role, Role::Narrator);
    assert_eq!(session.llm_source.as_deref(), Some("mock"));
}

#[tokio::test]
async fn test_action_turn_rolls_and_narrates() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .with_script(MockScript::fragments(&["You wake."]))
            .with_script(MockScript::fragments(&["The door gives way."])),
    );
    let mut engine = engine_with(backend);
    engine.begin_story().await.unwrap();

    engine.lock_action("I force the door").await.unwrap();
    assert!(engine.roll_phase().is_pending());

    let report = engine.resolve_roll().await.unwrap();
    assert_eq!(report.text, "The door gives way.");
    let roll = report.roll.expect("player turns always roll");
    assert!((1..=20).contains(&roll.value));
    assert!(engine.roll_phase() == &RollPhase::Idle);

    // The roll is attached to the originating player message.
    let store = engine.store();
    let store = store.lock().await;
    let session = store.session(report.session).unwrap();
    let player = session
        .messages
        .iter()
        .find(|m| m.role == Role::Player)
        .unwrap();
    assert_eq!(player.content, "I force the door");
    assert_eq!(player.roll, Some(roll.value));
}

#[tokio::test]
async fn test_item_tags_mutate_store_and_notify() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .with_script(MockScript::fragments(&["You wake."]))
            .with_script(MockScript::fragments(&[
                "The merchant presses a lantern into your hands.\n",
                "[ITEM_GAINED: Lantern - salt-crusted]",
            ])),
    );
    let mut engine = engine_with(backend);
    engine.begin_story().await.unwrap();

    engine.lock_action("I trade my coin").await.unwrap();
    let report = engine.resolve_roll().await.unwrap();

    // Tag stripped from the displayed narration.
    assert_eq!(
        report.text,
        "The merchant presses a lantern into your hands."
    );

    let store = engine.store();
    let store = store.lock().await;
    let session = store.session(report.session).unwrap();

    assert_eq!(session.memory.inventory.len(), 1);
    assert_eq!(session.memory.inventory[0].name, "Lantern");

    let notice = session
        .messages
        .iter()
        .find(|m| m.role == Role::System)
        .expect("a gained item synthesizes a system notice");
    assert_eq!(notice.content, "Gained: Lantern - salt-crusted");

    // The narrator message itself holds only cleaned prose.
    let narration = session
        .messages
        .iter()
        .find(|m| m.id == report.narration)
        .unwrap();
    assert!(!narration.content.contains("ITEM_GAINED"));
}

#[tokio::test]
async fn test_regained_item_is_silent_noop() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .with_script(MockScript::fragments(&["You wake."]))
            .with_script(MockScript::fragments(&[
                "A torch.\n[ITEM_GAINED: Torch - burns bright]",
            ]))
            .with_script(MockScript::fragments(&[
                "The same torch, again.\n[ITEM_GAINED: Torch - burns bright]",
            ])),
    );
    let mut engine = engine_with(backend);
    engine.begin_story().await.unwrap();

    engine.lock_action("I pick up the torch").await.unwrap();
    let first = engine.resolve_roll().await.unwrap();

    engine.lock_action("I pick it up again").await.unwrap();
    let second = engine.resolve_roll().await.unwrap();

    let store = engine.store();
    let store = store.lock().await;
    let session = store.session(second.session).unwrap();

    assert_eq!(session.memory.inventory.len(), 1);
    let notices: Vec<_> = session
        .messages
        .iter()
        .filter(|m| m.role == Role::System && m.content.starts_with("Gained:"))
        .collect();
    assert_eq!(notices.len(), 1, "only the first gain notifies");
    assert_eq!(first.session, second.session);
}

#[tokio::test]
async fn test_lost_then_lost_again_is_noop() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .with_script(MockScript::fragments(&["You wake."]))
            .with_script(MockScript::fragments(&[
                "Found.\n[ITEM_GAINED: Torch - burns bright]",
            ]))
            .with_script(MockScript::fragments(&["Dropped.\n[ITEM_LOST: Torch]"]))
            .with_script(MockScript::fragments(&["Still gone.\n[ITEM_LOST: Torch]"])),
    );
    let mut engine = engine_with(backend);
    engine.begin_story().await.unwrap();

    for action in ["take torch", "drop torch", "drop torch again"] {
        engine.lock_action(action).await.unwrap();
        engine.resolve_roll().await.unwrap();
    }

    let store = engine.store();
    let store = store.lock().await;
    let session = &store.sessions()[0];

    assert!(session.memory.inventory.is_empty());
    let lost_notices: Vec<_> = session
        .messages
        .iter()
        .filter(|m| m.role == Role::System && m.content.starts_with("Lost:"))
        .collect();
    assert_eq!(lost_notices.len(), 1, "the second loss is a silent no-op");
}

#[tokio::test]
async fn test_spell_tags_round_trip() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .with_script(MockScript::fragments(&["You wake."]))
            .with_script(MockScript::fragments(&[
                "The words settle into you.\n[SPELL_LEARNED: Emberlight - a palm of flame]",
            ]))
            .with_script(MockScript::fragments(&[
                "The words unravel.\n[SPELL_LOST: Emberlight]",
            ])),
    );
    let mut engine = engine_with(backend);
    engine.begin_story().await.unwrap();

    engine.lock_action("I read the scroll").await.unwrap();
    engine.resolve_roll().await.unwrap();

    {
        let store = engine.store();
        let store = store.lock().await;
        assert_eq!(store.sessions()[0].memory.spells.len(), 1);
    }

    engine.lock_action("I speak the words backward").await.unwrap();
    engine.resolve_roll().await.unwrap();

    let store = engine.store();
    let store = store.lock().await;
    let session = &store.sessions()[0];
    assert!(session.memory.spells.is_empty());
    assert!(session
        .messages
        .iter()
        .any(|m| m.role == Role::System && m.content == "Spell forgotten: Emberlight"));
}

#[tokio::test]
async fn test_model_requested_roll_suspends_and_resumes() {
    let backend = Arc::new(
        MockBackend::new("mock")
            .with_script(MockScript::fragments(&["You wake."]))
            .with_script(MockScript::fragments(&[
                "The bridge sways over the drop.\n[ROLL_REQUIRED: crossing the rotten bridge]",
            ]))
            .with_script(MockScript::fragments(&["You make it across, barely."])),
    );
    let mut engine = engine_with(backend);
    engine.begin_story().await.unwrap();

    engine.lock_action("I step onto the bridge").await.unwrap();
    let suspended = engine.resolve_roll().await.unwrap();

    assert_eq!(
        suspended.roll_demand.as_deref(),
        Some("crossing the rotten bridge")
    );
    assert_eq!(suspended.text, "The bridge sways over the drop.");
    assert!(matches!(
        engine.roll_phase(),
        RollPhase::PendingModelRequestedRoll { .. }
    ));

    // Locking another action while suspended is a caller error.
    assert!(matches!(
        engine.lock_action("I run").await,
        Err(SessionError::RollPending)
    ));

    let resumed = engine.resolve_roll().await.unwrap();
    assert_eq!(resumed.text, "You make it across, barely.");
    assert!(resumed.roll.is_some());
    assert!(engine.roll_phase() == &RollPhase::Idle);

    // The model-demanded roll attached to a synthesized system notice.
    let store = engine.store();
    let store = store.lock().await;
    let session = store.session(resumed.session).unwrap();
    let notice = session
        .messages
        .iter()
        .find(|m| {
            m.role == Role::System && m.content.contains("crossing the rotten bridge")
        })
        .expect("roll notice present");
    assert_eq!(notice.roll, Some(resumed.roll.unwrap().value));
}

#[tokio::test]
async fn test_exhausted_turn_reports_no_source() {
    let backend = Arc::new(MockBackend::unavailable("mock"));
    let mut engine = engine_with(backend);

    let report = engine.begin_story().await.unwrap();
    assert!(report.llm_source.is_none());
    assert!(report.text.contains("something interferes"));
}

#[tokio::test]
async fn test_leave_story_abandons_pending_roll() {
    let backend = Arc::new(
        MockBackend::new("mock").with_script(MockScript::fragments(&["You wake."])),
    );
    let mut engine = engine_with(backend);
    let report = engine.begin_story().await.unwrap();

    engine.lock_action("I wander").await.unwrap();
    engine.leave_story().await;
    assert!(engine.roll_phase() == &RollPhase::Idle);

    // Coming back starts the turn loop clean.
    engine.resume_story(report.session).await.unwrap();
    assert!(matches!(
        engine.resolve_roll().await,
        Err(SessionError::NoPendingRoll)
    ));
}
