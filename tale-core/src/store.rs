//! Session store.
//!
//! Owns every saved story and the notion of which one is active. All
//! mutation operations take an explicit [`SessionId`]; callers that may run
//! after a session ended fetch the id up front and the store silently
//! ignores writes against ids that no longer exist (an in-flight generation
//! is allowed to finish into a deleted story).
//!
//! Persistence is a versioned JSON document on local disk. The active-session
//! marker is deliberately not persisted; every process starts at the story
//! list.

use crate::memory::StoryMemory;
use crate::message::{Message, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Store handle shared between the turn flow and background extraction.
///
/// Critical sections are short and never held across await points, which is
/// what serializes writes to a given message.
pub type SharedStore = std::sync::Arc<tokio::sync::Mutex<SessionStore>>;

/// Errors from store persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current store file version.
const STORE_VERSION: u32 = 1;

/// Prefix of auto-generated titles, used to detect stories the user never
/// named so a better title can be derived after memory extraction.
pub const TITLE_PLACEHOLDER_PREFIX: &str = "Story - ";

/// Unique identifier for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One saved story: transcript, memory, and bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub memory: StoryMemory,
    #[serde(default)]
    pub message_count_at_last_extraction: usize,
    /// Label of the backend that serviced the latest narration, for UI
    /// attribution only.
    #[serde(default)]
    pub llm_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            title: format!("{}{}", TITLE_PLACEHOLDER_PREFIX, now.format("%Y-%m-%d")),
            messages: Vec::new(),
            memory: StoryMemory::default(),
            message_count_at_last_extraction: 0,
            llm_source: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the title is still the auto-generated placeholder.
    pub fn has_placeholder_title(&self) -> bool {
        self.title.starts_with(TITLE_PLACEHOLDER_PREFIX)
    }
}

/// On-disk document.
#[derive(Debug, Serialize, Deserialize)]
struct SavedStore {
    version: u32,
    #[serde(default)]
    sessions: Vec<Session>,
}

/// In-memory store over all saved stories.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Vec<Session>,
    active: Option<SessionId>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from a JSON file, or start empty when the file does
    /// not exist yet.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path).await?;
        let saved: SavedStore = serde_json::from_str(&content)?;

        if saved.version != STORE_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_VERSION,
                found: saved.version,
            });
        }

        Ok(Self {
            sessions: saved.sessions,
            active: None,
        })
    }

    /// Save the store to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let saved = SavedStore {
            version: STORE_VERSION,
            sessions: self.sessions.clone(),
        };
        let content = serde_json::to_string_pretty(&saved)?;
        fs::write(path, content).await?;
        Ok(())
    }

    // ========================================================================
    // Session CRUD
    // ========================================================================

    /// Create a new story, make it active, and return its id.
    ///
    /// New stories go to the front of the list so the most recent one shows
    /// first.
    pub fn create_session(&mut self) -> SessionId {
        let session = Session::new();
        let id = session.id;
        self.sessions.insert(0, session);
        self.active = Some(id);
        id
    }

    /// Make an existing story active. Returns false for an unknown id.
    pub fn set_active(&mut self, id: SessionId) -> bool {
        if self.sessions.iter().any(|s| s.id == id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    /// Detach from the active story without deleting it.
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// The currently active story, if any.
    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    /// Delete a story. Clears the active marker when it pointed there.
    pub fn delete_session(&mut self, id: SessionId) {
        self.sessions.retain(|s| s.id != id);
        if self.active == Some(id) {
            self.active = None;
        }
    }

    /// All stories, most recently created first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Look up a story by id.
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        let session = self.sessions.iter_mut().find(|s| s.id == id)?;
        session.updated_at = Utc::now();
        Some(session)
    }

    // ========================================================================
    // Transcript mutations
    // ========================================================================

    /// Append a message to a story's transcript and return its id.
    ///
    /// Returns None when the story no longer exists.
    pub fn push_message(&mut self, id: SessionId, message: Message) -> Option<MessageId> {
        let session = self.session_mut(id)?;
        let message_id = message.id;
        session.messages.push(message);
        Some(message_id)
    }

    /// Append a streamed fragment to an in-flight message's content.
    pub fn append_message_content(&mut self, id: SessionId, message_id: MessageId, fragment: &str) {
        if let Some(session) = self.session_mut(id) {
            if let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) {
                message.content.push_str(fragment);
            }
        }
    }

    /// Reset an in-flight message's content, discarding a partial stream
    /// before the next backend attempt.
    pub fn clear_message_content(&mut self, id: SessionId, message_id: MessageId) {
        if let Some(session) = self.session_mut(id) {
            if let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) {
                message.content.clear();
            }
        }
    }

    /// Replace an in-flight message's content wholesale (cleaned text after
    /// tag extraction).
    pub fn set_message_content(&mut self, id: SessionId, message_id: MessageId, content: &str) {
        if let Some(session) = self.session_mut(id) {
            if let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) {
                message.content = content.to_string();
            }
        }
    }

    /// Attach a landed roll to a message. The first write wins; a roll is
    /// immutable once attached.
    pub fn attach_roll(&mut self, id: SessionId, message_id: MessageId, value: u8) {
        if let Some(session) = self.session_mut(id) {
            if let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) {
                if message.roll.is_none() {
                    message.roll = Some(value);
                }
            }
        }
    }

    /// Number of messages in a story's transcript.
    pub fn message_count(&self, id: SessionId) -> usize {
        self.session(id).map(|s| s.messages.len()).unwrap_or(0)
    }

    // ========================================================================
    // Memory & metadata mutations
    // ========================================================================

    /// Replace a story's memory record wholesale.
    pub fn update_memory(&mut self, id: SessionId, memory: StoryMemory) {
        if let Some(session) = self.session_mut(id) {
            session.memory = memory;
        }
    }

    /// Rename a story.
    pub fn update_title(&mut self, id: SessionId, title: impl Into<String>) {
        if let Some(session) = self.session_mut(id) {
            session.title = title.into();
        }
    }

    /// Record which backend serviced the latest narration.
    pub fn set_llm_source(&mut self, id: SessionId, label: impl Into<String>) {
        if let Some(session) = self.session_mut(id) {
            session.llm_source = Some(label.into());
        }
    }

    /// Advance the extraction watermark.
    pub fn set_message_count_at_last_extraction(&mut self, id: SessionId, count: usize) {
        if let Some(session) = self.session_mut(id) {
            session.message_count_at_last_extraction = count;
        }
    }

    /// Add an item to a story's inventory. Returns true when it changed.
    pub fn add_item(&mut self, id: SessionId, name: &str, description: &str) -> bool {
        self.session_mut(id)
            .map(|s| s.memory.add_item(name, description))
            .unwrap_or(false)
    }

    /// Remove an item from a story's inventory. Returns true when it changed.
    pub fn remove_item(&mut self, id: SessionId, name: &str) -> bool {
        self.session_mut(id)
            .map(|s| s.memory.remove_item(name))
            .unwrap_or(false)
    }

    /// Add a spell to a story's spell list. Returns true when it changed.
    pub fn add_spell(&mut self, id: SessionId, name: &str, description: &str) -> bool {
        self.session_mut(id)
            .map(|s| s.memory.add_spell(name, description))
            .unwrap_or(false)
    }

    /// Remove a spell from a story's spell list. Returns true when it changed.
    pub fn remove_spell(&mut self, id: SessionId, name: &str) -> bool {
        self.session_mut(id)
            .map(|s| s.memory.remove_spell(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn test_create_makes_active() {
        let mut store = SessionStore::new();
        let id = store.create_session();
        assert_eq!(store.active_id(), Some(id));
        assert!(store.session(id).unwrap().has_placeholder_title());
    }

    #[test]
    fn test_new_sessions_go_first() {
        let mut store = SessionStore::new();
        let first = store.create_session();
        let second = store.create_session();
        assert_eq!(store.sessions()[0].id, second);
        assert_eq!(store.sessions()[1].id, first);
    }

    #[test]
    fn test_delete_clears_active() {
        let mut store = SessionStore::new();
        let id = store.create_session();
        store.delete_session(id);
        assert!(store.active_id().is_none());
        assert!(store.session(id).is_none());
    }

    #[test]
    fn test_delete_other_keeps_active() {
        let mut store = SessionStore::new();
        let first = store.create_session();
        let second = store.create_session();
        store.delete_session(first);
        assert_eq!(store.active_id(), Some(second));
    }

    #[test]
    fn test_mutations_on_unknown_id_are_noops() {
        let mut store = SessionStore::new();
        let ghost = SessionId::new();
        assert!(store.push_message(ghost, Message::player("hello")).is_none());
        assert!(!store.add_item(ghost, "Torch", ""));
        store.update_title(ghost, "nothing");
        assert_eq!(store.message_count(ghost), 0);
    }

    #[test]
    fn test_streaming_append_and_clear() {
        let mut store = SessionStore::new();
        let id = store.create_session();
        let msg = store.push_message(id, Message::pending_narration()).unwrap();

        store.append_message_content(id, msg, "You wake...");
        store.append_message_content(id, msg, "...to ash.");
        assert_eq!(
            store.session(id).unwrap().messages[0].content,
            "You wake......to ash."
        );

        store.clear_message_content(id, msg);
        assert!(store.session(id).unwrap().messages[0].content.is_empty());
    }

    #[test]
    fn test_roll_attaches_once() {
        let mut store = SessionStore::new();
        let id = store.create_session();
        let msg = store.push_message(id, Message::player("I jump")).unwrap();

        store.attach_roll(id, msg, 17);
        store.attach_roll(id, msg, 3);
        assert_eq!(store.session(id).unwrap().messages[0].roll, Some(17));
    }

    #[test]
    fn test_item_set_semantics_through_store() {
        let mut store = SessionStore::new();
        let id = store.create_session();

        assert!(store.add_item(id, "Torch", "burns bright"));
        assert!(!store.add_item(id, "Torch", "burns bright"));
        assert_eq!(store.session(id).unwrap().memory.inventory.len(), 1);

        assert!(store.remove_item(id, "Torch"));
        assert!(!store.remove_item(id, "Torch"));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        use tempfile::TempDir;

        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("stories.json");

        let mut store = SessionStore::new();
        let id = store.create_session();
        store.push_message(id, Message::new(Role::Narrator, "The ash falls."));
        store.add_item(id, "Lantern", "sputters in the wind");
        store.save_json(&path).await.expect("save");

        let loaded = SessionStore::load_or_default(&path).await.expect("load");
        assert_eq!(loaded.sessions().len(), 1);
        assert_eq!(loaded.sessions()[0].messages.len(), 1);
        assert_eq!(loaded.sessions()[0].memory.inventory[0].name, "Lantern");
        // The active marker is process-local, not persisted.
        assert!(loaded.active_id().is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        use tempfile::TempDir;

        let dir = TempDir::new().expect("temp dir");
        let store = SessionStore::load_or_default(dir.path().join("absent.json"))
            .await
            .expect("load");
        assert!(store.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        use tempfile::TempDir;

        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("stories.json");
        tokio::fs::write(&path, r#"{"version": 99, "sessions": []}"#)
            .await
            .expect("write");

        let result = SessionStore::load_or_default(&path).await;
        assert!(matches!(
            result,
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
