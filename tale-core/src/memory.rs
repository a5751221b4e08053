//! The compressed session memory record.
//!
//! A session's full transcript is unbounded; the memory record is the
//! bounded, structured summary that keeps generation prompts small. It is
//! only ever replaced wholesale by a fresh extraction (see
//! `narrator::extract`), with one exception: when extraction output cannot
//! be parsed, the prose summary alone is overwritten with the raw response.

use serde::{Deserialize, Serialize};

/// Hard cap on remembered key events.
pub const MAX_KEY_EVENTS: usize = 15;

/// Hard cap on the prose summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 2_000;

/// A named possession or learned spell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepsake {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Keepsake {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Structured memory for one session.
///
/// Inventory and spells have set-by-name semantics: re-adding an existing
/// name is a no-op, removal of an absent name is a no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryMemory {
    pub character_name: Option<String>,
    pub current_location: Option<String>,
    pub key_events: Vec<String>,
    pub npcs_encountered: Vec<String>,
    pub beliefs: Vec<String>,
    pub faction: Option<String>,
    pub summary: String,
    pub inventory: Vec<Keepsake>,
    pub spells: Vec<Keepsake>,
}

impl StoryMemory {
    /// Add an item unless one with the same name is already held.
    ///
    /// Returns true when the inventory changed.
    pub fn add_item(&mut self, name: &str, description: &str) -> bool {
        add_by_name(&mut self.inventory, name, description)
    }

    /// Remove an item by name. Returns true when something was removed.
    pub fn remove_item(&mut self, name: &str) -> bool {
        remove_by_name(&mut self.inventory, name)
    }

    /// Learn a spell unless one with the same name is already known.
    ///
    /// Returns true when the spell list changed.
    pub fn add_spell(&mut self, name: &str, description: &str) -> bool {
        add_by_name(&mut self.spells, name, description)
    }

    /// Forget a spell by name. Returns true when something was removed.
    pub fn remove_spell(&mut self, name: &str) -> bool {
        remove_by_name(&mut self.spells, name)
    }

    /// Clamp list and summary sizes to their caps.
    pub fn enforce_caps(&mut self) {
        self.key_events.truncate(MAX_KEY_EVENTS);
        self.summary = cap_summary(&self.summary);
    }

    /// Whether nothing has been remembered yet.
    pub fn is_empty(&self) -> bool {
        self.character_name.is_none()
            && self.current_location.is_none()
            && self.key_events.is_empty()
            && self.npcs_encountered.is_empty()
            && self.beliefs.is_empty()
            && self.faction.is_none()
            && self.summary.is_empty()
            && self.inventory.is_empty()
            && self.spells.is_empty()
    }
}

fn add_by_name(list: &mut Vec<Keepsake>, name: &str, description: &str) -> bool {
    if list.iter().any(|k| k.name == name) {
        return false;
    }
    list.push(Keepsake::new(name, description));
    true
}

fn remove_by_name(list: &mut Vec<Keepsake>, name: &str) -> bool {
    let before = list.len();
    list.retain(|k| k.name != name);
    list.len() != before
}

/// Truncate a summary to its character cap on a char boundary.
pub fn cap_summary(raw: &str) -> String {
    if raw.chars().count() <= MAX_SUMMARY_CHARS {
        raw.to_string()
    } else {
        raw.chars().take(MAX_SUMMARY_CHARS).collect()
    }
}
