//! Narration prompt assembly.
//!
//! Builds the system context and per-turn prompts handed to whichever
//! backend the orchestrator picks. Static prompt blocks live in
//! `prompts/*.txt`; anything that interpolates session state is built here.

pub mod extract;

pub use extract::{refresh_memory, ExtractionOutcome, SingleFlight, EXTRACTION_THRESHOLD};

use crate::dice::RollOutcome;
use crate::memory::StoryMemory;

/// Base system context: world, style, and the state-tag protocol.
///
/// The memory record and optional persistent identity are folded in so
/// every future generation sees the compressed story so far.
pub fn system_context(memory: &StoryMemory, identity: Option<&str>) -> String {
    let mut context = String::new();

    context.push_str(include_str!("prompts/narrator_base.txt"));
    context.push_str("\n\n");
    context.push_str(include_str!("prompts/tag_protocol.txt"));

    let memory_block = memory_context(memory);
    if !memory_block.is_empty() {
        context.push('\n');
        context.push_str(&memory_block);
    }

    if let Some(identity) = identity {
        context.push_str(&format!(
            "\nThe player's persistent identity is {identity}. It follows them across sessions.\n"
        ));
    }

    context
}

/// Render the memory record as a context block, empty sections omitted.
fn memory_context(memory: &StoryMemory) -> String {
    if memory.is_empty() {
        return String::new();
    }

    let mut context = String::from("## THE STORY SO FAR\n");

    if let Some(ref name) = memory.character_name {
        context.push_str(&format!("Character: {name}\n"));
    }
    if let Some(ref location) = memory.current_location {
        context.push_str(&format!("Current location: {location}\n"));
    }
    if let Some(ref faction) = memory.faction {
        context.push_str(&format!("Faction: {faction}\n"));
    }

    if !memory.summary.is_empty() {
        context.push_str("\n### Summary\n");
        context.push_str(&memory.summary);
        context.push('\n');
    }

    if !memory.key_events.is_empty() {
        context.push_str("\n### Key Events\n");
        for event in &memory.key_events {
            context.push_str(&format!("- {event}\n"));
        }
    }

    if !memory.npcs_encountered.is_empty() {
        context.push_str("\n### People Met\n");
        for npc in &memory.npcs_encountered {
            context.push_str(&format!("- {npc}\n"));
        }
    }

    if !memory.beliefs.is_empty() {
        context.push_str("\n### Beliefs Held\n");
        for belief in &memory.beliefs {
            context.push_str(&format!("- {belief}\n"));
        }
    }

    if !memory.inventory.is_empty() {
        context.push_str("\n### Carried\n");
        for item in &memory.inventory {
            if item.description.is_empty() {
                context.push_str(&format!("- {}\n", item.name));
            } else {
                context.push_str(&format!("- {} ({})\n", item.name, item.description));
            }
        }
    }

    if !memory.spells.is_empty() {
        context.push_str("\n### Known Spells\n");
        for spell in &memory.spells {
            if spell.description.is_empty() {
                context.push_str(&format!("- {}\n", spell.name));
            } else {
                context.push_str(&format!("- {} ({})\n", spell.name, spell.description));
            }
        }
    }

    context
}

/// Prompt for the opening narration of a fresh story.
pub fn start_prompt() -> &'static str {
    include_str!("prompts/start.txt")
}

/// Prompt continuing the story after a player action whose outcome roll has
/// landed.
pub fn continue_prompt(action: &str, roll: &RollOutcome) -> String {
    format!(
        "Continue the story based on the player's action: \"{action}\"\n\n\
         {}\n\n\
         React to what they do naturally within the world's logic. NPCs have \
         their own goals; the world is alive and reactive; consequences flow \
         from actions.\n\n\
         Write 2-4 paragraphs continuing the narrative. End in a way that \
         invites further action.",
        roll.prompt_instruction()
    )
}

/// Prompt continuing the story after a roll the narrator itself demanded.
pub fn model_roll_prompt(reason: &str, roll: &RollOutcome) -> String {
    format!(
        "The story paused on an uncertain outcome: {reason}.\n\n\
         {}\n\n\
         Pick the narration up exactly where it left off and carry the \
         consequence through. Write 2-4 paragraphs and end in a way that \
         invites further action.",
        roll.prompt_instruction()
    )
}
