//! Control-tag protocol.
//!
//! The narrator model signals game-state changes through bracketed
//! annotations at the tail of its prose, one per line:
//!
//! ```text
//! [ROLL_REQUIRED: reason]
//! [ITEM_GAINED: name - description]
//! [ITEM_LOST: name]
//! [SPELL_LEARNED: name - description]
//! [SPELL_LOST: name]
//! ```
//!
//! Extraction is tolerant: only a bracketed span whose inner text starts
//! with a known tag name and a colon is consumed. Anything else (an unknown
//! name, a missing colon, an unclosed bracket) passes through as literal
//! text rather than being silently dropped.

use serde::{Deserialize, Serialize};

/// A model-emitted state-change instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlTag {
    /// The model wants the outcome of this action decided by a roll.
    RollRequired { reason: String },
    ItemGained { name: String, description: String },
    ItemLost { name: String },
    SpellLearned { name: String, description: String },
    SpellLost { name: String },
}

/// Result of scanning generated text for control tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNarration {
    /// The prose with every recognized tag removed.
    pub text: String,
    /// Recognized tags, in order of appearance.
    pub tags: Vec<ControlTag>,
}

/// Extract control tags from generated narrator text.
///
/// Idempotent: running this over already-cleaned text returns it unchanged
/// with zero tags.
pub fn extract_tags(raw: &str) -> ParsedNarration {
    let mut tags = Vec::new();
    let mut lines = Vec::new();
    let mut any_extracted = false;

    for line in raw.split('\n') {
        let before = tags.len();
        let cleaned = scan_line(line, &mut tags);

        if tags.len() == before {
            lines.push(line.to_string());
            continue;
        }

        any_extracted = true;
        // A line that held only tags disappears entirely; one that mixed
        // prose and a trailing tag keeps the prose.
        if !cleaned.trim().is_empty() {
            lines.push(cleaned.trim_end().to_string());
        }
    }

    if !any_extracted {
        return ParsedNarration {
            text: raw.to_string(),
            tags,
        };
    }

    ParsedNarration {
        text: lines.join("\n").trim_end().to_string(),
        tags,
    }
}

/// Scan one line, appending recognized tags and returning the line with
/// their spans removed.
fn scan_line(line: &str, tags: &mut Vec<ControlTag>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        let (before, bracketed) = rest.split_at(open);
        out.push_str(before);

        match bracketed[1..].find(']') {
            Some(close) => {
                let inner = &bracketed[1..close + 1];
                if let Some(tag) = parse_tag(inner) {
                    tags.push(tag);
                } else {
                    // Not a recognized tag; keep the span verbatim.
                    out.push_str(&bracketed[..close + 2]);
                }
                rest = &bracketed[close + 2..];
            }
            None => {
                // Unclosed bracket: literal text to the end of the line.
                out.push_str(bracketed);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Parse the inside of a bracketed span against the five tag forms.
fn parse_tag(inner: &str) -> Option<ControlTag> {
    let (name, payload) = inner.split_once(':')?;
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }

    match name.trim() {
        "ROLL_REQUIRED" => Some(ControlTag::RollRequired {
            reason: payload.to_string(),
        }),
        "ITEM_GAINED" => {
            let (name, description) = split_named_payload(payload);
            Some(ControlTag::ItemGained { name, description })
        }
        "ITEM_LOST" => Some(ControlTag::ItemLost {
            name: payload.to_string(),
        }),
        "SPELL_LEARNED" => {
            let (name, description) = split_named_payload(payload);
            Some(ControlTag::SpellLearned { name, description })
        }
        "SPELL_LOST" => Some(ControlTag::SpellLost {
            name: payload.to_string(),
        }),
        _ => None,
    }
}

/// Split `name - description` payloads; the description is optional.
fn split_named_payload(payload: &str) -> (String, String) {
    match payload.split_once(" - ") {
        Some((name, description)) => (name.trim().to_string(), description.trim().to_string()),
        None => (payload.to_string(), String::new()),
    }
}
