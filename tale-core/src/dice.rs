//! Outcome rolls.
//!
//! Every consequential action is decided by a d20. The landed value maps to
//! a narrative-consequence tier which is folded back into the next
//! generation prompt; the prose never mentions the mechanics.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Narrative-consequence category of a landed d20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollTier {
    CriticalFailure,
    Failure,
    PartialSuccess,
    Success,
    CriticalSuccess,
}

impl RollTier {
    /// Map a d20 value to its tier.
    ///
    /// 1 is a critical failure, 2-7 failure, 8-14 partial success,
    /// 15-19 success, 20 critical success.
    pub fn from_value(value: u8) -> RollTier {
        match value {
            0 | 1 => RollTier::CriticalFailure,
            2..=7 => RollTier::Failure,
            8..=14 => RollTier::PartialSuccess,
            15..=19 => RollTier::Success,
            _ => RollTier::CriticalSuccess,
        }
    }

    /// Human-readable tier name.
    pub fn name(&self) -> &'static str {
        match self {
            RollTier::CriticalFailure => "Critical Failure",
            RollTier::Failure => "Failure",
            RollTier::PartialSuccess => "Partial Success",
            RollTier::Success => "Success",
            RollTier::CriticalSuccess => "Critical Success",
        }
    }

    /// Narrative steering handed to the model for this tier.
    fn guidance(&self) -> &'static str {
        match self {
            RollTier::CriticalFailure => {
                "the attempt fails disastrously and leaves things worse than before"
            }
            RollTier::Failure => "the attempt fails",
            RollTier::PartialSuccess => {
                "the attempt partly succeeds, at a cost or with a complication"
            }
            RollTier::Success => "the attempt succeeds",
            RollTier::CriticalSuccess => {
                "the attempt succeeds spectacularly, beyond what was hoped for"
            }
        }
    }
}

impl fmt::Display for RollTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A landed d20 and its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollOutcome {
    pub value: u8,
    pub tier: RollTier,
}

impl RollOutcome {
    /// Build an outcome from a known value.
    pub fn from_value(value: u8) -> Self {
        Self {
            value,
            tier: RollTier::from_value(value),
        }
    }

    /// Land a uniformly distributed d20.
    pub fn land() -> Self {
        Self::land_with_rng(&mut rand::thread_rng())
    }

    /// Land with a specific RNG (useful for testing).
    pub fn land_with_rng<R: Rng>(rng: &mut R) -> Self {
        Self::from_value(rng.gen_range(1..=20))
    }

    /// The instruction folded into the next generation prompt.
    ///
    /// Tells the model what the outcome means and forbids surfacing the
    /// mechanics in the prose.
    pub fn prompt_instruction(&self) -> String {
        format!(
            "The fates have decided the outcome of this action: {} of 20 ({}). \
             Narrate so that {}. Weave the consequence in naturally; never \
             mention dice, rolls, numbers, or game mechanics.",
            self.value,
            self.tier.name(),
            self.tier.guidance()
        )
    }
}

impl fmt::Display for RollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.tier.name())
    }
}

/// Where the active turn stands with respect to rolling.
///
/// A turn suspends in a pending state until the presentation layer finishes
/// its cosmetic animation and asks the engine to land the die; landing is
/// the only transition out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollPhase {
    /// No roll is owed.
    Idle,
    /// The player locked in an action; its outcome roll has not landed yet.
    PendingPlayerRoll { action: String },
    /// The model demanded a roll mid-story via a control tag.
    PendingModelRequestedRoll { reason: String },
}

impl RollPhase {
    /// Whether a roll is owed before the story can continue.
    pub fn is_pending(&self) -> bool {
        !matches!(self, RollPhase::Idle)
    }
}
