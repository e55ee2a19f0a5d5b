//! Status vocabulary for roadwork activities and needs.
//!
//! The activity state machine is expressed as a closed enum plus the pure
//! predicate [`ActivityStatus::can_transition_to`], so the whole table can be
//! enumerated in tests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A string that does not name any member of one of the closed enumerations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lifecycle status of a roadwork activity.
///
/// ```text
/// review ──> inconsult1 ──> verified1 ──┐
///    │                                  ├──> reporting ──> coordinated ──> prestudy
///    └─────> inconsult2 ──> verified2 ──┘        │              │
///                                                └──> suspended <┘
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    #[default]
    Review,
    Inconsult1,
    Inconsult2,
    Verified1,
    Verified2,
    Reporting,
    Coordinated,
    Suspended,
    Prestudy,
}

impl ActivityStatus {
    pub const ALL: [ActivityStatus; 9] = [
        Self::Review,
        Self::Inconsult1,
        Self::Inconsult2,
        Self::Verified1,
        Self::Verified2,
        Self::Reporting,
        Self::Coordinated,
        Self::Suspended,
        Self::Prestudy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Inconsult1 => "inconsult1",
            Self::Inconsult2 => "inconsult2",
            Self::Verified1 => "verified1",
            Self::Verified2 => "verified2",
            Self::Reporting => "reporting",
            Self::Coordinated => "coordinated",
            Self::Suspended => "suspended",
            Self::Prestudy => "prestudy",
        }
    }

    /// Human-readable phase label used in history entries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Review => "in review",
            Self::Inconsult1 => "needs consultation (1st round)",
            Self::Inconsult2 => "needs consultation (2nd round)",
            Self::Verified1 => "verified (1st round)",
            Self::Verified2 => "verified (2nd round)",
            Self::Reporting => "reporting",
            Self::Coordinated => "coordinated",
            Self::Suspended => "suspended",
            Self::Prestudy => "pre-study",
        }
    }

    /// No transition out of a terminal status is ever accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Suspended | Self::Prestudy)
    }

    /// Statuses whose entry opens a round of orderer feedback.
    pub fn is_feedback_phase(&self) -> bool {
        matches!(self, Self::Inconsult1 | Self::Inconsult2 | Self::Reporting)
    }

    /// Transition table. Everything not explicitly forbidden is accepted.
    pub fn can_transition_to(&self, target: ActivityStatus) -> bool {
        use ActivityStatus::*;
        match self {
            Review => target != Review,
            Inconsult1 => !matches!(target, Inconsult1 | Review),
            Inconsult2 => !matches!(target, Inconsult2 | Review),
            Verified1 | Verified2 => target != Review,
            Reporting => matches!(target, Coordinated | Suspended),
            Coordinated => matches!(target, Reporting | Suspended | Prestudy),
            Prestudy | Suspended => false,
        }
    }

    /// When moving from `self` back to `target` re-opens an earlier phase,
    /// returns the phase being left whose entry timestamp must be cleared.
    pub fn step_back_from(&self, target: ActivityStatus) -> Option<ActivityStatus> {
        use ActivityStatus::*;
        match (self, target) {
            (Verified1, Inconsult1) => Some(Verified1),
            (Verified2, Inconsult2) => Some(Verified2),
            (Coordinated, Reporting) => Some(Coordinated),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue::new("activity status", s))
    }
}

/// Status of a roadwork need. Mirrors the activity statuses during cascades
/// and adds the two need-only states a need passes through before it is
/// absorbed by an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeedStatus {
    Requirement,
    Edited,
    Review,
    Inconsult1,
    Inconsult2,
    Verified1,
    Verified2,
    Reporting,
    Coordinated,
    Suspended,
    Prestudy,
}

impl NeedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirement => "requirement",
            Self::Edited => "edited",
            Self::Review => "review",
            Self::Inconsult1 => "inconsult1",
            Self::Inconsult2 => "inconsult2",
            Self::Verified1 => "verified1",
            Self::Verified2 => "verified2",
            Self::Reporting => "reporting",
            Self::Coordinated => "coordinated",
            Self::Suspended => "suspended",
            Self::Prestudy => "prestudy",
        }
    }

    /// Status a need falls back to when it leaves an activity.
    pub fn released(is_private: bool) -> Self {
        if is_private {
            Self::Requirement
        } else {
            Self::Edited
        }
    }

    /// True for the two states a need holds before any activity absorbs it.
    pub fn is_unassigned(&self) -> bool {
        matches!(self, Self::Requirement | Self::Edited)
    }
}

impl From<ActivityStatus> for NeedStatus {
    fn from(status: ActivityStatus) -> Self {
        match status {
            ActivityStatus::Review => Self::Review,
            ActivityStatus::Inconsult1 => Self::Inconsult1,
            ActivityStatus::Inconsult2 => Self::Inconsult2,
            ActivityStatus::Verified1 => Self::Verified1,
            ActivityStatus::Verified2 => Self::Verified2,
            ActivityStatus::Reporting => Self::Reporting,
            ActivityStatus::Coordinated => Self::Coordinated,
            ActivityStatus::Suspended => Self::Suspended,
            ActivityStatus::Prestudy => Self::Prestudy,
        }
    }
}

impl fmt::Display for NeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NeedStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requirement" => Ok(Self::Requirement),
            "edited" => Ok(Self::Edited),
            other => ActivityStatus::from_str(other)
                .map(Self::from)
                .map_err(|_| UnknownValue::new("need status", s)),
        }
    }
}

/// How a need relates to the activity it is linked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    /// The need is absorbed by the activity.
    #[serde(rename = "assignedneed")]
    AssignedNeed,
    /// The need is only registered against the activity for later review.
    #[serde(rename = "registeredneed")]
    RegisteredNeed,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssignedNeed => "assignedneed",
            Self::RegisteredNeed => "registeredneed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AssignedNeed => "assigned need",
            Self::RegisteredNeed => "registered need",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assignedneed" => Ok(Self::AssignedNeed),
            "registeredneed" => Ok(Self::RegisteredNeed),
            _ => Err(UnknownValue::new("relation type", s)),
        }
    }
}
