//! State definitions.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{StateId, TemplateId};
use crate::condition::Condition;

/// How serious a state is for the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Nothing can progress until this is resolved.
    Blocking,
    /// Needs attention but does not block the case.
    Warning,
    /// Informational.
    Info,
}

impl Severity {
    /// Ordering rank: higher is more severe.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Blocking => 3,
            Self::Warning => 2,
            Self::Info => 1,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => write!(f, "BLOCKING"),
            Self::Warning => write!(f, "WARNING"),
            Self::Info => write!(f, "INFO"),
        }
    }
}

/// A named condition describing the factual status of a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub id: StateId,
    pub priority: i32,
    pub severity: Severity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Detection predicate.
    pub detect: Condition,

    /// Deprecated per-state template, only reached when the matrix has no
    /// entry for the case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_template: Option<TemplateId>,
}

impl StateDefinition {
    /// Detection order: priority desc, severity desc, then id for a stable
    /// tie-break.
    #[must_use]
    pub fn detection_order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.severity.rank().cmp(&self.severity.rank()))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Contents of `states.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatesFile {
    #[serde(default)]
    pub states: Vec<StateDefinition>,
}
