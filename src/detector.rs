//! State detection.
//!
//! Every state predicate is evaluated against the fact bag. The active set
//! is kept in detection order; the primary state drives matrix lookup.

use serde::{Deserialize, Serialize};

use crate::condition::Truth;
use crate::definitions::{DefinitionStore, Severity, StateId};
use crate::facts::FactBag;

/// Outcome of state detection for one case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedStates {
    /// Active states in detection order. Never empty: holds the
    /// `UNMATCHED` sentinel when no predicate matched.
    pub active: Vec<StateId>,
    /// The state used for matrix lookup.
    pub primary: StateId,
    /// Predicates that could not be decided because facts were missing.
    pub diagnostics: Vec<String>,
}

impl DetectedStates {
    /// Returns true if no state matched.
    #[must_use]
    pub fn is_unmatched(&self) -> bool {
        self.primary.is_unmatched()
    }

    /// Returns true if `state` is active.
    #[must_use]
    pub fn contains(&self, state: &str) -> bool {
        self.active.iter().any(|s| s.as_str() == state)
    }
}

/// Evaluates state predicates over a [`DefinitionStore`].
#[derive(Debug, Clone, Copy)]
pub struct StateDetector<'a> {
    store: &'a DefinitionStore,
}

impl<'a> StateDetector<'a> {
    #[must_use]
    pub const fn new(store: &'a DefinitionStore) -> Self {
        Self { store }
    }

    /// Evaluates every state against `facts`.
    #[must_use]
    pub fn detect(&self, facts: &FactBag) -> DetectedStates {
        let mut active = Vec::new();
        let mut diagnostics = Vec::new();

        for state in self.store.states() {
            let eval = state.detect.evaluate(facts);
            match eval.truth {
                Truth::True => active.push(state),
                Truth::False => {}
                Truth::Unknown => diagnostics.push(format!(
                    "state {} undecided, missing {}",
                    state.id,
                    eval.missing.join(", ")
                )),
            }
        }

        // States are stored in detection order, so the first hit per
        // severity is the highest-priority one.
        let primary = [Severity::Blocking, Severity::Warning, Severity::Info]
            .into_iter()
            .find_map(|severity| active.iter().find(|s| s.severity == severity))
            .map_or_else(StateId::unmatched, |s| s.id.clone());

        let active: Vec<StateId> = if active.is_empty() {
            vec![StateId::unmatched()]
        } else {
            active.into_iter().map(|s| s.id.clone()).collect()
        };

        tracing::debug!(primary = %primary, active = active.len(), "states detected");

        DetectedStates {
            active,
            primary,
            diagnostics,
        }
    }
}
