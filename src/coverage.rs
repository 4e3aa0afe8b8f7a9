//! Startup replay of historical `(state, intention)` combinations.
//!
//! Cases that only resolve through the per-state legacy template or the
//! generic fallback are the ones that silently produce poor replies. The
//! coverage file lists the combinations seen in production; each is
//! classified against the matrix without any fact bag, and combinations
//! with no matrix route fail the load unless explicitly signed off.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::definitions::{DefinitionStore, IntentionId, MatrixKey};
use crate::error::LoadError;

/// One historical combination. State names go through the alias table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Combination {
    pub state: String,
    pub intention: IntentionId,
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.state, self.intention)
    }
}

/// Contents of `coverage.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSpec {
    /// Combinations observed historically.
    #[serde(default)]
    pub combinations: Vec<Combination>,
    /// Combinations accepted as reaching the fallback tiers.
    #[serde(default)]
    pub signed_off: Vec<Combination>,
}

/// How a combination resolves, statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    /// Exact matrix entry.
    Exact,
    /// Unguarded wildcard entry.
    Wildcard,
    /// Only guarded wildcard entries; resolution depends on facts.
    GuardedOnly,
    /// Falls through to condition-only entries, case tables, legacy or
    /// generic tiers.
    Gap,
}

/// One classified combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageLine {
    pub key: MatrixKey,
    pub status: CoverageStatus,
    pub signed_off: bool,
}

/// Result of the replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    pub lines: Vec<CoverageLine>,
}

impl CoverageReport {
    /// Gaps that nobody signed off.
    #[must_use]
    pub fn gaps(&self) -> Vec<&MatrixKey> {
        self.lines
            .iter()
            .filter(|l| l.status == CoverageStatus::Gap && !l.signed_off)
            .map(|l| &l.key)
            .collect()
    }

    /// Lines that only resolve through guarded entries and that nobody
    /// signed off. Whether they route depends on the facts of each case.
    #[must_use]
    pub fn unsigned_guarded(&self) -> Vec<&MatrixKey> {
        self.lines
            .iter()
            .filter(|l| l.status == CoverageStatus::GuardedOnly && !l.signed_off)
            .map(|l| &l.key)
            .collect()
    }

    /// Number of lines with the given status.
    #[must_use]
    pub fn count(&self, status: CoverageStatus) -> usize {
        self.lines.iter().filter(|l| l.status == status).count()
    }

    /// Fails on unsigned gaps when `strict`, logs them otherwise.
    ///
    /// Unsigned guarded-only lines never fail the load but are logged in
    /// both modes.
    ///
    /// # Errors
    ///
    /// `LoadError::CoverageGap` listing every unsigned gap.
    pub fn enforce(&self, strict: bool) -> Result<(), LoadError> {
        for combination in self.unsigned_guarded() {
            tracing::warn!(
                %combination,
                strict,
                "historical combination only routes through guarded entries"
            );
        }

        let gaps = self.gaps();
        if gaps.is_empty() {
            return Ok(());
        }
        let combinations: Vec<String> = gaps.iter().map(ToString::to_string).collect();
        if strict {
            return Err(LoadError::CoverageGap { combinations });
        }
        for combination in &combinations {
            tracing::warn!(%combination, "historical combination has no matrix route");
        }
        Ok(())
    }
}

/// Classifies every historical combination in the store.
#[must_use]
pub fn check_coverage(store: &DefinitionStore) -> CoverageReport {
    let spec = store.coverage();
    let signed: Vec<MatrixKey> = spec
        .signed_off
        .iter()
        .map(|c| MatrixKey::new(store.canonical_state(&c.state), c.intention.clone()))
        .collect();

    let matrix = store.matrix();
    let lines = spec
        .combinations
        .iter()
        .map(|c| {
            let key = MatrixKey::new(store.canonical_state(&c.state), c.intention.clone());
            let status = if matrix.exact(&key.state, &key.intention).is_some() {
                CoverageStatus::Exact
            } else if matrix.wildcard(&key.intention).is_some() {
                CoverageStatus::Wildcard
            } else if !matrix.guarded(&key.intention).is_empty() {
                CoverageStatus::GuardedOnly
            } else {
                CoverageStatus::Gap
            };
            if status == CoverageStatus::Gap && signed.contains(&key) {
                tracing::warn!(combination = %key, "signed-off coverage gap");
            }
            CoverageLine {
                signed_off: signed.contains(&key),
                key,
                status,
            }
        })
        .collect();

    CoverageReport { lines }
}
