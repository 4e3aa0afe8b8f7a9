//! The State x Intention dispatch table.
//!
//! The matrix file is written by hand and read once. [`Matrix::build`]
//! turns it into lookup structures: a map keyed by the `(state, intention)`
//! composite, a wildcard map keyed by intention alone, guarded wildcard
//! entries, condition-only entries and the case tables.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::aliases::AliasTable;
use super::ids::{IntentionId, StateId, TemplateId};
use crate::condition::Condition;
use crate::error::LoadError;
use crate::flags::{Flag, FlagValue};

/// State name that matches every state.
pub const WILDCARD: &str = "*";

/// Exact composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixKey {
    pub state: StateId,
    pub intention: IntentionId,
}

impl MatrixKey {
    #[must_use]
    pub fn new(state: impl Into<StateId>, intention: impl Into<IntentionId>) -> Self {
        Self {
            state: state.into(),
            intention: intention.into(),
        }
    }
}

impl fmt::Display for MatrixKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.state, self.intention)
    }
}

/// What a matrix hit resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixOutcome {
    pub template: TemplateId,
    /// Flags forced by the matrix.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<Flag, FlagValue>,
}

/// One line of `matrix.yaml` `entries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntry {
    /// A state id, an alias, or `*`.
    pub state: String,
    pub intention: IntentionId,
    /// Guard; only allowed on wildcard entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
    #[serde(flatten)]
    pub outcome: MatrixOutcome,
}

/// A wildcard entry that only applies when its guard holds.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedEntry {
    pub intention: IntentionId,
    pub when: Condition,
    pub outcome: MatrixOutcome,
}

/// An entry selected by a condition alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub when: Condition,
    #[serde(flatten)]
    pub outcome: MatrixOutcome,
}

impl ConditionalEntry {
    /// Label used in traces and error messages.
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("conditional[{index}]"))
    }
}

/// Closed set of category-specific case tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseCategory {
    /// Partner-funded eligibility, case letters A/B/D/E.
    PartnerEligibility,
}

impl CaseCategory {
    /// Case keys this category may use.
    #[must_use]
    pub const fn allowed_cases(self) -> &'static [&'static str] {
        match self {
            Self::PartnerEligibility => &["A", "B", "D", "E"],
        }
    }

    /// Flag that receives the matched case key.
    #[must_use]
    pub const fn flag(self) -> Flag {
        match self {
            Self::PartnerEligibility => Flag::EligibilityCase,
        }
    }

    /// Normalizes a raw fact value into a case key.
    #[must_use]
    pub fn normalize(self, raw: &str) -> String {
        match self {
            Self::PartnerEligibility => raw.trim().to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for CaseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartnerEligibility => write!(f, "partner_eligibility"),
        }
    }
}

/// Maps the value of a discriminator fact to a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseTable {
    pub category: CaseCategory,
    /// Discriminator fact path.
    pub fact: String,
    /// Intentions this table answers; empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intentions: Vec<IntentionId>,
    pub cases: BTreeMap<String, MatrixOutcome>,
}

impl CaseTable {
    /// Returns true if the table applies to `intention`.
    #[must_use]
    pub fn applies_to(&self, intention: &IntentionId) -> bool {
        self.intentions.is_empty() || self.intentions.contains(intention)
    }
}

/// Maps an exam outcome (`passed`, `failed`, `absent`) to a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeTable {
    pub fact: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intentions: Vec<IntentionId>,
    pub cases: BTreeMap<String, MatrixOutcome>,
}

impl OutcomeTable {
    #[must_use]
    pub fn applies_to(&self, intention: &IntentionId) -> bool {
        self.intentions.is_empty() || self.intentions.contains(intention)
    }

    /// Outcome keys are compared lowercase.
    #[must_use]
    pub fn normalize(raw: &str) -> String {
        raw.trim().to_lowercase()
    }
}

/// Contents of `matrix.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixFile {
    #[serde(default)]
    pub entries: Vec<RawEntry>,
    #[serde(default)]
    pub conditional: Vec<ConditionalEntry>,
    #[serde(default)]
    pub case_tables: Vec<CaseTable>,
    #[serde(default)]
    pub outcome_table: Option<OutcomeTable>,
}

/// Compiled dispatch table.
#[derive(Debug, Clone, Default)]
pub struct Matrix {
    exact: HashMap<MatrixKey, MatrixOutcome>,
    wildcard: HashMap<IntentionId, MatrixOutcome>,
    guarded: HashMap<IntentionId, Vec<GuardedEntry>>,
    conditional: Vec<ConditionalEntry>,
    case_tables: Vec<CaseTable>,
    outcome_table: Option<OutcomeTable>,
}

impl Matrix {
    /// Builds the lookup structures, canonicalizing state names.
    ///
    /// # Errors
    ///
    /// Duplicate exact or unguarded wildcard keys, guards on exact
    /// entries, and case keys outside a category's closed set.
    pub fn build(file: MatrixFile, aliases: &AliasTable) -> Result<Self, LoadError> {
        let mut matrix = Self::default();

        for entry in file.entries {
            if entry.state == WILDCARD {
                match entry.when {
                    Some(when) => matrix
                        .guarded
                        .entry(entry.intention.clone())
                        .or_default()
                        .push(GuardedEntry {
                            intention: entry.intention,
                            when,
                            outcome: entry.outcome,
                        }),
                    None => {
                        let key = format!("({WILDCARD}, {})", entry.intention);
                        if matrix.wildcard.contains_key(&entry.intention) {
                            return Err(LoadError::DuplicateMatrixEntry { key });
                        }
                        matrix.wildcard.insert(entry.intention, entry.outcome);
                    }
                }
                continue;
            }

            let key = MatrixKey {
                state: aliases.canonical(&entry.state),
                intention: entry.intention,
            };
            if entry.when.is_some() {
                return Err(LoadError::GuardedExactEntry { key: key.to_string() });
            }
            if matrix.exact.contains_key(&key) {
                return Err(LoadError::DuplicateMatrixEntry { key: key.to_string() });
            }
            matrix.exact.insert(key, entry.outcome);
        }

        for table in &file.case_tables {
            let allowed = table.category.allowed_cases();
            if let Some(bad) = table.cases.keys().find(|k| !allowed.contains(&k.as_str())) {
                return Err(LoadError::Parse {
                    path: "matrix.yaml".to_string(),
                    message: format!(
                        "case '{bad}' is not one of {allowed:?} for category {}",
                        table.category
                    ),
                });
            }
        }

        matrix.conditional = file.conditional;
        matrix.case_tables = file.case_tables;
        matrix.outcome_table = file.outcome_table;
        Ok(matrix)
    }

    /// Exact `(state, intention)` lookup.
    #[must_use]
    pub fn exact(&self, state: &StateId, intention: &IntentionId) -> Option<&MatrixOutcome> {
        self.exact.get(&MatrixKey {
            state: state.clone(),
            intention: intention.clone(),
        })
    }

    /// Unguarded wildcard lookup.
    #[must_use]
    pub fn wildcard(&self, intention: &IntentionId) -> Option<&MatrixOutcome> {
        self.wildcard.get(intention)
    }

    /// Guarded wildcard entries for an intention, in declaration order.
    #[must_use]
    pub fn guarded(&self, intention: &IntentionId) -> &[GuardedEntry] {
        self.guarded.get(intention).map_or(&[], Vec::as_slice)
    }

    /// Returns true if the intention has any wildcard entry.
    #[must_use]
    pub fn has_wildcard(&self, intention: &IntentionId) -> bool {
        self.wildcard.contains_key(intention) || self.guarded.contains_key(intention)
    }

    #[must_use]
    pub fn conditional(&self) -> &[ConditionalEntry] {
        &self.conditional
    }

    #[must_use]
    pub fn case_tables(&self) -> &[CaseTable] {
        &self.case_tables
    }

    #[must_use]
    pub const fn outcome_table(&self) -> Option<&OutcomeTable> {
        self.outcome_table.as_ref()
    }

    /// Exact keys, sorted.
    #[must_use]
    pub fn exact_keys(&self) -> Vec<&MatrixKey> {
        let mut keys: Vec<&MatrixKey> = self.exact.keys().collect();
        keys.sort();
        keys
    }

    /// Every intention named by an exact or wildcard entry, sorted.
    #[must_use]
    pub fn intentions(&self) -> Vec<&IntentionId> {
        let mut out: Vec<&IntentionId> = self
            .exact
            .keys()
            .map(|k| &k.intention)
            .chain(self.wildcard.keys())
            .chain(self.guarded.keys())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Every condition with a label naming its owner.
    #[must_use]
    pub fn conditions(&self) -> Vec<(String, &Condition)> {
        let mut out = Vec::new();
        let mut guarded: Vec<&GuardedEntry> = self.guarded.values().flatten().collect();
        guarded.sort_by(|a, b| a.intention.cmp(&b.intention));
        for g in guarded {
            out.push((format!("guarded entry ({WILDCARD}, {})", g.intention), &g.when));
        }
        for (i, c) in self.conditional.iter().enumerate() {
            out.push((c.label(i), &c.when));
        }
        out
    }

    /// Every outcome the matrix can select, with a label naming its owner,
    /// sorted by label.
    #[must_use]
    pub fn outcomes(&self) -> Vec<(String, &MatrixOutcome)> {
        let mut out: Vec<(String, &MatrixOutcome)> = Vec::new();
        for (key, outcome) in &self.exact {
            out.push((format!("matrix entry {key}"), outcome));
        }
        for (intention, outcome) in &self.wildcard {
            out.push((format!("matrix entry ({WILDCARD}, {intention})"), outcome));
        }
        for entry in self.guarded.values().flatten() {
            out.push((format!("guarded entry ({WILDCARD}, {})", entry.intention), &entry.outcome));
        }
        for (i, c) in self.conditional.iter().enumerate() {
            out.push((c.label(i), &c.outcome));
        }
        for table in &self.case_tables {
            for (case, outcome) in &table.cases {
                out.push((format!("{} case {case}", table.category), outcome));
            }
        }
        if let Some(table) = &self.outcome_table {
            for (case, outcome) in &table.cases {
                out.push((format!("outcome case {case}"), outcome));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Every template reference with a label naming its owner, sorted by
    /// label.
    #[must_use]
    pub fn template_refs(&self) -> Vec<(String, &TemplateId)> {
        self.outcomes()
            .into_iter()
            .map(|(owner, outcome)| (owner, &outcome.template))
            .collect()
    }

    /// Every state id used as an exact key.
    #[must_use]
    pub fn states(&self) -> Vec<&StateId> {
        let mut out: Vec<&StateId> = self.exact.keys().map(|k| &k.state).collect();
        out.sort();
        out.dedup();
        out
    }
}
