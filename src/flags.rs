//! Context flags and the matrix-wins merge.
//!
//! A flag is written from two kinds of places: the matrix (entry overrides
//! and case tables) and dynamic computation (intention context flags, data
//! presence, anti-repetition). Once the matrix has set a flag, computation
//! can no longer change it. Every write goes through [`FlagSet`] so the
//! rule lives in exactly one place.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of switches templates can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    ShowDatesSection,
    ShowSessionsSection,
    ShowConvocationSection,
    ShowDocumentsSection,
    ShowCredentialsSection,
    ShowPaymentSection,
    ShowResultsSection,
    ShowPartnerSection,
    ShowDeadlineWarning,
    ShowForceMajeureSection,
    EligibilityCase,
    ExamOutcome,
}

impl Flag {
    /// Every flag, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::ShowDatesSection,
        Self::ShowSessionsSection,
        Self::ShowConvocationSection,
        Self::ShowDocumentsSection,
        Self::ShowCredentialsSection,
        Self::ShowPaymentSection,
        Self::ShowResultsSection,
        Self::ShowPartnerSection,
        Self::ShowDeadlineWarning,
        Self::ShowForceMajeureSection,
        Self::EligibilityCase,
        Self::ExamOutcome,
    ];

    /// The name templates and definition files use.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShowDatesSection => "show_dates_section",
            Self::ShowSessionsSection => "show_sessions_section",
            Self::ShowConvocationSection => "show_convocation_section",
            Self::ShowDocumentsSection => "show_documents_section",
            Self::ShowCredentialsSection => "show_credentials_section",
            Self::ShowPaymentSection => "show_payment_section",
            Self::ShowResultsSection => "show_results_section",
            Self::ShowPartnerSection => "show_partner_section",
            Self::ShowDeadlineWarning => "show_deadline_warning",
            Self::ShowForceMajeureSection => "show_force_majeure_section",
            Self::EligibilityCase => "eligibility_case",
            Self::ExamOutcome => "exam_outcome",
        }
    }

    /// Text flags carry a value; the rest are booleans.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::EligibilityCase | Self::ExamOutcome)
    }

    /// Returns true if `value` has the kind this flag carries.
    #[must_use]
    pub const fn accepts(self, value: &FlagValue) -> bool {
        match value {
            FlagValue::Text(_) => self.is_text(),
            FlagValue::Bool(_) => !self.is_text(),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.as_str() == s)
            .ok_or_else(|| format!("unknown flag '{s}'"))
    }
}

/// Value carried by a flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Text(String),
}

impl FlagValue {
    /// Non-empty text and `true` are truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(v) => *v,
            Self::Text(v) => !v.is_empty(),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            Self::Bool(_) => None,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FlagValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Where a flag's current value came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum FlagState {
    #[default]
    Unset,
    MatrixForced(FlagValue),
    Computed(FlagValue),
}

impl FlagState {
    #[must_use]
    pub const fn value(&self) -> Option<&FlagValue> {
        match self {
            Self::Unset => None,
            Self::MatrixForced(v) | Self::Computed(v) => Some(v),
        }
    }
}

/// Per-invocation flag overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    states: BTreeMap<Flag, FlagState>,
}

impl FlagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a flag from the matrix. Matrix values override anything,
    /// including an earlier computed value.
    pub fn force(&mut self, flag: Flag, value: impl Into<FlagValue>) {
        self.states.insert(flag, FlagState::MatrixForced(value.into()));
    }

    /// Applies every matrix override in `overrides`.
    pub fn force_all<'a>(&mut self, overrides: impl IntoIterator<Item = (&'a Flag, &'a FlagValue)>) {
        for (flag, value) in overrides {
            self.force(*flag, value.clone());
        }
    }

    /// Sets a computed value unless the matrix already owns the flag.
    ///
    /// Returns true if the value was applied.
    pub fn compute(&mut self, flag: Flag, value: impl Into<FlagValue>) -> bool {
        let slot = self.states.entry(flag).or_default();
        if matches!(slot, FlagState::MatrixForced(_)) {
            return false;
        }
        *slot = FlagState::Computed(value.into());
        true
    }

    /// Sets a computed value only if nothing has set the flag yet.
    pub fn compute_default(&mut self, flag: Flag, value: impl Into<FlagValue>) -> bool {
        let slot = self.states.entry(flag).or_default();
        if !matches!(slot, FlagState::Unset) {
            return false;
        }
        *slot = FlagState::Computed(value.into());
        true
    }

    /// Current state of a flag.
    #[must_use]
    pub fn state(&self, flag: Flag) -> &FlagState {
        static UNSET: FlagState = FlagState::Unset;
        self.states.get(&flag).unwrap_or(&UNSET)
    }

    /// Current value of a flag.
    #[must_use]
    pub fn get(&self, flag: Flag) -> Option<&FlagValue> {
        self.state(flag).value()
    }

    /// Returns true if the matrix owns this flag.
    #[must_use]
    pub fn is_forced(&self, flag: Flag) -> bool {
        matches!(self.state(flag), FlagState::MatrixForced(_))
    }

    /// Truthiness of a flag; unset is false.
    #[must_use]
    pub fn enabled(&self, flag: Flag) -> bool {
        self.get(flag).is_some_and(FlagValue::is_truthy)
    }

    /// Text value of a flag, if it holds one.
    #[must_use]
    pub fn text(&self, flag: Flag) -> Option<&str> {
        self.get(flag).and_then(FlagValue::as_text)
    }

    /// Resolved values of every set flag.
    #[must_use]
    pub fn values(&self) -> BTreeMap<Flag, FlagValue> {
        self.states
            .iter()
            .filter_map(|(flag, state)| state.value().map(|v| (*flag, v.clone())))
            .collect()
    }

    /// Full provenance of every set flag.
    #[must_use]
    pub fn provenance(&self) -> BTreeMap<Flag, FlagState> {
        self.states
            .iter()
            .filter(|(_, state)| !matches!(state, FlagState::Unset))
            .map(|(flag, state)| (*flag, state.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_names_roundtrip() {
        for flag in Flag::ALL {
            assert_eq!(flag.as_str().parse::<Flag>().unwrap(), flag);
        }
        assert!("show_everything".parse::<Flag>().is_err());
    }

    #[test]
    fn test_flag_yaml_keys() {
        let map: BTreeMap<Flag, FlagValue> =
            serde_yaml::from_str("{ show_sessions_section: false, eligibility_case: B }").unwrap();
        assert_eq!(map[&Flag::ShowSessionsSection], FlagValue::Bool(false));
        assert_eq!(map[&Flag::EligibilityCase], FlagValue::from("B"));
        assert!(serde_yaml::from_str::<BTreeMap<Flag, FlagValue>>("{ show_nothing: true }").is_err());
    }

    #[test]
    fn test_accepts_checks_value_kind() {
        assert!(Flag::ShowSessionsSection.accepts(&FlagValue::Bool(false)));
        assert!(!Flag::ShowSessionsSection.accepts(&FlagValue::from("false")));
        assert!(Flag::ExamOutcome.accepts(&FlagValue::from("passed")));
        assert!(!Flag::ExamOutcome.accepts(&FlagValue::Bool(true)));
    }

    #[test]
    fn test_matrix_forced_wins_over_computed() {
        let mut flags = FlagSet::new();
        flags.force(Flag::ShowSessionsSection, false);
        assert!(!flags.compute(Flag::ShowSessionsSection, true));
        assert!(!flags.enabled(Flag::ShowSessionsSection));
        assert!(flags.is_forced(Flag::ShowSessionsSection));
    }

    #[test]
    fn test_computed_fills_unset_and_can_be_recomputed() {
        let mut flags = FlagSet::new();
        assert!(flags.compute(Flag::ShowDatesSection, true));
        assert!(flags.compute(Flag::ShowDatesSection, false));
        assert_eq!(flags.state(Flag::ShowDatesSection), &FlagState::Computed(FlagValue::Bool(false)));
    }

    #[test]
    fn test_force_after_compute_overrides() {
        let mut flags = FlagSet::new();
        flags.compute(Flag::ShowPaymentSection, false);
        flags.force(Flag::ShowPaymentSection, true);
        assert!(flags.enabled(Flag::ShowPaymentSection));
    }

    #[test]
    fn test_compute_default_only_fills_unset() {
        let mut flags = FlagSet::new();
        flags.compute(Flag::ShowResultsSection, false);
        assert!(!flags.compute_default(Flag::ShowResultsSection, true));
        assert!(flags.compute_default(Flag::ShowPartnerSection, true));
        assert!(flags.enabled(Flag::ShowPartnerSection));
    }

    #[test]
    fn test_values_and_provenance() {
        let mut flags = FlagSet::new();
        flags.force(Flag::EligibilityCase, "A");
        flags.compute(Flag::ShowDocumentsSection, true);
        let values = flags.values();
        assert_eq!(values.len(), 2);
        assert_eq!(flags.text(Flag::EligibilityCase), Some("A"));
        assert!(matches!(
            flags.provenance()[&Flag::EligibilityCase],
            FlagState::MatrixForced(_)
        ));
    }
}
