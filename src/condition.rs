//! Boolean predicates over a fact bag.
//!
//! Conditions drive state detection, guarded matrix entries and
//! condition-only entries. They are written in the definition files as
//! tagged maps (`{ op: equals, fact: crm.evalbox_status, value: VALIDE }`).
//!
//! Evaluation is three-valued: a leaf that reads an absent fact is
//! `Unknown` rather than false, so `not` over a missing fact does not turn
//! into a spurious match. Callers collapse `Unknown` to false and keep the
//! missing paths as diagnostics.

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::facts::FactBag;
use crate::time::{shift_days, MAX_OFFSET_DAYS, MAX_WINDOW_HOURS};
use crate::value::FactValue;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<String, regex::Regex>>> = OnceLock::new();

/// Compiles a regex once per process.
pub(crate) fn cached_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));

    if let Ok(guard) = cache.read() {
        if let Some(re) = guard.get(pattern) {
            return Ok(re.clone());
        }
    }

    let compiled = regex::Regex::new(pattern)?;

    if let Ok(mut guard) = cache.write() {
        if guard.len() >= REGEX_CACHE_MAX {
            // Keep the cache bounded.
            guard.clear();
        }
        guard
            .entry(pattern.to_string())
            .or_insert_with(|| compiled.clone());
    }
    Ok(compiled)
}

/// Kleene truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    const fn from_bool(v: bool) -> Self {
        if v {
            Self::True
        } else {
            Self::False
        }
    }

    const fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Unknown => Self::Unknown,
        }
    }
}

/// Result of evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Three-valued outcome.
    pub truth: Truth,
    /// Fact paths that were absent or unreadable during evaluation.
    pub missing: Vec<String>,
}

impl Evaluation {
    /// Collapses the outcome: only `True` matches.
    #[must_use]
    pub const fn matched(&self) -> bool {
        matches!(self.truth, Truth::True)
    }
}

/// A predicate over a fact bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Always true.
    Always,
    /// Fact is present.
    Exists { fact: String },
    /// Fact is absent. Never unknown.
    Missing { fact: String },
    /// Boolean fact is true.
    IsTrue { fact: String },
    /// Boolean fact is false.
    IsFalse { fact: String },
    /// Fact equals a value.
    Equals { fact: String, value: FactValue },
    /// Fact differs from a value.
    NotEquals { fact: String, value: FactValue },
    /// Fact equals one of the values.
    OneOf { fact: String, values: Vec<FactValue> },
    /// Text fact matches a regex.
    Matches { fact: String, pattern: String },
    /// Numeric fact is strictly greater than a threshold.
    GreaterThan { fact: String, value: f64 },
    /// Numeric fact is strictly smaller than a threshold.
    LessThan { fact: String, value: f64 },
    /// Date fact is strictly before `now + days`.
    Before {
        fact: String,
        #[serde(default)]
        days: i64,
    },
    /// Date fact is strictly after `now + days`.
    After {
        fact: String,
        #[serde(default)]
        days: i64,
    },
    /// Timestamp fact lies within the last `hours` hours.
    WithinHours { fact: String, hours: i64 },
    /// Text or list fact is empty.
    Empty { fact: String },
    /// Text or list fact is non-empty.
    NotEmpty { fact: String },
    /// Every sub-condition holds.
    All { conditions: Vec<Condition> },
    /// At least one sub-condition holds.
    Any { conditions: Vec<Condition> },
    /// Negation.
    Not { condition: Box<Condition> },
}

impl Condition {
    /// Convenience constructor for `equals`.
    #[must_use]
    pub fn equals(fact: impl Into<String>, value: impl Into<FactValue>) -> Self {
        Self::Equals {
            fact: fact.into(),
            value: value.into(),
        }
    }

    /// Convenience constructor for `exists`.
    #[must_use]
    pub fn exists(fact: impl Into<String>) -> Self {
        Self::Exists { fact: fact.into() }
    }

    /// Convenience constructor for `missing`.
    #[must_use]
    pub fn missing(fact: impl Into<String>) -> Self {
        Self::Missing { fact: fact.into() }
    }

    /// Convenience constructor for `is_true`.
    #[must_use]
    pub fn is_true(fact: impl Into<String>) -> Self {
        Self::IsTrue { fact: fact.into() }
    }

    /// Convenience constructor for `not`.
    #[must_use]
    pub fn negate(condition: Self) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }

    /// Returns every fact path this condition reads.
    #[must_use]
    pub fn facts_referenced(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_facts(&mut out);
        out
    }

    fn collect_facts<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Always => {}
            Self::Exists { fact }
            | Self::Missing { fact }
            | Self::IsTrue { fact }
            | Self::IsFalse { fact }
            | Self::Equals { fact, .. }
            | Self::NotEquals { fact, .. }
            | Self::OneOf { fact, .. }
            | Self::Matches { fact, .. }
            | Self::GreaterThan { fact, .. }
            | Self::LessThan { fact, .. }
            | Self::Before { fact, .. }
            | Self::After { fact, .. }
            | Self::WithinHours { fact, .. }
            | Self::Empty { fact }
            | Self::NotEmpty { fact } => {
                if !out.contains(&fact.as_str()) {
                    out.push(fact.as_str());
                }
            }
            Self::All { conditions } | Self::Any { conditions } => {
                for c in conditions {
                    c.collect_facts(out);
                }
            }
            Self::Not { condition } => condition.collect_facts(out),
        }
    }

    /// Checks the parts of a condition that can be wrong before any fact is
    /// seen: regex syntax, empty combinators, negative windows.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Self::Matches { pattern, .. } => cached_regex(pattern)
                .map(|_| ())
                .map_err(|e| format!("invalid regex '{pattern}': {e}")),
            Self::WithinHours { hours, .. } if *hours <= 0 || *hours > MAX_WINDOW_HOURS => Err(format!(
                "within_hours needs a window between 1 and {MAX_WINDOW_HOURS} hours, got {hours}"
            )),
            Self::Before { days, .. } | Self::After { days, .. } if !(-MAX_OFFSET_DAYS..=MAX_OFFSET_DAYS).contains(days) => Err(format!(
                "'{}' offset must stay within {MAX_OFFSET_DAYS} days, got {days}",
                self.op_name()
            )),
            Self::All { conditions } | Self::Any { conditions } => {
                if conditions.is_empty() {
                    return Err(format!("'{}' needs at least one condition", self.op_name()));
                }
                conditions.iter().try_for_each(Self::check)
            }
            Self::Not { condition } => condition.check(),
            _ => Ok(()),
        }
    }

    /// Evaluates this condition against a fact bag.
    #[must_use]
    pub fn evaluate(&self, facts: &FactBag) -> Evaluation {
        let mut missing = Vec::new();
        let truth = self.eval(facts, &mut missing);
        Evaluation { truth, missing }
    }

    fn eval(&self, facts: &FactBag, missing: &mut Vec<String>) -> Truth {
        match self {
            Self::Always => Truth::True,
            Self::Exists { fact } => Truth::from_bool(facts.contains(fact)),
            Self::Missing { fact } => Truth::from_bool(!facts.contains(fact)),
            Self::IsTrue { fact } => read(facts, fact, missing, |v| v.as_bool()),
            Self::IsFalse { fact } => read(facts, fact, missing, |v| v.as_bool().map(|b| !b)),
            Self::Equals { fact, value } => {
                read(facts, fact, missing, |v| Some(v.loosely_equals(value)))
            }
            Self::NotEquals { fact, value } => {
                read(facts, fact, missing, |v| Some(!v.loosely_equals(value)))
            }
            Self::OneOf { fact, values } => read(facts, fact, missing, |v| {
                Some(values.iter().any(|candidate| v.loosely_equals(candidate)))
            }),
            Self::Matches { fact, pattern } => read(facts, fact, missing, |v| {
                let re = cached_regex(pattern).ok()?;
                v.as_text().map(|text| re.is_match(text))
            }),
            Self::GreaterThan { fact, value } => {
                read(facts, fact, missing, |v| v.as_float().map(|n| n > *value))
            }
            Self::LessThan { fact, value } => {
                read(facts, fact, missing, |v| v.as_float().map(|n| n < *value))
            }
            Self::Before { fact, days } => {
                let Some(pivot) = shift_days(facts.now(), *days) else {
                    return Truth::Unknown;
                };
                let pivot = pivot.date_naive();
                read(facts, fact, missing, |v| v.as_date().map(|d| d < pivot))
            }
            Self::After { fact, days } => {
                let Some(pivot) = shift_days(facts.now(), *days) else {
                    return Truth::Unknown;
                };
                let pivot = pivot.date_naive();
                read(facts, fact, missing, |v| v.as_date().map(|d| d > pivot))
            }
            Self::WithinHours { fact, hours } => {
                let now = facts.now();
                let from = Duration::try_hours(*hours).and_then(|len| now.checked_sub_signed(len));
                read(facts, fact, missing, |v| {
                    v.as_datetime()
                        .map(|at| at <= now && from.map_or(true, |from| at >= from))
                })
            }
            Self::Empty { fact } => match facts.get(fact) {
                // An absent list is as empty as an empty one.
                None => Truth::True,
                Some(v) => Truth::from_bool(v.is_empty()),
            },
            Self::NotEmpty { fact } => match facts.get(fact) {
                None => Truth::False,
                Some(v) => Truth::from_bool(!v.is_empty()),
            },
            Self::All { conditions } => {
                let mut result = Truth::True;
                for c in conditions {
                    match c.eval(facts, missing) {
                        Truth::False => return Truth::False,
                        Truth::Unknown => result = Truth::Unknown,
                        Truth::True => {}
                    }
                }
                result
            }
            Self::Any { conditions } => {
                let mut result = Truth::False;
                for c in conditions {
                    match c.eval(facts, missing) {
                        Truth::True => return Truth::True,
                        Truth::Unknown => result = Truth::Unknown,
                        Truth::False => {}
                    }
                }
                result
            }
            Self::Not { condition } => condition.eval(facts, missing).not(),
        }
    }

    const fn op_name(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Exists { .. } => "exists",
            Self::Missing { .. } => "missing",
            Self::IsTrue { .. } => "is_true",
            Self::IsFalse { .. } => "is_false",
            Self::Equals { .. } => "equals",
            Self::NotEquals { .. } => "not_equals",
            Self::OneOf { .. } => "one_of",
            Self::Matches { .. } => "matches",
            Self::GreaterThan { .. } => "greater_than",
            Self::LessThan { .. } => "less_than",
            Self::Before { .. } => "before",
            Self::After { .. } => "after",
            Self::WithinHours { .. } => "within_hours",
            Self::Empty { .. } => "empty",
            Self::NotEmpty { .. } => "not_empty",
            Self::All { .. } => "all",
            Self::Any { .. } => "any",
            Self::Not { .. } => "not",
        }
    }
}

/// Reads one fact and applies `test`. An absent fact, or one `test` cannot
/// interpret, is `Unknown` and recorded as missing.
fn read(
    facts: &FactBag,
    fact: &str,
    missing: &mut Vec<String>,
    test: impl FnOnce(&FactValue) -> Option<bool>,
) -> Truth {
    match facts.get(fact).and_then(test) {
        Some(v) => Truth::from_bool(v),
        None => {
            if !missing.iter().any(|m| m == fact) {
                missing.push(fact.to_string());
            }
            Truth::Unknown
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Exists { fact } | Self::Missing { fact } | Self::IsTrue { fact }
            | Self::IsFalse { fact } | Self::Empty { fact } | Self::NotEmpty { fact } => {
                write!(f, "{}({fact})", self.op_name())
            }
            Self::Equals { fact, value } => write!(f, "{fact} == {value}"),
            Self::NotEquals { fact, value } => write!(f, "{fact} != {value}"),
            Self::OneOf { fact, values } => write!(f, "{fact} in {values:?}"),
            Self::Matches { fact, pattern } => write!(f, "{fact} ~ /{pattern}/"),
            Self::GreaterThan { fact, value } => write!(f, "{fact} > {value}"),
            Self::LessThan { fact, value } => write!(f, "{fact} < {value}"),
            Self::Before { fact, days } => write!(f, "{fact} < now{days:+}d"),
            Self::After { fact, days } => write!(f, "{fact} > now{days:+}d"),
            Self::WithinHours { fact, hours } => write!(f, "{fact} within {hours}h"),
            Self::All { conditions } => write!(f, "all[{}]", conditions.len()),
            Self::Any { conditions } => write!(f, "any[{}]", conditions.len()),
            Self::Not { condition } => write!(f, "not({condition})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_datetime;

    fn bag() -> FactBag {
        FactBag::new(parse_datetime("2026-03-16T09:00:00Z").unwrap())
            .with_fact("crm.evalbox_status", "Refusé CMA")
            .with_fact("crm.exam_date", "2026-03-20")
            .with_fact("crm.paid", true)
            .with_fact("crm.amount_due", 120.5)
            .with_fact("conversation.sessions_communicated_at", "2026-03-15T09:00:00Z")
    }

    #[test]
    fn test_equals_and_one_of() {
        let facts = bag();
        assert!(Condition::equals("crm.evalbox_status", "Refusé CMA").evaluate(&facts).matched());
        let c = Condition::OneOf {
            fact: "crm.evalbox_status".to_string(),
            values: vec!["VALIDE CMA".into(), "Refusé CMA".into()],
        };
        assert!(c.evaluate(&facts).matched());
    }

    #[test]
    fn test_missing_fact_is_unknown_with_diagnostic() {
        let facts = bag();
        let eval = Condition::equals("crm.session_name", "Jour").evaluate(&facts);
        assert_eq!(eval.truth, Truth::Unknown);
        assert!(!eval.matched());
        assert_eq!(eval.missing, vec!["crm.session_name".to_string()]);
    }

    #[test]
    fn test_not_of_missing_stays_unknown() {
        let facts = bag();
        let c = Condition::negate(Condition::is_true("crm.convocation_received"));
        assert_eq!(c.evaluate(&facts).truth, Truth::Unknown);
    }

    #[test]
    fn test_missing_operator_never_unknown() {
        let facts = bag();
        let eval = Condition::missing("crm.exam_deadline").evaluate(&facts);
        assert!(eval.matched());
        assert!(eval.missing.is_empty());
    }

    #[test]
    fn test_kleene_combinators() {
        let facts = bag();
        let unknown = Condition::is_true("crm.unknown");
        let yes = Condition::is_true("crm.paid");
        let no = Condition::IsFalse { fact: "crm.paid".to_string() };

        let all = Condition::All { conditions: vec![unknown.clone(), no.clone()] };
        assert_eq!(all.evaluate(&facts).truth, Truth::False);

        let all = Condition::All { conditions: vec![unknown.clone(), yes.clone()] };
        assert_eq!(all.evaluate(&facts).truth, Truth::Unknown);

        let any = Condition::Any { conditions: vec![unknown.clone(), yes] };
        assert_eq!(any.evaluate(&facts).truth, Truth::True);

        let any = Condition::Any { conditions: vec![unknown, no] };
        assert_eq!(any.evaluate(&facts).truth, Truth::Unknown);
    }

    #[test]
    fn test_dates_use_injected_now() {
        let facts = bag();
        let before = Condition::Before { fact: "crm.exam_date".to_string(), days: 7 };
        assert!(before.evaluate(&facts).matched());
        let after = Condition::After { fact: "crm.exam_date".to_string(), days: 0 };
        assert!(after.evaluate(&facts).matched());
        let within = Condition::WithinHours {
            fact: "conversation.sessions_communicated_at".to_string(),
            hours: 48,
        };
        assert!(within.evaluate(&facts).matched());
    }

    #[test]
    fn test_numeric_and_regex() {
        let facts = bag();
        let gt = Condition::GreaterThan { fact: "crm.amount_due".to_string(), value: 100.0 };
        assert!(gt.evaluate(&facts).matched());
        let re = Condition::Matches {
            fact: "crm.evalbox_status".to_string(),
            pattern: "(?i)refus".to_string(),
        };
        assert!(re.evaluate(&facts).matched());
    }

    #[test]
    fn test_check_rejects_bad_regex_and_empty_all() {
        let bad = Condition::Matches { fact: "a".to_string(), pattern: "(".to_string() };
        assert!(bad.check().is_err());
        assert!(Condition::All { conditions: vec![] }.check().is_err());
        assert!(Condition::Always.check().is_ok());
    }

    #[test]
    fn test_check_rejects_out_of_range_offsets() {
        let far = Condition::Before { fact: "crm.exam_date".to_string(), days: 1_000_000_000 };
        assert!(far.check().is_err());
        let past = Condition::After { fact: "crm.exam_date".to_string(), days: i64::MIN };
        assert!(past.check().is_err());
        let window = Condition::WithinHours { fact: "crm.x".to_string(), hours: i64::MAX };
        assert!(window.check().is_err());
        let ok = Condition::Before { fact: "crm.exam_date".to_string(), days: -MAX_OFFSET_DAYS };
        assert!(ok.check().is_ok());
    }

    #[test]
    fn test_out_of_range_offsets_evaluate_without_panicking() {
        let facts = bag();
        let far = Condition::Before { fact: "crm.exam_date".to_string(), days: 1_000_000_000 };
        assert_eq!(far.evaluate(&facts).truth, Truth::Unknown);
        let window = Condition::WithinHours {
            fact: "conversation.sessions_communicated_at".to_string(),
            hours: i64::MAX,
        };
        assert!(window.evaluate(&facts).matched());
    }

    #[test]
    fn test_facts_referenced_deduplicates() {
        let c = Condition::All {
            conditions: vec![
                Condition::exists("crm.a"),
                Condition::negate(Condition::exists("crm.a")),
                Condition::is_true("crm.b"),
            ],
        };
        assert_eq!(c.facts_referenced(), vec!["crm.a", "crm.b"]);
    }

    #[test]
    fn test_yaml_shape() {
        let yaml = r"
op: all
conditions:
  - { op: equals, fact: crm.evalbox_status, value: Refusé CMA }
  - { op: not, condition: { op: exists, fact: crm.exam_date } }
";
        let c: Condition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.facts_referenced(), vec!["crm.evalbox_status", "crm.exam_date"]);
        assert!(!c.evaluate(&bag()).matched());
    }
}
