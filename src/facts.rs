//! The fact bag: one read-only snapshot of a case.
//!
//! Facts are addressed by dotted paths (`crm.exam_date`,
//! `exam_platform.username`). The bag also carries the reference instant
//! every temporal predicate is evaluated against, so evaluation never
//! depends on the wall clock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::FactValue;

/// Well-known fact paths read by the context preparer.
pub mod keys {
    pub const FIRST_NAME: &str = "crm.first_name";
    pub const EXAM_DATE: &str = "crm.exam_date";
    pub const EXAM_DEPARTMENT: &str = "crm.exam_department";
    pub const EXAM_DEADLINE: &str = "crm.exam_deadline";
    pub const SESSION_NAME: &str = "crm.session_name";
    pub const SESSION_START: &str = "crm.session_start";
    pub const SESSION_END: &str = "crm.session_end";
    pub const EVALBOX_STATUS: &str = "crm.evalbox_status";
    pub const AMOUNT_DUE: &str = "crm.amount_due";
    pub const CONVOCATION_RECEIVED: &str = "crm.convocation_received";
    pub const EXAM_RESULT: &str = "exam_platform.result";
    pub const PLATFORM_USERNAME: &str = "exam_platform.username";
    pub const PLATFORM_PASSWORD: &str = "exam_platform.password";
    pub const REJECTED_DOCUMENTS: &str = "exam_platform.rejected_documents";
    pub const EXAM_DATE_OPTIONS: &str = "options.exam_dates";
    pub const SESSION_OPTIONS: &str = "options.sessions";
    pub const DATES_COMMUNICATED_AT: &str = "conversation.dates_communicated_at";
    pub const SESSIONS_COMMUNICATED_AT: &str = "conversation.sessions_communicated_at";
    pub const CREDENTIALS_COMMUNICATED_AT: &str = "conversation.credentials_communicated_at";
}

/// Snapshot of a case, plus the injected current time.
#[derive(Debug, Clone, PartialEq)]
pub struct FactBag {
    root: BTreeMap<String, FactValue>,
    now: DateTime<Utc>,
}

impl FactBag {
    /// Creates an empty fact bag evaluated at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            root: BTreeMap::new(),
            now,
        }
    }

    /// Builds a fact bag from a JSON object. Non-object input yields an
    /// empty bag.
    #[must_use]
    pub fn from_json(value: serde_json::Value, now: DateTime<Utc>) -> Self {
        let root = match FactValue::from(value) {
            FactValue::Map(map) => map,
            _ => BTreeMap::new(),
        };
        Self { root, now }
    }

    /// Sets a fact at a dotted path, creating intermediate maps.
    ///
    /// A scalar found on the way is replaced by a map.
    #[must_use]
    pub fn with_fact(mut self, path: &str, value: impl Into<FactValue>) -> Self {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return self;
        };
        let mut current = &mut self.root;
        for segment in segments {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| FactValue::Map(BTreeMap::new()));
            if !matches!(slot, FactValue::Map(_)) {
                *slot = FactValue::Map(BTreeMap::new());
            }
            let FactValue::Map(next) = slot else {
                unreachable!("slot was just made a map");
            };
            current = next;
        }
        current.insert(last.to_string(), value.into());
        self
    }

    /// The reference instant for this evaluation.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Looks up a fact by dotted path. Null values count as absent.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FactValue> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.root.get(first)?;
        for segment in segments {
            current = current.as_map()?.get(segment)?;
        }
        (!current.is_null()).then_some(current)
    }

    /// Returns true if the fact is present and not null.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Looks up a text fact, ignoring blank strings.
    #[must_use]
    pub fn text(&self, path: &str) -> Option<&str> {
        self.get(path)
            .and_then(FactValue::as_text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Looks up a boolean fact.
    #[must_use]
    pub fn flag(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(FactValue::as_bool)
    }
}

/// Declared type of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Bool,
    Int,
    Float,
    Text,
    Date,
    Datetime,
    List,
    Map,
}

impl FactType {
    /// Returns true if `value` has this type.
    #[must_use]
    pub fn accepts(self, value: &FactValue) -> bool {
        match self {
            Self::Bool => value.as_bool().is_some(),
            Self::Int => value.as_int().is_some(),
            Self::Float => value.as_float().is_some(),
            Self::Text => value.as_text().is_some(),
            Self::Date => value.as_date().is_some(),
            Self::Datetime => value.as_datetime().is_some(),
            Self::List => value.as_list().is_some(),
            Self::Map => value.as_map().is_some(),
        }
    }
}

/// One declared fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactField {
    #[serde(rename = "type")]
    pub kind: FactType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The set of facts collectors promise to supply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSchema {
    pub facts: BTreeMap<String, FactField>,
}

impl FactSchema {
    /// Returns true if `path` is declared.
    #[must_use]
    pub fn declares(&self, path: &str) -> bool {
        self.facts.contains_key(path)
    }

    /// Checks a fact bag: required facts must be present and every present
    /// declared fact must have its declared type.
    ///
    /// Returns the list of violations (empty when the bag conforms).
    #[must_use]
    pub fn violations(&self, bag: &FactBag) -> Vec<String> {
        let mut out = Vec::new();
        for (path, field) in &self.facts {
            match bag.get(path) {
                None if field.required => out.push(format!("required fact '{path}' is missing")),
                None => {}
                Some(value) if !field.kind.accepts(value) => out.push(format!(
                    "fact '{path}' should be {:?}, got {}",
                    field.kind,
                    value.type_name()
                )),
                Some(_) => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        crate::time::parse_datetime("2026-03-16T09:00:00Z").unwrap()
    }

    #[test]
    fn test_dotted_lookup() {
        let bag = FactBag::new(now())
            .with_fact("crm.exam_date", "2026-04-02")
            .with_fact("crm.first_name", "Lina");
        assert_eq!(bag.text("crm.first_name"), Some("Lina"));
        assert!(bag.contains("crm.exam_date"));
        assert!(!bag.contains("crm.session_name"));
        assert!(bag.get("crm").unwrap().as_map().is_some());
    }

    #[test]
    fn test_null_and_blank_are_absent() {
        let bag = FactBag::from_json(
            serde_json::json!({"crm": {"first_name": "  ", "exam_date": null}}),
            now(),
        );
        assert!(bag.text("crm.first_name").is_none());
        assert!(!bag.contains("crm.exam_date"));
    }

    #[test]
    fn test_with_fact_replaces_scalar_parent() {
        let bag = FactBag::new(now())
            .with_fact("crm", "flat")
            .with_fact("crm.first_name", "Lina");
        assert_eq!(bag.text("crm.first_name"), Some("Lina"));
    }

    #[test]
    fn test_schema_violations() {
        let mut schema = FactSchema::default();
        schema.facts.insert(
            "crm.evalbox_status".to_string(),
            FactField {
                kind: FactType::Text,
                required: true,
                description: None,
            },
        );
        schema.facts.insert(
            "crm.exam_date".to_string(),
            FactField {
                kind: FactType::Date,
                required: false,
                description: None,
            },
        );

        let bag = FactBag::new(now()).with_fact("crm.exam_date", "next week");
        let violations = schema.violations(&bag);
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.contains("required fact 'crm.evalbox_status'")));
        assert!(violations.iter().any(|v| v.contains("crm.exam_date")));

        let ok = FactBag::new(now())
            .with_fact("crm.evalbox_status", "Dossier créé")
            .with_fact("crm.exam_date", "2026-04-02");
        assert!(schema.violations(&ok).is_empty());
    }
}
