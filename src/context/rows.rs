//! Aggregate data behind the list sections of a reply.
//!
//! Exam-date options, session groups and rejected documents arrive either
//! inside the fact bag (at the well-known paths in [`crate::facts::keys`])
//! or explicitly from the caller. Both end up as [`Aggregates`], which the
//! preparer flattens into template rows.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{format, ExamDateRow, RejectedDocumentRow, SessionRow};
use crate::facts::{keys, FactBag};
use crate::value::FactValue;

/// A proposed exam date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamDateOption {
    pub date: NaiveDate,
    pub department: String,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
}

/// Day or evening schedule of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Day,
    Evening,
}

impl Schedule {
    /// Accepts the English and French spellings used by the CRM.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "day" | "jour" | "journee" | "journée" => Some(Self::Day),
            "evening" | "soir" | "soiree" | "soirée" => Some(Self::Evening),
            _ => None,
        }
    }
}

/// A training session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOption {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub schedule: Option<Schedule>,
}

/// Sessions offered for one exam date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGroup {
    pub exam_date: NaiveDate,
    pub sessions: Vec<SessionOption>,
}

/// A refused document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedDocument {
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// All list data for one case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregates {
    #[serde(default)]
    pub exam_dates: Vec<ExamDateOption>,
    #[serde(default)]
    pub session_groups: Vec<SessionGroup>,
    #[serde(default)]
    pub rejected_documents: Vec<RejectedDocument>,
}

impl Aggregates {
    /// Extracts aggregates from the well-known fact paths.
    ///
    /// Malformed entries are skipped; each skip is reported in the returned
    /// diagnostics.
    #[must_use]
    pub fn from_facts(facts: &FactBag) -> (Self, Vec<String>) {
        let mut diagnostics = Vec::new();
        let mut out = Self::default();

        for (i, entry) in list(facts, keys::EXAM_DATE_OPTIONS).iter().enumerate() {
            match exam_date_option(entry) {
                Some(option) => out.exam_dates.push(option),
                None => skip(&mut diagnostics, keys::EXAM_DATE_OPTIONS, i),
            }
        }

        for (i, entry) in list(facts, keys::SESSION_OPTIONS).iter().enumerate() {
            let Some(group) = entry.as_map() else {
                skip(&mut diagnostics, keys::SESSION_OPTIONS, i);
                continue;
            };
            let Some(exam_date) = group.get("exam_date").and_then(FactValue::as_date) else {
                skip(&mut diagnostics, keys::SESSION_OPTIONS, i);
                continue;
            };
            let mut sessions = Vec::new();
            let raw_sessions = group.get("sessions").and_then(FactValue::as_list).unwrap_or(&[]);
            for (j, raw) in raw_sessions.iter().enumerate() {
                match session_option(raw) {
                    Some(session) => sessions.push(session),
                    None => skip(&mut diagnostics, &format!("{}[{i}].sessions", keys::SESSION_OPTIONS), j),
                }
            }
            out.session_groups.push(SessionGroup { exam_date, sessions });
        }

        for (i, entry) in list(facts, keys::REJECTED_DOCUMENTS).iter().enumerate() {
            match rejected_document(entry) {
                Some(doc) => out.rejected_documents.push(doc),
                None => skip(&mut diagnostics, keys::REJECTED_DOCUMENTS, i),
            }
        }

        (out, diagnostics)
    }
}

fn list<'f>(facts: &'f FactBag, path: &str) -> &'f [FactValue] {
    facts.get(path).and_then(FactValue::as_list).unwrap_or(&[])
}

fn skip(diagnostics: &mut Vec<String>, path: &str, index: usize) {
    tracing::warn!(path, index, "skipping malformed aggregate entry");
    diagnostics.push(format!("malformed entry {path}[{index}] skipped"));
}

fn text(map: &std::collections::BTreeMap<String, FactValue>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(FactValue::as_text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn exam_date_option(entry: &FactValue) -> Option<ExamDateOption> {
    let map = entry.as_map()?;
    Some(ExamDateOption {
        date: map.get("date")?.as_date()?,
        department: text(map, "department")?,
        deadline: map.get("deadline").and_then(FactValue::as_date),
    })
}

fn session_option(entry: &FactValue) -> Option<SessionOption> {
    let map = entry.as_map()?;
    let start = map.get("start")?.as_date()?;
    let end = map.get("end")?.as_date()?;
    if end < start {
        return None;
    }
    Some(SessionOption {
        name: text(map, "name")?,
        start,
        end,
        schedule: map.get("schedule").and_then(FactValue::as_text).and_then(Schedule::parse),
    })
}

fn rejected_document(entry: &FactValue) -> Option<RejectedDocument> {
    if let Some(name) = entry.as_text().map(str::trim).filter(|s| !s.is_empty()) {
        return Some(RejectedDocument {
            name: name.to_string(),
            reason: None,
        });
    }
    let map = entry.as_map()?;
    Some(RejectedDocument {
        name: text(map, "name")?,
        reason: text(map, "reason"),
    })
}

/// Which sessions are offered.
#[derive(Clone, Default)]
pub enum SessionFilter {
    /// Sessions ending strictly before their group's exam date.
    #[default]
    EndsBeforeExam,
    /// Sessions ending strictly before a fixed date.
    EndsBefore(NaiveDate),
    /// No filtering.
    All,
    /// Caller predicate over a session and its group's exam date.
    Custom(Arc<dyn Fn(&SessionOption, NaiveDate) -> bool + Send + Sync>),
}

impl SessionFilter {
    /// Returns true if the session is kept.
    #[must_use]
    pub fn keeps(&self, session: &SessionOption, exam_date: NaiveDate) -> bool {
        match self {
            Self::EndsBeforeExam => session.end < exam_date,
            Self::EndsBefore(limit) => session.end < *limit,
            Self::All => true,
            Self::Custom(predicate) => predicate(session, exam_date),
        }
    }
}

impl fmt::Debug for SessionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndsBeforeExam => write!(f, "EndsBeforeExam"),
            Self::EndsBefore(d) => write!(f, "EndsBefore({d})"),
            Self::All => write!(f, "All"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Flattens session groups into rows, applying `filter`. First/last
/// markers refer to the surviving rows of each group.
#[must_use]
pub fn session_rows(groups: &[SessionGroup], filter: &SessionFilter) -> Vec<SessionRow> {
    groups
        .iter()
        .flat_map(|group| group_rows(group, filter))
        .collect()
}

fn group_rows(group: &SessionGroup, filter: &SessionFilter) -> Vec<SessionRow> {
    let kept: Vec<&SessionOption> = group
        .sessions
        .iter()
        .filter(|s| filter.keeps(s, group.exam_date))
        .collect();
    let last = kept.len().saturating_sub(1);
    kept.into_iter()
        .enumerate()
        .map(|(i, s)| SessionRow {
            name: s.name.clone(),
            exam_date: format::date(group.exam_date),
            start: format::date(s.start),
            end: format::date(s.end),
            start_long: format::date_long(s.start),
            end_long: format::date_long(s.end),
            is_day: s.schedule == Some(Schedule::Day),
            is_evening: s.schedule == Some(Schedule::Evening),
            is_first_in_group: i == 0,
            is_last_in_group: i == last,
        })
        .collect()
}

/// One row per exam date option, each carrying the filtered sessions of
/// its group.
#[must_use]
pub fn exam_date_rows(aggregates: &Aggregates, filter: &SessionFilter) -> Vec<ExamDateRow> {
    aggregates
        .exam_dates
        .iter()
        .map(|option| ExamDateRow {
            date: format::date(option.date),
            date_long: format::date_long(option.date),
            department: option.department.clone(),
            deadline: option.deadline.map(format::date).unwrap_or_default(),
            deadline_long: option.deadline.map(format::date_long).unwrap_or_default(),
            sessions: aggregates
                .session_groups
                .iter()
                .filter(|g| g.exam_date == option.date)
                .flat_map(|g| group_rows(g, filter))
                .collect(),
        })
        .collect()
}

#[must_use]
pub fn rejected_document_rows(docs: &[RejectedDocument]) -> Vec<RejectedDocumentRow> {
    docs.iter()
        .map(|d| RejectedDocumentRow {
            name: d.name.clone(),
            reason: d.reason.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{parse_date, parse_datetime};

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn session(name: &str, start: &str, end: &str, schedule: Option<Schedule>) -> SessionOption {
        SessionOption {
            name: name.to_string(),
            start: d(start),
            end: d(end),
            schedule,
        }
    }

    fn group() -> SessionGroup {
        SessionGroup {
            exam_date: d("2026-04-14"),
            sessions: vec![
                session("Mars jour", "2026-03-02", "2026-03-13", Some(Schedule::Day)),
                session("Mars soir", "2026-03-02", "2026-03-27", Some(Schedule::Evening)),
                session("Avril jour", "2026-04-06", "2026-04-14", Some(Schedule::Day)),
            ],
        }
    }

    #[test]
    fn test_default_filter_drops_sessions_ending_on_or_after_exam() {
        let rows = session_rows(&[group()], &SessionFilter::default());
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Mars jour", "Mars soir"]);
        assert!(rows[0].is_first_in_group && !rows[0].is_last_in_group);
        assert!(rows[1].is_last_in_group);
        assert!(rows[0].is_day && rows[1].is_evening);
    }

    #[test]
    fn test_ends_before_filter() {
        let rows = session_rows(&[group()], &SessionFilter::EndsBefore(d("2026-03-20")));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].end, "13/03/2026");
        assert!(rows[0].is_first_in_group && rows[0].is_last_in_group);
    }

    #[test]
    fn test_custom_filter() {
        let evenings = SessionFilter::Custom(Arc::new(|s: &SessionOption, _: NaiveDate| s.schedule == Some(Schedule::Evening)));
        let rows = session_rows(&[group()], &evenings);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Mars soir");
    }

    #[test]
    fn test_from_facts_skips_malformed_entries() {
        let facts = FactBag::from_json(
            serde_json::json!({
                "options": {
                    "exam_dates": [
                        { "date": "2026-04-14", "department": "75", "deadline": "2026-03-20" },
                        { "date": "not a date", "department": "92" },
                        { "date": "28/04/2026", "department": "93" }
                    ],
                    "sessions": [
                        { "exam_date": "2026-04-14", "sessions": [
                            { "name": "Mars soir", "start": "2026-03-02", "end": "2026-03-27", "schedule": "soir" },
                            { "name": "Broken", "start": "2026-03-30", "end": "2026-03-02" }
                        ] },
                        "garbage"
                    ]
                },
                "exam_platform": { "rejected_documents": ["Pièce d'identité", { "name": "Justificatif", "reason": "illisible" }, 3] }
            }),
            parse_datetime("2026-03-16T09:00:00Z").unwrap(),
        );
        let (agg, diagnostics) = Aggregates::from_facts(&facts);
        assert_eq!(agg.exam_dates.len(), 2);
        assert_eq!(agg.exam_dates[1].date, d("2026-04-28"));
        assert_eq!(agg.session_groups.len(), 1);
        assert_eq!(agg.session_groups[0].sessions.len(), 1);
        assert_eq!(agg.session_groups[0].sessions[0].schedule, Some(Schedule::Evening));
        assert_eq!(agg.rejected_documents.len(), 2);
        assert_eq!(diagnostics.len(), 4);
    }

    #[test]
    fn test_exam_date_rows_carry_their_sessions() {
        let agg = Aggregates {
            exam_dates: vec![
                ExamDateOption {
                    date: d("2026-04-14"),
                    department: "75".to_string(),
                    deadline: Some(d("2026-03-20")),
                },
                ExamDateOption {
                    date: d("2026-05-12"),
                    department: "92".to_string(),
                    deadline: None,
                },
            ],
            session_groups: vec![group()],
            rejected_documents: Vec::new(),
        };
        let rows = exam_date_rows(&agg, &SessionFilter::default());
        assert_eq!(rows[0].deadline, "20/03/2026");
        assert_eq!(rows[0].sessions.len(), 2);
        assert!(rows[1].deadline.is_empty());
        assert!(rows[1].sessions.is_empty());
    }
}
