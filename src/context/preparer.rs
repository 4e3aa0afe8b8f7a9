//! Builds the render context for one case.
//!
//! The preparer formats scalar facts, flattens the aggregates into rows and
//! finishes the flag overlay: a section flag is computed from the presence
//! of its data, and information already sent recently is suppressed. Every
//! computed value goes through [`FlagSet::compute`], so a flag forced by
//! the matrix is never changed here.

use chrono::{DateTime, NaiveDate, Utc};

use super::rows::{exam_date_rows, rejected_document_rows, session_rows, Aggregates, SessionFilter};
use super::{format, RenderContext};
use crate::definitions::{IntentionId, StateId};
use crate::facts::{keys, FactBag};
use crate::flags::{Flag, FlagSet};
use crate::time::{shift_date, RecencyWindow};
use crate::value::FactValue;

/// Tunables of the preparer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparerSettings {
    /// Earlier communications inside this window are not repeated.
    pub recency: RecencyWindow,
    /// Deadlines within this many days raise the deadline warning.
    pub deadline_warning_days: i64,
}

impl Default for PreparerSettings {
    fn default() -> Self {
        Self {
            recency: RecencyWindow::default(),
            deadline_warning_days: 7,
        }
    }
}

/// Inputs of one preparation.
#[derive(Debug)]
pub struct PreparationInput<'a> {
    pub facts: &'a FactBag,
    /// Flags resolved by the selector.
    pub flags: FlagSet,
    /// Explicit aggregates; extracted from the fact bag when `None`.
    pub aggregates: Option<&'a Aggregates>,
    pub filter: &'a SessionFilter,
    pub state: &'a StateId,
    pub intention: &'a IntentionId,
}

/// Result of one preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub context: RenderContext,
    /// Final flag overlay, with provenance.
    pub flags: FlagSet,
    pub diagnostics: Vec<String>,
}

/// Turns facts and flags into a [`RenderContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextPreparer {
    settings: PreparerSettings,
}

impl ContextPreparer {
    #[must_use]
    pub const fn new(settings: PreparerSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &PreparerSettings {
        &self.settings
    }

    /// Builds the context. Pure: the same input yields the same output.
    #[must_use]
    pub fn prepare(&self, input: PreparationInput<'_>) -> Prepared {
        let PreparationInput {
            facts,
            mut flags,
            aggregates,
            filter,
            state,
            intention,
        } = input;

        let mut diagnostics = Vec::new();
        let extracted;
        let aggregates = if let Some(explicit) = aggregates {
            explicit
        } else {
            let (found, skipped) = Aggregates::from_facts(facts);
            diagnostics.extend(skipped);
            extracted = found;
            &extracted
        };

        let exam_dates = exam_date_rows(aggregates, filter);
        let sessions = session_rows(&aggregates.session_groups, filter);
        let rejected_documents = rejected_document_rows(&aggregates.rejected_documents);
        let amount_due = facts.get(keys::AMOUNT_DUE).and_then(FactValue::as_float);

        section(&mut flags, Flag::ShowDatesSection, !exam_dates.is_empty());
        section(&mut flags, Flag::ShowSessionsSection, !sessions.is_empty());
        section(&mut flags, Flag::ShowDocumentsSection, !rejected_documents.is_empty());
        section(
            &mut flags,
            Flag::ShowCredentialsSection,
            facts.text(keys::PLATFORM_USERNAME).is_some(),
        );
        section(
            &mut flags,
            Flag::ShowConvocationSection,
            facts.flag(keys::CONVOCATION_RECEIVED) == Some(true),
        );
        section(&mut flags, Flag::ShowPaymentSection, amount_due.is_some_and(|a| a > 0.0));
        section(&mut flags, Flag::ShowResultsSection, facts.text(keys::EXAM_RESULT).is_some());

        let today = facts.now().date_naive();
        let horizon = shift_date(today, self.settings.deadline_warning_days).unwrap_or(NaiveDate::MAX);
        let deadline_close = aggregates
            .exam_dates
            .iter()
            .filter_map(|o| o.deadline)
            .chain(facts.get(keys::EXAM_DEADLINE).and_then(FactValue::as_date))
            .any(|d| d >= today && d <= horizon);
        flags.compute_default(Flag::ShowDeadlineWarning, deadline_close);

        self.suppress_recent(facts, &mut flags, &mut diagnostics);

        let exam_date = facts.get(keys::EXAM_DATE).and_then(FactValue::as_date);
        let exam_deadline = facts.get(keys::EXAM_DEADLINE).and_then(FactValue::as_date);
        let text = |path: &str| facts.text(path).map(ToString::to_string).unwrap_or_default();

        let context = RenderContext {
            first_name: text(keys::FIRST_NAME),
            state: state.to_string(),
            intention: intention.to_string(),

            exam_date: exam_date.map(format::date).unwrap_or_default(),
            exam_date_long: exam_date.map(format::date_long).unwrap_or_default(),
            exam_department: text(keys::EXAM_DEPARTMENT),
            exam_deadline: exam_deadline.map(format::date).unwrap_or_default(),
            exam_deadline_long: exam_deadline.map(format::date_long).unwrap_or_default(),

            session_name: text(keys::SESSION_NAME),
            session_start: fact_date(facts, keys::SESSION_START),
            session_end: fact_date(facts, keys::SESSION_END),

            evalbox_status: text(keys::EVALBOX_STATUS),
            amount_due: amount_due.map(format::amount).unwrap_or_default(),
            convocation_received: facts.flag(keys::CONVOCATION_RECEIVED).unwrap_or(false),

            platform_username: text(keys::PLATFORM_USERNAME),
            platform_password: text(keys::PLATFORM_PASSWORD),
            exam_result: text(keys::EXAM_RESULT),

            eligibility_case: flags.text(Flag::EligibilityCase).unwrap_or_default().to_string(),
            exam_outcome: flags.text(Flag::ExamOutcome).unwrap_or_default().to_string(),

            show_dates_section: flags.enabled(Flag::ShowDatesSection),
            show_sessions_section: flags.enabled(Flag::ShowSessionsSection),
            show_convocation_section: flags.enabled(Flag::ShowConvocationSection),
            show_documents_section: flags.enabled(Flag::ShowDocumentsSection),
            show_credentials_section: flags.enabled(Flag::ShowCredentialsSection),
            show_payment_section: flags.enabled(Flag::ShowPaymentSection),
            show_results_section: flags.enabled(Flag::ShowResultsSection),
            show_partner_section: flags.enabled(Flag::ShowPartnerSection),
            show_deadline_warning: flags.enabled(Flag::ShowDeadlineWarning),
            show_force_majeure_section: flags.enabled(Flag::ShowForceMajeureSection),

            exam_dates,
            sessions,
            rejected_documents,
        };

        Prepared {
            context,
            flags,
            diagnostics,
        }
    }

    fn suppress_recent(&self, facts: &FactBag, flags: &mut FlagSet, diagnostics: &mut Vec<String>) {
        const RECENT: [(&str, Flag); 3] = [
            (keys::DATES_COMMUNICATED_AT, Flag::ShowDatesSection),
            (keys::SESSIONS_COMMUNICATED_AT, Flag::ShowSessionsSection),
            (keys::CREDENTIALS_COMMUNICATED_AT, Flag::ShowCredentialsSection),
        ];

        let now = facts.now();
        for (path, flag) in RECENT {
            let Some(at) = communicated_at(facts, path) else {
                continue;
            };
            if !self.settings.recency.covers(at, now) {
                continue;
            }
            if flags.compute(flag, false) {
                tracing::debug!(%flag, %at, "suppressing recently communicated section");
            } else {
                diagnostics.push(format!("{flag} forced by matrix despite recent communication"));
            }
        }
    }
}

/// Data present: fill the flag unless something set it. Data absent: turn
/// it off unless the matrix forced it.
fn section(flags: &mut FlagSet, flag: Flag, has_data: bool) {
    if has_data {
        flags.compute_default(flag, true);
    } else {
        flags.compute(flag, false);
    }
}

fn communicated_at(facts: &FactBag, path: &str) -> Option<DateTime<Utc>> {
    facts.get(path).and_then(FactValue::as_datetime)
}

fn fact_date(facts: &FactBag, path: &str) -> String {
    facts
        .get(path)
        .and_then(FactValue::as_date)
        .map(format::date)
        .unwrap_or_default()
}
