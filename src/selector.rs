//! Template selection.
//!
//! Resolution walks seven passes and stops at the first hit:
//!
//! 1. exact `(state, intention)` entry
//! 2. wildcard `(*, intention)` entries, guarded ones first
//! 3. condition-only entries
//! 4. category case tables
//! 5. the exam outcome table
//! 6. the primary state's legacy default template
//! 7. the generic fallback template
//!
//! Passes 1 and 2 try the primary intention and then every secondary
//! intention in order. Selection is total: pass 7 always answers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::condition::Truth;
use crate::definitions::{
    DefinitionStore, IntentionId, MatrixOutcome, OutcomeTable, StateId, TemplateId, WILDCARD,
};
use crate::facts::FactBag;
use crate::flags::{Flag, FlagSet, FlagValue};

/// Which pass produced the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPass {
    Exact,
    Wildcard,
    Conditional,
    CaseTable,
    Outcome,
    Legacy,
    Generic,
}

impl ResolutionPass {
    /// 1-based pass number.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Exact => 1,
            Self::Wildcard => 2,
            Self::Conditional => 3,
            Self::CaseTable => 4,
            Self::Outcome => 5,
            Self::Legacy => 6,
            Self::Generic => 7,
        }
    }

    /// Returns true for the passes that bypass the matrix.
    #[must_use]
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::Legacy | Self::Generic)
    }
}

impl fmt::Display for ResolutionPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::Wildcard => "wildcard",
            Self::Conditional => "conditional",
            Self::CaseTable => "case_table",
            Self::Outcome => "outcome",
            Self::Legacy => "legacy",
            Self::Generic => "generic",
        };
        write!(f, "{name} (pass {})", self.number())
    }
}

/// What the selector needs to know about one case.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInput<'a> {
    pub primary_state: &'a StateId,
    pub intention: &'a IntentionId,
    pub secondary: &'a [IntentionId],
    pub facts: &'a FactBag,
    /// Flags supplied by the caller alongside the intention.
    pub intention_flags: &'a BTreeMap<Flag, FlagValue>,
}

/// Resolved template plus the flag overlay the resolution implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub template: TemplateId,
    pub flags: FlagSet,
    pub pass: ResolutionPass,
    /// Human-readable description of the entry that matched.
    pub detail: String,
    pub warnings: Vec<String>,
    /// Guards that could not be decided because facts were missing.
    pub diagnostics: Vec<String>,
}

/// Resolves templates against a [`DefinitionStore`].
#[derive(Debug, Clone, Copy)]
pub struct TemplateSelector<'a> {
    store: &'a DefinitionStore,
    generic: &'a TemplateId,
}

struct Hit {
    template: TemplateId,
    forced: Vec<(Flag, FlagValue)>,
    pass: ResolutionPass,
    detail: String,
}

impl Hit {
    fn from_outcome(outcome: &MatrixOutcome, pass: ResolutionPass, detail: String) -> Self {
        Self {
            template: outcome.template.clone(),
            forced: outcome.flags.iter().map(|(f, v)| (*f, v.clone())).collect(),
            pass,
            detail,
        }
    }
}

impl<'a> TemplateSelector<'a> {
    #[must_use]
    pub const fn new(store: &'a DefinitionStore, generic: &'a TemplateId) -> Self {
        Self { store, generic }
    }

    /// Runs the resolution passes. Never fails.
    #[must_use]
    pub fn select(&self, input: &SelectionInput<'_>) -> Selection {
        let state = self.store.canonical_state(input.primary_state.as_str());
        let intentions: Vec<&IntentionId> = std::iter::once(input.intention)
            .chain(input.secondary.iter())
            .collect();

        let mut warnings = Vec::new();
        let mut diagnostics = Vec::new();
        for intention in &intentions {
            if self.store.intention(intention).is_none() {
                warnings.push(format!("unknown intention '{intention}'"));
            }
        }

        let hit = self
            .exact(&state, &intentions)
            .or_else(|| self.wildcard(&intentions, input.facts, &mut diagnostics))
            .or_else(|| self.conditional(input.facts, &mut diagnostics))
            .or_else(|| self.case_table(&intentions, input.facts))
            .or_else(|| self.outcome(&intentions, input.facts))
            .unwrap_or_else(|| self.fallback(&state, &mut warnings));

        let mut flags = FlagSet::new();
        for (flag, value) in hit.forced {
            flags.force(flag, value);
        }
        if let Some(def) = self.store.intention(input.intention) {
            for (flag, value) in &def.context_flags {
                flags.compute(*flag, value.clone());
            }
        }
        for secondary in input.secondary {
            if let Some(def) = self.store.intention(secondary) {
                for (flag, value) in &def.context_flags {
                    flags.compute_default(*flag, value.clone());
                }
            }
        }
        for (flag, value) in input.intention_flags {
            flags.compute(*flag, value.clone());
        }

        tracing::debug!(
            template = %hit.template,
            pass = hit.pass.number(),
            detail = %hit.detail,
            "template selected"
        );

        Selection {
            template: hit.template,
            flags,
            pass: hit.pass,
            detail: hit.detail,
            warnings,
            diagnostics,
        }
    }

    fn exact(&self, state: &StateId, intentions: &[&IntentionId]) -> Option<Hit> {
        let matrix = self.store.matrix();
        intentions.iter().find_map(|intention| {
            matrix.exact(state, intention).map(|outcome| {
                Hit::from_outcome(
                    outcome,
                    ResolutionPass::Exact,
                    format!("matrix entry ({state}, {intention})"),
                )
            })
        })
    }

    fn wildcard(&self, intentions: &[&IntentionId], facts: &FactBag, diagnostics: &mut Vec<String>) -> Option<Hit> {
        let matrix = self.store.matrix();
        for intention in intentions {
            for (i, guarded) in matrix.guarded(intention).iter().enumerate() {
                let eval = guarded.when.evaluate(facts);
                if eval.truth == Truth::Unknown {
                    diagnostics.push(format!(
                        "guard #{i} of ({WILDCARD}, {intention}) undecided, missing {}",
                        eval.missing.join(", ")
                    ));
                }
                if eval.matched() {
                    return Some(Hit::from_outcome(
                        &guarded.outcome,
                        ResolutionPass::Wildcard,
                        format!("guarded entry #{i} ({WILDCARD}, {intention})"),
                    ));
                }
            }
            if let Some(outcome) = matrix.wildcard(intention) {
                return Some(Hit::from_outcome(
                    outcome,
                    ResolutionPass::Wildcard,
                    format!("matrix entry ({WILDCARD}, {intention})"),
                ));
            }
        }
        None
    }

    fn conditional(&self, facts: &FactBag, diagnostics: &mut Vec<String>) -> Option<Hit> {
        for (i, entry) in self.store.matrix().conditional().iter().enumerate() {
            let eval = entry.when.evaluate(facts);
            if eval.truth == Truth::Unknown {
                diagnostics.push(format!(
                    "{} undecided, missing {}",
                    entry.label(i),
                    eval.missing.join(", ")
                ));
            }
            if eval.matched() {
                return Some(Hit::from_outcome(&entry.outcome, ResolutionPass::Conditional, entry.label(i)));
            }
        }
        None
    }

    fn case_table(&self, intentions: &[&IntentionId], facts: &FactBag) -> Option<Hit> {
        for table in self.store.matrix().case_tables() {
            if !intentions.iter().any(|i| table.applies_to(i)) {
                continue;
            }
            let Some(raw) = facts.text(&table.fact) else {
                continue;
            };
            let case = table.category.normalize(raw);
            if let Some(outcome) = table.cases.get(&case) {
                let mut hit = Hit::from_outcome(
                    outcome,
                    ResolutionPass::CaseTable,
                    format!("{} case {case}", table.category),
                );
                hit.forced.push((table.category.flag(), FlagValue::Text(case)));
                return Some(hit);
            }
        }
        None
    }

    fn outcome(&self, intentions: &[&IntentionId], facts: &FactBag) -> Option<Hit> {
        let table = self.store.matrix().outcome_table()?;
        if !intentions.iter().any(|i| table.applies_to(i)) {
            return None;
        }
        let key = OutcomeTable::normalize(facts.text(&table.fact)?);
        let outcome = table.cases.get(&key)?;
        let mut hit = Hit::from_outcome(outcome, ResolutionPass::Outcome, format!("outcome case {key}"));
        hit.forced.push((Flag::ExamOutcome, FlagValue::Text(key)));
        Some(hit)
    }

    fn fallback(&self, state: &StateId, warnings: &mut Vec<String>) -> Hit {
        if let Some(template) = self.store.state(state.as_str()).and_then(|s| s.default_template.as_ref()) {
            tracing::warn!(state = %state, template = %template, "resolved through legacy state template");
            warnings.push(format!("legacy default template of state {state} used"));
            return Hit {
                template: template.clone(),
                forced: Vec::new(),
                pass: ResolutionPass::Legacy,
                detail: format!("state {state} default"),
            };
        }

        tracing::warn!(state = %state, template = %self.generic, "resolved through generic fallback");
        warnings.push(format!("no matrix route for state {state}, generic template used"));
        Hit {
            template: self.generic.clone(),
            forced: Vec::new(),
            pass: ResolutionPass::Generic,
            detail: "generic fallback".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::DefinitionFiles;
    use crate::flags::FlagState;
    use crate::time::parse_datetime;

    const SCHEMA: &str = r"
facts:
  crm.session_name: { type: text }
  crm.amount_due: { type: float }
  crm.partner_case: { type: text }
  exam_platform.result: { type: text }
";

    const STATES: &str = r"
states:
  - { id: DATE_EMPTY, priority: 40, severity: WARNING, detect: { op: always } }
  - { id: REFUSED_DOCS, priority: 80, severity: BLOCKING, detect: { op: always } }
  - id: LEGACY_STATE
    priority: 1
    severity: INFO
    detect: { op: always }
    default_template: legacy_template
";

    const INTENTIONS: &str = r"
intentions:
  - id: ASK_CONVOCATION
    context_flags: { show_convocation_section: true, show_dates_section: true }
  - id: CONFIRM_APPOINTMENT
  - id: ASK_SESSION_CHANGE
    context_flags: { show_sessions_section: true }
  - id: ASK_PARTNER
  - id: ASK_RESULT
  - id: ASK_NOTHING
    reachable: false
";

    const MATRIX: &str = r"
entries:
  - state: DATE_EMPTY
    intention: ASK_CONVOCATION
    template: date_proposal
    flags: { show_convocation_section: false }
  - { state: '*', intention: ASK_CONVOCATION, template: convocation_generic }
  - { state: '*', intention: CONFIRM_APPOINTMENT, template: appointment_confirmation }
  - state: '*'
    intention: ASK_SESSION_CHANGE
    when: { op: exists, fact: crm.session_name }
    template: session_change
  - { state: '*', intention: ASK_SESSION_CHANGE, template: session_unknown }
  - state: '*'
    intention: ASK_PARTNER
    when: { op: missing, fact: crm.partner_case }
    template: partner_unknown
  - state: '*'
    intention: ASK_RESULT
    when: { op: missing, fact: exam_platform.result }
    template: result_pending
conditional:
  - name: unpaid
    when: { op: greater_than, fact: crm.amount_due, value: 0 }
    template: payment_reminder
case_tables:
  - category: partner_eligibility
    fact: crm.partner_case
    intentions: [ASK_PARTNER]
    cases:
      A: { template: partner_a }
      B: { template: partner_b, flags: { show_partner_section: true } }
outcome_table:
  fact: exam_platform.result
  intentions: [ASK_RESULT]
  cases:
    passed: { template: result_passed }
    failed: { template: result_failed }
";

    fn store() -> DefinitionStore {
        let files = DefinitionFiles::from_yaml(SCHEMA, STATES, INTENTIONS, MATRIX).unwrap();
        DefinitionStore::build(files).unwrap()
    }

    fn bag() -> FactBag {
        FactBag::new(parse_datetime("2026-03-16T09:00:00Z").unwrap())
    }

    fn select(store: &DefinitionStore, state: &str, intention: &str, secondary: &[&str], facts: &FactBag) -> Selection {
        let generic = TemplateId::new("generic_fallback");
        let state = StateId::new(state);
        let intention = IntentionId::new(intention);
        let secondary: Vec<IntentionId> = secondary.iter().map(|s| IntentionId::new(*s)).collect();
        let caller = BTreeMap::new();
        TemplateSelector::new(store, &generic).select(&SelectionInput {
            primary_state: &state,
            intention: &intention,
            secondary: &secondary,
            facts,
            intention_flags: &caller,
        })
    }

    #[test]
    fn test_exact_entry_and_forced_flag() {
        let store = store();
        let s = select(&store, "DATE_EMPTY", "ASK_CONVOCATION", &[], &bag());
        assert_eq!(s.pass, ResolutionPass::Exact);
        assert_eq!(s.template.as_str(), "date_proposal");
        // Matrix false beats the intention's computed true.
        assert_eq!(
            s.flags.state(Flag::ShowConvocationSection),
            &FlagState::MatrixForced(FlagValue::Bool(false))
        );
        assert!(s.flags.enabled(Flag::ShowDatesSection));
    }

    #[test]
    fn test_wildcard_is_pass_two() {
        let store = store();
        let s = select(&store, "REFUSED_DOCS", "CONFIRM_APPOINTMENT", &[], &bag());
        assert_eq!(s.pass, ResolutionPass::Wildcard);
        assert_eq!(s.template.as_str(), "appointment_confirmation");
        assert!(s.warnings.is_empty());
    }

    #[test]
    fn test_guard_evaluated_before_unguarded_wildcard() {
        let store = store();
        let with_session = bag().with_fact("crm.session_name", "Mars soir");
        let s = select(&store, "REFUSED_DOCS", "ASK_SESSION_CHANGE", &[], &with_session);
        assert_eq!(s.template.as_str(), "session_change");

        let s = select(&store, "REFUSED_DOCS", "ASK_SESSION_CHANGE", &[], &bag());
        assert_eq!(s.template.as_str(), "session_unknown");
    }

    #[test]
    fn test_secondary_intention_exact_beats_wildcard_of_nothing() {
        let store = store();
        let s = select(&store, "DATE_EMPTY", "ASK_NOTHING", &["ASK_CONVOCATION"], &bag());
        assert_eq!(s.pass, ResolutionPass::Exact);
        assert_eq!(s.template.as_str(), "date_proposal");
    }

    #[test]
    fn test_conditional_entry() {
        let store = store();
        let facts = bag().with_fact("crm.amount_due", 80.0);
        let s = select(&store, "DATE_EMPTY", "ASK_NOTHING", &[], &facts);
        assert_eq!(s.pass, ResolutionPass::Conditional);
        assert_eq!(s.detail, "unpaid");
    }

    #[test]
    fn test_case_table_forces_discriminator() {
        let store = store();
        let facts = bag().with_fact("crm.partner_case", " b ");
        let s = select(&store, "DATE_EMPTY", "ASK_PARTNER", &[], &facts);
        assert_eq!(s.pass, ResolutionPass::CaseTable);
        assert_eq!(s.template.as_str(), "partner_b");
        assert!(s.flags.is_forced(Flag::EligibilityCase));
        assert_eq!(s.flags.text(Flag::EligibilityCase), Some("B"));
        assert!(s.flags.enabled(Flag::ShowPartnerSection));
    }

    #[test]
    fn test_guarded_only_intention_falls_through_when_guard_fails() {
        let store = store();
        let s = select(&store, "DATE_EMPTY", "ASK_PARTNER", &[], &bag());
        assert_eq!(s.pass, ResolutionPass::Wildcard);
        assert_eq!(s.template.as_str(), "partner_unknown");
    }

    #[test]
    fn test_outcome_table() {
        let store = store();
        let facts = bag().with_fact("exam_platform.result", "FAILED");
        let s = select(&store, "DATE_EMPTY", "ASK_RESULT", &[], &facts);
        assert_eq!(s.pass, ResolutionPass::Outcome);
        assert_eq!(s.template.as_str(), "result_failed");
        assert_eq!(s.flags.text(Flag::ExamOutcome), Some("failed"));
    }

    #[test]
    fn test_legacy_then_generic() {
        let store = store();
        let s = select(&store, "LEGACY_STATE", "ASK_NOTHING", &[], &bag());
        assert_eq!(s.pass, ResolutionPass::Legacy);
        assert_eq!(s.template.as_str(), "legacy_template");
        assert_eq!(s.warnings.len(), 1);

        let s = select(&store, "UNMATCHED", "ASK_NOTHING", &[], &bag());
        assert_eq!(s.pass, ResolutionPass::Generic);
        assert_eq!(s.pass.number(), 7);
        assert_eq!(s.template.as_str(), "generic_fallback");
    }

    #[test]
    fn test_unknown_intention_falls_through_with_warning() {
        let store = store();
        let s = select(&store, "DATE_EMPTY", "ASK_TELEPORT", &[], &bag());
        assert_eq!(s.pass, ResolutionPass::Generic);
        assert!(s.warnings.iter().any(|w| w.contains("ASK_TELEPORT")));
    }

    #[test]
    fn test_caller_flags_are_computed_not_forced() {
        let store = store();
        let generic = TemplateId::new("generic_fallback");
        let state = StateId::new("DATE_EMPTY");
        let intention = IntentionId::new("ASK_CONVOCATION");
        let mut caller = BTreeMap::new();
        caller.insert(Flag::ShowConvocationSection, FlagValue::Bool(true));
        caller.insert(Flag::ShowPaymentSection, FlagValue::Bool(true));
        let facts = bag();
        let s = TemplateSelector::new(&store, &generic).select(&SelectionInput {
            primary_state: &state,
            intention: &intention,
            secondary: &[],
            facts: &facts,
            intention_flags: &caller,
        });
        assert!(!s.flags.enabled(Flag::ShowConvocationSection));
        assert!(s.flags.enabled(Flag::ShowPaymentSection));
    }
}
