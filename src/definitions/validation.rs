//! Load-time validation of definitions.
//!
//! Everything that can be wrong with the definition files is checked here,
//! before the engine accepts any case: an inconsistency found at load time
//! refuses the whole load instead of surfacing as a mis-rendered reply.

use std::collections::{BTreeMap, HashSet};

use super::aliases::AliasTable;
use super::ids::{IntentionId, StateId};
use super::intention::IntentionDefinition;
use super::matrix::{Matrix, WILDCARD};
use super::state::StateDefinition;
use crate::condition::Condition;
use crate::coverage::CoverageSpec;
use crate::error::LoadError;
use crate::facts::FactSchema;
use crate::flags::{Flag, FlagValue};

/// Checks one condition: its own syntax, then every fact it reads against
/// the schema.
pub(crate) fn validate_condition(owner: &str, condition: &Condition, schema: &FactSchema) -> Result<(), LoadError> {
    condition.check().map_err(|reason| LoadError::InvalidCondition {
        owner: owner.to_string(),
        reason,
    })?;
    for fact in condition.facts_referenced() {
        if !schema.declares(fact) {
            return Err(LoadError::UnknownFact {
                owner: owner.to_string(),
                fact: fact.to_string(),
            });
        }
    }
    Ok(())
}

/// Text flags need text values, boolean flags need booleans.
pub(crate) fn validate_flags(owner: &str, flags: &BTreeMap<Flag, FlagValue>) -> Result<(), LoadError> {
    for (flag, value) in flags {
        if !flag.accepts(value) {
            return Err(LoadError::InvalidFlagValue {
                owner: owner.to_string(),
                flag: flag.to_string(),
            });
        }
    }
    Ok(())
}

/// Unique, non-reserved ids and valid predicates.
pub(crate) fn validate_states(states: &[StateDefinition], schema: &FactSchema) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for state in states {
        let id = state.id.as_str();
        if id == StateId::UNMATCHED || id == WILDCARD {
            return Err(LoadError::ReservedState { id: id.to_string() });
        }
        if !seen.insert(id) {
            return Err(LoadError::DuplicateState { id: id.to_string() });
        }
        validate_condition(&format!("state {id}"), &state.detect, schema)?;
        if state.default_template.is_some() {
            tracing::warn!(state = id, "state declares a legacy default template");
        }
    }
    Ok(())
}

/// Unique ids and well-typed context flags.
pub(crate) fn validate_intentions(intentions: &[IntentionDefinition]) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for intention in intentions {
        let id = intention.id.as_str();
        if !seen.insert(id) {
            return Err(LoadError::DuplicateIntention { id: id.to_string() });
        }
        validate_flags(&format!("intention {id}"), &intention.context_flags)?;
    }
    Ok(())
}

/// Aliases must point at a defined state and must not shadow one.
pub(crate) fn validate_aliases(aliases: &AliasTable, states: &HashSet<&str>) -> Result<(), LoadError> {
    for (alias, target) in &aliases.aliases {
        if states.contains(alias.as_str()) {
            return Err(LoadError::InvalidAlias {
                alias: alias.clone(),
                reason: "shadows a defined state".to_string(),
            });
        }
        if !states.contains(target.as_str()) {
            return Err(LoadError::InvalidAlias {
                alias: alias.clone(),
                reason: format!("targets unknown state '{target}'"),
            });
        }
    }
    Ok(())
}

/// Cross-references between the matrix and the other definitions.
pub(crate) fn validate_matrix(
    matrix: &Matrix,
    states: &HashSet<&str>,
    intentions: &BTreeMap<IntentionId, IntentionDefinition>,
    schema: &FactSchema,
) -> Result<(), LoadError> {
    for key in matrix.exact_keys() {
        if !states.contains(key.state.as_str()) {
            return Err(LoadError::UnknownState {
                context: format!("matrix entry {key}"),
                id: key.state.to_string(),
            });
        }
    }

    for intention in matrix.intentions() {
        if !intentions.contains_key(intention) {
            return Err(LoadError::UnknownIntention {
                context: "matrix".to_string(),
                id: intention.to_string(),
            });
        }
    }

    for table in matrix.case_tables() {
        check_table_intentions(&format!("{} case table", table.category), &table.intentions, intentions)?;
        check_fact(&format!("{} case table", table.category), &table.fact, schema)?;
    }
    if let Some(table) = matrix.outcome_table() {
        check_table_intentions("outcome table", &table.intentions, intentions)?;
        check_fact("outcome table", &table.fact, schema)?;
    }

    for (owner, condition) in matrix.conditions() {
        validate_condition(&owner, condition, schema)?;
    }
    for (owner, outcome) in matrix.outcomes() {
        validate_flags(&owner, &outcome.flags)?;
    }
    Ok(())
}

/// Every reachable intention needs a wildcard entry, otherwise it can only
/// be rendered for the states that happen to have exact entries.
pub(crate) fn validate_intention_coverage(
    matrix: &Matrix,
    intentions: &BTreeMap<IntentionId, IntentionDefinition>,
) -> Result<(), LoadError> {
    for (id, intention) in intentions {
        if intention.reachable && !matrix.has_wildcard(id) {
            return Err(LoadError::UncoveredIntention { id: id.to_string() });
        }
    }
    Ok(())
}

/// Historical combinations must name defined states and intentions, so a
/// typo cannot silently pass as a covered line.
pub(crate) fn validate_coverage(
    coverage: &CoverageSpec,
    aliases: &AliasTable,
    states: &HashSet<&str>,
    intentions: &BTreeMap<IntentionId, IntentionDefinition>,
) -> Result<(), LoadError> {
    let listed = coverage
        .combinations
        .iter()
        .map(|c| ("coverage combination", c))
        .chain(coverage.signed_off.iter().map(|c| ("coverage sign-off", c)));
    for (kind, combination) in listed {
        let state = aliases.canonical(&combination.state);
        if !state.is_unmatched() && !states.contains(state.as_str()) {
            return Err(LoadError::UnknownState {
                context: format!("{kind} {combination}"),
                id: combination.state.clone(),
            });
        }
        if !intentions.contains_key(&combination.intention) {
            return Err(LoadError::UnknownIntention {
                context: format!("{kind} {combination}"),
                id: combination.intention.to_string(),
            });
        }
    }
    Ok(())
}

fn check_fact(owner: &str, fact: &str, schema: &FactSchema) -> Result<(), LoadError> {
    if schema.declares(fact) {
        Ok(())
    } else {
        Err(LoadError::UnknownFact {
            owner: owner.to_string(),
            fact: fact.to_string(),
        })
    }
}

fn check_table_intentions(
    owner: &str,
    listed: &[IntentionId],
    intentions: &BTreeMap<IntentionId, IntentionDefinition>,
) -> Result<(), LoadError> {
    match listed.iter().find(|i| !intentions.contains_key(*i)) {
        Some(unknown) => Err(LoadError::UnknownIntention {
            context: owner.to_string(),
            id: unknown.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{FactField, FactType};

    fn schema() -> FactSchema {
        let mut schema = FactSchema::default();
        schema.facts.insert(
            "crm.evalbox_status".to_string(),
            FactField {
                kind: FactType::Text,
                required: true,
                description: None,
            },
        );
        schema
    }

    fn state(id: &str, detect: Condition) -> StateDefinition {
        StateDefinition {
            id: StateId::new(id),
            priority: 1,
            severity: super::super::state::Severity::Info,
            description: None,
            detect,
            default_template: None,
        }
    }

    #[test]
    fn duplicate_state_is_rejected() {
        let states = vec![state("A", Condition::Always), state("A", Condition::Always)];
        let err = validate_states(&states, &schema()).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateState { id } if id == "A"));
    }

    #[test]
    fn reserved_state_is_rejected() {
        let states = vec![state("UNMATCHED", Condition::Always)];
        assert!(matches!(
            validate_states(&states, &schema()).unwrap_err(),
            LoadError::ReservedState { .. }
        ));
    }

    #[test]
    fn predicate_on_undeclared_fact_is_rejected() {
        let states = vec![state("A", Condition::exists("crm.unknown"))];
        let err = validate_states(&states, &schema()).unwrap_err();
        assert!(matches!(err, LoadError::UnknownFact { fact, .. } if fact == "crm.unknown"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let states = vec![state(
            "A",
            Condition::Matches {
                fact: "crm.evalbox_status".to_string(),
                pattern: "[".to_string(),
            },
        )];
        assert!(matches!(
            validate_states(&states, &schema()).unwrap_err(),
            LoadError::InvalidCondition { .. }
        ));
    }

    #[test]
    fn flag_kinds_are_checked() {
        let mut flags = BTreeMap::new();
        flags.insert(Flag::EligibilityCase, FlagValue::Bool(true));
        assert!(validate_flags("x", &flags).is_err());

        let mut flags = BTreeMap::new();
        flags.insert(Flag::ShowDatesSection, FlagValue::from("yes"));
        assert!(validate_flags("x", &flags).is_err());

        let mut flags = BTreeMap::new();
        flags.insert(Flag::EligibilityCase, FlagValue::from("A"));
        flags.insert(Flag::ShowDatesSection, FlagValue::Bool(true));
        assert!(validate_flags("x", &flags).is_ok());
    }

    #[test]
    fn alias_rules() {
        let states: HashSet<&str> = ["REFUSED_CMA"].into_iter().collect();
        let ok: AliasTable = serde_yaml::from_str("aliases: { EVALBOX_REFUSE_CMA: REFUSED_CMA }").unwrap();
        assert!(validate_aliases(&ok, &states).is_ok());

        let dangling: AliasTable = serde_yaml::from_str("aliases: { OLD: NOPE }").unwrap();
        assert!(validate_aliases(&dangling, &states).is_err());

        let shadow: AliasTable = serde_yaml::from_str("aliases: { REFUSED_CMA: REFUSED_CMA }").unwrap();
        assert!(validate_aliases(&shadow, &states).is_err());
    }
}
