//! The validated, read-only definition set.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use super::aliases::AliasTable;
use super::ids::{IntentionId, StateId, TemplateId};
use super::intention::IntentionDefinition;
use super::loader::DefinitionFiles;
use super::matrix::Matrix;
use super::state::StateDefinition;
use super::validation;
use crate::coverage::CoverageSpec;
use crate::error::LoadError;
use crate::facts::FactSchema;

/// States, intentions, matrix, schema, aliases and coverage history.
///
/// Built once from [`DefinitionFiles`]; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    schema: FactSchema,
    /// Sorted in detection order.
    states: Vec<StateDefinition>,
    state_index: HashMap<StateId, usize>,
    intentions: BTreeMap<IntentionId, IntentionDefinition>,
    matrix: Matrix,
    aliases: AliasTable,
    coverage: CoverageSpec,
}

impl DefinitionStore {
    /// Validates parsed definition files and builds the store.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found. Template references are
    /// checked later, once templates are loaded.
    pub fn build(files: DefinitionFiles) -> Result<Self, LoadError> {
        let DefinitionFiles {
            schema,
            states,
            intentions,
            matrix,
            aliases,
            coverage,
        } = files;

        validation::validate_states(&states.states, &schema)?;
        validation::validate_intentions(&intentions.intentions)?;

        let state_ids: HashSet<&str> = states.states.iter().map(|s| s.id.as_str()).collect();
        validation::validate_aliases(&aliases, &state_ids)?;

        let intentions: BTreeMap<IntentionId, IntentionDefinition> = intentions
            .intentions
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect();

        let matrix = Matrix::build(matrix, &aliases)?;
        validation::validate_matrix(&matrix, &state_ids, &intentions, &schema)?;
        validation::validate_intention_coverage(&matrix, &intentions)?;
        validation::validate_coverage(&coverage, &aliases, &state_ids, &intentions)?;

        let mut states = states.states;
        states.sort_by(StateDefinition::detection_order);
        let state_index = states
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        tracing::debug!(
            states = states.len(),
            intentions = intentions.len(),
            "definitions validated"
        );

        Ok(Self {
            schema,
            states,
            state_index,
            intentions,
            matrix,
            aliases,
            coverage,
        })
    }

    /// Reads and validates a definition directory.
    ///
    /// # Errors
    ///
    /// Any read, parse or validation failure.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::build(DefinitionFiles::from_dir(dir)?)
    }

    #[must_use]
    pub const fn schema(&self) -> &FactSchema {
        &self.schema
    }

    /// States in detection order.
    #[must_use]
    pub fn states(&self) -> &[StateDefinition] {
        &self.states
    }

    /// Looks up a state by canonical id or alias.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<&StateDefinition> {
        let canonical = self.aliases.canonical(id);
        self.state_index.get(&canonical).map(|&i| &self.states[i])
    }

    #[must_use]
    pub fn intention(&self, id: &IntentionId) -> Option<&IntentionDefinition> {
        self.intentions.get(id)
    }

    /// Intentions sorted by id.
    pub fn intentions(&self) -> impl Iterator<Item = &IntentionDefinition> {
        self.intentions.values()
    }

    #[must_use]
    pub const fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    #[must_use]
    pub const fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    #[must_use]
    pub const fn coverage(&self) -> &CoverageSpec {
        &self.coverage
    }

    /// Canonical id for a possibly-aliased state name.
    #[must_use]
    pub fn canonical_state(&self, name: &str) -> StateId {
        self.aliases.canonical(name)
    }

    /// Every template the definitions can select, labelled by owner.
    #[must_use]
    pub fn template_refs(&self) -> Vec<(String, &TemplateId)> {
        let mut refs = self.matrix.template_refs();
        for state in &self.states {
            if let Some(template) = &state.default_template {
                refs.push((format!("state {} default", state.id), template));
            }
        }
        refs
    }
}
