//! Reading definition files.
//!
//! Definitions live in one directory of YAML files. Parsing only checks
//! shape; cross-file consistency is checked by `validation` when the store
//! is built.

use std::path::Path;

use serde::de::DeserializeOwned;

use super::aliases::AliasTable;
use super::intention::IntentionsFile;
use super::matrix::MatrixFile;
use super::state::StatesFile;
use crate::coverage::CoverageSpec;
use crate::error::LoadError;
use crate::facts::FactSchema;

pub const SCHEMA_FILE: &str = "schema.yaml";
pub const STATES_FILE: &str = "states.yaml";
pub const INTENTIONS_FILE: &str = "intentions.yaml";
pub const MATRIX_FILE: &str = "matrix.yaml";
pub const ALIASES_FILE: &str = "aliases.yaml";
pub const COVERAGE_FILE: &str = "coverage.yaml";

/// Parsed, not yet validated, definition files.
#[derive(Debug, Clone, Default)]
pub struct DefinitionFiles {
    pub schema: FactSchema,
    pub states: StatesFile,
    pub intentions: IntentionsFile,
    pub matrix: MatrixFile,
    pub aliases: AliasTable,
    pub coverage: CoverageSpec,
}

impl DefinitionFiles {
    /// Reads every definition file from `dir`.
    ///
    /// `aliases.yaml` and `coverage.yaml` are optional.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Io` or `LoadError::Parse` naming the file.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        let dir = dir.as_ref();
        Ok(Self {
            schema: read_required(dir, SCHEMA_FILE)?,
            states: read_required(dir, STATES_FILE)?,
            intentions: read_required(dir, INTENTIONS_FILE)?,
            matrix: read_required(dir, MATRIX_FILE)?,
            aliases: read_optional(dir, ALIASES_FILE)?,
            coverage: read_optional(dir, COVERAGE_FILE)?,
        })
    }

    /// Parses the four required files from strings.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Parse` naming the offending document.
    pub fn from_yaml(schema: &str, states: &str, intentions: &str, matrix: &str) -> Result<Self, LoadError> {
        Ok(Self {
            schema: parse(SCHEMA_FILE, schema)?,
            states: parse(STATES_FILE, states)?,
            intentions: parse(INTENTIONS_FILE, intentions)?,
            matrix: parse(MATRIX_FILE, matrix)?,
            aliases: AliasTable::default(),
            coverage: CoverageSpec::default(),
        })
    }

    /// Adds an alias table from YAML.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Parse` if the document is malformed.
    pub fn with_aliases_yaml(mut self, yaml: &str) -> Result<Self, LoadError> {
        self.aliases = parse(ALIASES_FILE, yaml)?;
        Ok(self)
    }

    /// Adds a coverage spec from YAML.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Parse` if the document is malformed.
    pub fn with_coverage_yaml(mut self, yaml: &str) -> Result<Self, LoadError> {
        self.coverage = parse(COVERAGE_FILE, yaml)?;
        Ok(self)
    }
}

fn parse<T: DeserializeOwned>(name: &str, yaml: &str) -> Result<T, LoadError> {
    serde_yaml::from_str(yaml).map_err(|e| LoadError::parse(name, e))
}

fn read_required<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T, LoadError> {
    let path = dir.join(name);
    let content = std::fs::read_to_string(&path).map_err(|e| LoadError::io(path.display(), e))?;
    serde_yaml::from_str(&content).map_err(|e| LoadError::parse(path.display(), e))
}

fn read_optional<T: DeserializeOwned + Default>(dir: &Path, name: &str) -> Result<T, LoadError> {
    let path = dir.join(name);
    if !path.exists() {
        tracing::debug!("{} not found, using defaults", path.display());
        return Ok(T::default());
    }
    read_required(dir, name)
}
