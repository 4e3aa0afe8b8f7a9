//! Static definitions: states, intentions, the dispatch matrix, the fact
//! schema, state aliases and coverage history.
//!
//! Definitions are read from YAML ([`DefinitionFiles`]), validated as a
//! whole and frozen into a [`DefinitionStore`].

pub mod aliases;
pub mod ids;
pub mod intention;
pub mod loader;
pub mod matrix;
pub mod state;
pub mod store;
mod validation;

pub use aliases::AliasTable;
pub use ids::{IntentionId, StateId, TemplateId};
pub use intention::{IntentionDefinition, IntentionsFile};
pub use loader::DefinitionFiles;
pub use matrix::{
    CaseCategory, CaseTable, ConditionalEntry, GuardedEntry, Matrix, MatrixFile, MatrixKey,
    MatrixOutcome, OutcomeTable, WILDCARD,
};
pub use state::{Severity, StateDefinition, StatesFile};
pub use store::DefinitionStore;
