//! Compatibility names for states.
//!
//! Older definition files and historical traces use different names for
//! the same condition (`EVALBOX_REFUSE_CMA` vs `REFUSED_CMA`). Each state
//! has one canonical id; an alias maps an old name forward and is applied
//! wherever a state name is read from outside the state definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::StateId;

/// Alias name -> canonical state id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    #[serde(default)]
    pub aliases: BTreeMap<String, StateId>,
}

impl AliasTable {
    /// Maps a possibly-aliased state name to its canonical id.
    #[must_use]
    pub fn canonical(&self, name: &str) -> StateId {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| StateId::new(name))
    }

    /// Returns true if `name` is an alias.
    #[must_use]
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
