//! Intention definitions.
//!
//! Intentions are classified outside the engine. Here they are an opaque
//! name plus the context flags the intention implies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::IntentionId;
use crate::flags::{Flag, FlagValue};

const fn reachable_by_default() -> bool {
    true
}

/// A category of inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionDefinition {
    pub id: IntentionId,

    #[serde(default)]
    pub description: String,

    /// Example phrasings, consumed by the external classifier only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger_examples: Vec<String>,

    /// Whether the classifier can emit this intention in production.
    #[serde(default = "reachable_by_default")]
    pub reachable: bool,

    /// Flags implied whenever this intention is present, applied as
    /// computed values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_flags: BTreeMap<Flag, FlagValue>,
}

/// Contents of `intentions.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentionsFile {
    #[serde(default)]
    pub intentions: Vec<IntentionDefinition>,
}
