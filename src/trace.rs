//! Resolution trace.
//!
//! Every rendered reply carries a record of how it was produced: which
//! states fired, which pass picked the template, which flags were in effect
//! and where they came from. Traces are serde-serializable so callers can
//! log them as JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definitions::{IntentionId, StateId, TemplateId};
use crate::flags::{Flag, FlagState, FlagValue};
use crate::selector::ResolutionPass;

/// How one reply was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionTrace {
    pub trace_id: Uuid,
    pub intention: IntentionId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_intentions: Vec<IntentionId>,
    pub active_states: Vec<StateId>,
    pub primary_state: StateId,
    pub matched_pass: ResolutionPass,
    pub match_detail: String,
    /// Template that produced the text. Differs from the selected one
    /// when the renderer fell back to the generic template.
    pub template_id: TemplateId,
    /// blake3 digest of `template_id`'s source.
    pub template_digest: String,
    pub flags_used: BTreeMap<Flag, FlagValue>,
    pub flag_sources: BTreeMap<Flag, FlagState>,
    pub warnings: Vec<String>,
    pub diagnostics: Vec<String>,
    pub fell_back: bool,
}

impl ResolutionTrace {
    /// Returns true if the reply came from the legacy or generic tier, or
    /// from the renderer fallback.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.fell_back || self.matched_pass.is_fallback()
    }

    /// Serializes the trace as a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns the serializer error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
