//! The reply pipeline.
//!
//! [`ReplyEngine`] wires the stages together: state detection, template
//! selection, context preparation and rendering. Definitions and templates
//! live in an immutable [`Snapshot`] that is swapped atomically on reload;
//! each render clones the current `Arc` and runs against it without holding
//! any lock.

pub mod runtime;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{Aggregates, ContextPreparer, PreparationInput, SessionFilter};
use crate::coverage::{check_coverage, CoverageReport};
use crate::definitions::{DefinitionFiles, DefinitionStore, IntentionId, TemplateId};
use crate::detector::StateDetector;
use crate::error::{EngineResult, ExecutionError, LoadError, RenderError};
use crate::facts::FactBag;
use crate::flags::{Flag, FlagValue};
use crate::render::{DirectoryTemplates, TemplateRenderer, TemplateSource};
use crate::selector::{SelectionInput, TemplateSelector};
use crate::trace::ResolutionTrace;

/// One case to render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub facts: FactBag,
    pub intention: IntentionId,
    /// Further intentions detected in the same message, in order.
    pub secondary: Vec<IntentionId>,
    /// Flags supplied alongside the intention. The matrix still wins.
    pub intention_flags: BTreeMap<Flag, FlagValue>,
    /// Pre-built option lists. When absent they are read from the facts.
    pub aggregates: Option<Aggregates>,
    pub session_filter: SessionFilter,
}

impl RenderRequest {
    #[must_use]
    pub fn new(facts: FactBag, intention: impl Into<IntentionId>) -> Self {
        Self {
            facts,
            intention: intention.into(),
            secondary: Vec::new(),
            intention_flags: BTreeMap::new(),
            aggregates: None,
            session_filter: SessionFilter::default(),
        }
    }

    #[must_use]
    pub fn with_secondary(mut self, secondary: impl IntoIterator<Item = IntentionId>) -> Self {
        self.secondary = secondary.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_flag(mut self, flag: Flag, value: impl Into<FlagValue>) -> Self {
        self.intention_flags.insert(flag, value.into());
        self
    }

    #[must_use]
    pub fn with_aggregates(mut self, aggregates: Aggregates) -> Self {
        self.aggregates = Some(aggregates);
        self
    }

    #[must_use]
    pub fn with_session_filter(mut self, filter: SessionFilter) -> Self {
        self.session_filter = filter;
        self
    }
}

/// Rendered text plus how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReply {
    pub text: String,
    pub trace: ResolutionTrace,
}

/// Validated definitions and templates that render together.
#[derive(Debug)]
pub struct Snapshot {
    definitions: DefinitionStore,
    templates: TemplateRenderer,
    coverage: CoverageReport,
}

impl Snapshot {
    /// Builds definitions and templates and checks them against each other.
    ///
    /// # Errors
    ///
    /// Any definition or template error, a selectable template that does
    /// not exist, or an unsigned coverage gap under strict coverage.
    pub fn build(
        files: DefinitionFiles,
        source: &dyn TemplateSource,
        config: &EngineConfig,
    ) -> Result<Self, LoadError> {
        let definitions = DefinitionStore::build(files)?;
        let templates = TemplateRenderer::load(source)?;

        let generic = config.generic_template_id();
        if !templates.contains(&generic) {
            return Err(LoadError::MissingTemplate {
                referenced_by: "generic_template setting".to_string(),
                template: generic.to_string(),
            });
        }
        for (owner, template) in definitions.template_refs() {
            if !templates.contains(template) {
                return Err(LoadError::MissingTemplate {
                    referenced_by: owner,
                    template: template.to_string(),
                });
            }
        }

        let coverage = check_coverage(&definitions);
        coverage.enforce(config.strict_coverage)?;

        Ok(Self {
            definitions,
            templates,
            coverage,
        })
    }

    /// Reads definitions and templates from the configured directories.
    ///
    /// # Errors
    ///
    /// See [`Snapshot::build`].
    pub fn from_dirs(config: &EngineConfig) -> Result<Self, LoadError> {
        let files = DefinitionFiles::from_dir(&config.definitions_dir)?;
        let source = DirectoryTemplates::new(&config.templates_dir);
        Self::build(files, &source, config)
    }

    #[must_use]
    pub const fn definitions(&self) -> &DefinitionStore {
        &self.definitions
    }

    #[must_use]
    pub const fn templates(&self) -> &TemplateRenderer {
        &self.templates
    }

    #[must_use]
    pub const fn coverage(&self) -> &CoverageReport {
        &self.coverage
    }
}

/// Resolves and renders replies.
#[derive(Debug)]
pub struct ReplyEngine {
    config: EngineConfig,
    generic: TemplateId,
    preparer: ContextPreparer,
    snapshot: RwLock<Arc<Snapshot>>,
    reload_lock: Mutex<()>,
}

impl ReplyEngine {
    /// Loads everything from the configured directories.
    ///
    /// # Errors
    ///
    /// Invalid configuration or any load error.
    pub fn from_config(config: EngineConfig) -> Result<Self, LoadError> {
        config.validate()?;
        let snapshot = Snapshot::from_dirs(&config)?;
        Ok(Self::with_snapshot(config, snapshot))
    }

    /// Builds an engine from already parsed definitions and a template
    /// source. The configured directories are only used by
    /// [`ReplyEngine::reload`].
    ///
    /// # Errors
    ///
    /// Invalid configuration or any load error.
    pub fn from_parts(
        files: DefinitionFiles,
        source: &dyn TemplateSource,
        config: EngineConfig,
    ) -> Result<Self, LoadError> {
        config.validate()?;
        let snapshot = Snapshot::build(files, source, &config)?;
        Ok(Self::with_snapshot(config, snapshot))
    }

    fn with_snapshot(config: EngineConfig, snapshot: Snapshot) -> Self {
        tracing::info!(
            states = snapshot.definitions.states().len(),
            intentions = snapshot.definitions.intentions().count(),
            templates = snapshot.templates.len(),
            "reply engine loaded"
        );
        Self {
            generic: config.generic_template_id(),
            preparer: ContextPreparer::new(config.preparer_settings()),
            config,
            snapshot: RwLock::new(Arc::new(snapshot)),
            reload_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The snapshot currently in use.
    ///
    /// # Errors
    ///
    /// `ExecutionError::LockPoisoned` if a writer panicked.
    pub fn snapshot(&self) -> EngineResult<Arc<Snapshot>> {
        let guard = self.snapshot.read().map_err(|_| ExecutionError::LockPoisoned)?;
        Ok(Arc::clone(&guard))
    }

    /// Renders a reply for one intention plus optional secondary ones.
    ///
    /// # Errors
    ///
    /// See [`ReplyEngine::render_request`].
    pub fn render(
        &self,
        facts: FactBag,
        intention: impl Into<IntentionId>,
        secondary: &[IntentionId],
    ) -> EngineResult<RenderedReply> {
        self.render_request(RenderRequest::new(facts, intention).with_secondary(secondary.iter().cloned()))
    }

    /// Runs the full pipeline.
    ///
    /// # Errors
    ///
    /// `ExecutionError::InvalidFactBag` if the facts break the schema,
    /// `ExecutionError::InvalidRequestFlag` for a caller flag of the wrong
    /// kind, or a
    /// `RenderError` when both the selected and the generic template fail.
    pub fn render_request(&self, request: RenderRequest) -> EngineResult<RenderedReply> {
        let snapshot = self.snapshot()?;
        let definitions = &snapshot.definitions;

        let violations = definitions.schema().violations(&request.facts);
        if !violations.is_empty() {
            return Err(ExecutionError::InvalidFactBag { violations }.into());
        }
        if let Some(flag) = request.intention_flags.iter().find_map(|(f, v)| (!f.accepts(v)).then_some(f)) {
            return Err(ExecutionError::InvalidRequestFlag { flag: flag.to_string() }.into());
        }

        let detected = StateDetector::new(definitions).detect(&request.facts);
        let selection = TemplateSelector::new(definitions, &self.generic).select(&SelectionInput {
            primary_state: &detected.primary,
            intention: &request.intention,
            secondary: &request.secondary,
            facts: &request.facts,
            intention_flags: &request.intention_flags,
        });
        tracing::debug!(
            primary = %detected.primary,
            intention = %request.intention,
            pass = %selection.pass,
            template = %selection.template,
            "template selected"
        );

        let prepared = self.preparer.prepare(PreparationInput {
            facts: &request.facts,
            flags: selection.flags,
            aggregates: request.aggregates.as_ref(),
            filter: &request.session_filter,
            state: &detected.primary,
            intention: &request.intention,
        });

        let mut warnings = selection.warnings;
        let (text, template, fell_back) = match snapshot.templates.render(&selection.template, &prepared.context) {
            Ok(text) => (text, selection.template, false),
            Err(err) if selection.template != self.generic => {
                tracing::warn!(
                    template = %selection.template,
                    error = %err,
                    "rendering failed, using the generic template"
                );
                warnings.push(format!(
                    "template '{}' failed to render ({err}); generic template used",
                    selection.template
                ));
                let text = snapshot.templates.render(&self.generic, &prepared.context)?;
                (text, self.generic.clone(), true)
            }
            Err(err) => return Err(err.into()),
        };

        let template_digest = snapshot
            .templates
            .template(&template)
            .map(|t| t.digest().to_string())
            .ok_or_else(|| RenderError::TemplateNotFound { id: template.to_string() })?;

        let mut diagnostics = detected.diagnostics;
        diagnostics.extend(selection.diagnostics);
        diagnostics.extend(prepared.diagnostics);

        let trace = ResolutionTrace {
            trace_id: Uuid::new_v4(),
            intention: request.intention,
            secondary_intentions: request.secondary,
            active_states: detected.active,
            primary_state: detected.primary,
            matched_pass: selection.pass,
            match_detail: selection.detail,
            template_id: template,
            template_digest,
            flags_used: prepared.flags.values(),
            flag_sources: prepared.flags.provenance(),
            warnings,
            diagnostics,
            fell_back,
        };
        Ok(RenderedReply { text, trace })
    }

    /// Re-reads definitions and templates from the configured directories.
    ///
    /// # Errors
    ///
    /// Any load error. The previous snapshot stays active on failure.
    pub fn reload(&self) -> EngineResult<()> {
        self.swap(|| Snapshot::from_dirs(&self.config))
    }

    /// Replaces the snapshot with one built from the given sources.
    ///
    /// # Errors
    ///
    /// Any load error. The previous snapshot stays active on failure.
    pub fn reload_with(&self, files: DefinitionFiles, source: &dyn TemplateSource) -> EngineResult<()> {
        self.swap(|| Snapshot::build(files, source, &self.config))
    }

    fn swap(&self, build: impl FnOnce() -> Result<Snapshot, LoadError>) -> EngineResult<()> {
        let _reload = self.reload_lock.lock().map_err(|_| ExecutionError::LockPoisoned)?;
        let next = build().map_err(|err| {
            tracing::warn!(error = %err, "reload failed, keeping the current snapshot");
            err
        })?;
        let templates = next.templates.len();
        let mut current = self.snapshot.write().map_err(|_| ExecutionError::LockPoisoned)?;
        *current = Arc::new(next);
        tracing::info!(templates, "reply engine reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::render::InMemoryTemplates;
    use crate::selector::ResolutionPass;
    use crate::time::parse_datetime;

    const SCHEMA: &str = r"
facts:
  crm.first_name: { type: text }
  crm.evalbox_status: { type: text, required: true }
";

    const STATES: &str = r"
states:
  - id: REFUSED_DOCS
    priority: 80
    severity: BLOCKING
    detect: { op: equals, fact: crm.evalbox_status, value: refused }
  - id: LEGACY_STATE
    priority: 10
    severity: INFO
    detect: { op: equals, fact: crm.evalbox_status, value: legacy }
    default_template: legacy_reply
";

    const INTENTIONS: &str = r"
intentions:
  - id: CONFIRM_APPOINTMENT
  - id: ASK_BROKEN
  - id: ASK_OTHER
    reachable: false
";

    const MATRIX: &str = r"
entries:
  - { state: '*', intention: CONFIRM_APPOINTMENT, template: appointment }
  - { state: '*', intention: ASK_BROKEN, template: broken }
";

    fn templates() -> InMemoryTemplates {
        // `broken` nests partials one level deeper than rendering allows.
        let mut source = InMemoryTemplates::new()
            .with_template("appointment", "Bonjour {{first_name}}, rendez-vous confirmé.")
            .with_template("broken", "{{> nest_0}}")
            .with_template("legacy_reply", "Ancienne réponse")
            .with_template("generic_fallback", "Bonjour {{first_name}}, nous revenons vers vous.");
        for level in 0..crate::render::MAX_PARTIAL_DEPTH {
            source = source.with_partial(format!("nest_{level}"), format!("{{{{> nest_{}}}}}", level + 1));
        }
        source.with_partial(format!("nest_{}", crate::render::MAX_PARTIAL_DEPTH), "ok")
    }

    fn engine() -> ReplyEngine {
        let files = DefinitionFiles::from_yaml(SCHEMA, STATES, INTENTIONS, MATRIX).unwrap();
        ReplyEngine::from_parts(files, &templates(), EngineConfig::default()).unwrap()
    }

    fn facts(status: &str) -> FactBag {
        FactBag::new(parse_datetime("2026-03-16T09:00:00Z").unwrap())
            .with_fact("crm.first_name", "Lina")
            .with_fact("crm.evalbox_status", status)
    }

    #[test]
    fn test_render_records_trace() {
        let reply = engine().render(facts("refused"), "CONFIRM_APPOINTMENT", &[]).unwrap();
        assert_eq!(reply.text, "Bonjour Lina, rendez-vous confirmé.");
        assert_eq!(reply.trace.matched_pass, ResolutionPass::Wildcard);
        assert_eq!(reply.trace.primary_state.as_str(), "REFUSED_DOCS");
        assert_eq!(reply.trace.template_id.as_str(), "appointment");
        assert_eq!(reply.trace.template_digest.len(), 64);
        assert!(!reply.trace.fell_back);
    }

    #[test]
    fn test_render_failure_falls_back_to_generic() {
        let reply = engine().render(facts("refused"), "ASK_BROKEN", &[]).unwrap();
        assert_eq!(reply.text, "Bonjour Lina, nous revenons vers vous.");
        assert!(reply.trace.fell_back);
        assert_eq!(reply.trace.matched_pass, ResolutionPass::Wildcard);
        assert_eq!(reply.trace.template_id.as_str(), "generic_fallback");
        assert!(reply.trace.warnings.iter().any(|w| w.contains("broken")));
    }

    #[test]
    fn test_schema_violation_rejected() {
        let bag = FactBag::new(parse_datetime("2026-03-16T09:00:00Z").unwrap());
        let err = engine().render(bag, "CONFIRM_APPOINTMENT", &[]).unwrap_err();
        assert!(err.is_execution());
        assert!(format!("{err}").contains("crm.evalbox_status"));
    }

    #[test]
    fn test_unreachable_intention_uses_legacy_then_generic() {
        let engine = engine();
        let legacy = engine.render(facts("legacy"), "ASK_OTHER", &[]).unwrap();
        assert_eq!(legacy.trace.matched_pass, ResolutionPass::Legacy);
        assert_eq!(legacy.text, "Ancienne réponse");

        let generic = engine.render(facts("refused"), "ASK_OTHER", &[]).unwrap();
        assert_eq!(generic.trace.matched_pass, ResolutionPass::Generic);
        assert!(generic.trace.is_degraded());
    }

    #[test]
    fn test_missing_generic_template_fails_load() {
        let files = DefinitionFiles::from_yaml(SCHEMA, STATES, INTENTIONS, MATRIX).unwrap();
        let source = InMemoryTemplates::new()
            .with_template("appointment", "x")
            .with_template("broken", "y")
            .with_template("legacy_reply", "z");
        let err = ReplyEngine::from_parts(files, &source, EngineConfig::default()).unwrap_err();
        assert!(matches!(err, LoadError::MissingTemplate { template, .. } if template == "generic_fallback"));
    }

    #[test]
    fn test_missing_matrix_template_fails_load() {
        let files = DefinitionFiles::from_yaml(SCHEMA, STATES, INTENTIONS, MATRIX).unwrap();
        let source = InMemoryTemplates::new()
            .with_template("generic_fallback", "x")
            .with_template("legacy_reply", "z")
            .with_template("appointment", "a");
        let err = ReplyEngine::from_parts(files, &source, EngineConfig::default()).unwrap_err();
        assert!(matches!(err, LoadError::MissingTemplate { template, .. } if template == "broken"));
    }

    #[test]
    fn test_reload_with_swaps_and_failed_reload_keeps_snapshot() {
        let engine = engine();
        let files = || DefinitionFiles::from_yaml(SCHEMA, STATES, INTENTIONS, MATRIX).unwrap();

        let updated = templates().with_template("appointment", "Confirmé.");
        engine.reload_with(files(), &updated).unwrap();
        let reply = engine.render(facts("refused"), "CONFIRM_APPOINTMENT", &[]).unwrap();
        assert_eq!(reply.text, "Confirmé.");

        let broken = templates().with_template("appointment", "{{#if first_name}}");
        assert!(engine.reload_with(files(), &broken).is_err());
        let reply = engine.render(facts("refused"), "CONFIRM_APPOINTMENT", &[]).unwrap();
        assert_eq!(reply.text, "Confirmé.");
    }

    #[test]
    fn test_request_builder_flags_reach_trace() {
        let request = RenderRequest::new(facts("refused"), "CONFIRM_APPOINTMENT")
            .with_flag(Flag::ShowForceMajeureSection, true);
        let reply = engine().render_request(request).unwrap();
        assert_eq!(
            reply.trace.flags_used.get(&Flag::ShowForceMajeureSection),
            Some(&FlagValue::Bool(true))
        );
    }

    #[test]
    fn test_request_flag_of_wrong_kind_rejected() {
        let request = RenderRequest::new(facts("refused"), "CONFIRM_APPOINTMENT")
            .with_flag(Flag::ShowSessionsSection, "false");
        let err = engine().render_request(request).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execution(ExecutionError::InvalidRequestFlag { ref flag }) if flag == "show_sessions_section"
        ));
    }
}
