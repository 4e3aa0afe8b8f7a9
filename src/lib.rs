//! # replymatrix - State × Intention reply resolution
//!
//! replymatrix turns a snapshot of a support case (the *fact bag*) and the
//! intention detected in an inbound message into a rendered reply. The
//! pipeline has four stages:
//!
//! - **Detection**: declarative state predicates are evaluated over the
//!   facts; the highest-severity active state becomes the primary state.
//! - **Selection**: a `(state, intention)` matrix with wildcard, guarded,
//!   conditional and case-table entries picks a template and may force
//!   context flags. Selection always answers, through a warned legacy or
//!   generic tier if nothing else matches.
//! - **Preparation**: facts, flags and option lists become a statically
//!   declared render context. Matrix-forced flags always win.
//! - **Rendering**: templates compiled and validated at load time are
//!   rendered with HTML escaping and partials.
//!
//! Every reply carries a [`ResolutionTrace`] describing how it was built.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replymatrix::{EngineConfig, FactBag, ReplyEngine};
//!
//! let engine = ReplyEngine::from_config(EngineConfig::from_file("engine.toml")?)?;
//! let facts = FactBag::from_json(case_json, chrono::Utc::now());
//! let reply = engine.render(facts, "ASK_CONVOCATION", &[])?;
//! println!("{}", reply.text);
//! tracing::info!(trace = %reply.trace.to_json()?, "reply rendered");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod condition;
pub mod error;
pub mod facts;
pub mod flags;
pub mod time;
pub mod value;

// Definitions and static checks
pub mod coverage;
pub mod definitions;

// Pipeline stages
pub mod context;
pub mod detector;
pub mod render;
pub mod selector;

// Orchestration
pub mod config;
pub mod engine;
pub mod trace;

// Re-export primary types at crate root for convenience
pub use condition::{Condition, Evaluation, Truth};
pub use config::EngineConfig;
pub use context::{
    Aggregates, ContextPreparer, ExamDateOption, RejectedDocument, RenderContext, Schedule,
    SessionFilter, SessionGroup, SessionOption,
};
pub use coverage::{check_coverage, Combination, CoverageReport, CoverageSpec, CoverageStatus};
pub use definitions::{
    DefinitionFiles, DefinitionStore, IntentionDefinition, IntentionId, Matrix, MatrixKey,
    Severity, StateDefinition, StateId, TemplateId,
};
pub use detector::{DetectedStates, StateDetector};
pub use engine::runtime::{BatchRuntime, RenderHandle, RuntimeConfig};
pub use engine::{RenderRequest, RenderedReply, ReplyEngine, Snapshot};
pub use error::{EngineError, EngineResult, ExecutionError, LoadError, RenderError, TemplateSyntaxError};
pub use facts::{FactBag, FactSchema, FactType};
pub use flags::{Flag, FlagSet, FlagState, FlagValue};
pub use render::{DirectoryTemplates, InMemoryTemplates, TemplateRenderer, TemplateSource};
pub use selector::{ResolutionPass, Selection, TemplateSelector};
pub use time::RecencyWindow;
pub use trace::ResolutionTrace;
pub use value::FactValue;
