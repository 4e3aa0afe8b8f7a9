//! Error types for replymatrix.
//!
//! Errors are split by the phase in which they occur: loading definitions
//! and templates, rendering a template, and executing a case through the
//! pipeline. Load errors are fatal for the process; render errors are fatal
//! for one case and are caught by the engine to substitute the generic
//! fallback template.

use std::fmt;

use thiserror::Error;

/// A directive syntax error inside a template or partial.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error in '{template}' at line {line}: {message}")]
pub struct TemplateSyntaxError {
    /// Template or partial name.
    pub template: String,
    /// 1-based line of the offending directive.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

/// Errors raised while loading and validating definitions or templates.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read '{path}': {message}")]
    Io {
        path: String,
        message: String,
    },

    #[error("Failed to parse '{path}': {message}")]
    Parse {
        path: String,
        message: String,
    },

    #[error("Duplicate state id: {id}")]
    DuplicateState {
        id: String,
    },

    #[error("Duplicate intention id: {id}")]
    DuplicateIntention {
        id: String,
    },

    #[error("State id '{id}' is reserved")]
    ReservedState {
        id: String,
    },

    #[error("{owner} references fact '{fact}' which is not declared in the fact schema")]
    UnknownFact {
        owner: String,
        fact: String,
    },

    #[error("Invalid condition in {owner}: {reason}")]
    InvalidCondition {
        owner: String,
        reason: String,
    },

    #[error("{owner} sets flag '{flag}' to a value of the wrong kind")]
    InvalidFlagValue {
        owner: String,
        flag: String,
    },

    #[error("{context} references unknown state '{id}'")]
    UnknownState {
        context: String,
        id: String,
    },

    #[error("{context} references unknown intention '{id}'")]
    UnknownIntention {
        context: String,
        id: String,
    },

    #[error("Duplicate matrix entry for {key}")]
    DuplicateMatrixEntry {
        key: String,
    },

    #[error("Matrix entry {key} is exact and cannot carry a guard condition")]
    GuardedExactEntry {
        key: String,
    },

    #[error("Intention '{id}' is reachable but has no wildcard matrix entry")]
    UncoveredIntention {
        id: String,
    },

    #[error("{referenced_by} references missing template '{template}'")]
    MissingTemplate {
        referenced_by: String,
        template: String,
    },

    #[error("Template '{template}' includes missing partial '{partial}'")]
    MissingPartial {
        template: String,
        partial: String,
    },

    #[error("Partial '{partial}' includes itself (via {chain})")]
    RecursivePartial {
        partial: String,
        chain: String,
    },

    #[error("Template '{template}' reads undeclared variable '{variable}'")]
    UndeclaredVariable {
        template: String,
        variable: String,
    },

    #[error("Template '{template}' iterates over '{variable}' which is not a list")]
    NotIterable {
        template: String,
        variable: String,
    },

    #[error(transparent)]
    TemplateSyntax(#[from] TemplateSyntaxError),

    #[error("Invalid alias '{alias}': {reason}")]
    InvalidAlias {
        alias: String,
        reason: String,
    },

    #[error("Historical combinations resolve only via legacy or generic fallback without sign-off: {}", .combinations.join(", "))]
    CoverageGap {
        combinations: Vec<String>,
    },

    #[error("Invalid configuration: {message}")]
    Config {
        message: String,
    },
}

impl LoadError {
    pub(crate) fn io(path: impl fmt::Display, err: impl fmt::Display) -> Self {
        Self::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn parse(path: impl fmt::Display, err: impl fmt::Display) -> Self {
        Self::Parse {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while rendering one template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Template not found: {id}")]
    TemplateNotFound {
        id: String,
    },

    #[error("Partial '{partial}' not found (included from '{template}')")]
    PartialNotFound {
        template: String,
        partial: String,
    },

    #[error(transparent)]
    Syntax(#[from] TemplateSyntaxError),

    #[error("Partial nesting exceeded {max_depth} levels in '{template}'")]
    PartialDepthExceeded {
        template: String,
        max_depth: usize,
    },
}

/// Errors raised while executing a case or a batch.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Fact bag rejected: {}", .violations.join("; "))]
    InvalidFactBag {
        violations: Vec<String>,
    },

    #[error("Request flag {flag} has a value of the wrong kind")]
    InvalidRequestFlag {
        flag: String,
    },

    #[error("Render queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Render worker disconnected")]
    Disconnected,

    #[error("Render timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Snapshot lock poisoned")]
    LockPoisoned,
}

/// Top-level error type for replymatrix.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl EngineError {
    /// Returns true if this is a load error.
    #[must_use]
    pub const fn is_load(&self) -> bool {
        matches!(self, Self::Load(_))
    }

    /// Returns true if this is a render error.
    #[must_use]
    pub const fn is_render(&self) -> bool {
        matches!(self, Self::Render(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if submitting the same case again may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Load(_) | Self::Render(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
        }
    }
}

/// Result type alias for replymatrix operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display() {
        let err = TemplateSyntaxError {
            template: "welcome".to_string(),
            line: 4,
            message: "unclosed {{#if}}".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("welcome"));
        assert!(msg.contains("line 4"));
    }

    #[test]
    fn test_coverage_gap_lists_combinations() {
        let err = LoadError::CoverageGap {
            combinations: vec!["(A, B)".to_string(), "(C, D)".to_string()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("(A, B), (C, D)"));
    }

    #[test]
    fn test_engine_error_from_load() {
        let err: EngineError = LoadError::DuplicateState {
            id: "X".to_string(),
        }
        .into();
        assert!(err.is_load());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_engine_error_from_render() {
        let err: EngineError = RenderError::TemplateNotFound {
            id: "missing".to_string(),
        }
        .into();
        assert!(err.is_render());
        assert!(format!("{err}").contains("missing"));
    }

    #[test]
    fn test_engine_error_retryable() {
        let full: EngineError = ExecutionError::QueueFull { capacity: 8 }.into();
        assert!(full.is_execution());
        assert!(full.is_retryable());

        let invalid: EngineError = ExecutionError::InvalidFactBag {
            violations: vec!["crm.status missing".to_string()],
        }
        .into();
        assert!(!invalid.is_retryable());
    }
}
