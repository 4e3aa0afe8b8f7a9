//! Engine configuration.
//!
//! Read from TOML. Every field has a default, so an empty file is a valid
//! configuration as long as the two directories exist at load time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::PreparerSettings;
use crate::definitions::TemplateId;
use crate::error::LoadError;
use crate::time::{RecencyWindow, MAX_OFFSET_DAYS, MAX_WINDOW_HOURS};

/// Engine and batch runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `schema.yaml`, `states.yaml`, `intentions.yaml`,
    /// `matrix.yaml` and the optional alias and coverage files.
    pub definitions_dir: PathBuf,
    /// Directory holding `templates/` and `partials/`.
    pub templates_dir: PathBuf,
    /// Template used when nothing else resolves, and when rendering the
    /// selected template fails.
    pub generic_template: String,
    /// How long an earlier communication suppresses repeating it.
    pub recency_window_hours: i64,
    /// Days before a registration deadline at which the warning shows.
    pub deadline_warning_days: i64,
    /// Fail loading on unsigned coverage gaps instead of logging them.
    pub strict_coverage: bool,
    /// Batch runtime worker threads.
    pub workers: usize,
    /// Batch runtime queue capacity.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            definitions_dir: PathBuf::from("definitions"),
            templates_dir: PathBuf::from("templates"),
            generic_template: "generic_fallback".to_string(),
            recency_window_hours: 72,
            deadline_warning_days: 7,
            strict_coverage: true,
            workers: 4,
            queue_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `LoadError::Parse` for malformed TOML, `LoadError::Config` for
    /// out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, LoadError> {
        let config: Self = toml::from_str(raw).map_err(|e| LoadError::parse("<config>", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML file. Relative directories are resolved against the
    /// file's parent directory.
    ///
    /// # Errors
    ///
    /// `LoadError::Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| LoadError::io(path.display(), e))?;
        let mut config: Self = toml::from_str(&raw).map_err(|e| LoadError::parse(path.display(), e))?;
        if let Some(base) = path.parent() {
            config.definitions_dir = base.join(&config.definitions_dir);
            config.templates_dir = base.join(&config.templates_dir);
        }
        config.validate()?;
        tracing::info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    /// Builder-style directory override.
    #[must_use]
    pub fn with_dirs(mut self, definitions_dir: impl Into<PathBuf>, templates_dir: impl Into<PathBuf>) -> Self {
        self.definitions_dir = definitions_dir.into();
        self.templates_dir = templates_dir.into();
        self
    }

    #[must_use]
    pub fn with_strict_coverage(mut self, strict: bool) -> Self {
        self.strict_coverage = strict;
        self
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<(), LoadError> {
        let invalid = |message: &str| {
            Err(LoadError::Config {
                message: message.to_string(),
            })
        };
        if self.generic_template.trim().is_empty() {
            return invalid("generic_template must not be empty");
        }
        if self.recency_window_hours <= 0 || self.recency_window_hours > MAX_WINDOW_HOURS {
            return invalid(&format!("recency_window_hours must be between 1 and {MAX_WINDOW_HOURS}"));
        }
        if self.deadline_warning_days <= 0 || self.deadline_warning_days > MAX_OFFSET_DAYS {
            return invalid(&format!("deadline_warning_days must be between 1 and {MAX_OFFSET_DAYS}"));
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1");
        }
        Ok(())
    }

    #[must_use]
    pub fn generic_template_id(&self) -> TemplateId {
        TemplateId::new(self.generic_template.clone())
    }

    #[must_use]
    pub const fn preparer_settings(&self) -> PreparerSettings {
        PreparerSettings {
            recency: RecencyWindow::hours(self.recency_window_hours),
            deadline_warning_days: self.deadline_warning_days,
        }
    }
}
