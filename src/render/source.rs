//! Where template text comes from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::LoadError;

pub const TEMPLATES_DIR: &str = "templates";
pub const PARTIALS_DIR: &str = "partials";

/// A provider of template and partial sources, keyed by name.
pub trait TemplateSource: Send + Sync {
    /// Returns every template as `name -> text`.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the sources cannot be read.
    fn templates(&self) -> Result<BTreeMap<String, String>, LoadError>;

    /// Returns every partial as `name -> text`.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the sources cannot be read.
    fn partials(&self) -> Result<BTreeMap<String, String>, LoadError>;
}

/// Templates held in memory (tests, embedded defaults).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryTemplates {
    templates: BTreeMap<String, String>,
    partials: BTreeMap<String, String>,
}

impl InMemoryTemplates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_template(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.templates.insert(name.into(), text.into());
        self
    }

    #[must_use]
    pub fn with_partial(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.partials.insert(name.into(), text.into());
        self
    }
}

impl TemplateSource for InMemoryTemplates {
    fn templates(&self) -> Result<BTreeMap<String, String>, LoadError> {
        Ok(self.templates.clone())
    }

    fn partials(&self) -> Result<BTreeMap<String, String>, LoadError> {
        Ok(self.partials.clone())
    }
}

/// Templates read from `<root>/templates/` and `<root>/partials/`.
///
/// A file's name without extension is its template name. The partials
/// directory is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTemplates {
    root: PathBuf,
}

impl DirectoryTemplates {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateSource for DirectoryTemplates {
    fn templates(&self) -> Result<BTreeMap<String, String>, LoadError> {
        read_dir(&self.root.join(TEMPLATES_DIR), true)
    }

    fn partials(&self) -> Result<BTreeMap<String, String>, LoadError> {
        read_dir(&self.root.join(PARTIALS_DIR), false)
    }
}

fn read_dir(dir: &Path, required: bool) -> Result<BTreeMap<String, String>, LoadError> {
    let mut out = BTreeMap::new();
    if !dir.is_dir() {
        if required {
            return Err(LoadError::io(dir.display(), "not a directory"));
        }
        tracing::debug!("{} not found, no partials loaded", dir.display());
        return Ok(out);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| LoadError::io(dir.display(), e))?;
    for entry in entries {
        let path = entry.map_err(|e| LoadError::io(dir.display(), e))?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(|e| LoadError::io(path.display(), e))?;
        if out.insert(name.to_string(), text).is_some() {
            return Err(LoadError::parse(
                path.display(),
                format!("another file in {} is also named '{name}'", dir.display()),
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_source_reads_both_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(TEMPLATES_DIR)).unwrap();
        std::fs::create_dir(dir.path().join(PARTIALS_DIR)).unwrap();
        std::fs::write(dir.path().join("templates/welcome.txt"), "Bonjour").unwrap();
        std::fs::write(dir.path().join("partials/signature.txt"), "L'équipe").unwrap();

        let source = DirectoryTemplates::new(dir.path());
        assert_eq!(source.templates().unwrap()["welcome"], "Bonjour");
        assert_eq!(source.partials().unwrap()["signature"], "L'équipe");
    }

    #[test]
    fn test_missing_partials_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(TEMPLATES_DIR)).unwrap();
        let source = DirectoryTemplates::new(dir.path());
        assert!(source.partials().unwrap().is_empty());
        assert!(source.templates().unwrap().is_empty());
    }

    #[test]
    fn test_missing_templates_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryTemplates::new(dir.path());
        assert!(matches!(source.templates().unwrap_err(), LoadError::Io { .. }));
    }

    #[test]
    fn test_duplicate_stems_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(TEMPLATES_DIR)).unwrap();
        std::fs::write(dir.path().join("templates/a.txt"), "1").unwrap();
        std::fs::write(dir.path().join("templates/a.html"), "2").unwrap();
        let source = DirectoryTemplates::new(dir.path());
        assert!(matches!(source.templates().unwrap_err(), LoadError::Parse { .. }));
    }
}
