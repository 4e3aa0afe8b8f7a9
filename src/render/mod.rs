//! Template compilation and rendering.
//!
//! Every template and partial is parsed once, when the renderer is built,
//! and checked against the declared render context: partials must exist
//! and must not include themselves, names must be declared fields (row
//! fields inside `each`), and `each` must iterate a list. Rendering a
//! validated template can then only fail on a missing template id.

pub mod parser;
pub mod source;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::context::{find_field, ContextValue, Declared, FieldKind, FieldSpec, RenderContext, Scope};
use crate::definitions::TemplateId;
use crate::error::{LoadError, RenderError, TemplateSyntaxError};

pub use parser::{BlockKind, Name, Node};
pub use source::{DirectoryTemplates, InMemoryTemplates, TemplateSource};

/// Maximum partial nesting at render time.
pub const MAX_PARTIAL_DEPTH: usize = 16;

/// A parsed template or partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    name: String,
    nodes: Vec<Node>,
    digest: String,
}

impl CompiledTemplate {
    /// Parses `source`.
    ///
    /// # Errors
    ///
    /// Returns the first syntax error.
    pub fn compile(name: &str, source: &str) -> Result<Self, TemplateSyntaxError> {
        Ok(Self {
            name: name.to_string(),
            nodes: parser::parse(name, source)?,
            digest: blake3::hash(source.as_bytes()).to_hex().to_string(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// blake3 hex digest of the source text.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

/// Identity of a rendered template, as recorded in traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFingerprint {
    pub id: TemplateId,
    pub digest: String,
}

/// Compiled, validated templates and partials.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    templates: HashMap<TemplateId, CompiledTemplate>,
    partials: HashMap<String, CompiledTemplate>,
}

impl TemplateRenderer {
    /// Compiles and validates every template from `source` against
    /// [`RenderContext`].
    ///
    /// # Errors
    ///
    /// Syntax errors, missing or recursive partials, undeclared variables
    /// and non-list `each` targets.
    pub fn load(source: &dyn TemplateSource) -> Result<Self, LoadError> {
        Self::load_for(source, RenderContext::FIELDS)
    }

    /// Same as [`TemplateRenderer::load`] with an explicit root field table.
    ///
    /// # Errors
    ///
    /// See [`TemplateRenderer::load`].
    pub fn load_for(source: &dyn TemplateSource, root: &'static [FieldSpec]) -> Result<Self, LoadError> {
        let mut renderer = Self::default();
        for (name, text) in source.partials()? {
            let compiled = CompiledTemplate::compile(&name, &text)?;
            renderer.partials.insert(name, compiled);
        }
        for (name, text) in source.templates()? {
            let compiled = CompiledTemplate::compile(&name, &text)?;
            renderer.templates.insert(TemplateId::new(name), compiled);
        }

        let mut ids: Vec<&TemplateId> = renderer.templates.keys().collect();
        ids.sort();
        for id in ids {
            let template = &renderer.templates[id];
            let mut scopes = vec![root];
            let mut chain = Vec::new();
            renderer.check_nodes(template.name(), template.nodes(), &mut scopes, &mut chain)?;
        }

        tracing::debug!(
            templates = renderer.templates.len(),
            partials = renderer.partials.len(),
            "templates compiled"
        );
        Ok(renderer)
    }

    #[must_use]
    pub fn contains(&self, id: &TemplateId) -> bool {
        self.templates.contains_key(id)
    }

    #[must_use]
    pub fn template(&self, id: &TemplateId) -> Option<&CompiledTemplate> {
        self.templates.get(id)
    }

    #[must_use]
    pub fn fingerprint(&self, id: &TemplateId) -> Option<TemplateFingerprint> {
        self.templates.get(id).map(|t| TemplateFingerprint {
            id: id.clone(),
            digest: t.digest.clone(),
        })
    }

    /// Number of templates, partials excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Renders a template. No partial output is returned on error.
    ///
    /// # Errors
    ///
    /// `RenderError::TemplateNotFound` for an unknown id, or any error met
    /// while expanding partials.
    pub fn render(&self, id: &TemplateId, context: &dyn Scope) -> Result<String, RenderError> {
        let template = self
            .templates
            .get(id)
            .ok_or_else(|| RenderError::TemplateNotFound { id: id.to_string() })?;
        let mut out = String::new();
        let mut stack = vec![Frame::root(context)];
        Expander {
            partials: Some(&self.partials),
            template: template.name(),
        }
        .expand(template.nodes(), &mut stack, &mut out, 0)?;
        Ok(out)
    }

    fn check_nodes(
        &self,
        owner: &str,
        nodes: &[Node],
        scopes: &mut Vec<&'static [FieldSpec]>,
        chain: &mut Vec<String>,
    ) -> Result<(), LoadError> {
        for node in nodes {
            match node {
                Node::Text(_) => {}
                Node::Var { name, .. } => check_name(owner, name, scopes)?,
                Node::Section {
                    kind: BlockKind::If | BlockKind::Unless,
                    name,
                    then,
                    otherwise,
                    ..
                } => {
                    check_name(owner, name, scopes)?;
                    self.check_nodes(owner, then, scopes, chain)?;
                    self.check_nodes(owner, otherwise, scopes, chain)?;
                }
                Node::Section {
                    kind: BlockKind::Each,
                    name,
                    then,
                    otherwise,
                    ..
                } => {
                    let not_iterable = || LoadError::NotIterable {
                        template: owner.to_string(),
                        variable: name.to_string(),
                    };
                    let Name::Field(field) = name else {
                        return Err(not_iterable());
                    };
                    let spec = lookup_spec(scopes, field).ok_or_else(|| LoadError::UndeclaredVariable {
                        template: owner.to_string(),
                        variable: field.clone(),
                    })?;
                    let FieldKind::List(rows) = spec.kind else {
                        return Err(not_iterable());
                    };
                    scopes.push(rows);
                    let result = self.check_nodes(owner, then, scopes, chain);
                    scopes.pop();
                    result?;
                    self.check_nodes(owner, otherwise, scopes, chain)?;
                }
                Node::Partial { name, .. } => {
                    if chain.contains(name) {
                        let mut cycle = chain.clone();
                        cycle.push(name.clone());
                        return Err(LoadError::RecursivePartial {
                            partial: name.clone(),
                            chain: cycle.join(" -> "),
                        });
                    }
                    let partial = self.partials.get(name).ok_or_else(|| LoadError::MissingPartial {
                        template: owner.to_string(),
                        partial: name.clone(),
                    })?;
                    chain.push(name.clone());
                    let result = self.check_nodes(name, partial.nodes(), scopes, chain);
                    chain.pop();
                    result?;
                }
            }
        }
        Ok(())
    }
}

fn lookup_spec(scopes: &[&'static [FieldSpec]], field: &str) -> Option<&'static FieldSpec> {
    scopes.iter().rev().find_map(|&fields| find_field(fields, field))
}

fn check_name(owner: &str, name: &Name, scopes: &[&'static [FieldSpec]]) -> Result<(), LoadError> {
    let known = match name {
        Name::Field(field) => lookup_spec(scopes, field).is_some(),
        // Only meaningful inside an `each`.
        _ => name.is_positional() && scopes.len() > 1,
    };
    if known {
        Ok(())
    } else {
        Err(LoadError::UndeclaredVariable {
            template: owner.to_string(),
            variable: name.to_string(),
        })
    }
}

/// Renders a template source directly, without partials or load-time
/// validation. Unknown names render empty.
///
/// # Errors
///
/// Syntax errors, and `RenderError::PartialNotFound` for any partial tag.
pub fn render_str(source: &str, context: &dyn Scope) -> Result<String, RenderError> {
    let nodes = parser::parse("inline", source)?;
    let mut out = String::new();
    let mut stack = vec![Frame::root(context)];
    Expander {
        partials: None,
        template: "inline",
    }
    .expand(&nodes, &mut stack, &mut out, 0)?;
    Ok(out)
}

/// HTML-escapes a substituted value.
#[must_use]
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

struct Frame<'a> {
    scope: &'a dyn Scope,
    /// `(index, len)` when the frame is an `each` row.
    position: Option<(usize, usize)>,
}

impl<'a> Frame<'a> {
    fn root(scope: &'a dyn Scope) -> Self {
        Self { scope, position: None }
    }
}

struct Expander<'r> {
    partials: Option<&'r HashMap<String, CompiledTemplate>>,
    template: &'r str,
}

impl Expander<'_> {
    fn resolve<'a>(stack: &[Frame<'a>], name: &Name) -> ContextValue<'a> {
        let position = || stack.iter().rev().find_map(|f| f.position);
        match name {
            Name::Field(field) => {
                for frame in stack.iter().rev() {
                    let scope: &'a dyn Scope = frame.scope;
                    if let Some(value) = scope.lookup(field) {
                        return value;
                    }
                }
                ContextValue::Empty
            }
            Name::Index => position().map_or(ContextValue::Empty, |(i, _)| {
                ContextValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
            }),
            Name::First => position().map_or(ContextValue::Empty, |(i, _)| ContextValue::Bool(i == 0)),
            Name::Last => position().map_or(ContextValue::Empty, |(i, len)| ContextValue::Bool(i + 1 == len)),
        }
    }

    fn expand<'a>(
        &self,
        nodes: &[Node],
        stack: &mut Vec<Frame<'a>>,
        out: &mut String,
        depth: usize,
    ) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Var { name, escape, .. } => {
                    let value = Self::resolve(stack, name).to_text();
                    if *escape {
                        out.push_str(&escape_html(&value));
                    } else {
                        out.push_str(&value);
                    }
                }
                Node::Section {
                    kind,
                    name,
                    then,
                    otherwise,
                    ..
                } => {
                    let value = Self::resolve(stack, name);
                    match kind {
                        BlockKind::If | BlockKind::Unless => {
                            let truthy = value.is_truthy() == (*kind == BlockKind::If);
                            let branch = if truthy { then } else { otherwise };
                            self.expand(branch, stack, out, depth)?;
                        }
                        BlockKind::Each => match value {
                            ContextValue::List(rows) if !rows.is_empty() => {
                                let len = rows.len();
                                for (i, row) in rows.into_iter().enumerate() {
                                    stack.push(Frame {
                                        scope: row,
                                        position: Some((i, len)),
                                    });
                                    let result = self.expand(then, stack, out, depth);
                                    stack.pop();
                                    result?;
                                }
                            }
                            _ => self.expand(otherwise, stack, out, depth)?,
                        },
                    }
                }
                Node::Partial { name, .. } => {
                    let not_found = || RenderError::PartialNotFound {
                        template: self.template.to_string(),
                        partial: name.clone(),
                    };
                    let partial = self.partials.and_then(|p| p.get(name)).ok_or_else(not_found)?;
                    if depth + 1 > MAX_PARTIAL_DEPTH {
                        return Err(RenderError::PartialDepthExceeded {
                            template: self.template.to_string(),
                            max_depth: MAX_PARTIAL_DEPTH,
                        });
                    }
                    self.expand(partial.nodes(), stack, out, depth + 1)?;
                }
            }
        }
        Ok(())
    }
}
