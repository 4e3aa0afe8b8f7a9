//! Directive parser.
//!
//! Turns template text into a node tree. Every `{{` starts a tag, so a
//! parsed template cannot carry a raw directive into its output: anything
//! that is not a well-formed tag is a syntax error.
//!
//! Block tags (`#if`, `else`, `/if`, comments, partials) that sit alone on
//! their line take the whole line with them.

use serde::{Deserialize, Serialize};

use crate::error::TemplateSyntaxError;

/// Block directive keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    If,
    Unless,
    Each,
}

impl BlockKind {
    fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "if" => Some(Self::If),
            "unless" => Some(Self::Unless),
            "each" => Some(Self::Each),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::If => "if",
            Self::Unless => "unless",
            Self::Each => "each",
        }
    }
}

/// A name read by a directive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Name {
    Field(String),
    /// `@index`
    Index,
    /// `@first`
    First,
    /// `@last`
    Last,
}

impl Name {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "@index" => Some(Self::Index),
            "@first" => Some(Self::First),
            "@last" => Some(Self::Last),
            _ if is_identifier(raw) => Some(Self::Field(raw.to_string())),
            _ => None,
        }
    }

    /// Returns true for the `@` helpers.
    #[must_use]
    pub const fn is_positional(&self) -> bool {
        !matches!(self, Self::Field(_))
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index => f.write_str("@index"),
            Self::First => f.write_str("@first"),
            Self::Last => f.write_str("@last"),
        }
    }
}

/// Parsed template node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Var {
        name: Name,
        escape: bool,
        line: usize,
    },
    Partial {
        name: String,
        line: usize,
    },
    Section {
        kind: BlockKind,
        name: Name,
        then: Vec<Node>,
        otherwise: Vec<Node>,
        line: usize,
    },
}

enum Tag {
    Var { name: Name, escape: bool },
    Partial(String),
    Open(BlockKind, Name),
    Close(BlockKind),
    Else,
    Comment,
}

impl Tag {
    const fn may_stand_alone(&self) -> bool {
        !matches!(self, Self::Var { .. })
    }
}

struct Block {
    kind: BlockKind,
    name: Name,
    line: usize,
    then: Vec<Node>,
    otherwise: Option<Vec<Node>>,
}

impl Block {
    fn body(&mut self) -> &mut Vec<Node> {
        match &mut self.otherwise {
            Some(nodes) => nodes,
            None => &mut self.then,
        }
    }
}

fn is_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_partial_name(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/'))
}

fn classify(inner: &str, triple: bool) -> Result<Tag, String> {
    if triple {
        return Name::parse(inner)
            .map(|name| Tag::Var { name, escape: false })
            .ok_or_else(|| format!("invalid name '{inner}'"));
    }
    if inner.starts_with('!') {
        return Ok(Tag::Comment);
    }
    if inner == "else" {
        return Ok(Tag::Else);
    }
    if let Some(rest) = inner.strip_prefix('&') {
        let rest = rest.trim();
        return Name::parse(rest)
            .map(|name| Tag::Var { name, escape: false })
            .ok_or_else(|| format!("invalid name '{rest}'"));
    }
    if let Some(rest) = inner.strip_prefix('>') {
        let rest = rest.trim();
        return if is_partial_name(rest) {
            Ok(Tag::Partial(rest.to_string()))
        } else {
            Err(format!("invalid partial name '{rest}'"))
        };
    }
    if let Some(rest) = inner.strip_prefix('#') {
        let mut words = rest.split_whitespace();
        let keyword = words.next().unwrap_or_default();
        let kind = BlockKind::parse(keyword).ok_or_else(|| format!("unknown block '#{keyword}'"))?;
        let arg = words
            .next()
            .ok_or_else(|| format!("{{{{#{keyword}}}}} needs a name"))?;
        if words.next().is_some() {
            return Err(format!("{{{{#{keyword}}}}} takes a single name"));
        }
        let name = Name::parse(arg).ok_or_else(|| format!("invalid name '{arg}'"))?;
        return Ok(Tag::Open(kind, name));
    }
    if let Some(rest) = inner.strip_prefix('/') {
        let keyword = rest.trim();
        return BlockKind::parse(keyword)
            .map(Tag::Close)
            .ok_or_else(|| format!("unknown block '/{keyword}'"));
    }
    Name::parse(inner)
        .map(|name| Tag::Var { name, escape: true })
        .ok_or_else(|| format!("invalid name '{inner}'"))
}

fn line_at(src: &str, offset: usize) -> usize {
    src[..offset].bytes().filter(|&b| b == b'\n').count() + 1
}

/// If the tag spanning `start..end` is alone on its line, returns the
/// offset just past that line's newline.
fn standalone_end(src: &str, start: usize, end: usize) -> Option<usize> {
    let line_start = src[..start].rfind('\n').map_or(0, |i| i + 1);
    if !src[line_start..start].chars().all(|c| c == ' ' || c == '\t') {
        return None;
    }
    let rest = &src[end..];
    let line_end = rest.find('\n').map_or(rest.len(), |i| i + 1);
    rest[..line_end]
        .chars()
        .all(char::is_whitespace)
        .then_some(end + line_end)
}

/// Parses template text.
///
/// # Errors
///
/// Returns a [`TemplateSyntaxError`] for an unclosed tag, an unknown block
/// keyword, an invalid name, a stray or duplicate `else`, a mismatched
/// close tag or a block left open at end of input.
pub fn parse(template: &str, src: &str) -> Result<Vec<Node>, TemplateSyntaxError> {
    let err = |line: usize, message: String| TemplateSyntaxError {
        template: template.to_string(),
        line,
        message,
    };

    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Block> = Vec::new();
    let mut text = String::new();
    let mut pos = 0;

    while let Some(found) = src[pos..].find("{{") {
        let start = pos + found;
        let line = line_at(src, start);
        let triple = src[start..].starts_with("{{{");
        let (inner_start, closer) = if triple { (start + 3, "}}}") } else { (start + 2, "}}") };
        let Some(close) = src[inner_start..].find(closer) else {
            return Err(err(line, "unclosed tag".to_string()));
        };
        let inner = src[inner_start..inner_start + close].trim();
        let mut end = inner_start + close + closer.len();

        let tag = classify(inner, triple).map_err(|m| err(line, m))?;

        let mut leading = &src[pos..start];
        if tag.may_stand_alone() {
            if let Some(after) = standalone_end(src, start, end) {
                leading = leading.trim_end_matches([' ', '\t']);
                end = after;
            }
        }
        text.push_str(leading);

        let current = stack.last_mut().map_or(&mut root, Block::body);
        if !text.is_empty() {
            current.push(Node::Text(std::mem::take(&mut text)));
        }

        match tag {
            Tag::Comment => {}
            Tag::Var { name, escape } => current.push(Node::Var { name, escape, line }),
            Tag::Partial(name) => current.push(Node::Partial { name, line }),
            Tag::Open(kind, name) => stack.push(Block {
                kind,
                name,
                line,
                then: Vec::new(),
                otherwise: None,
            }),
            Tag::Else => match stack.last_mut() {
                None => return Err(err(line, "{{else}} outside a block".to_string())),
                Some(block) if block.otherwise.is_some() => {
                    return Err(err(line, format!("second {{{{else}}}} in {{{{#{}}}}}", block.kind.as_str())));
                }
                Some(block) => block.otherwise = Some(Vec::new()),
            },
            Tag::Close(kind) => {
                let Some(block) = stack.pop() else {
                    return Err(err(line, format!("{{{{/{}}}}} without an open block", kind.as_str())));
                };
                if block.kind != kind {
                    return Err(err(
                        line,
                        format!(
                            "{{{{/{}}}}} closes {{{{#{}}}}} opened at line {}",
                            kind.as_str(),
                            block.kind.as_str(),
                            block.line
                        ),
                    ));
                }
                let node = Node::Section {
                    kind: block.kind,
                    name: block.name,
                    then: block.then,
                    otherwise: block.otherwise.unwrap_or_default(),
                    line: block.line,
                };
                stack.last_mut().map_or(&mut root, Block::body).push(node);
            }
        }
        pos = end;
    }

    if let Some(block) = stack.last() {
        return Err(err(
            block.line,
            format!("{{{{#{} {}}}}} is never closed", block.kind.as_str(), block.name),
        ));
    }

    text.push_str(&src[pos..]);
    if !text.is_empty() {
        root.push(Node::Text(text));
    }
    Ok(root)
}

/// Partial names referenced anywhere in `nodes`.
#[must_use]
pub fn partials(nodes: &[Node]) -> Vec<&str> {
    let mut out = Vec::new();
    collect_partials(nodes, &mut out);
    out.sort_unstable();
    out.dedup();
    out
}

fn collect_partials<'n>(nodes: &'n [Node], out: &mut Vec<&'n str>) {
    for node in nodes {
        match node {
            Node::Partial { name, .. } => out.push(name),
            Node::Section { then, otherwise, .. } => {
                collect_partials(then, out);
                collect_partials(otherwise, out);
            }
            Node::Text(_) | Node::Var { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Name {
        Name::Field(name.to_string())
    }

    #[test]
    fn test_substitutions() {
        let nodes = parse("t", "Bonjour {{ first_name }}, {{{raw}}} {{& also_raw}}").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("Bonjour ".to_string()),
                Node::Var { name: field("first_name"), escape: true, line: 1 },
                Node::Text(", ".to_string()),
                Node::Var { name: field("raw"), escape: false, line: 1 },
                Node::Text(" ".to_string()),
                Node::Var { name: field("also_raw"), escape: false, line: 1 },
            ]
        );
    }

    #[test]
    fn test_blocks_nest_with_else() {
        let src = "{{#if a}}A{{#each rows}}{{@index}}{{/each}}{{else}}B{{/if}}";
        let nodes = parse("t", src).unwrap();
        let [Node::Section { kind: BlockKind::If, then, otherwise, .. }] = nodes.as_slice() else {
            panic!("unexpected tree {nodes:?}");
        };
        assert_eq!(then.len(), 2);
        assert!(matches!(&then[1], Node::Section { kind: BlockKind::Each, .. }));
        assert_eq!(otherwise, &vec![Node::Text("B".to_string())]);
    }

    #[test]
    fn test_standalone_block_lines_are_removed() {
        let src = "Bonjour\n  {{#if show}}\nLigne\n  {{/if}}\nFin\n";
        let nodes = parse("t", src).unwrap();
        assert_eq!(nodes[0], Node::Text("Bonjour\n".to_string()));
        let Node::Section { then, .. } = &nodes[1] else {
            panic!("expected section");
        };
        assert_eq!(then, &vec![Node::Text("Ligne\n".to_string())]);
        assert_eq!(nodes[2], Node::Text("Fin\n".to_string()));
    }

    #[test]
    fn test_inline_block_keeps_surrounding_text() {
        let nodes = parse("t", "a {{#if x}}b{{/if}} c").unwrap();
        assert_eq!(nodes[0], Node::Text("a ".to_string()));
        assert_eq!(nodes[2], Node::Text(" c".to_string()));
    }

    #[test]
    fn test_comments_vanish() {
        let nodes = parse("t", "a{{! note }}b").unwrap();
        assert_eq!(nodes, vec![Node::Text("a".to_string()), Node::Text("b".to_string())]);
    }

    #[test]
    fn test_partials_collected() {
        let nodes = parse("t", "{{> signature}}{{#if x}}{{> header}}{{/if}}{{> signature}}").unwrap();
        assert_eq!(partials(&nodes), vec!["header", "signature"]);
    }

    #[test]
    fn test_syntax_errors_carry_lines() {
        let cases = [
            ("line\n{{#if a}}\nno close", 2, "never closed"),
            ("{{name", 1, "unclosed tag"),
            ("{{#if a}}{{/each}}", 1, "closes"),
            ("\n\n{{/if}}", 3, "without an open block"),
            ("{{else}}", 1, "outside a block"),
            ("{{#if a}}{{else}}{{else}}{{/if}}", 1, "second"),
            ("{{#with a}}{{/with}}", 1, "unknown block"),
            ("{{first name}}", 1, "invalid name"),
            ("{{#if}}{{/if}}", 1, "needs a name"),
            ("{{> }}", 1, "invalid partial"),
        ];
        for (src, line, needle) in cases {
            let err = parse("t", src).unwrap_err();
            assert_eq!(err.line, line, "{src}");
            assert!(err.message.contains(needle), "{src}: {}", err.message);
        }
    }
}
