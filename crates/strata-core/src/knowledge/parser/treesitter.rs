//! Tree-sitter based parsing utilities shared across language parsers.

use tree_sitter::{Language as Grammar, Node, Parser as TSParser, Tree};

use super::result::FileStructure;

/// Syntax errors reported per file before the rest are summarized.
const MAX_REPORTED_ERRORS: usize = 20;

/// Base tree-sitter parser holding the grammar.
pub struct TreeSitterParser {
    grammar: Grammar,
}

impl TreeSitterParser {
    pub fn new(grammar: Grammar) -> Self {
        Self { grammar }
    }

    /// Parse source code into a tree-sitter tree.
    pub fn parse_tree(&self, content: &str) -> Result<Tree, String> {
        let mut parser = TSParser::new();
        parser
            .set_language(&self.grammar)
            .map_err(|e| format!("Failed to set language: {}", e))?;

        parser
            .parse(content, None)
            .ok_or_else(|| "Failed to parse content".to_string())
    }

    /// Get text for a node from source content.
    pub fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
        content.get(node.byte_range()).unwrap_or("")
    }

    /// Get line number (1-based) for a node.
    pub fn node_line(node: &Node) -> u32 {
        node.start_position().row as u32 + 1
    }

    /// Get end line number (1-based) for a node.
    ///
    /// A node ending at column 0 stops at the previous line's newline.
    pub fn node_end_line(node: &Node) -> u32 {
        let end = node.end_position();
        if end.column == 0 && end.row > node.start_position().row {
            end.row as u32
        } else {
            end.row as u32 + 1
        }
    }

    /// Text of a named field.
    pub fn field_text<'a>(node: &Node, field: &str, content: &'a str) -> Option<&'a str> {
        node.child_by_field_name(field)
            .map(|n| Self::node_text(&n, content))
    }

    /// First line of a declaration, used as its signature.
    pub fn signature(node: &Node, content: &str) -> String {
        Self::node_text(node, content)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .trim_end_matches('{')
            .trim_end_matches(':')
            .trim()
            .to_string()
    }
}

/// Record ERROR and MISSING nodes as parse errors.
pub fn collect_syntax_errors(root: &Node, content: &str, structure: &mut FileStructure) {
    if !root.has_error() {
        return;
    }

    let mut found = 0usize;
    let mut stack = vec![*root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            found += 1;
            if found <= MAX_REPORTED_ERRORS {
                let line = TreeSitterParser::node_line(&node);
                let message = if node.is_missing() {
                    format!("missing `{}`", node.kind())
                } else {
                    let snippet: String = TreeSitterParser::node_text(&node, content)
                        .lines()
                        .next()
                        .unwrap_or("")
                        .chars()
                        .take(40)
                        .collect();
                    format!("syntax error near `{}`", snippet.trim())
                };
                structure.add_error(Some(line), message);
            }
            continue;
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    if found > MAX_REPORTED_ERRORS {
        structure.add_error(
            None,
            format!("{} further syntax errors not shown", found - MAX_REPORTED_ERRORS),
        );
    }
}

/// Helper to extract doc comments from preceding sibling comment nodes.
pub fn extract_doc_comment(node: &Node, content: &str) -> Option<String> {
    let mut comments = Vec::new();
    let mut sibling = node.prev_sibling();

    while let Some(s) = sibling {
        if !s.kind().contains("comment") {
            break;
        }
        let text = TreeSitterParser::node_text(&s, content);
        let cleaned = text
            .trim_start_matches("///")
            .trim_start_matches("//")
            .trim_start_matches("/**")
            .trim_start_matches("/*")
            .trim_end_matches("*/")
            .trim_start_matches('*')
            .trim();
        comments.push(cleaned.to_string());
        sibling = s.prev_sibling();
    }

    if comments.is_empty() {
        None
    } else {
        comments.reverse();
        Some(comments.join("\n"))
    }
}

/// Collect type names under a clause node, without descending into a type once found.
pub fn collect_type_names_of(node: &Node, content: &str, kinds: &[&str], out: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            let name = base_type_name(TreeSitterParser::node_text(&child, content));
            if !name.is_empty() {
                out.push(name);
            }
        } else {
            collect_type_names_of(&child, content, kinds, out);
        }
    }
}

/// Strip quotes from a string literal.
pub fn unquote(text: &str) -> String {
    text.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

/// Type name without generic arguments or pointer markers.
pub fn base_type_name(text: &str) -> String {
    let trimmed = text.trim().trim_start_matches('*').trim_start_matches('&');
    let end = trimmed
        .find(|c: char| c == '<' || c == '(' || c == '[')
        .unwrap_or(trimmed.len());
    trimmed[..end].trim().to_string()
}
