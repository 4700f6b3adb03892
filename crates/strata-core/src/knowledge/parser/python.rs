//! Python parser using tree-sitter.

use tree_sitter::Node;

use super::language::Language;
use super::result::{FileStructure, ParsedClass, ParsedFunction, ParsedImport, ParsedMethod};
use super::traits::{Parser, ParserCapability};
use super::treesitter::{collect_syntax_errors, TreeSitterParser};
use crate::knowledge::models::ClassKind;

/// Python parser using tree-sitter.
pub struct PythonParser {
    base: TreeSitterParser,
}

impl PythonParser {
    pub fn new() -> Self {
        Self {
            base: TreeSitterParser::new(tree_sitter_python::LANGUAGE.into()),
        }
    }

    /// Walk module-level statements. Compound statements and ERROR regions are
    /// descended into so declarations inside them are still recovered.
    fn process_block(&self, node: Node, content: &str, result: &mut FileStructure) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "function_definition" => {
                    if let Some(func) = self.extract_function(&child, &child, content) {
                        result.functions.push(func);
                    }
                }
                "class_definition" => self.extract_class(&child, &child, content, result),
                "decorated_definition" => {
                    if let Some(def) = child.child_by_field_name("definition") {
                        match def.kind() {
                            "function_definition" => {
                                if let Some(func) = self.extract_function(&child, &def, content) {
                                    result.functions.push(func);
                                }
                            }
                            "class_definition" => self.extract_class(&child, &def, content, result),
                            _ => {}
                        }
                    }
                }
                "import_statement" => self.extract_import(&child, content, result),
                "import_from_statement" => self.extract_from_import(&child, content, result),
                "if_statement" | "try_statement" | "with_statement" | "else_clause"
                | "elif_clause" | "except_clause" | "finally_clause" | "block" | "ERROR" => {
                    self.process_block(child, content, result);
                }
                _ => {}
            }
        }
    }

    /// `span` covers decorators, `def` is the definition itself.
    fn extract_function(&self, span: &Node, def: &Node, content: &str) -> Option<ParsedFunction> {
        let name = TreeSitterParser::field_text(def, "name", content)?.to_string();

        Some(ParsedFunction {
            name,
            signature: TreeSitterParser::signature(def, content),
            start_line: TreeSitterParser::node_line(span),
            end_line: TreeSitterParser::node_end_line(span),
            receiver: None,
            doc_comment: self.extract_docstring(def, content),
        })
    }

    fn extract_class(&self, span: &Node, def: &Node, content: &str, result: &mut FileStructure) {
        let Some(name) = TreeSitterParser::field_text(def, "name", content) else {
            return;
        };

        let mut class = ParsedClass::new(
            name,
            ClassKind::Class,
            TreeSitterParser::node_line(span),
            TreeSitterParser::node_end_line(span),
        );

        // Base classes; keyword arguments such as metaclass= are skipped
        if let Some(sc) = def.child_by_field_name("superclasses") {
            let mut cursor = sc.walk();
            class.superclasses = sc
                .children(&mut cursor)
                .filter(|c| c.kind() == "identifier" || c.kind() == "attribute")
                .map(|c| TreeSitterParser::node_text(&c, content).to_string())
                .collect();
        }

        if span.kind() == "decorated_definition" {
            let mut cursor = span.walk();
            class.annotations = span
                .children(&mut cursor)
                .filter(|c| c.kind() == "decorator")
                .map(|d| {
                    TreeSitterParser::node_text(&d, content)
                        .trim_start_matches('@')
                        .trim()
                        .to_string()
                })
                .collect();
        }

        class.doc_comment = self.extract_docstring(def, content);

        let mut nested = Vec::new();
        if let Some(body) = def.child_by_field_name("body") {
            let mut cursor = body.walk();
            for stmt in body.children(&mut cursor) {
                let (stmt_span, inner) = match stmt.kind() {
                    "decorated_definition" => match stmt.child_by_field_name("definition") {
                        Some(d) => (stmt, d),
                        None => continue,
                    },
                    _ => (stmt, stmt),
                };
                match inner.kind() {
                    "function_definition" => {
                        if let Some(method_name) = TreeSitterParser::field_text(&inner, "name", content) {
                            class.methods.push(ParsedMethod {
                                name: method_name.to_string(),
                                start_line: TreeSitterParser::node_line(&stmt_span),
                                end_line: TreeSitterParser::node_end_line(&stmt_span),
                            });
                        }
                    }
                    "class_definition" => nested.push((stmt_span, inner)),
                    _ => {}
                }
            }
        }

        result.classes.push(class);
        for (nested_span, nested_def) in nested {
            self.extract_class(&nested_span, &nested_def, content, result);
        }
    }

    fn extract_import(&self, node: &Node, content: &str, result: &mut FileStructure) {
        let line = TreeSitterParser::node_line(node);
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let module = match name.kind() {
                "aliased_import" => TreeSitterParser::field_text(&name, "name", content),
                _ => Some(TreeSitterParser::node_text(&name, content)),
            };
            if let Some(module) = module {
                result.imports.push(ParsedImport::new(module, line));
            }
        }
    }

    fn extract_from_import(&self, node: &Node, content: &str, result: &mut FileStructure) {
        let line = TreeSitterParser::node_line(node);
        let Some(module) = TreeSitterParser::field_text(node, "module_name", content) else {
            return;
        };

        let mut symbols = Vec::new();
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let symbol = match name.kind() {
                "aliased_import" => TreeSitterParser::field_text(&name, "name", content),
                _ => Some(TreeSitterParser::node_text(&name, content)),
            };
            if let Some(symbol) = symbol {
                symbols.push(symbol.to_string());
            }
        }

        if symbols.is_empty() {
            let mut cursor = node.walk();
            if node.children(&mut cursor).any(|c| c.kind() == "wildcard_import") {
                symbols.push("*".to_string());
            }
        }

        if symbols.is_empty() {
            result.imports.push(ParsedImport::new(module, line));
        }
        for symbol in symbols {
            result
                .imports
                .push(ParsedImport::new(module, line).with_symbol(symbol));
        }
    }

    fn extract_docstring(&self, node: &Node, content: &str) -> Option<String> {
        // Look for string as first statement in body
        let body = node.child_by_field_name("body")?;
        let mut cursor = body.walk();
        let first_stmt = body.children(&mut cursor).next()?;

        if first_stmt.kind() == "expression_statement" {
            let mut stmt_cursor = first_stmt.walk();
            let string_node = first_stmt
                .children(&mut stmt_cursor)
                .find(|c| c.kind() == "string");
            if let Some(string_node) = string_node {
                let text = TreeSitterParser::node_text(&string_node, content);
                let cleaned = text
                    .trim_start_matches("\"\"\"")
                    .trim_end_matches("\"\"\"")
                    .trim_start_matches("'''")
                    .trim_end_matches("'''")
                    .trim_start_matches('"')
                    .trim_end_matches('"')
                    .trim();
                return Some(cleaned.to_string());
            }
        }

        None
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for PythonParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        let tree = self.base.parse_tree(content)?;
        let root = tree.root_node();
        let mut result = FileStructure::new(path, Language::Python);

        self.process_block(root, content, &mut result);
        collect_syntax_errors(&root, content, &mut result);

        Ok(result)
    }

    fn language(&self) -> Language {
        Language::Python
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Structural
    }
}
