//! TypeScript and JavaScript parser using tree-sitter.

use tree_sitter::Node;

use super::language::Language;
use super::result::{FileStructure, ParsedClass, ParsedFunction, ParsedImport, ParsedMethod};
use super::traits::{Parser, ParserCapability};
use super::treesitter::{base_type_name, collect_syntax_errors, extract_doc_comment, unquote, TreeSitterParser};
use crate::knowledge::models::ClassKind;

/// Heritage node kinds that name a base type.
const HERITAGE_KINDS: &[&str] = &[
    "identifier",
    "member_expression",
    "type_identifier",
    "generic_type",
    "nested_type_identifier",
];

/// TypeScript and JavaScript parser using tree-sitter.
pub struct TypeScriptParser {
    base: TreeSitterParser,
    language: Language,
}

impl TypeScriptParser {
    /// Create a TypeScript parser.
    pub fn typescript() -> Self {
        Self {
            base: TreeSitterParser::new(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            language: Language::TypeScript,
        }
    }

    /// Create a JavaScript parser.
    pub fn javascript() -> Self {
        Self {
            base: TreeSitterParser::new(tree_sitter_javascript::LANGUAGE.into()),
            language: Language::JavaScript,
        }
    }

    /// `span` is the outermost statement (an `export` wrapper when there is one).
    fn process_statement(&self, span: Node, node: Node, content: &str, result: &mut FileStructure) {
        match node.kind() {
            "import_statement" => {
                if let Some(source) = TreeSitterParser::field_text(&node, "source", content) {
                    result
                        .imports
                        .push(ParsedImport::new(unquote(source), TreeSitterParser::node_line(&node)));
                }
            }
            "export_statement" => {
                if let Some(source) = TreeSitterParser::field_text(&node, "source", content) {
                    // export { x } from './y'
                    result
                        .imports
                        .push(ParsedImport::new(unquote(source), TreeSitterParser::node_line(&node)));
                }
                if let Some(decl) = node.child_by_field_name("declaration") {
                    self.process_statement(span, decl, content, result);
                }
            }
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name) = TreeSitterParser::field_text(&node, "name", content) {
                    result.functions.push(ParsedFunction {
                        name: name.to_string(),
                        signature: TreeSitterParser::signature(&node, content),
                        start_line: TreeSitterParser::node_line(&span),
                        end_line: TreeSitterParser::node_end_line(&span),
                        receiver: None,
                        doc_comment: extract_doc_comment(&span, content),
                    });
                }
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.extract_class(&span, &node, ClassKind::Class, content, result);
            }
            "interface_declaration" => {
                self.extract_class(&span, &node, ClassKind::Interface, content, result);
            }
            "enum_declaration" => {
                self.extract_class(&span, &node, ClassKind::Enum, content, result);
            }
            "lexical_declaration" | "variable_declaration" => {
                self.extract_declarators(&span, &node, content, result);
            }
            "expression_statement" => self.extract_requires(&node, content, result),
            "ERROR" | "statement_block" => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    self.process_statement(child, child, content, result);
                }
            }
            _ => {}
        }
    }

    /// `const handler = async (req) => {...}` becomes a function;
    /// `const x = require('y')` becomes an import.
    fn extract_declarators(&self, span: &Node, node: &Node, content: &str, result: &mut FileStructure) {
        let mut cursor = node.walk();
        for declarator in node.children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(value) = declarator.child_by_field_name("value") else {
                continue;
            };
            match value.kind() {
                "arrow_function" | "function_expression" | "function" | "generator_function" => {
                    let Some(name) = TreeSitterParser::field_text(&declarator, "name", content) else {
                        continue;
                    };
                    result.functions.push(ParsedFunction {
                        name: name.to_string(),
                        signature: TreeSitterParser::signature(span, content)
                            .trim_end_matches("=>")
                            .trim()
                            .to_string(),
                        start_line: TreeSitterParser::node_line(span),
                        end_line: TreeSitterParser::node_end_line(span),
                        receiver: None,
                        doc_comment: extract_doc_comment(span, content),
                    });
                }
                _ => self.extract_requires(&value, content, result),
            }
        }
    }

    fn extract_requires(&self, node: &Node, content: &str, result: &mut FileStructure) {
        let mut stack = vec![*node];
        while let Some(current) = stack.pop() {
            if current.kind() == "call_expression"
                && TreeSitterParser::field_text(&current, "function", content) == Some("require")
            {
                if let Some(args) = current.child_by_field_name("arguments") {
                    let mut cursor = args.walk();
                    let source = args.children(&mut cursor).find(|a| a.kind() == "string");
                    if let Some(source) = source {
                        result.imports.push(ParsedImport::new(
                            unquote(TreeSitterParser::node_text(&source, content)),
                            TreeSitterParser::node_line(&current),
                        ));
                    }
                }
                continue;
            }
            let mut cursor = current.walk();
            stack.extend(current.children(&mut cursor));
        }
    }

    fn extract_class(
        &self,
        span: &Node,
        node: &Node,
        kind: ClassKind,
        content: &str,
        result: &mut FileStructure,
    ) {
        let Some(name) = TreeSitterParser::field_text(node, "name", content) else {
            return;
        };

        let mut class = ParsedClass::new(
            name,
            kind,
            TreeSitterParser::node_line(span),
            TreeSitterParser::node_end_line(span),
        );
        class.doc_comment = extract_doc_comment(span, content);

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "class_heritage" | "extends_type_clause" => {
                    collect_heritage(&child, content, &mut class.superclasses)
                }
                "decorator" => class.annotations.push(
                    TreeSitterParser::node_text(&child, content)
                        .trim_start_matches('@')
                        .to_string(),
                ),
                _ => {}
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            let mut body_cursor = body.walk();
            for member in body.children(&mut body_cursor) {
                if !matches!(
                    member.kind(),
                    "method_definition" | "method_signature" | "abstract_method_signature"
                ) {
                    continue;
                }
                if let Some(method_name) = TreeSitterParser::field_text(&member, "name", content) {
                    class.methods.push(ParsedMethod {
                        name: method_name.to_string(),
                        start_line: TreeSitterParser::node_line(&member),
                        end_line: TreeSitterParser::node_end_line(&member),
                    });
                }
            }
        }

        result.classes.push(class);
    }
}

/// Base types named in `extends`/`implements`, skipping generic arguments.
fn collect_heritage(node: &Node, content: &str, out: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "type_arguments" {
            continue;
        }
        if HERITAGE_KINDS.contains(&child.kind()) {
            out.push(base_type_name(TreeSitterParser::node_text(&child, content)));
        } else {
            collect_heritage(&child, content, out);
        }
    }
}

impl Parser for TypeScriptParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        let tree = self.base.parse_tree(content)?;
        let root = tree.root_node();
        let mut result = FileStructure::new(path, self.language);

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            self.process_statement(child, child, content, &mut result);
        }
        collect_syntax_errors(&root, content, &mut result);

        Ok(result)
    }

    fn language(&self) -> Language {
        self.language
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Structural
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_javascript_module() {
        let code = r#"const express = require('express');
import { helper } from './utils';

/** Start the app. */
function start() {
  return 1;
}

const handler = async (req, res) => {
  res.send('ok');
};

export class OrderView extends React.Component {
  render() {
    return null;
  }
}
"#;
        let result = TypeScriptParser::javascript().parse_file("app.js", code).unwrap();

        let imports: Vec<&str> = result.imports.iter().map(|i| i.module.as_str()).collect();
        assert!(imports.contains(&"express"));
        assert!(imports.contains(&"./utils"));

        let names: Vec<&str> = result.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["start", "handler"]);
        assert_eq!(result.functions[0].doc_comment.as_deref(), Some("Start the app."));

        let view = &result.classes[0];
        assert_eq!(view.name, "OrderView");
        assert_eq!(view.superclasses, vec!["React.Component"]);
        assert_eq!(view.methods[0].name, "render");
        assert_eq!(view.start_line, 13);
    }

    #[test]
    fn test_typescript_declarations() {
        let code = r#"import type { Order } from "./models";

export interface Store extends Base<Order> {
  find(id: string): Order;
}

export abstract class SqlStore implements Store {
  find(id: string): Order { return null as any; }
}

export enum Status { Open, Closed }
"#;
        let result = TypeScriptParser::typescript().parse_file("store.ts", code).unwrap();
        assert_eq!(result.language, Language::TypeScript);
        assert_eq!(result.imports[0].module, "./models");

        let store = result.classes.iter().find(|c| c.name == "Store").unwrap();
        assert_eq!(store.kind, ClassKind::Interface);
        assert_eq!(store.superclasses, vec!["Base"]);
        assert_eq!(store.methods[0].name, "find");

        let sql = result.classes.iter().find(|c| c.name == "SqlStore").unwrap();
        assert_eq!(sql.superclasses, vec!["Store"]);

        assert!(result.classes.iter().any(|c| c.name == "Status" && c.kind == ClassKind::Enum));
    }
}
