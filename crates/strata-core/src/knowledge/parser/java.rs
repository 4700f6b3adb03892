//! Java parser using tree-sitter.

use tree_sitter::Node;

use super::language::Language;
use super::result::{FileStructure, ParsedClass, ParsedImport, ParsedMethod};
use super::traits::{Parser, ParserCapability};
use super::treesitter::{collect_syntax_errors, collect_type_names_of, TreeSitterParser};
use crate::knowledge::models::ClassKind;

/// Node kinds naming a type in `extends`/`implements` clauses.
const TYPE_KINDS: &[&str] = &["type_identifier", "generic_type", "scoped_type_identifier"];

/// Java parser using tree-sitter.
pub struct JavaParser {
    base: TreeSitterParser,
}

impl JavaParser {
    pub fn new() -> Self {
        Self {
            base: TreeSitterParser::new(tree_sitter_java::LANGUAGE.into()),
        }
    }

    fn process_node(&self, node: Node, content: &str, result: &mut FileStructure) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "package_declaration" => {
                    let text = TreeSitterParser::node_text(&child, content);
                    let package = text
                        .trim()
                        .trim_start_matches("package")
                        .trim_end_matches(';')
                        .trim();
                    result.package = Some(package.to_string());
                }
                "import_declaration" => {
                    let text = TreeSitterParser::node_text(&child, content);
                    let module = text
                        .trim()
                        .trim_start_matches("import")
                        .trim()
                        .trim_start_matches("static ")
                        .trim_end_matches(';')
                        .trim();
                    result
                        .imports
                        .push(ParsedImport::new(module, TreeSitterParser::node_line(&child)));
                }
                "class_declaration" | "interface_declaration" | "enum_declaration"
                | "record_declaration" | "annotation_type_declaration" => {
                    self.extract_type(&child, content, result);
                }
                "ERROR" => self.process_node(child, content, result),
                _ => {}
            }
        }
    }

    fn extract_type(&self, node: &Node, content: &str, result: &mut FileStructure) {
        let Some(name) = TreeSitterParser::field_text(node, "name", content) else {
            return;
        };

        let kind = match node.kind() {
            "interface_declaration" | "annotation_type_declaration" => ClassKind::Interface,
            "enum_declaration" => ClassKind::Enum,
            _ => ClassKind::Class,
        };

        let mut class = ParsedClass::new(
            name,
            kind,
            TreeSitterParser::node_line(node),
            TreeSitterParser::node_end_line(node),
        );

        for field in ["superclass", "interfaces"] {
            if let Some(clause) = node.child_by_field_name(field) {
                collect_type_names(&clause, content, &mut class.superclasses);
            }
        }
        // interface Foo extends Bar, Baz
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "extends_interfaces" => collect_type_names(&child, content, &mut class.superclasses),
                "modifiers" => class.annotations = self.extract_annotations(&child, content),
                _ => {}
            }
        }

        class.doc_comment = self.extract_javadoc(node, content);

        let mut nested = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            self.collect_members(&body, content, &mut class, &mut nested);
        }

        result.classes.push(class);
        for inner in nested {
            self.extract_type(&inner, content, result);
        }
    }

    fn collect_members<'a>(
        &self,
        body: &Node<'a>,
        content: &str,
        class: &mut ParsedClass,
        nested: &mut Vec<Node<'a>>,
    ) {
        let mut cursor = body.walk();
        for member in body.children(&mut cursor) {
            match member.kind() {
                "method_declaration" | "constructor_declaration" | "compact_constructor_declaration" => {
                    if let Some(method_name) = TreeSitterParser::field_text(&member, "name", content) {
                        class.methods.push(ParsedMethod {
                            name: method_name.to_string(),
                            start_line: TreeSitterParser::node_line(&member),
                            end_line: TreeSitterParser::node_end_line(&member),
                        });
                    }
                }
                "enum_body_declarations" => self.collect_members(&member, content, class, nested),
                "class_declaration" | "interface_declaration" | "enum_declaration"
                | "record_declaration" => nested.push(member),
                _ => {}
            }
        }
    }

    /// Annotation names from a modifiers node (`@Entity`, `@RequestMapping("/x")`).
    fn extract_annotations(&self, modifiers: &Node, content: &str) -> Vec<String> {
        let mut cursor = modifiers.walk();
        modifiers
            .children(&mut cursor)
            .filter(|c| c.kind() == "marker_annotation" || c.kind() == "annotation")
            .filter_map(|c| TreeSitterParser::field_text(&c, "name", content))
            .map(str::to_string)
            .collect()
    }

    fn extract_javadoc(&self, node: &Node, content: &str) -> Option<String> {
        let prev = node.prev_sibling()?;
        if prev.kind() != "block_comment" {
            return None;
        }
        let text = TreeSitterParser::node_text(&prev, content);
        if !text.starts_with("/**") {
            return None;
        }
        let cleaned: Vec<&str> = text
            .trim_start_matches("/**")
            .trim_end_matches("*/")
            .lines()
            .map(|l| l.trim().trim_start_matches('*').trim())
            .filter(|l| !l.is_empty())
            .collect();
        Some(cleaned.join("\n"))
    }
}

fn collect_type_names(node: &Node, content: &str, out: &mut Vec<String>) {
    collect_type_names_of(node, content, TYPE_KINDS, out);
}

impl Default for JavaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for JavaParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        let tree = self.base.parse_tree(content)?;
        let root = tree.root_node();
        let mut result = FileStructure::new(path, Language::Java);

        self.process_node(root, content, &mut result);
        collect_syntax_errors(&root, content, &mut result);

        Ok(result)
    }

    fn language(&self) -> Language {
        Language::Java
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Structural
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_java_class() {
        let code = r#"package com.acme.shop;

import java.util.List;
import com.acme.shop.model.Item;

/**
 * Order entity.
 */
@Entity
public class Order extends BaseEntity implements Serializable, Comparable<Order> {
    private List<Item> items;

    public Order() {}

    public int total() {
        return 0;
    }

    static class Line {
        void add() {}
    }
}
"#;
        let result = JavaParser::new().parse_file("src/Order.java", code).unwrap();

        assert_eq!(result.package.as_deref(), Some("com.acme.shop"));
        let imports: Vec<&str> = result.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(imports, vec!["java.util.List", "com.acme.shop.model.Item"]);

        let order = result.classes.iter().find(|c| c.name == "Order").unwrap();
        assert_eq!(order.superclasses, vec!["BaseEntity", "Serializable", "Comparable"]);
        assert_eq!(order.annotations, vec!["Entity"]);
        let methods: Vec<&str> = order.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, vec!["Order", "total"]);
        assert_eq!(order.doc_comment.as_deref(), Some("Order entity."));

        let line = result.classes.iter().find(|c| c.name == "Line").unwrap();
        assert_eq!(line.methods.len(), 1);
        assert!(result.functions.is_empty());
    }

    #[test]
    fn test_java_interface_and_enum() {
        let code = r#"interface Repo extends Base<Order> {
    void save();
}

enum Status {
    OPEN, CLOSED;

    boolean done() { return this == CLOSED; }
}
"#;
        let result = JavaParser::new().parse_file("Repo.java", code).unwrap();
        let repo = result.classes.iter().find(|c| c.name == "Repo").unwrap();
        assert_eq!(repo.kind, ClassKind::Interface);
        assert_eq!(repo.superclasses, vec!["Base"]);
        let status = result.classes.iter().find(|c| c.name == "Status").unwrap();
        assert_eq!(status.kind, ClassKind::Enum);
        assert_eq!(status.methods[0].name, "done");
    }
}
