//! Go parser using tree-sitter.

use tree_sitter::Node;

use super::language::Language;
use super::result::{FileStructure, ParsedClass, ParsedFunction, ParsedImport, ParsedMethod};
use super::traits::{Parser, ParserCapability};
use super::treesitter::{base_type_name, collect_syntax_errors, extract_doc_comment, unquote, TreeSitterParser};
use crate::knowledge::models::ClassKind;

/// Go parser using tree-sitter.
pub struct GoParser {
    base: TreeSitterParser,
}

impl GoParser {
    pub fn new() -> Self {
        Self {
            base: TreeSitterParser::new(tree_sitter_go::LANGUAGE.into()),
        }
    }

    fn extract_function(&self, node: &Node, content: &str) -> Option<ParsedFunction> {
        let name = TreeSitterParser::field_text(node, "name", content)?.to_string();

        // Method receiver: func (s *Server) Handle(...)
        let receiver = node.child_by_field_name("receiver").and_then(|r| {
            let mut cursor = r.walk();
            let param = r
                .children(&mut cursor)
                .find(|c| c.kind() == "parameter_declaration")?;
            let ty = param.child_by_field_name("type")?;
            Some(base_type_name(TreeSitterParser::node_text(&ty, content)))
        });

        Some(ParsedFunction {
            name,
            signature: TreeSitterParser::signature(node, content),
            start_line: TreeSitterParser::node_line(node),
            end_line: TreeSitterParser::node_end_line(node),
            receiver,
            doc_comment: extract_doc_comment(node, content),
        })
    }

    fn extract_type_spec(&self, decl: &Node, spec: &Node, content: &str) -> Option<ParsedClass> {
        let name = TreeSitterParser::field_text(spec, "name", content)?;
        let type_node = spec.child_by_field_name("type")?;

        let kind = match type_node.kind() {
            "struct_type" => ClassKind::Struct,
            "interface_type" => ClassKind::Interface,
            _ => return None,
        };

        // A single-spec declaration spans `type X struct {...}` including the keyword
        let span = if decl.named_child_count() == 1 { *decl } else { *spec };
        let mut class = ParsedClass::new(
            name,
            kind,
            TreeSitterParser::node_line(&span),
            TreeSitterParser::node_end_line(&span),
        );
        class.doc_comment = extract_doc_comment(&span, content);

        match kind {
            ClassKind::Struct => {
                // Embedded fields act as composition-based inheritance
                if let Some(fields) = find_child(&type_node, "field_declaration_list") {
                    let mut cursor = fields.walk();
                    for field in fields.children(&mut cursor) {
                        if field.kind() == "field_declaration" && field.child_by_field_name("name").is_none() {
                            if let Some(ty) = field.child_by_field_name("type") {
                                class.superclasses.push(base_type_name(TreeSitterParser::node_text(&ty, content)));
                            }
                        }
                    }
                }
            }
            _ => {
                let mut cursor = type_node.walk();
                for child in type_node.children(&mut cursor) {
                    match child.kind() {
                        "method_spec" | "method_elem" => {
                            if let Some(method_name) = TreeSitterParser::field_text(&child, "name", content) {
                                class.methods.push(ParsedMethod {
                                    name: method_name.to_string(),
                                    start_line: TreeSitterParser::node_line(&child),
                                    end_line: TreeSitterParser::node_end_line(&child),
                                });
                            }
                        }
                        "type_elem" | "type_identifier" | "qualified_type" | "constraint_elem" => {
                            class.superclasses.push(base_type_name(TreeSitterParser::node_text(&child, content)));
                        }
                        _ => {}
                    }
                }
            }
        }

        Some(class)
    }

    fn extract_imports(&self, node: &Node, content: &str, result: &mut FileStructure) {
        let mut stack = vec![*node];
        while let Some(current) = stack.pop() {
            if current.kind() == "import_spec" {
                if let Some(path) = TreeSitterParser::field_text(&current, "path", content) {
                    result
                        .imports
                        .push(ParsedImport::new(unquote(path), TreeSitterParser::node_line(&current)));
                }
                continue;
            }
            let mut cursor = current.walk();
            stack.extend(current.children(&mut cursor));
        }
    }

    fn process_node(&self, node: Node, content: &str, result: &mut FileStructure) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "package_clause" => {
                    if let Some(pkg) = find_child(&child, "package_identifier") {
                        result.package = Some(TreeSitterParser::node_text(&pkg, content).to_string());
                    }
                }
                "import_declaration" => self.extract_imports(&child, content, result),
                "function_declaration" | "method_declaration" => {
                    if let Some(func) = self.extract_function(&child, content) {
                        result.functions.push(func);
                    }
                }
                "type_declaration" => {
                    let mut spec_cursor = child.walk();
                    for spec in child.children(&mut spec_cursor) {
                        if spec.kind() == "type_spec" {
                            if let Some(class) = self.extract_type_spec(&child, &spec, content) {
                                result.classes.push(class);
                            }
                        }
                    }
                }
                "ERROR" => self.process_node(child, content, result),
                _ => {}
            }
        }
    }

    /// Attach methods to the structs they have receivers for.
    fn link_receivers(result: &mut FileStructure) {
        for func in &result.functions {
            let Some(receiver) = &func.receiver else { continue };
            if let Some(class) = result.classes.iter_mut().find(|c| &c.name == receiver) {
                class.methods.push(ParsedMethod {
                    name: func.name.clone(),
                    start_line: func.start_line,
                    end_line: func.end_line,
                });
            }
        }
    }
}

fn find_child<'a>(node: &Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|c| c.kind() == kind);
    found
}

impl Default for GoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for GoParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        let tree = self.base.parse_tree(content)?;
        let root = tree.root_node();
        let mut result = FileStructure::new(path, Language::Go);

        self.process_node(root, content, &mut result);
        Self::link_receivers(&mut result);
        collect_syntax_errors(&root, content, &mut result);

        Ok(result)
    }

    fn language(&self) -> Language {
        Language::Go
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Structural
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_declarations() {
        let code = r#"package server

import (
    "fmt"
    api "example.com/shop/api"
)

// Server handles requests.
type Server struct {
    Base
    name string
}

type Handler interface {
    Handle() error
}

func NewServer() *Server {
    return &Server{}
}

func (s *Server) Handle() error {
    fmt.Println(api.Version)
    return nil
}
"#;
        let result = GoParser::new().parse_file("server/server.go", code).unwrap();

        assert_eq!(result.package.as_deref(), Some("server"));
        let imports: Vec<&str> = result.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(imports, vec!["fmt", "example.com/shop/api"]);

        let names: Vec<&str> = result.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["NewServer", "Handle"]);
        assert_eq!(result.functions[1].receiver.as_deref(), Some("Server"));

        let server = result.classes.iter().find(|c| c.name == "Server").unwrap();
        assert_eq!(server.kind, ClassKind::Struct);
        assert_eq!(server.superclasses, vec!["Base"]);
        assert!(server.methods.iter().any(|m| m.name == "Handle"));
        assert_eq!(server.doc_comment.as_deref(), Some("Server handles requests."));

        let handler = result.classes.iter().find(|c| c.name == "Handler").unwrap();
        assert_eq!(handler.kind, ClassKind::Interface);
    }
}
