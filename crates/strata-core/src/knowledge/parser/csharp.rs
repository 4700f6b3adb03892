//! C# parser using tree-sitter.

use tree_sitter::Node;

use super::language::Language;
use super::result::{FileStructure, ParsedClass, ParsedImport, ParsedMethod};
use super::traits::{Parser, ParserCapability};
use super::treesitter::{collect_syntax_errors, collect_type_names_of, TreeSitterParser};
use crate::knowledge::models::ClassKind;

const BASE_TYPE_KINDS: &[&str] = &["identifier", "generic_name", "qualified_name"];

/// C# parser using tree-sitter.
pub struct CSharpParser {
    base: TreeSitterParser,
}

impl CSharpParser {
    pub fn new() -> Self {
        Self {
            base: TreeSitterParser::new(tree_sitter_c_sharp::LANGUAGE.into()),
        }
    }

    fn process_node(&self, node: Node, content: &str, result: &mut FileStructure) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "using_directive" => {
                    if let Some(module) = using_target(TreeSitterParser::node_text(&child, content)) {
                        result
                            .imports
                            .push(ParsedImport::new(module, TreeSitterParser::node_line(&child)));
                    }
                }
                "namespace_declaration" | "file_scoped_namespace_declaration" => {
                    if result.package.is_none() {
                        result.package = TreeSitterParser::field_text(&child, "name", content)
                            .map(str::to_string);
                    }
                    match child.child_by_field_name("body") {
                        Some(body) => self.process_node(body, content, result),
                        None => self.process_node(child, content, result),
                    }
                }
                "declaration_list" | "ERROR" => self.process_node(child, content, result),
                kind if type_kind(kind).is_some() => self.extract_type(&child, content, result),
                _ => {}
            }
        }
    }

    fn extract_type(&self, node: &Node, content: &str, result: &mut FileStructure) {
        let (Some(name), Some(kind)) = (
            TreeSitterParser::field_text(node, "name", content),
            type_kind(node.kind()),
        ) else {
            return;
        };

        let mut class = ParsedClass::new(
            name,
            kind,
            TreeSitterParser::node_line(node),
            TreeSitterParser::node_end_line(node),
        );

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "base_list" => {
                    collect_type_names_of(&child, content, BASE_TYPE_KINDS, &mut class.superclasses)
                }
                "attribute_list" => {
                    let mut attr_cursor = child.walk();
                    class.annotations.extend(
                        child
                            .children(&mut attr_cursor)
                            .filter(|a| a.kind() == "attribute")
                            .filter_map(|a| TreeSitterParser::field_text(&a, "name", content))
                            .map(str::to_string),
                    );
                }
                _ => {}
            }
        }

        class.doc_comment = self.extract_xml_doc(node, content);

        let mut nested = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut body_cursor = body.walk();
            for member in body.children(&mut body_cursor) {
                match member.kind() {
                    "method_declaration" | "constructor_declaration" => {
                        if let Some(method_name) = TreeSitterParser::field_text(&member, "name", content) {
                            class.methods.push(ParsedMethod {
                                name: method_name.to_string(),
                                start_line: TreeSitterParser::node_line(&member),
                                end_line: TreeSitterParser::node_end_line(&member),
                            });
                        }
                    }
                    kind if type_kind(kind).is_some() => nested.push(member),
                    _ => {}
                }
            }
        }

        result.classes.push(class);
        for inner in nested {
            self.extract_type(&inner, content, result);
        }
    }

    /// `///` XML doc comments with the tags stripped.
    fn extract_xml_doc(&self, node: &Node, content: &str) -> Option<String> {
        let mut lines = Vec::new();
        let mut sibling = node.prev_sibling();
        while let Some(s) = sibling {
            let text = TreeSitterParser::node_text(&s, content);
            if s.kind() != "comment" || !text.starts_with("///") {
                break;
            }
            let cleaned = text
                .trim_start_matches("///")
                .replace("<summary>", "")
                .replace("</summary>", "");
            let cleaned = cleaned.trim();
            if !cleaned.is_empty() {
                lines.push(cleaned.to_string());
            }
            sibling = s.prev_sibling();
        }
        if lines.is_empty() {
            return None;
        }
        lines.reverse();
        Some(lines.join("\n"))
    }
}

fn type_kind(node_kind: &str) -> Option<ClassKind> {
    match node_kind {
        "class_declaration" | "record_declaration" => Some(ClassKind::Class),
        "struct_declaration" | "record_struct_declaration" => Some(ClassKind::Struct),
        "interface_declaration" => Some(ClassKind::Interface),
        "enum_declaration" => Some(ClassKind::Enum),
        _ => None,
    }
}

/// Namespace named by a using directive. `using X = A.B;` yields `A.B`.
fn using_target(text: &str) -> Option<String> {
    let body = text
        .trim()
        .trim_start_matches("global")
        .trim()
        .trim_start_matches("using")
        .trim()
        .trim_start_matches("static ")
        .trim_end_matches(';')
        .trim();
    let target = match body.split_once('=') {
        Some((_, target)) => target.trim(),
        None => body,
    };
    (!target.is_empty()).then(|| target.to_string())
}

impl Default for CSharpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for CSharpParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        let tree = self.base.parse_tree(content)?;
        let root = tree.root_node();
        let mut result = FileStructure::new(path, Language::CSharp);

        self.process_node(root, content, &mut result);
        collect_syntax_errors(&root, content, &mut result);

        Ok(result)
    }

    fn language(&self) -> Language {
        Language::CSharp
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Structural
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csharp_namespace_and_classes() {
        let code = r#"using System;
using Acme.Shop.Models;
using Json = System.Text.Json;

namespace Acme.Shop.Controllers
{
    /// <summary>Orders API.</summary>
    [ApiController]
    [Route("api/orders")]
    public class OrdersController : ControllerBase, IDisposable
    {
        public OrdersController() { }

        [HttpGet("{id}")]
        public Order Get(int id) { return null; }

        public void Dispose() { }
    }

    public interface IOrderStore
    {
        Order Find(int id);
    }
}
"#;
        let result = CSharpParser::new().parse_file("OrdersController.cs", code).unwrap();

        assert_eq!(result.package.as_deref(), Some("Acme.Shop.Controllers"));
        let imports: Vec<&str> = result.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(imports, vec!["System", "Acme.Shop.Models", "System.Text.Json"]);

        let controller = result
            .classes
            .iter()
            .find(|c| c.name == "OrdersController")
            .unwrap();
        assert_eq!(controller.superclasses, vec!["ControllerBase", "IDisposable"]);
        assert_eq!(controller.annotations, vec!["ApiController", "Route"]);
        let methods: Vec<&str> = controller.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, vec!["OrdersController", "Get", "Dispose"]);
        assert_eq!(controller.doc_comment.as_deref(), Some("Orders API."));

        let store = result.classes.iter().find(|c| c.name == "IOrderStore").unwrap();
        assert_eq!(store.kind, ClassKind::Interface);
    }

    #[test]
    fn test_using_target() {
        assert_eq!(using_target("using System;").as_deref(), Some("System"));
        assert_eq!(using_target("global using static System.Math;").as_deref(), Some("System.Math"));
        assert_eq!(using_target("using J = System.Text.Json;").as_deref(), Some("System.Text.Json"));
    }
}
