//! Protocol Buffers schema parser.
//!
//! Messages become data-model classes, services become API classes whose
//! `rpc` methods are recorded as gRPC endpoints. Nested blocks are named by
//! their path inside the file (`Order.Item`).

use regex::Regex;
use std::sync::LazyLock;

use super::language::Language;
use super::result::{FileStructure, ParsedClass, ParsedDataModel, ParsedEndpoint, ParsedImport, ParsedMethod};
use super::traits::{Parser, ParserCapability};
use crate::knowledge::models::{ClassKind, ModelField};

/// Compiled once; a pattern error surfaces as a parse failure.
static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::compile);

struct Patterns {
    package: Regex,
    import: Regex,
    block: Regex,
    field: Regex,
    map_field: Regex,
    rpc: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            package: Regex::new(r"(?m)^\s*package\s+([\w.]+)\s*;")?,
            import: Regex::new(r#"(?m)^\s*import\s+(?:public\s+|weak\s+)?"([^"]+)"\s*;"#)?,
            block: Regex::new(r"\b(message|enum|service)\s+(\w+)\s*\{")?,
            field: Regex::new(r"(?m)^\s*(?:(repeated|optional|required)\s+)?([\w.]+)\s+(\w+)\s*=\s*(\d+)")?,
            map_field: Regex::new(r"map\s*<\s*([\w.]+)\s*,\s*([\w.]+)\s*>\s+(\w+)\s*=\s*(\d+)")?,
            rpc: Regex::new(
                r"\brpc\s+(\w+)\s*\(\s*(?:stream\s+)?([\w.]+)\s*\)\s*returns\s*\(\s*(?:stream\s+)?([\w.]+)\s*\)",
            )?,
        })
    }
}

/// Words that can start a statement shaped like a field.
const NON_FIELD_WORDS: &[&str] = &["option", "reserved", "extensions", "rpc", "returns", "map"];

/// Parser for `.proto` files.
#[derive(Debug, Default)]
pub struct ProtobufParser;

impl ProtobufParser {
    pub fn new() -> Self {
        Self
    }
}

/// A `message`, `enum` or `service` block: byte offsets of its keyword and braces.
struct Block {
    kind: ClassKind,
    name: String,
    start: usize,
    open: usize,
    close: usize,
}

impl Parser for ProtobufParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        let patterns = PATTERNS
            .as_ref()
            .map_err(|e| format!("invalid protobuf pattern: {}", e))?;
        let mut result = FileStructure::new(path, Language::Protobuf);
        let masked = mask_comments(content);

        result.package = patterns
            .package
            .captures(&masked)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        for cap in patterns.import.captures_iter(&masked) {
            if let (Some(whole), Some(target)) = (cap.get(0), cap.get(1)) {
                result
                    .imports
                    .push(ParsedImport::new(target.as_str(), line_of(content, whole.start())));
            }
        }

        check_braces(&masked, content, &mut result);

        let blocks: Vec<Block> = patterns
            .block
            .captures_iter(&masked)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                let kind = match cap.get(1)?.as_str() {
                    "message" => ClassKind::Message,
                    "enum" => ClassKind::Enum,
                    _ => ClassKind::Service,
                };
                let open = whole.end() - 1;
                Some(Block {
                    kind,
                    name: cap.get(2)?.as_str().to_string(),
                    start: whole.start(),
                    open,
                    close: matching_brace(&masked, open).unwrap_or(masked.len()),
                })
            })
            .collect();

        for block in &blocks {
            let name = nested_name(block, &blocks);
            let mut class = ParsedClass::new(
                name.clone(),
                block.kind,
                line_of(content, block.start),
                line_of(content, block.close),
            );

            match block.kind {
                ClassKind::Message => {
                    let body = own_body(&masked, block, &blocks);
                    result.data_models.push(ParsedDataModel {
                        name: name.clone(),
                        class_name: name.clone(),
                        source: "protobuf".to_string(),
                        fields: extract_fields(patterns, &body),
                    });
                }
                ClassKind::Service => {
                    self.extract_rpcs(patterns, &masked, content, block, &name, &mut class, &mut result);
                }
                _ => {}
            }

            result.classes.push(class);
        }

        Ok(result)
    }

    fn language(&self) -> Language {
        Language::Protobuf
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Lightweight
    }
}

impl ProtobufParser {
    fn extract_rpcs(
        &self,
        patterns: &Patterns,
        masked: &str,
        content: &str,
        block: &Block,
        service: &str,
        class: &mut ParsedClass,
        result: &mut FileStructure,
    ) {
        let body_start = block.open + 1;
        let body = &masked[body_start..block.close.max(body_start)];
        for cap in patterns.rpc.captures_iter(body) {
            let (Some(whole), Some(name), Some(request), Some(response)) =
                (cap.get(0), cap.get(1), cap.get(2), cap.get(3))
            else {
                continue;
            };
            let start = body_start + whole.start();
            let mut end = body_start + whole.end();
            // rpc Foo(A) returns (B) { option ...; }
            let rest = &masked[end..];
            if rest.trim_start().starts_with('{') {
                let open = end + (rest.len() - rest.trim_start().len());
                end = matching_brace(masked, open).unwrap_or(end);
            }
            let line = line_of(content, start);

            class.methods.push(ParsedMethod {
                name: name.as_str().to_string(),
                start_line: line,
                end_line: line_of(content, end),
            });

            let route = match &result.package {
                Some(package) => format!("/{}.{}/{}", package, service, name.as_str()),
                None => format!("/{}/{}", service, name.as_str()),
            };
            result.endpoints.push(ParsedEndpoint {
                route,
                method: "RPC".to_string(),
                handler: Some(name.as_str().to_string()),
                framework: "grpc".to_string(),
                line,
                owner_class: Some(service.to_string()),
                request_type: Some(request.as_str().to_string()),
                response_type: Some(response.as_str().to_string()),
            });
        }
    }
}

/// Dotted path of a block through the blocks enclosing it.
fn nested_name(block: &Block, blocks: &[Block]) -> String {
    let mut parts: Vec<&str> = blocks
        .iter()
        .filter(|outer| outer.open < block.start && block.close <= outer.close)
        .map(|outer| outer.name.as_str())
        .collect();
    parts.push(&block.name);
    parts.join(".")
}

/// Body of a block with nested message and enum blocks blanked out.
fn own_body(masked: &str, block: &Block, blocks: &[Block]) -> String {
    let body_start = block.open + 1;
    let body_end = block.close.max(body_start);
    let mut bytes = masked.as_bytes()[body_start..body_end].to_vec();
    for nested in blocks
        .iter()
        .filter(|b| b.start > block.open && b.close <= block.close && b.start != block.start)
    {
        let from = nested.start - body_start;
        let to = (nested.close + 1).min(body_end) - body_start;
        for byte in &mut bytes[from..to] {
            if *byte != b'\n' {
                *byte = b' ';
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn extract_fields(patterns: &Patterns, body: &str) -> Vec<ModelField> {
    let mut fields: Vec<(usize, ModelField)> = Vec::new();

    for cap in patterns.field.captures_iter(body) {
        let (Some(whole), Some(type_name), Some(name), Some(number)) =
            (cap.get(0), cap.get(2), cap.get(3), cap.get(4))
        else {
            continue;
        };
        if NON_FIELD_WORDS.contains(&type_name.as_str()) {
            continue;
        }
        fields.push((
            whole.start(),
            ModelField {
                name: name.as_str().to_string(),
                type_name: type_name.as_str().to_string(),
                // proto3 fields without a label are optional
                modifier: Some(cap.get(1).map_or("optional", |m| m.as_str()).to_string()),
                number: number.as_str().parse().ok(),
            },
        ));
    }

    for cap in patterns.map_field.captures_iter(body) {
        let (Some(whole), Some(key), Some(value), Some(name), Some(number)) =
            (cap.get(0), cap.get(1), cap.get(2), cap.get(3), cap.get(4))
        else {
            continue;
        };
        fields.push((
            whole.start(),
            ModelField {
                name: name.as_str().to_string(),
                type_name: format!("map<{}, {}>", key.as_str(), value.as_str()),
                modifier: Some("map".to_string()),
                number: number.as_str().parse().ok(),
            },
        ));
    }

    fields.sort_by_key(|(pos, _)| *pos);
    fields.into_iter().map(|(_, f)| f).collect()
}

/// Replace comments with spaces, keeping byte offsets and newlines intact.
fn mask_comments(content: &str) -> String {
    let bytes = content.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;
    let mut in_string = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' | b'\n' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        match (b, bytes.get(i + 1)) {
            (b'"', _) => {
                in_string = true;
                i += 1;
            }
            (b'/', Some(b'/')) => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            (b'/', Some(b'*')) => {
                let end = content[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2);
                for byte in &mut out[i..end] {
                    if *byte != b'\n' {
                        *byte = b' ';
                    }
                }
                i = end;
            }
            _ => i += 1,
        }
    }

    // Comments are replaced whole, so the bytes stay valid UTF-8
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Offset of the `}` closing the `{` at `open`.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in text.bytes().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn check_braces(masked: &str, content: &str, result: &mut FileStructure) {
    let mut open: Vec<usize> = Vec::new();
    for (i, b) in masked.bytes().enumerate() {
        match b {
            b'{' => open.push(i),
            b'}' => {
                if open.pop().is_none() {
                    result.add_error(Some(line_of(content, i)), "unexpected `}`");
                }
            }
            _ => {}
        }
    }
    if let Some(first) = open.first() {
        result.add_error(
            Some(line_of(content, *first)),
            format!("{} unclosed `{{`", open.len()),
        );
    }
}

fn line_of(content: &str, offset: usize) -> u32 {
    content.as_bytes()[..offset.min(content.len())]
        .iter()
        .filter(|b| **b == b'\n')
        .count() as u32
        + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOP_PROTO: &str = r#"syntax = "proto3";

package shop.v1;

import "google/protobuf/timestamp.proto";
import "common/money.proto";

// An order. message Fake { }
message Order {
  string id = 1;
  repeated Item items = 2;
  map<string, string> labels = 3;
  option deprecated = true;

  message Item {
    string sku = 1;
    int32 quantity = 2;
  }
}

enum Status {
  STATUS_UNSPECIFIED = 0;
}

service OrderService {
  rpc GetOrder(GetOrderRequest) returns (Order);
  rpc Watch(stream WatchRequest) returns (stream Order) {
    option idempotency_level = NO_SIDE_EFFECTS;
  }
}
"#;

    #[test]
    fn test_messages_services_and_endpoints() {
        let result = ProtobufParser::new().parse_file("proto/shop.proto", SHOP_PROTO).unwrap();

        assert!(result.is_schema);
        assert!(result.parse_errors.is_empty());
        assert_eq!(result.package.as_deref(), Some("shop.v1"));
        let imports: Vec<&str> = result.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(imports, vec!["google/protobuf/timestamp.proto", "common/money.proto"]);

        let names: Vec<(&str, ClassKind)> = result.classes.iter().map(|c| (c.name.as_str(), c.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("Order", ClassKind::Message),
                ("Order.Item", ClassKind::Message),
                ("Status", ClassKind::Enum),
                ("OrderService", ClassKind::Service),
            ]
        );

        let order = &result.classes[0];
        assert!(order.is_data_model);
        assert_eq!((order.start_line, order.end_line), (9, 19));

        let order_model = &result.data_models[0];
        let fields: Vec<(&str, &str, Option<&str>)> = order_model
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.type_name.as_str(), f.modifier.as_deref()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("id", "string", Some("optional")),
                ("items", "Item", Some("repeated")),
                ("labels", "map<string, string>", Some("map")),
            ]
        );

        let service = &result.classes[3];
        assert!(service.is_api);
        assert_eq!(service.methods.len(), 2);
        assert_eq!(service.methods[1].start_line, 27);
        assert_eq!(service.methods[1].end_line, 29);

        assert_eq!(result.endpoints.len(), 2);
        assert_eq!(result.endpoints[0].route, "/shop.v1.OrderService/GetOrder");
        assert_eq!(result.endpoints[0].method, "RPC");
        assert_eq!(result.endpoints[0].framework, "grpc");
        assert_eq!(result.endpoints[1].request_type.as_deref(), Some("WatchRequest"));
    }

    #[test]
    fn test_nested_messages_keep_their_parent_path() {
        let code = r#"package shop.v1;

message Order {
  message Meta { string source = 1; }
}

message Refund {
  message Meta { int64 issued_at = 1; }
  Meta meta = 1;
}
"#;
        let result = ProtobufParser::new().parse_file("shop.proto", code).unwrap();
        let names: Vec<&str> = result.classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Order", "Order.Meta", "Refund", "Refund.Meta"]);

        let refund_meta = result
            .data_models
            .iter()
            .find(|m| m.class_name == "Refund.Meta")
            .unwrap();
        assert_eq!(refund_meta.fields.len(), 1);
        assert_eq!(refund_meta.fields[0].name, "issued_at");
        let refund = result.data_models.iter().find(|m| m.class_name == "Refund").unwrap();
        assert_eq!(refund.fields.len(), 1);
        assert_eq!(refund.fields[0].type_name, "Meta");
    }

    #[test]
    fn test_unbalanced_braces_are_reported() {
        let code = "message Broken {\n  string id = 1;\n";
        let result = ProtobufParser::new().parse_file("broken.proto", code).unwrap();
        assert_eq!(result.parse_errors.len(), 1);
        assert_eq!(result.parse_errors[0].line, Some(1));
        assert_eq!(result.classes.len(), 1);
        assert_eq!(result.data_models[0].fields.len(), 1);
    }
}
