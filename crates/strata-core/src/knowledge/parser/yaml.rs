//! YAML configuration parser.
//!
//! Documents are validated with `serde_yaml`; OpenAPI and Swagger documents
//! also yield their HTTP operations as endpoints.

use serde::Deserialize;
use serde_yaml::Value;

use super::language::Language;
use super::result::{FileStructure, ParsedEndpoint};
use super::traits::{Parser, ParserCapability};

const HTTP_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Parser for `.yaml`/`.yml` files.
#[derive(Debug, Default)]
pub struct YamlParser;

impl YamlParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for YamlParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        let mut result = FileStructure::new(path, Language::Yaml);

        for document in serde_yaml::Deserializer::from_str(content) {
            match Value::deserialize(document) {
                Ok(value) => extract_openapi(&value, content, &mut result),
                Err(e) => {
                    let line = e.location().map(|l| l.line() as u32);
                    result.add_error(line, format!("invalid YAML: {}", e));
                    // The deserializer cannot resume after a syntax error
                    break;
                }
            }
        }

        Ok(result)
    }

    fn language(&self) -> Language {
        Language::Yaml
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Lightweight
    }
}

fn extract_openapi(document: &Value, content: &str, result: &mut FileStructure) {
    let Some(root) = document.as_mapping() else {
        return;
    };
    let is_openapi = root.contains_key("openapi") || root.contains_key("swagger");
    let Some(paths) = root.get("paths").and_then(Value::as_mapping) else {
        return;
    };
    if !is_openapi {
        return;
    }

    let framework = if root.contains_key("swagger") { "swagger" } else { "openapi" };
    for (route, operations) in paths {
        let Some(route) = route.as_str() else { continue };
        let Some(operations) = operations.as_mapping() else { continue };
        let line = key_line(content, route).unwrap_or(1);

        for (method, operation) in operations {
            let Some(method) = method.as_str() else { continue };
            if !HTTP_METHODS.contains(&method.to_ascii_lowercase().as_str()) {
                continue;
            }
            let mut endpoint = ParsedEndpoint::http(route, method, framework, line);
            endpoint.handler = operation
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string);
            result.endpoints.push(endpoint);
        }
    }
}

/// Line of the first mapping key equal to `key`, quoted or not.
fn key_line(content: &str, key: &str) -> Option<u32> {
    let candidates = [
        format!("{}:", key),
        format!("\"{}\":", key),
        format!("'{}':", key),
    ];
    content
        .lines()
        .position(|line| {
            let trimmed = line.trim_start();
            candidates.iter().any(|c| trimmed.starts_with(c.as_str()))
        })
        .map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_paths_become_endpoints() {
        let doc = r#"openapi: 3.0.0
info:
  title: Shop
paths:
  /orders:
    get:
      operationId: listOrders
    post:
      summary: create
  "/orders/{id}":
    delete: {}
    parameters: []
"#;
        let result = YamlParser::new().parse_file("api/openapi.yaml", doc).unwrap();
        assert!(result.is_config);
        assert!(result.parse_errors.is_empty());

        let endpoints: Vec<(&str, &str, u32)> = result
            .endpoints
            .iter()
            .map(|e| (e.route.as_str(), e.method.as_str(), e.line))
            .collect();
        assert_eq!(
            endpoints,
            vec![
                ("/orders", "GET", 5),
                ("/orders", "POST", 5),
                ("/orders/{id}", "DELETE", 10),
            ]
        );
        assert_eq!(result.endpoints[0].handler.as_deref(), Some("listOrders"));
    }

    #[test]
    fn test_plain_config_has_no_endpoints() {
        let doc = "name: ci\non:\n  push: {}\n---\npaths:\n  /x: {}\n";
        let result = YamlParser::new().parse_file(".github/ci.yml", doc).unwrap();
        assert!(result.endpoints.is_empty());
        assert!(result.parse_errors.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_recorded() {
        let doc = "key: [unclosed\nother: 1\n";
        let result = YamlParser::new().parse_file("bad.yaml", doc).unwrap();
        assert_eq!(result.parse_errors.len(), 1);
        assert!(result.parse_errors[0].line.is_some());
    }
}
