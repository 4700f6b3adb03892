//! HTTP endpoint detection for web framework conventions.
//!
//! Runs after structural parsing so handlers and owning classes can be taken
//! from the extracted declarations.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::language::Language;
use super::result::{FileStructure, ParsedEndpoint};

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::compile);

struct Patterns {
    flask_route: Regex,
    python_verb: Regex,
    express: Regex,
    spring_verb: Regex,
    spring_request: Regex,
    aspnet_verb: Regex,
    aspnet_route: Regex,
    go_handle: Regex,
    go_router: Regex,
    java_type_decl: Regex,
    csharp_type_decl: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            flask_route: Regex::new(
                r#"@(\w+)\.route\(\s*['"]([^'"]+)['"](?:[^)]*?methods\s*=\s*[\[(]([^\])]+)[\])])?"#,
            )?,
            python_verb: Regex::new(r#"@(\w+)\.(get|post|put|delete|patch|head|options)\(\s*['"]([^'"]*)['"]"#)?,
            express: Regex::new(
                r#"\b(\w+)\.(get|post|put|delete|patch|all)\(\s*['"`]([^'"`]+)['"`]\s*(?:,\s*([A-Za-z_$][\w$.]*)\s*[,)])?"#,
            )?,
            spring_verb: Regex::new(
                r#"@(Get|Post|Put|Delete|Patch)Mapping\b(?:\s*\(\s*(?:(?:value|path)\s*=\s*)?\{?\s*"([^"]*)")?"#,
            )?,
            spring_request: Regex::new(
                r#"@RequestMapping\b(?:\s*\(([^)]*)\))?"#,
            )?,
            aspnet_verb: Regex::new(r#"\[\s*Http(Get|Post|Put|Delete|Patch)\s*(?:\(\s*"([^"]*)"[^)]*\))?\s*\]"#)?,
            aspnet_route: Regex::new(r#"\[\s*Route\s*\(\s*"([^"]*)"\s*\)\s*\]"#)?,
            go_handle: Regex::new(r#"\.(?:HandleFunc|Handle)\(\s*"([^"]+)"\s*,\s*([\w.]+)?"#)?,
            go_router: Regex::new(
                r#"\.(GET|POST|PUT|DELETE|PATCH|Get|Post|Put|Delete|Patch)\(\s*"([^"]+)"\s*(?:,\s*([\w.]+))?"#,
            )?,
            java_type_decl: Regex::new(
                r"^\s*(?:(?:public|protected|private|abstract|final|static)\s+)*(?:class|interface)\b",
            )?,
            csharp_type_decl: Regex::new(
                r"^\s*(?:(?:public|internal|protected|private|abstract|sealed|static|partial)\s+)*(?:class|interface|record)\b",
            )?,
        })
    }
}

/// Add endpoints declared through framework conventions to `structure`.
pub fn detect_endpoints(structure: &mut FileStructure, content: &str) {
    let Ok(patterns) = PATTERNS.as_ref() else {
        return;
    };

    let found = match structure.language {
        Language::Python => python_endpoints(patterns, content),
        Language::JavaScript | Language::TypeScript => express_endpoints(patterns, content),
        Language::Java => spring_endpoints(patterns, structure, content),
        Language::CSharp => aspnet_endpoints(patterns, structure, content),
        Language::Go => go_endpoints(patterns, content),
        _ => return,
    };

    for mut endpoint in found {
        if endpoint.handler.is_none() {
            endpoint.handler = handler_at(structure, endpoint.line);
        }
        if endpoint.owner_class.is_none() {
            endpoint.owner_class = structure.enclosing_class(endpoint.line).map(|c| c.name.clone());
        }
        structure.endpoints.push(endpoint);
    }
}

fn python_endpoints(p: &Patterns, content: &str) -> Vec<ParsedEndpoint> {
    let mut endpoints = Vec::new();

    for cap in p.flask_route.captures_iter(content) {
        let line = match_line(content, &cap);
        let Some(route) = cap.get(2) else { continue };
        let methods: Vec<String> = match cap.get(3) {
            Some(list) => list
                .as_str()
                .split(',')
                .map(|m| m.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
                .filter(|m| !m.is_empty())
                .collect(),
            None => vec!["GET".to_string()],
        };
        for method in methods {
            endpoints.push(ParsedEndpoint::http(route.as_str(), &method, "flask", line));
        }
    }

    for cap in p.python_verb.captures_iter(content) {
        let (Some(method), Some(route)) = (cap.get(2), cap.get(3)) else {
            continue;
        };
        endpoints.push(ParsedEndpoint::http(
            route.as_str(),
            method.as_str(),
            "fastapi",
            match_line(content, &cap),
        ));
    }

    endpoints
}

fn express_endpoints(p: &Patterns, content: &str) -> Vec<ParsedEndpoint> {
    p.express
        .captures_iter(content)
        .filter_map(|cap| {
            let route = cap.get(3)?.as_str();
            // Only path-like first arguments; `map.get('key')` is not a route
            if !route.starts_with('/') && route != "*" {
                return None;
            }
            let mut endpoint =
                ParsedEndpoint::http(route, cap.get(2)?.as_str(), "express", match_line(content, &cap));
            endpoint.handler = cap.get(4).map(|h| h.as_str().to_string());
            Some(endpoint)
        })
        .collect()
}

fn spring_endpoints(p: &Patterns, structure: &FileStructure, content: &str) -> Vec<ParsedEndpoint> {
    let mut endpoints = Vec::new();
    let mut class_prefixes: Vec<(u32, String)> = Vec::new();

    for cap in p.spring_request.captures_iter(content) {
        let line = match_line(content, &cap);
        let args = cap.get(1).map(|a| a.as_str()).unwrap_or("");
        let route = first_string_literal(args).unwrap_or_default();
        if annotates_type(&p.java_type_decl, content, &cap) {
            class_prefixes.push((line, route));
            continue;
        }
        let method = args
            .find("RequestMethod.")
            .map(|i| {
                args[i + "RequestMethod.".len()..]
                    .chars()
                    .take_while(|c| c.is_ascii_alphabetic())
                    .collect::<String>()
            })
            .unwrap_or_else(|| "ANY".to_string());
        endpoints.push(ParsedEndpoint::http(route, &method, "spring", line));
    }

    for cap in p.spring_verb.captures_iter(content) {
        let Some(method) = cap.get(1) else { continue };
        let route = cap.get(2).map(|r| r.as_str()).unwrap_or("");
        endpoints.push(ParsedEndpoint::http(route, method.as_str(), "spring", match_line(content, &cap)));
    }

    apply_prefixes(structure, &class_prefixes, &mut endpoints, |_, route| route.to_string());
    endpoints
}

fn aspnet_endpoints(p: &Patterns, structure: &FileStructure, content: &str) -> Vec<ParsedEndpoint> {
    let mut endpoints = Vec::new();
    let mut class_prefixes: Vec<(u32, String)> = Vec::new();

    for cap in p.aspnet_route.captures_iter(content) {
        let Some(route) = cap.get(1) else { continue };
        if annotates_type(&p.csharp_type_decl, content, &cap) {
            class_prefixes.push((match_line(content, &cap), route.as_str().to_string()));
        }
    }

    for cap in p.aspnet_verb.captures_iter(content) {
        let Some(method) = cap.get(1) else { continue };
        let route = cap.get(2).map(|r| r.as_str()).unwrap_or("");
        endpoints.push(ParsedEndpoint::http(route, method.as_str(), "aspnet", match_line(content, &cap)));
    }

    // [Route("api/[controller]")] on OrdersController expands to api/orders
    apply_prefixes(structure, &class_prefixes, &mut endpoints, |class, route| {
        let controller = class.trim_end_matches("Controller").to_lowercase();
        route.replace("[controller]", &controller)
    });
    endpoints
}

fn go_endpoints(p: &Patterns, content: &str) -> Vec<ParsedEndpoint> {
    let mut endpoints = Vec::new();

    for cap in p.go_handle.captures_iter(content) {
        let Some(route) = cap.get(1) else { continue };
        let mut endpoint = ParsedEndpoint::http(route.as_str(), "ANY", "net/http", match_line(content, &cap));
        endpoint.handler = cap.get(2).map(|h| h.as_str().to_string());
        endpoints.push(endpoint);
    }

    for cap in p.go_router.captures_iter(content) {
        let (Some(method), Some(route)) = (cap.get(1), cap.get(2)) else {
            continue;
        };
        // http.Get("https://...") is a client call
        if !route.as_str().starts_with('/') {
            continue;
        }
        let mut endpoint =
            ParsedEndpoint::http(route.as_str(), method.as_str(), "router", match_line(content, &cap));
        endpoint.handler = cap.get(3).map(|h| h.as_str().to_string());
        endpoints.push(endpoint);
    }

    endpoints
}

/// Prefix method-level routes with the route declared on their class.
fn apply_prefixes(
    structure: &FileStructure,
    class_prefixes: &[(u32, String)],
    endpoints: &mut [ParsedEndpoint],
    expand: impl Fn(&str, &str) -> String,
) {
    for endpoint in endpoints.iter_mut() {
        let Some(class) = structure.enclosing_class(endpoint.line) else {
            continue;
        };
        let prefix = class_prefixes
            .iter()
            .find(|(line, _)| class.start_line <= *line && *line <= class.end_line)
            .map(|(_, route)| expand(&class.name, route));
        if let Some(prefix) = prefix {
            endpoint.route = join_routes(&prefix, &endpoint.route);
        }
    }
}

fn join_routes(prefix: &str, route: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let route = route.trim_matches('/');
    match (prefix.is_empty(), route.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", route),
        (false, true) => format!("/{}", prefix),
        (false, false) => format!("/{}/{}", prefix, route),
    }
}

/// Whether the annotation at `cap` decorates a type declaration rather than a
/// member: the first following line that is not another annotation declares
/// a class or interface.
fn annotates_type(type_decl: &Regex, content: &str, cap: &Captures) -> bool {
    let Some(whole) = cap.get(0) else { return false };
    let rest = &content[whole.end()..];
    let mut lines = rest.lines();
    // Remainder of the annotation's own line, e.g. `public class X {` after it
    if let Some(first) = lines.next() {
        let first = first.trim();
        if !first.is_empty() && !first.starts_with('@') && !first.starts_with('[') {
            return type_decl.is_match(first);
        }
    }
    lines
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('@') && !l.starts_with('[') && !l.starts_with("//"))
        .is_some_and(|l| type_decl.is_match(l))
}

fn first_string_literal(text: &str) -> Option<String> {
    let start = text.find('"')? + 1;
    let len = text[start..].find('"')?;
    Some(text[start..start + len].to_string())
}

/// Innermost function or method whose span contains `line`, else the first
/// one starting after it.
fn handler_at(structure: &FileStructure, line: u32) -> Option<String> {
    let spans = structure
        .functions
        .iter()
        .map(|f| (f.name.as_str(), f.start_line, f.end_line))
        .chain(
            structure
                .classes
                .iter()
                .flat_map(|c| c.methods.iter().map(|m| (m.name.as_str(), m.start_line, m.end_line))),
        );

    let mut containing: Option<(&str, u32)> = None;
    let mut next: Option<(&str, u32)> = None;
    for (name, start, end) in spans {
        if start <= line && line <= end {
            if containing.map_or(true, |(_, len)| end - start < len) {
                containing = Some((name, end - start));
            }
        } else if start > line && next.map_or(true, |(_, s)| start < s) {
            next = Some((name, start));
        }
    }
    containing.or(next).map(|(name, _)| name.to_string())
}

fn match_line(content: &str, cap: &Captures) -> u32 {
    let offset = cap.get(0).map_or(0, |m| m.start());
    content[..offset].matches('\n').count() as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::models::ClassKind;
    use crate::knowledge::parser::result::{ParsedClass, ParsedFunction, ParsedMethod};

    fn function(name: &str, start: u32, end: u32) -> ParsedFunction {
        ParsedFunction {
            name: name.to_string(),
            signature: String::new(),
            start_line: start,
            end_line: end,
            receiver: None,
            doc_comment: None,
        }
    }

    #[test]
    fn test_flask_and_fastapi() {
        let code = "@app.route('/orders', methods=['GET', 'POST'])\ndef orders():\n    pass\n\n@router.get(\"/health\")\nasync def health():\n    return 1\n";
        let mut s = FileStructure::new("app.py", Language::Python);
        s.functions.push(function("orders", 1, 3));
        s.functions.push(function("health", 5, 7));
        detect_endpoints(&mut s, code);

        let found: Vec<(&str, &str, &str, Option<&str>)> = s
            .endpoints
            .iter()
            .map(|e| (e.route.as_str(), e.method.as_str(), e.framework.as_str(), e.handler.as_deref()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("/orders", "GET", "flask", Some("orders")),
                ("/orders", "POST", "flask", Some("orders")),
                ("/health", "GET", "fastapi", Some("health")),
            ]
        );
    }

    #[test]
    fn test_express_routes() {
        let code = "app.get('/items', listItems);\nrouter.post(\"/items\", (req, res) => {});\ncache.get('key');\n";
        let mut s = FileStructure::new("server.js", Language::JavaScript);
        detect_endpoints(&mut s, code);
        assert_eq!(s.endpoints.len(), 2);
        assert_eq!(s.endpoints[0].handler.as_deref(), Some("listItems"));
        assert_eq!(s.endpoints[1].method, "POST");
    }

    #[test]
    fn test_spring_class_prefix() {
        let code = r#"@RestController
@RequestMapping("/api/orders")
public class OrderController {
    @GetMapping("/{id}")
    public Order get(long id) { return null; }

    @PostMapping
    public Order create() { return null; }
}
"#;
        let mut s = FileStructure::new("OrderController.java", Language::Java);
        let mut class = ParsedClass::new("OrderController", ClassKind::Class, 1, 9);
        class.methods.push(ParsedMethod { name: "get".into(), start_line: 4, end_line: 5 });
        class.methods.push(ParsedMethod { name: "create".into(), start_line: 7, end_line: 8 });
        s.classes.push(class);
        detect_endpoints(&mut s, code);

        let found: Vec<(&str, &str, Option<&str>)> = s
            .endpoints
            .iter()
            .map(|e| (e.route.as_str(), e.method.as_str(), e.handler.as_deref()))
            .collect();
        assert_eq!(
            found,
            vec![("/api/orders/{id}", "GET", Some("get")), ("/api/orders", "POST", Some("create"))]
        );
        assert!(s.endpoints.iter().all(|e| e.owner_class.as_deref() == Some("OrderController")));
    }

    #[test]
    fn test_aspnet_controller_route() {
        let code = r#"[ApiController]
[Route("api/[controller]")]
public class OrdersController : ControllerBase
{
    [HttpGet("{id}")]
    public Order Get(int id) { return null; }
}
"#;
        let mut s = FileStructure::new("OrdersController.cs", Language::CSharp);
        let mut class = ParsedClass::new("OrdersController", ClassKind::Class, 1, 7);
        class.methods.push(ParsedMethod { name: "Get".into(), start_line: 5, end_line: 6 });
        s.classes.push(class);
        detect_endpoints(&mut s, code);

        assert_eq!(s.endpoints.len(), 1);
        assert_eq!(s.endpoints[0].route, "/api/orders/{id}");
        assert_eq!(s.endpoints[0].handler.as_deref(), Some("Get"));
    }

    #[test]
    fn test_go_handlers() {
        let code = "func main() {\n\thttp.HandleFunc(\"/health\", healthHandler)\n\tr.GET(\"/orders\", listOrders)\n}\n";
        let mut s = FileStructure::new("main.go", Language::Go);
        s.functions.push(function("main", 1, 4));
        detect_endpoints(&mut s, code);
        assert_eq!(s.endpoints.len(), 2);
        assert_eq!(s.endpoints[0].handler.as_deref(), Some("healthHandler"));
        assert_eq!(s.endpoints[1].method, "GET");
    }

    #[test]
    fn test_join_routes() {
        assert_eq!(join_routes("/api/", "/x"), "/api/x");
        assert_eq!(join_routes("", ""), "/");
        assert_eq!(join_routes("api", ""), "/api");
    }
}
