//! Service detection for repositories that hold several deployable services.
//!
//! Services come from two places. Code directories directly under `src/`
//! (or under the repository root when there is no `src/`) that contain
//! source files become services named after the directory, with the
//! majority language of their code. Deployment manifests add metadata:
//! Kubernetes `Deployment`s under `kubernetes-manifests/`, or, when that
//! directory is missing, the `services` of a Compose file. A declared
//! service joins the directory with its name or its build context; one with
//! neither is kept as a manifest-only service.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, warn};

use super::identity::{normalize_path, service_key};
use super::models::ServiceNode;
use super::parser::Language;

/// Directory holding Kubernetes manifests, relative to the repository root.
pub const KUBERNETES_DIR: &str = "kubernetes-manifests";

/// Compose file names, in lookup order.
pub const COMPOSE_FILES: [&str; 4] = ["docker-compose.yaml", "docker-compose.yml", "compose.yaml", "compose.yml"];

/// Services of one repository and the files belonging to each.
#[derive(Debug, Clone, Default)]
pub struct DetectedServices {
    pub services: Vec<ServiceNode>,
    /// Repository-relative file paths, keyed by service name.
    pub members: BTreeMap<String, Vec<String>>,
}

impl DetectedServices {
    pub fn get(&self, name: &str) -> Option<&ServiceNode> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// A service as a manifest declares it.
#[derive(Debug, Clone, Default, PartialEq)]
struct Declared {
    manifest: String,
    images: Vec<String>,
    ports: Vec<String>,
    labels: BTreeMap<String, String>,
    depends_on: Vec<String>,
    /// Compose build context, normalized.
    build: Option<String>,
}

#[derive(Deserialize)]
struct KubeObject {
    kind: Option<String>,
    metadata: Option<KubeMetadata>,
    spec: Option<KubeDeploymentSpec>,
}

#[derive(Deserialize)]
struct KubeMetadata {
    name: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct KubeDeploymentSpec {
    template: Option<KubePodTemplate>,
}

#[derive(Deserialize)]
struct KubePodTemplate {
    spec: Option<KubePodSpec>,
}

#[derive(Deserialize)]
struct KubePodSpec {
    #[serde(default)]
    containers: Vec<KubeContainer>,
}

#[derive(Deserialize)]
struct KubeContainer {
    image: Option<String>,
    #[serde(default)]
    ports: Vec<KubePort>,
}

#[derive(Deserialize)]
struct KubePort {
    #[serde(rename = "containerPort")]
    container_port: Option<u32>,
}

#[derive(Deserialize)]
struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, ComposeService>,
}

#[derive(Deserialize)]
struct ComposeService {
    image: Option<String>,
    build: Option<Value>,
    #[serde(default)]
    ports: Vec<Value>,
    depends_on: Option<Value>,
    labels: Option<Value>,
}

/// Detect the services of the working tree at `root`.
///
/// `paths` are the repository-relative paths of the ingested files; only
/// those are counted and attached to services.
pub fn detect_services(repo: &str, root: &Path, paths: &[String]) -> DetectedServices {
    let base = if root.join("src").is_dir() { "src/" } else { "" };
    let directories = service_directories(base, paths);

    let declared = match kubernetes_manifests(root) {
        Some(declared) => declared,
        None => compose_services(root).unwrap_or_default(),
    };

    let mut services: BTreeMap<String, ServiceNode> = BTreeMap::new();
    let mut members: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut claimed: Vec<&str> = Vec::new();

    for (name, declaration) in &declared {
        let directory = directories
            .get_key_value(name_directory(base, name).as_str())
            .or_else(|| declaration.build.as_deref().and_then(|b| directories.get_key_value(b)));
        let mut node = ServiceNode {
            key: service_key(repo, name),
            repo: repo.to_string(),
            name: name.clone(),
            language: None,
            directory: None,
            manifest: Some(declaration.manifest.clone()),
            images: declaration.images.clone(),
            ports: declaration.ports.clone(),
            labels: declaration.labels.clone(),
            depends_on: declaration.depends_on.clone(),
            file_count: 0,
        };
        if let Some((dir, code)) = directory {
            node.language = code.language().map(|l| l.name().to_string());
            node.directory = Some(dir.clone());
            node.file_count = code.files.len();
            members.insert(name.clone(), code.files.clone());
            claimed.push(dir.as_str());
        }
        services.insert(name.clone(), node);
    }

    for (dir, code) in &directories {
        if claimed.contains(&dir.as_str()) {
            continue;
        }
        let name = dir.rsplit('/').next().unwrap_or(dir).to_string();
        if services.contains_key(&name) {
            debug!(directory = %dir, service = %name, "Directory name taken by a declared service");
            continue;
        }
        services.insert(
            name.clone(),
            ServiceNode {
                key: service_key(repo, &name),
                repo: repo.to_string(),
                name: name.clone(),
                language: code.language().map(|l| l.name().to_string()),
                directory: Some(dir.clone()),
                manifest: None,
                images: Vec::new(),
                ports: Vec::new(),
                labels: BTreeMap::new(),
                depends_on: Vec::new(),
                file_count: code.files.len(),
            },
        );
        members.insert(name, code.files.clone());
    }

    DetectedServices {
        services: services.into_values().collect(),
        members,
    }
}

/// Files and code languages found under one candidate directory.
#[derive(Debug, Default)]
struct ServiceCode {
    files: Vec<String>,
    languages: HashMap<Language, usize>,
}

impl ServiceCode {
    /// Majority language; ties go to the alphabetically first name.
    fn language(&self) -> Option<Language> {
        self.languages
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.name().cmp(a.0.name())))
            .map(|(language, _)| *language)
    }
}

fn name_directory(base: &str, name: &str) -> String {
    format!("{}{}", base, name)
}

/// Directories one level below `base` holding at least one source file.
fn service_directories(base: &str, paths: &[String]) -> BTreeMap<String, ServiceCode> {
    let mut directories: BTreeMap<String, ServiceCode> = BTreeMap::new();
    for path in paths {
        let Some(rest) = path.strip_prefix(base) else {
            continue;
        };
        let Some((dir, _)) = rest.split_once('/') else {
            continue;
        };
        let code = directories.entry(name_directory(base, dir)).or_default();
        code.files.push(path.clone());
        let language = Language::from_path(path);
        if language.has_grammar() {
            *code.languages.entry(language).or_default() += 1;
        }
    }
    directories.retain(|_, code| !code.languages.is_empty());
    directories
}

/// Deployments declared under the Kubernetes manifest directory, or `None`
/// when there is no such directory.
fn kubernetes_manifests(root: &Path) -> Option<BTreeMap<String, Declared>> {
    let dir = root.join(KUBERNETES_DIR);
    if !dir.is_dir() {
        return None;
    }
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list Kubernetes manifests");
            return Some(BTreeMap::new());
        }
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".yaml") || n.ends_with(".yml"))
        .collect();
    names.sort();

    let mut declared = BTreeMap::new();
    for name in names {
        let manifest = normalize_path(&format!("{}/{}", KUBERNETES_DIR, name));
        let content = match fs::read_to_string(dir.join(&name)) {
            Ok(content) => content,
            Err(e) => {
                warn!(manifest = %manifest, error = %e, "Skipping unreadable manifest");
                continue;
            }
        };
        for (service, declaration) in parse_kubernetes(&manifest, &content) {
            declared.insert(service, declaration);
        }
    }
    Some(declared)
}

/// `Deployment` objects of a multi-document manifest.
fn parse_kubernetes(manifest: &str, content: &str) -> Vec<(String, Declared)> {
    let mut found = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = match Value::deserialize(document) {
            Ok(value) => value,
            Err(e) => {
                warn!(manifest, error = %e, "Invalid YAML in manifest");
                break;
            }
        };
        let object: KubeObject = match serde_yaml::from_value(value) {
            Ok(object) => object,
            Err(e) => {
                debug!(manifest, error = %e, "Skipping manifest document");
                continue;
            }
        };
        if object.kind.as_deref() != Some("Deployment") {
            continue;
        }
        let Some(metadata) = object.metadata else { continue };
        let Some(name) = metadata.name else { continue };

        let containers = object
            .spec
            .and_then(|s| s.template)
            .and_then(|t| t.spec)
            .map(|s| s.containers)
            .unwrap_or_default();
        let mut declaration = Declared {
            manifest: manifest.to_string(),
            labels: metadata
                .labels
                .iter()
                .filter_map(|(k, v)| scalar(v).map(|v| (k.clone(), v)))
                .collect(),
            ..Declared::default()
        };
        for container in containers {
            declaration.images.extend(container.image);
            declaration
                .ports
                .extend(container.ports.iter().filter_map(|p| p.container_port).map(|p| p.to_string()));
        }
        found.push((name, declaration));
    }
    found
}

/// Services of the first Compose file found at the root.
fn compose_services(root: &Path) -> Option<BTreeMap<String, Declared>> {
    let name = COMPOSE_FILES.iter().find(|n| root.join(n).is_file())?;
    let content = match fs::read_to_string(root.join(name)) {
        Ok(content) => content,
        Err(e) => {
            warn!(manifest = *name, error = %e, "Skipping unreadable Compose file");
            return None;
        }
    };
    Some(parse_compose(name, &content))
}

fn parse_compose(manifest: &str, content: &str) -> BTreeMap<String, Declared> {
    let compose: ComposeFile = match serde_yaml::from_str(content) {
        Ok(compose) => compose,
        Err(e) => {
            warn!(manifest, error = %e, "Invalid Compose file");
            return BTreeMap::new();
        }
    };

    compose
        .services
        .into_iter()
        .map(|(name, service)| {
            let build = service.build.as_ref().and_then(|b| match b {
                Value::String(context) => Some(context.clone()),
                _ => b.get("context").and_then(Value::as_str).map(str::to_string),
            });
            let declaration = Declared {
                manifest: manifest.to_string(),
                images: service.image.into_iter().collect(),
                ports: service.ports.iter().filter_map(compose_port).collect(),
                labels: service.labels.as_ref().map(string_pairs).unwrap_or_default(),
                depends_on: service.depends_on.as_ref().map(names).unwrap_or_default(),
                build: build.map(|b| normalize_path(&b)).filter(|b| !b.is_empty()),
            };
            (name, declaration)
        })
        .collect()
}

/// A Compose port written as `"8080:80"`, `80`, or a long-form mapping.
fn compose_port(port: &Value) -> Option<String> {
    match port {
        Value::Mapping(map) => {
            let target = map.get("target").and_then(scalar)?;
            Some(match map.get("published").and_then(scalar) {
                Some(published) => format!("{}:{}", published, target),
                None => target,
            })
        }
        other => scalar(other),
    }
}

/// Service names from a Compose `depends_on` list or mapping.
fn names(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar).collect(),
        Value::Mapping(map) => map.keys().filter_map(scalar).collect(),
        _ => Vec::new(),
    }
}

/// Labels written as a mapping or as `key=value` items.
fn string_pairs(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(k, v)| Some((scalar(k)?, scalar(v).unwrap_or_default())))
            .collect(),
        Value::Sequence(items) => items
            .iter()
            .filter_map(scalar)
            .map(|item| match item.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (item, String::new()),
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REPO: &str = "https://example.com/acme/boutique@main";

    const MANIFESTS: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: cartservice
  labels:
    app: cartservice
    tier: backend
spec:
  template:
    spec:
      containers:
        - name: server
          image: cartservice:v1
          ports:
            - containerPort: 7070
---
apiVersion: v1
kind: Service
metadata:
  name: cartservice
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: redis-cart
spec:
  template:
    spec:
      containers:
        - image: redis:alpine
"#;

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_kubernetes_deployments_only() {
        let declared = parse_kubernetes("kubernetes-manifests/cart.yaml", MANIFESTS);
        let names: Vec<&str> = declared.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["cartservice", "redis-cart"]);

        let cart = &declared[0].1;
        assert_eq!(cart.images, vec!["cartservice:v1"]);
        assert_eq!(cart.ports, vec!["7070"]);
        assert_eq!(cart.labels["tier"], "backend");
        assert_eq!(cart.manifest, "kubernetes-manifests/cart.yaml");
    }

    #[test]
    fn test_compose_forms() {
        let content = r#"services:
  web:
    build: ./src/frontend
    ports:
      - "8080:80"
      - target: 9090
        published: 19090
    depends_on:
      - api
    labels:
      - team=storefront
  api:
    build:
      context: src/api
    depends_on:
      db:
        condition: service_healthy
  db:
    image: postgres:16
    labels:
      role: primary
"#;
        let declared = parse_compose("docker-compose.yaml", content);
        assert_eq!(declared.len(), 3);
        let web = &declared["web"];
        assert_eq!(web.build.as_deref(), Some("src/frontend"));
        assert_eq!(web.ports, vec!["8080:80", "19090:9090"]);
        assert_eq!(web.depends_on, vec!["api"]);
        assert_eq!(web.labels["team"], "storefront");
        assert_eq!(declared["api"].build.as_deref(), Some("src/api"));
        assert_eq!(declared["api"].depends_on, vec!["db"]);
        assert_eq!(declared["db"].images, vec!["postgres:16"]);
        assert_eq!(declared["db"].labels["role"], "primary");
    }

    #[test]
    fn test_invalid_compose_declares_nothing() {
        assert!(parse_compose("compose.yaml", "services: [unclosed").is_empty());
    }

    #[test]
    fn test_directories_need_source_files() {
        let dirs = service_directories(
            "src/",
            &paths(&["src/cart/main.go", "src/cart/README.md", "src/docs/guide.md", "src/top.py", "tools/x.py"]),
        );
        assert_eq!(dirs.keys().collect::<Vec<_>>(), vec!["src/cart"]);
        assert_eq!(dirs["src/cart"].files.len(), 2);
    }

    #[test]
    fn test_majority_language_with_stable_ties() {
        let dirs = service_directories(
            "",
            &paths(&["web/a.ts", "web/b.ts", "web/c.js", "tie/a.py", "tie/b.go"]),
        );
        assert_eq!(dirs["web"].language(), Some(Language::TypeScript));
        assert_eq!(dirs["tie"].language(), Some(Language::Go));
    }

    #[test]
    fn test_manifest_metadata_joins_directories() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "kubernetes-manifests/cart.yaml", MANIFESTS);
        write(dir.path(), "src/cartservice/main.go", "package main\n");
        write(dir.path(), "src/frontend/app.py", "x = 1\n");
        let files = paths(&["src/cartservice/main.go", "src/frontend/app.py"]);

        let detected = detect_services(REPO, dir.path(), &files);
        let names: Vec<&str> = detected.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["cartservice", "frontend", "redis-cart"]);

        let cart = detected.get("cartservice").unwrap();
        assert_eq!(cart.language.as_deref(), Some("go"));
        assert_eq!(cart.directory.as_deref(), Some("src/cartservice"));
        assert_eq!(cart.images, vec!["cartservice:v1"]);
        assert_eq!(cart.key, service_key(REPO, "cartservice"));

        let redis = detected.get("redis-cart").unwrap();
        assert!(redis.language.is_none());
        assert!(redis.directory.is_none());
        assert!(!detected.members.contains_key("redis-cart"));

        let frontend = detected.get("frontend").unwrap();
        assert!(frontend.manifest.is_none());
        assert_eq!(detected.members["frontend"], vec!["src/frontend/app.py"]);
    }

    #[test]
    fn test_compose_build_context_names_the_service() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "docker-compose.yml",
            "services:\n  storefront:\n    build: ./web\n    depends_on: [orders]\n  orders:\n    build: ./orders\n",
        );
        let files = paths(&["web/index.ts", "orders/app.py"]);

        let detected = detect_services(REPO, dir.path(), &files);
        assert_eq!(detected.services.len(), 2);
        let storefront = detected.get("storefront").unwrap();
        assert_eq!(storefront.directory.as_deref(), Some("web"));
        assert_eq!(storefront.language.as_deref(), Some("typescript"));
        assert_eq!(storefront.depends_on, vec!["orders"]);
        assert_eq!(storefront.manifest.as_deref(), Some("docker-compose.yml"));
        assert!(detected.get("web").is_none());
    }
}
