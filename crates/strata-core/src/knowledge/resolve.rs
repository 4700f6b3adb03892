//! Best-effort resolution of import and inheritance targets.
//!
//! Resolution never fails loudly: an import or superclass that cannot be
//! matched to a file or class in the same repository stays unresolved.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::identity::normalize_path;
use super::parser::{Language, ParsedImport};

const JS_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Resolves import statements to files of one repository.
#[derive(Debug, Default)]
pub struct ImportResolver {
    paths: BTreeSet<String>,
    /// Directory -> files directly inside it.
    dirs: BTreeMap<String, Vec<String>>,
}

impl ImportResolver {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths: BTreeSet<String> = paths.into_iter().map(|p| normalize_path(p.as_ref())).collect();
        let mut dirs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in &paths {
            dirs.entry(parent_dir(path).to_string()).or_default().push(path.clone());
        }
        Self { paths, dirs }
    }

    /// Path of the file an import refers to, if one can be found.
    pub fn resolve(&self, from: &str, language: Language, import: &ParsedImport) -> Option<String> {
        let module = import.module.trim();
        if module.is_empty() {
            return None;
        }
        if let Some(path) = self.exact(module) {
            return Some(path);
        }

        match language {
            Language::Python => self.resolve_python(from, module, import.symbol.as_deref()),
            Language::JavaScript | Language::TypeScript => self.resolve_js(from, module),
            Language::Java => self.resolve_dotted(module, "java"),
            Language::CSharp => self.resolve_dotted(module, "cs"),
            Language::Go => self.resolve_go(module),
            Language::Protobuf => self.suffix_match(&normalize_path(module)),
            _ => None,
        }
    }

    fn exact(&self, candidate: &str) -> Option<String> {
        let normalized = normalize_path(candidate);
        self.paths.get(&normalized).cloned()
    }

    /// Shortest path equal to `suffix` or ending with `/suffix`.
    fn suffix_match(&self, suffix: &str) -> Option<String> {
        if suffix.is_empty() {
            return None;
        }
        let tail = format!("/{}", suffix);
        self.paths
            .iter()
            .filter(|p| p.as_str() == suffix || p.ends_with(&tail))
            .min_by_key(|p| (p.len(), p.as_str()))
            .cloned()
    }

    fn resolve_python(&self, from: &str, module: &str, symbol: Option<&str>) -> Option<String> {
        let dots = module.chars().take_while(|c| *c == '.').count();
        let rest = &module[dots..];

        if dots > 0 {
            let mut base = parent_dir(from).to_string();
            for _ in 1..dots {
                base = parent_dir(&base).to_string();
            }
            let join = |name: &str| {
                let relative = name.replace('.', "/");
                if base.is_empty() {
                    relative
                } else if relative.is_empty() {
                    base.clone()
                } else {
                    format!("{}/{}", base, relative)
                }
            };

            // `from . import sibling` names a module before the package
            if let Some(symbol) = symbol.filter(|s| *s != "*") {
                let with_symbol = if rest.is_empty() {
                    join(symbol)
                } else {
                    join(&format!("{}.{}", rest, symbol))
                };
                if let Some(found) = self.python_module(&with_symbol, false) {
                    return Some(found);
                }
            }
            return self.python_module(&join(rest), false);
        }

        let module_path = rest.replace('.', "/");
        symbol
            .filter(|s| *s != "*")
            .and_then(|symbol| self.python_module(&format!("{}/{}", module_path, symbol), true))
            .or_else(|| self.python_module(&module_path, true))
    }

    fn python_module(&self, module_path: &str, allow_suffix: bool) -> Option<String> {
        let candidates = [
            format!("{}.py", module_path),
            format!("{}/__init__.py", module_path),
        ];
        for candidate in &candidates {
            let candidate = candidate.trim_start_matches('/');
            if let Some(found) = self.exact(candidate) {
                return Some(found);
            }
        }
        if allow_suffix {
            return candidates.iter().find_map(|c| self.suffix_match(c));
        }
        None
    }

    fn resolve_js(&self, from: &str, module: &str) -> Option<String> {
        if !module.starts_with('.') {
            return None;
        }
        let base = normalize_path(&format!("{}/{}", parent_dir(from), module));

        let mut candidates = vec![base.clone()];
        // `./x.js` written in TypeScript sources refers to `x.ts`
        if let Some((stem, ext)) = base.rsplit_once('.') {
            if JS_EXTENSIONS.contains(&ext) {
                candidates.extend(JS_EXTENSIONS.iter().map(|e| format!("{}.{}", stem, e)));
            }
        }
        candidates.extend(JS_EXTENSIONS.iter().map(|e| format!("{}.{}", base, e)));
        candidates.extend(JS_EXTENSIONS.iter().map(|e| format!("{}/index.{}", base, e)));

        candidates.iter().find_map(|c| self.exact(c))
    }

    fn resolve_dotted(&self, module: &str, extension: &str) -> Option<String> {
        let module = module.trim_end_matches(".*");
        if module.ends_with('*') {
            return None;
        }
        let path = format!("{}.{}", module.replace('.', "/"), extension);
        self.suffix_match(&path)
    }

    fn resolve_go(&self, module: &str) -> Option<String> {
        let segments: Vec<&str> = module.split('/').filter(|s| !s.is_empty()).collect();
        // Longest trailing run of segments that names a directory
        for take in (1..=segments.len()).rev() {
            let suffix = segments[segments.len() - take..].join("/");
            let tail = format!("/{}", suffix);
            let dir = self
                .dirs
                .keys()
                .filter(|d| d.as_str() == suffix || d.ends_with(&tail))
                .min_by_key(|d| (d.len(), d.as_str()));
            if let Some(dir) = dir {
                let files = &self.dirs[dir];
                let pick = files
                    .iter()
                    .filter(|f| f.ends_with(".go"))
                    .min_by_key(|f| (f.ends_with("_test.go"), f.as_str()));
                if let Some(file) = pick {
                    return Some(file.clone());
                }
            }
        }
        None
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Simple name of a possibly qualified type (`pkg.Base`, `ns::Base`).
pub fn simple_name(name: &str) -> &str {
    let name = name.rsplit("::").next().unwrap_or(name);
    name.rsplit('.').next().unwrap_or(name).trim()
}

/// A class known to the resolver.
#[derive(Debug, Clone)]
pub struct ClassEntry {
    pub key: String,
    pub path: String,
}

/// Resolves declared superclasses to classes of one repository.
#[derive(Debug, Default)]
pub struct InheritanceResolver {
    by_name: HashMap<String, Vec<ClassEntry>>,
}

impl InheritanceResolver {
    pub fn add(&mut self, name: &str, key: &str, path: &str) {
        let entries = self.by_name.entry(name.to_string()).or_default();
        if !entries.iter().any(|e| e.key == key) {
            entries.push(ClassEntry {
                key: key.to_string(),
                path: path.to_string(),
            });
        }
    }

    /// Key of the class `superclass` refers to from a class in `from_path`.
    ///
    /// Prefers a class in the same file, then one in a file `from_path`
    /// imports, then the only class of that name in the repository.
    pub fn resolve(
        &self,
        superclass: &str,
        from_path: &str,
        self_key: &str,
        imported: &HashSet<String>,
    ) -> Option<String> {
        let candidates: Vec<&ClassEntry> = self
            .by_name
            .get(simple_name(superclass))?
            .iter()
            .filter(|e| e.key != self_key)
            .collect();

        if let Some(local) = candidates.iter().find(|e| e.path == from_path) {
            return Some(local.key.clone());
        }
        let imported_matches: Vec<&&ClassEntry> =
            candidates.iter().filter(|e| imported.contains(&e.path)).collect();
        if let Some(first) = imported_matches.first() {
            return Some(first.key.clone());
        }
        match candidates.as_slice() {
            [only] => Some(only.key.clone()),
            _ => None,
        }
    }
}
