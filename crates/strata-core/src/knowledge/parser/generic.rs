//! Regex-based extraction for languages without a grammar.
//!
//! Also used to salvage declarations from grammar-backed files whose syntax
//! tree recovered nothing.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::language::Language;
use super::patterns::{CLASS_PATTERNS, FUNCTION_PATTERNS, IMPORT_PATTERNS, MAX_BLOCK_LINES, NON_NAME_KEYWORDS};
use super::result::{FileStructure, ParsedClass, ParsedFunction, ParsedImport, ParsedMethod};
use super::traits::{Parser, ParserCapability};
use crate::knowledge::models::ClassKind;

static CLASS_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(CLASS_PATTERNS));
static FUNCTION_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(FUNCTION_PATTERNS));
static IMPORT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(IMPORT_PATTERNS));

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Parser for every extension without a dedicated variant.
#[derive(Debug, Default)]
pub struct GenericParser;

impl GenericParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for GenericParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        Ok(extract(path, content, Language::Generic))
    }

    fn language(&self) -> Language {
        Language::Generic
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Basic
    }
}

/// Extract declarations line by line.
pub fn extract(path: &str, content: &str, language: Language) -> FileStructure {
    let mut result = FileStructure::new(path, language);
    let lines: Vec<&str> = content.lines().collect();

    // Keyed by start line so overlapping patterns yield one entity per line
    let mut classes: BTreeMap<u32, ParsedClass> = BTreeMap::new();
    for re in CLASS_RES.iter() {
        for cap in re.captures_iter(content) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            if NON_NAME_KEYWORDS.contains(&name.as_str()) {
                continue;
            }
            let start = line_of(content, whole.start());
            let end = find_block_end(&lines, start as usize - 1);
            let kind = class_kind(whole.as_str());
            classes
                .entry(start)
                .or_insert_with(|| ParsedClass::new(name.as_str(), kind, start, end));
        }
    }

    let mut functions: BTreeMap<u32, ParsedFunction> = BTreeMap::new();
    for re in FUNCTION_RES.iter() {
        for cap in re.captures_iter(content) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            if NON_NAME_KEYWORDS.contains(&name.as_str()) {
                continue;
            }
            let start = line_of(content, whole.start());
            if classes.contains_key(&start) {
                continue;
            }
            let end = find_block_end(&lines, start as usize - 1);
            functions.entry(start).or_insert_with(|| ParsedFunction {
                name: name.as_str().to_string(),
                signature: lines
                    .get(start as usize - 1)
                    .map(|l| l.trim().trim_end_matches('{').trim().to_string())
                    .unwrap_or_default(),
                start_line: start,
                end_line: end,
                receiver: None,
                doc_comment: None,
            });
        }
    }

    result.classes = classes.into_values().collect();

    // Declarations inside a class body are its methods
    for func in functions.into_values() {
        let owner = result
            .classes
            .iter_mut()
            .filter(|c| c.start_line < func.start_line && func.start_line <= c.end_line)
            .min_by_key(|c| c.end_line - c.start_line);
        match owner {
            Some(class) => class.methods.push(ParsedMethod {
                name: func.name,
                start_line: func.start_line,
                end_line: func.end_line,
            }),
            None => result.functions.push(func),
        }
    }

    for re in IMPORT_RES.iter() {
        for cap in re.captures_iter(content) {
            let (Some(whole), Some(module)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            result
                .imports
                .push(ParsedImport::new(module.as_str(), line_of(content, whole.start())));
        }
    }
    result.imports.sort_by_key(|i| i.line);
    result.imports.dedup_by(|a, b| a.line == b.line);

    result
}

/// Keep only declarations that end before `line`.
pub fn truncate_before(structure: &mut FileStructure, line: u32) {
    structure.functions.retain(|f| f.end_line < line);
    structure.classes.retain(|c| c.end_line < line);
    structure.imports.retain(|i| i.line < line);
}

fn class_kind(matched: &str) -> ClassKind {
    if matched.contains("interface") || matched.contains("trait") {
        ClassKind::Interface
    } else if matched.contains("enum") {
        ClassKind::Enum
    } else if matched.contains("struct") {
        ClassKind::Struct
    } else {
        ClassKind::Class
    }
}

/// 1-based line number of a byte offset.
fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset].matches('\n').count() as u32 + 1
}

/// 1-based inclusive end line of the block starting at `start_idx`, by brace
/// counting or by indentation.
pub fn find_block_end(lines: &[&str], start_idx: usize) -> u32 {
    if start_idx >= lines.len() {
        return start_idx as u32 + 1;
    }

    let base_indent = indent_of(lines[start_idx]);
    let mut depth: i32 = 0;
    let mut found_open = false;
    let mut last_content = start_idx;

    for (i, line) in lines.iter().enumerate().skip(start_idx) {
        let trimmed = line.trim();
        if i > start_idx
            && !trimmed.is_empty()
            && depth <= 0
            && indent_of(line) <= base_indent
            && !trimmed.starts_with('{')
            && !trimmed.starts_with(')')
        {
            // Dedent ends the block; a keyword terminator belongs to it
            if trimmed == "end" || trimmed.starts_with("end ") {
                return i as u32 + 1;
            }
            return last_content as u32 + 1;
        }

        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    found_open = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if !trimmed.is_empty() {
            last_content = i;
        }

        if depth <= 0 && found_open && line.contains('}') {
            return i as u32 + 1;
        }
        if !found_open && trimmed.ends_with(':') {
            found_open = true;
        }
        if i == start_idx && !found_open && trimmed.ends_with(';') {
            return i as u32 + 1;
        }
        if i >= start_idx + MAX_BLOCK_LINES {
            break;
        }
    }

    (last_content.min(start_idx + MAX_BLOCK_LINES)) as u32 + 1
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_like_source() {
        let code = r#"use std::fmt;

pub struct Config {
    name: String,
}

impl Config {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub async fn process_data(input: &str) -> Result<()> {
    Ok(())
}
"#;
        let result = GenericParser::new().parse_file("lib.rs", code).unwrap();
        assert_eq!(result.classes.len(), 1);
        assert_eq!(result.classes[0].name, "Config");
        assert_eq!((result.classes[0].start_line, result.classes[0].end_line), (3, 5));

        let names: Vec<&str> = result.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "process_data"]);
        assert_eq!(result.functions[1].end_line, 15);
        assert_eq!(result.imports[0].module, "std::fmt");
    }

    #[test]
    fn test_methods_inside_class_ranges() {
        let code = "class Cart\n  def total\n    0\n  end\nend\n\ndef helper\nend\n";
        let result = GenericParser::new().parse_file("cart.rb", code).unwrap();
        assert_eq!(result.classes.len(), 1);
        assert_eq!((result.classes[0].start_line, result.classes[0].end_line), (1, 5));
        assert_eq!(result.classes[0].methods[0].name, "total");
        let names: Vec<&str> = result.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["helper"]);
    }

    #[test]
    fn test_indentation_block_end() {
        let lines = vec!["def foo(x):", "    return x", "", "def bar():", "    pass"];
        assert_eq!(find_block_end(&lines, 0), 2);
        assert_eq!(find_block_end(&lines, 3), 5);
    }

    #[test]
    fn test_truncate_before() {
        let code = "def a():\n    pass\n\ndef b():\n    pass\n";
        let mut result = extract("x.py", code, Language::Python);
        truncate_before(&mut result, 4);
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].name, "a");
    }
}
