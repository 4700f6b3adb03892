//! Splitting file content into bounded chunks for embedding.
//!
//! A file is first cut at every function and class boundary so each chunk
//! lies inside exactly one owner, then every owner segment is packed into
//! chunks of at most `max_chars` characters. Chunks carry absolute line
//! numbers and, concatenated in order, reproduce the file byte for byte.

use std::collections::{BTreeSet, HashMap};

use super::parser::{FileStructure, OwnerSpan, FILE_OWNER};

/// A slice of a file's text with its line range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Owner name within the file (`fn:..`, `class:..` or `<file>`).
    pub owner: String,
    /// Position among the owner's chunks.
    pub index: usize,
    pub content: String,
    /// First line, 1-based and absolute within the file.
    pub start_line: u32,
    /// Last line, inclusive.
    pub end_line: u32,
}

/// Packs lines into chunks, preferring blank lines and headings as cut points.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chars: usize,
}

impl Chunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Chunk `text` for one owner, where the first line of `text` is line
    /// `start_line` of the file. Empty text yields no chunks.
    pub fn chunk(&self, owner: &str, text: &str, start_line: u32) -> Vec<Chunk> {
        let lines = number_lines(text, start_line);
        self.pack(owner, &lines, &BTreeSet::new())
    }

    /// Chunk a whole file, assigning every chunk to the most specific
    /// function or class whose span contains it.
    pub fn chunk_file(&self, structure: &FileStructure, content: &str) -> Vec<Chunk> {
        let lines = number_lines(content, 1);
        if lines.is_empty() {
            return Vec::new();
        }
        let last_line = lines.len() as u32;

        let spans: Vec<OwnerSpan> = structure
            .owner_spans()
            .into_iter()
            .filter(|s| s.start_line >= 1 && s.start_line <= s.end_line && s.start_line <= last_line)
            .map(|mut s| {
                s.end_line = s.end_line.min(last_line);
                s
            })
            .collect();

        let mut boundaries = BTreeSet::from([1, last_line + 1]);
        for span in &spans {
            boundaries.insert(span.start_line);
            boundaries.insert(span.end_line + 1);
        }
        let preferred: BTreeSet<u32> = structure.sections.iter().map(|s| s.line).collect();

        let mut chunks = Vec::new();
        let mut next_index: HashMap<String, usize> = HashMap::new();
        let bounds: Vec<u32> = boundaries.into_iter().collect();
        for window in bounds.windows(2) {
            let (start, end) = (window[0], window[1] - 1);
            let owner = owner_of(&spans, start, end);
            let segment = &lines[(start - 1) as usize..end as usize];

            for mut chunk in self.pack(&owner, segment, &preferred) {
                let index = next_index.entry(owner.clone()).or_insert(0);
                chunk.index = *index;
                *index += 1;
                chunks.push(chunk);
            }
        }

        chunks
    }

    fn pack(&self, owner: &str, lines: &[(u32, &str)], preferred: &BTreeSet<u32>) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let push = |chunks: &mut Vec<Chunk>, part: &[(u32, &str)]| {
            if let (Some(first), Some(last)) = (part.first(), part.last()) {
                chunks.push(Chunk {
                    owner: owner.to_string(),
                    index: chunks.len(),
                    content: part.iter().map(|(_, text)| *text).collect(),
                    start_line: first.0,
                    end_line: last.0,
                });
            }
        };

        let mut start = 0;
        let mut size = 0;
        let mut cut_point: Option<usize> = None;
        let mut i = 0;

        while i < lines.len() {
            let (number, text) = lines[i];
            let len = text.chars().count();

            if len > self.max_chars {
                push(&mut chunks, &lines[start..i]);
                for piece in split_chars(text, self.max_chars) {
                    push(&mut chunks, &[(number, piece)]);
                }
                i += 1;
                start = i;
                size = 0;
                cut_point = None;
                continue;
            }

            if size + len > self.max_chars && i > start {
                let cut = cut_point.filter(|&c| c > start && c <= i).unwrap_or(i);
                push(&mut chunks, &lines[start..cut]);
                size = lines[cut..i].iter().map(|(_, t)| t.chars().count()).sum();
                start = cut;
                cut_point = None;
                continue;
            }

            if preferred.contains(&number) && i > start {
                cut_point = Some(i);
            }
            size += len;
            if text.trim().is_empty() {
                cut_point = Some(i + 1);
            }
            i += 1;
        }
        push(&mut chunks, &lines[start..]);

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CHUNK_SIZE)
    }
}

/// Lines with their terminators, numbered from `first`.
fn number_lines(text: &str, first: u32) -> Vec<(u32, &str)> {
    text.split_inclusive('\n')
        .enumerate()
        .map(|(i, line)| (first + i as u32, line))
        .collect()
}

/// Innermost span containing `[start, end]`, or the file itself.
fn owner_of(spans: &[OwnerSpan], start: u32, end: u32) -> String {
    spans
        .iter()
        .filter(|s| s.contains(start, end))
        .min_by_key(|s| s.len())
        .map(|s| s.owner.clone())
        .unwrap_or_else(|| FILE_OWNER.to_string())
}

fn split_chars(text: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(max)
            .map_or(rest.len(), |(idx, _)| idx);
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::models::ClassKind;
    use crate::knowledge::parser::{Language, ParsedClass, ParsedFunction, Section};

    fn function(name: &str, start: u32, end: u32) -> ParsedFunction {
        ParsedFunction {
            name: name.into(),
            signature: format!("def {}()", name),
            start_line: start,
            end_line: end,
            receiver: None,
            doc_comment: None,
        }
    }

    fn assert_covers(chunks: &[Chunk], content: &str) {
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, content);

        let last_line = content.split_inclusive('\n').count() as u32;
        let mut expected = 1;
        for chunk in chunks {
            assert!(chunk.start_line == expected || chunk.start_line + 1 == expected);
            assert!(chunk.end_line >= chunk.start_line);
            expected = chunk.end_line + 1;
        }
        assert_eq!(expected, last_line + 1);
    }

    #[test]
    fn test_empty_and_small_inputs() {
        let chunker = Chunker::new(100);
        assert!(chunker.chunk("<file>", "", 1).is_empty());

        let chunks = chunker.chunk("<file>", "x = 1\n", 7);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (7, 7));
    }

    #[test]
    fn test_prefers_blank_lines() {
        let text = "aaaa\nbbbb\n\ncccc\ndddd\n";
        let chunks = Chunker::new(16).chunk("<file>", text, 1);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "aaaa\nbbbb\n\n");
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (4, 5));
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_long_line_is_hard_split() {
        let text = format!("short\n{}\nend\n", "x".repeat(25));
        let chunks = Chunker::new(10).chunk("<file>", &text, 1);
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 10));
        let on_line_two = chunks.iter().filter(|c| c.start_line == 2).count();
        assert_eq!(on_line_two, 3);
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_chunks_follow_owner_boundaries() {
        let content = "import os\n\ndef foo():\n    return 1\n\nclass Bar:\n    def baz(self):\n        return 2\n";
        let mut structure = FileStructure::new("a.py", Language::Python);
        structure.functions.push(function("foo", 3, 4));
        structure.classes.push(ParsedClass::new("Bar", ClassKind::Class, 6, 8));

        let chunks = Chunker::new(1000).chunk_file(&structure, content);
        let owners: Vec<&str> = chunks.iter().map(|c| c.owner.as_str()).collect();
        assert_eq!(owners, vec!["<file>", "fn:foo:3", "<file>", "class:Bar"]);
        assert_eq!(chunks[1].content, "def foo():\n    return 1\n");
        assert_covers(&chunks, content);
    }

    #[test]
    fn test_nested_owner_gets_inner_chunks() {
        let content = (1..=10).map(|i| format!("line {}\n", i)).collect::<String>();
        let mut structure = FileStructure::new("A.java", Language::Java);
        structure.classes.push(ParsedClass::new("Outer", ClassKind::Class, 1, 10));
        structure.classes.push(ParsedClass::new("Inner", ClassKind::Class, 4, 6));

        let chunks = Chunker::new(1000).chunk_file(&structure, &content);
        let owners: Vec<(&str, usize)> = chunks.iter().map(|c| (c.owner.as_str(), c.index)).collect();
        assert_eq!(
            owners,
            vec![("class:Outer", 0), ("class:Inner", 0), ("class:Outer", 1)]
        );
        assert_covers(&chunks, &content);
    }

    #[test]
    fn test_coverage_with_small_budget_and_sections() {
        let content = "# Title\n\nIntro text here.\n## Part\nMore words that run on\nand on.\n\n## End\nbye\n";
        let mut structure = FileStructure::new("README.md", Language::Markdown);
        structure.sections = vec![
            Section { title: "Title".into(), level: 1, line: 1 },
            Section { title: "Part".into(), level: 2, line: 4 },
            Section { title: "End".into(), level: 2, line: 8 },
        ];

        let chunks = Chunker::new(40).chunk_file(&structure, content);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.owner == FILE_OWNER));
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 40));
        assert_eq!(chunks[1].start_line, 4);
        assert_covers(&chunks, content);
    }

    #[test]
    fn test_spans_past_end_are_clamped() {
        let content = "def f():\n    pass";
        let mut structure = FileStructure::new("f.py", Language::Python);
        structure.functions.push(function("f", 1, 9));
        let chunks = Chunker::new(1000).chunk_file(&structure, content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].owner, "fn:f:1");
        assert_eq!(chunks[0].end_line, 2);
    }
}
