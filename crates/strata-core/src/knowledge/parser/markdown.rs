//! Markdown documentation parser.

use pulldown_cmark::{Event, Parser as CmarkParser, Tag, TagEnd};

use super::language::Language;
use super::result::{FileStructure, Section};
use super::traits::{Parser, ParserCapability};

/// Extracts the heading outline of a Markdown document.
#[derive(Debug, Default)]
pub struct MarkdownParser;

impl MarkdownParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for MarkdownParser {
    fn parse_file(&self, path: &str, content: &str) -> Result<FileStructure, String> {
        let mut result = FileStructure::new(path, Language::Markdown);
        let body_offset = front_matter_len(content);
        let body = &content[body_offset..];

        // (level, start offset, title)
        let mut current: Option<(u32, usize, String)> = None;
        for (event, range) in CmarkParser::new(body).into_offset_iter() {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    current = Some((level as u32, range.start, String::new()));
                }
                Event::Text(text) | Event::Code(text) => {
                    if let Some((_, _, title)) = current.as_mut() {
                        title.push_str(&text);
                    }
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((level, start, title)) = current.take() {
                        let title = title.trim();
                        if !title.is_empty() {
                            result.sections.push(Section {
                                title: title.to_string(),
                                level,
                                line: line_of(content, body_offset + start),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(result)
    }

    fn language(&self) -> Language {
        Language::Markdown
    }

    fn capability(&self) -> ParserCapability {
        ParserCapability::Lightweight
    }
}

/// Byte length of a leading `---` YAML front matter block, or 0.
fn front_matter_len(content: &str) -> usize {
    let Some(rest) = content.strip_prefix("---\n") else {
        return 0;
    };
    match rest.find("\n---") {
        Some(end) => {
            let close = 4 + end + 4;
            // Include the newline after the closing fence
            match content[close..].find('\n') {
                Some(nl) => close + nl + 1,
                None => content.len(),
            }
        }
        None => 0,
    }
}

fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset.min(content.len())].matches('\n').count() as u32 + 1
}
