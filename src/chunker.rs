//! Chunker (C6): splits markdown-with-headings pages into bounded,
//! heading-aware chunks.
//!
//! Two passes: first split each page at H1..H6 boundaries, tracking the
//! heading path that encloses each resulting section; then recursively
//! split each section into character-bounded windows with overlap. Chunk
//! text has markdown formatting stripped before it's returned, matching
//! the `strip_markdown` pass each chunk goes through before being stored.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::ChunkRecord;
use crate::validator::Page;

#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::config::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

struct Section {
    heading_path: Vec<String>,
    page_number: u32,
    text: String,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap())
}

fn split_into_sections(pages: &[Page]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current = String::new();
    let mut current_page = pages.first().map(|p| p.page_number).unwrap_or(1);

    let flush = |sections: &mut Vec<Section>, stack: &[(usize, String)], text: &mut String, page: u32| {
        if !text.trim().is_empty() {
            sections.push(Section {
                heading_path: stack.iter().map(|(_, t)| t.clone()).collect(),
                page_number: page,
                text: std::mem::take(text),
            });
        } else {
            text.clear();
        }
    };

    for page in pages {
        current_page = page.page_number;
        for line in page.text.lines() {
            if let Some(captures) = heading_re().captures(line) {
                flush(&mut sections, &stack, &mut current, current_page);
                let level = captures[1].len();
                let title = captures[2].trim().to_string();
                stack.retain(|(l, _)| *l < level);
                stack.push((level, title));
            } else {
                current.push_str(line);
                current.push('\n');
            }
        }
    }
    flush(&mut sections, &stack, &mut current, current_page);
    sections
}

/// Recursive character-bounded split: try paragraph breaks first, then
/// line breaks, then spaces, falling back to a hard character cut only if
/// a single atomic unit is still larger than the window.
fn recursive_split(text: &str, size: usize, overlap: usize) -> Vec<String> {
    fn split_by(text: &str, separators: &[&str], size: usize, overlap: usize) -> Vec<String> {
        if text.chars().count() <= size {
            return vec![text.to_string()];
        }

        let Some((sep, rest_separators)) = separators.split_first() else {
            return hard_wrap(text, size, overlap);
        };

        let pieces: Vec<&str> = if sep.is_empty() {
            return hard_wrap(text, size, overlap);
        } else {
            text.split(sep).collect()
        };

        let mut windows = Vec::new();
        let mut current = String::new();
        for piece in pieces {
            let candidate_len = current.chars().count()
                + if current.is_empty() { 0 } else { sep.chars().count() }
                + piece.chars().count();
            if candidate_len > size && !current.is_empty() {
                windows.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push_str(sep);
            }
            current.push_str(piece);
        }
        if !current.is_empty() {
            windows.push(current);
        }

        windows
            .into_iter()
            .flat_map(|w| {
                if w.chars().count() > size {
                    split_by(&w, rest_separators, size, overlap)
                } else {
                    vec![w]
                }
            })
            .collect()
    }

    fn hard_wrap(text: &str, size: usize, overlap: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= size {
            return vec![text.to_string()];
        }
        let step = size.saturating_sub(overlap).max(1);
        let mut windows = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            windows.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        windows
    }

    let raw = split_by(text, &["\n\n", "\n", " "], size, overlap);
    apply_overlap(raw, overlap)
}

/// Merge adjacent small windows back together with the configured overlap
/// carried from the tail of one window into the head of the next, once the
/// separator-based split has produced pieces at or under the target size.
fn apply_overlap(windows: Vec<String>, overlap: usize) -> Vec<String> {
    if windows.len() <= 1 || overlap == 0 {
        return windows;
    }
    let mut result = Vec::with_capacity(windows.len());
    let mut prev_tail = String::new();
    for (idx, window) in windows.into_iter().enumerate() {
        if idx == 0 {
            result.push(window.clone());
        } else {
            result.push(format!("{prev_tail}{window}"));
        }
        let chars: Vec<char> = result.last().unwrap().chars().collect();
        let tail_start = chars.len().saturating_sub(overlap);
        prev_tail = chars[tail_start..].iter().collect();
    }
    result
}

fn strip_markdown(text: &str) -> String {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    static EMPHASIS: OnceLock<Regex> = OnceLock::new();
    let heading_re = HEADING.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());
    let emphasis_re = EMPHASIS.get_or_init(|| Regex::new(r"(\*\*|\*|__|_|`)").unwrap());

    let without_headings = heading_re.replace_all(text, "");
    emphasis_re.replace_all(&without_headings, "").trim().to_string()
}

/// Split every page into chunk records. Chunk indices are assigned in
/// document order across all pages, not reset per page.
pub fn chunk_pages(pages: &[Page], options: ChunkOptions) -> Vec<ChunkRecord> {
    let sections = split_into_sections(pages);
    let mut records = Vec::new();
    let mut index = 0i32;

    for section in sections {
        let heading_path = if section.heading_path.is_empty() {
            None
        } else {
            Some(section.heading_path.join(" > "))
        };

        for window in recursive_split(&section.text, options.chunk_size, options.chunk_overlap) {
            let stripped = strip_markdown(&window);
            if stripped.is_empty() {
                continue;
            }
            let mut record = ChunkRecord::new(index, stripped, heading_path.clone());
            record.metadata = serde_json::json!({ "page_number": section.page_number });
            records.push(record);
            index += 1;
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> Page {
        Page {
            page_number: 1,
            text: text.to_string(),
        }
    }

    #[test]
    fn single_short_page_is_one_chunk() {
        let pages = vec![page("# Intro\nShort body text.")];
        let chunks = chunk_pages(&pages, ChunkOptions::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path.as_deref(), Some("Intro"));
        assert!(!chunks[0].content.contains('#'));
    }

    #[test]
    fn heading_path_nests_across_levels() {
        let pages = vec![page("# Site\n## History\nThe site was built in 1990.")];
        let chunks = chunk_pages(&pages, ChunkOptions::default());
        assert_eq!(chunks[0].heading_path.as_deref(), Some("Site > History"));
    }

    #[test]
    fn long_section_is_split_into_overlapping_windows() {
        let body = "word ".repeat(400); // ~2000 chars
        let pages = vec![page(&format!("# Heading\n{body}"))];
        let options = ChunkOptions {
            chunk_size: 1000,
            chunk_overlap: 200,
        };
        let chunks = chunk_pages(&pages, options);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= options.chunk_size + options.chunk_overlap);
        }
    }

    #[test]
    fn chunk_indices_are_sequential() {
        let pages = vec![page("# A\ntext one"), page("# B\ntext two")];
        let chunks = chunk_pages(&pages, ChunkOptions::default());
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i32);
        }
    }
}
