//! Text Extractor (C5): converts a page sequence into markdown-with-headings
//! pages, annotating heading-candidate lines with `#`..`######` prefixes so
//! the chunker can split on them.
//!
//! Extracted PDF/image/DOCX text carries no font or style information by
//! the time it reaches this stage, so headings are inferred from line shape:
//! short, unpunctuated, standalone lines are headings; everything else is
//! body text. This mirrors the effect of a markdown-aware splitter without
//! requiring layout metadata the upstream extractors don't provide.

use regex::Regex;
use std::sync::OnceLock;

use crate::validator::{Page, PageSequence};

const MAX_HEADING_LEN: usize = 80;

fn numbered_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+(?:\.\d+){0,5})\s+\S.*$").unwrap())
}

fn ends_with_sentence_punctuation(line: &str) -> bool {
    matches!(
        line.trim_end().chars().last(),
        Some('.') | Some(',') | Some(';') | Some(':') | Some('?') | Some('!')
    )
}

fn is_all_caps(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
}

fn is_title_case(line: &str) -> bool {
    line.split_whitespace()
        .filter(|w| !w.is_empty())
        .all(|w| w.chars().next().map(|c| c.is_uppercase()).unwrap_or(true))
}

/// Heading level for a candidate line, or `None` if it reads as body text.
fn heading_level(line: &str) -> Option<u8> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_HEADING_LEN {
        return None;
    }
    if ends_with_sentence_punctuation(trimmed) {
        return None;
    }
    if let Some(captures) = numbered_heading_re().captures(trimmed) {
        let depth = captures[1].matches('.').count() as u8 + 1;
        return Some(depth.min(6));
    }
    if is_all_caps(trimmed) {
        return Some(1);
    }
    if is_title_case(trimmed) && trimmed.split_whitespace().count() <= 10 {
        return Some(2);
    }
    None
}

/// Convert one extracted page into markdown, with heading-candidate lines
/// prefixed `#`..`######`.
pub fn to_markdown(page: &Page) -> String {
    page.text
        .lines()
        .map(|line| match heading_level(line) {
            Some(level) => format!("{} {}", "#".repeat(level as usize), line.trim()),
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn to_markdown_pages(pages: &PageSequence) -> Vec<Page> {
    pages
        .iter()
        .map(|p| Page {
            page_number: p.page_number,
            text: to_markdown(p),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_caps_line_becomes_h1() {
        let page = Page {
            page_number: 1,
            text: "INTRODUCTION\nThis is body text.".to_string(),
        };
        let md = to_markdown(&page);
        assert!(md.starts_with("# INTRODUCTION"));
    }

    #[test]
    fn numbered_heading_depth_maps_to_level() {
        let page = Page {
            page_number: 1,
            text: "1.2 Site History\nBody text follows.".to_string(),
        };
        let md = to_markdown(&page);
        assert!(md.starts_with("## 1.2 Site History"));
    }

    #[test]
    fn sentence_ending_punctuation_is_never_a_heading() {
        let page = Page {
            page_number: 1,
            text: "Summary:".to_string(),
        };
        let md = to_markdown(&page);
        assert_eq!(md, "Summary:");
    }
}
