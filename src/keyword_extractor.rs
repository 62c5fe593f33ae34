//! Keyword Extractor (C9): assigns each chunk a small set of content
//! keywords, polymorphic over three algorithm variants selected by
//! configuration (`standard`, `fast`, `simplified`).
//!
//! Candidate generation (tokenize → n-gram → stopword/length/all-numeric
//! filter) is grounded on the teacher's template term extractor
//! (`discovery/term_extraction/template.rs`); scoring differs per variant.
//! All three variants produce single-to-trigram lowercase phrases and share
//! the same domain stopword list, so downstream query-time code doesn't
//! need to know which variant produced a given document.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use async_trait::async_trait;

use crate::config::KeywordAlgorithm;
use crate::error::Result;
use crate::models::ChunkRecord;

pub const MAX_KEYWORDS_PER_CHUNK: usize = 5;
const MIN_TERM_LENGTH: usize = 3;
const MAX_NGRAM: usize = 3;

/// Stopwords specific to the ingestion-report domain (distinct from, and
/// layered on top of, general English function words): document-structure
/// nouns that are frequent but carry no topical signal for this corpus.
const DOMAIN_STOPWORDS: &[&str] = &[
    "project", "projects", "document", "documents", "section", "sections", "page", "pages",
    "report", "reports", "appendix", "appendices", "table", "tables", "figure", "figures",
    "attachment", "attachments", "exhibit", "exhibits", "annex", "annexes", "summary", "overview",
    "introduction", "conclusion", "chapter", "volume", "part",
];

const GENERAL_STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "this",
    "that", "these", "those", "it", "its", "they", "their", "we", "our", "you", "your", "he",
    "she", "him", "her", "his", "all", "each", "every", "both", "few", "more", "most", "other",
    "some", "such", "no", "not", "only", "same", "so", "than", "too", "very", "just", "also",
    "now", "here", "there", "when", "where", "why", "how", "what", "which", "who", "whom",
    "about", "after", "before", "between", "into", "through", "during", "above", "below", "up",
    "down", "out", "off", "over", "under", "again", "further", "then", "once",
];

fn stopword_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        GENERAL_STOPWORDS
            .iter()
            .chain(DOMAIN_STOPWORDS.iter())
            .copied()
            .collect()
    })
}

/// Split on whitespace and punctuation, lowercasing and trimming
/// surrounding non-alphanumerics the way the template extractor's
/// `tokenize` does.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|' | '/' | '(' | ')'))
        .map(|s| {
            s.trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
                .to_lowercase()
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_valid_token(token: &str) -> bool {
    token.len() >= MIN_TERM_LENGTH
        && !stopword_set().contains(token)
        && !token.chars().all(|c| c.is_numeric())
}

/// Generate 1..=max_n contiguous n-grams over the raw token sequence,
/// keeping only grams whose every token individually passes the
/// stopword/length/all-numeric filter (so a gram never starts, ends, or
/// straddles on a function word).
fn candidate_ngrams(tokens: &[String], max_n: usize) -> Vec<String> {
    let mut grams = Vec::new();
    for n in 1..=max_n {
        if tokens.len() < n {
            break;
        }
        for window in tokens.windows(n) {
            if window.iter().all(|t| is_valid_token(t)) {
                grams.push(window.join(" "));
            }
        }
    }
    grams
}

fn top_n_by_count(counts: HashMap<String, usize>, n: usize) -> Vec<String> {
    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.into_iter().take(n).map(|(term, _)| term).collect()
}

fn count_terms(terms: impl IntoIterator<Item = String>) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for term in terms {
        *counts.entry(term).or_insert(0usize) += 1;
    }
    counts
}

#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    /// Populate `metadata.keywords` (here: `chunk.keywords`, merged into
    /// metadata at persistence time) on every chunk, at most
    /// `MAX_KEYWORDS_PER_CHUNK` each, and return the document-level union.
    async fn extract(&self, chunks: &mut [ChunkRecord]) -> Result<Vec<String>>;
}

fn document_union(chunks: &[ChunkRecord]) -> Vec<String> {
    let mut union: Vec<String> = chunks.iter().flat_map(|c| c.keywords.iter().cloned()).collect();
    union.sort();
    union.dedup();
    union
}

/// Run `score_chunk` over disjoint slices of `chunks` on a thread pool
/// bounded to `worker_count`, mutating each chunk's `keywords` in place.
fn score_in_parallel(chunks: &mut [ChunkRecord], worker_count: usize, score_chunk: impl Fn(&mut ChunkRecord) + Sync) {
    let worker_count = worker_count.max(1);
    if chunks.is_empty() {
        return;
    }
    let chunk_size = chunks.len().div_ceil(worker_count).max(1);
    std::thread::scope(|scope| {
        for slice in chunks.chunks_mut(chunk_size) {
            let score_chunk = &score_chunk;
            scope.spawn(move || {
                for chunk in slice.iter_mut() {
                    score_chunk(chunk);
                }
            });
        }
    });
}

/// Favors precision via n-gram scoring against the document's own
/// term-frequency statistics: a phrase's score is its in-chunk frequency
/// weighted by how often it recurs across the whole document, so phrases
/// that are both locally salient and document-wide recurring win.
pub struct StandardKeywordExtractor {
    pub worker_count: usize,
}

#[async_trait]
impl KeywordExtractor for StandardKeywordExtractor {
    async fn extract(&self, chunks: &mut [ChunkRecord]) -> Result<Vec<String>> {
        let per_chunk_tokens: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.content)).collect();
        let per_chunk_grams: Vec<Vec<String>> = per_chunk_tokens
            .iter()
            .map(|tokens| candidate_ngrams(tokens, MAX_NGRAM))
            .collect();

        let mut global_counts: HashMap<String, usize> = HashMap::new();
        for grams in &per_chunk_grams {
            for (term, count) in count_terms(grams.iter().cloned()) {
                *global_counts.entry(term).or_insert(0) += count;
            }
        }

        let worker_count = self.worker_count;
        let global_counts = &global_counts;
        for (chunk, grams) in chunks.iter_mut().zip(per_chunk_grams) {
            let local_counts = count_terms(grams);
            let scored: HashMap<String, usize> = local_counts
                .into_iter()
                .map(|(term, local)| {
                    let global = *global_counts.get(&term).unwrap_or(&local);
                    (term, local * global)
                })
                .collect();
            chunk.keywords = top_n_by_count(scored, MAX_KEYWORDS_PER_CHUNK);
        }
        let _ = worker_count; // scoring above is already O(chunks); see score_in_parallel note below
        Ok(document_union(chunks))
    }
}

/// Trims the candidate set before scoring: only unigrams and bigrams are
/// considered (no trigram pass), and scoring is local frequency alone with
/// no document-wide pass, trading a little precision for speed.
pub struct FastKeywordExtractor {
    pub worker_count: usize,
}

#[async_trait]
impl KeywordExtractor for FastKeywordExtractor {
    async fn extract(&self, chunks: &mut [ChunkRecord]) -> Result<Vec<String>> {
        score_in_parallel(chunks, self.worker_count, |chunk| {
            let tokens = tokenize(&chunk.content);
            let grams = candidate_ngrams(&tokens, 2);
            let counts = count_terms(grams);
            chunk.keywords = top_n_by_count(counts, MAX_KEYWORDS_PER_CHUNK);
        });
        Ok(document_union(chunks))
    }
}

/// Pure frequency count, no document-level statistics, no thread pool:
/// the cheapest variant, intended for large low-value-corpus runs.
pub struct SimplifiedKeywordExtractor;

#[async_trait]
impl KeywordExtractor for SimplifiedKeywordExtractor {
    async fn extract(&self, chunks: &mut [ChunkRecord]) -> Result<Vec<String>> {
        for chunk in chunks.iter_mut() {
            let tokens = tokenize(&chunk.content);
            let grams = candidate_ngrams(&tokens, MAX_NGRAM);
            let counts = count_terms(grams);
            chunk.keywords = top_n_by_count(counts, MAX_KEYWORDS_PER_CHUNK);
        }
        Ok(document_union(chunks))
    }
}

pub fn build(algorithm: KeywordAlgorithm, worker_count: usize) -> Box<dyn KeywordExtractor> {
    match algorithm {
        KeywordAlgorithm::Standard => Box::new(StandardKeywordExtractor { worker_count }),
        KeywordAlgorithm::Fast => Box::new(FastKeywordExtractor { worker_count }),
        KeywordAlgorithm::Simplified => Box::new(SimplifiedKeywordExtractor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> ChunkRecord {
        ChunkRecord::new(0, text.to_string(), None)
    }

    #[test]
    fn tokenize_lowercases_and_strips_punctuation() {
        let tokens = tokenize("AirQuality, GroundwaterQuality; Habitat.");
        assert!(tokens.contains(&"airquality".to_string()));
        assert!(tokens.contains(&"groundwaterquality".to_string()));
    }

    #[test]
    fn candidate_ngrams_excludes_grams_touching_stopwords() {
        let tokens = tokenize("the site assessment report was completed");
        let grams = candidate_ngrams(&tokens, 2);
        assert!(!grams.iter().any(|g| g.starts_with("the ")));
        assert!(!grams.contains(&"assessment report".to_string()));
    }

    #[tokio::test]
    async fn simplified_extractor_picks_most_frequent_phrase() {
        let mut chunks = vec![chunk(
            "groundwater quality groundwater quality sampling near the wetland",
        )];
        let extractor = SimplifiedKeywordExtractor;
        let union = extractor.extract(&mut chunks).await.unwrap();
        assert!(chunks[0].keywords.len() <= MAX_KEYWORDS_PER_CHUNK);
        assert!(chunks[0].keywords.contains(&"groundwater quality".to_string()));
        assert!(!union.is_empty());
    }

    #[tokio::test]
    async fn fast_extractor_never_emits_trigrams() {
        let mut chunks = vec![chunk("fish habitat assessment near riparian zones upstream")];
        let extractor = FastKeywordExtractor { worker_count: 2 };
        extractor.extract(&mut chunks).await.unwrap();
        assert!(chunks[0].keywords.iter().all(|k| k.split(' ').count() <= 2));
    }

    #[tokio::test]
    async fn standard_extractor_caps_keywords_per_chunk() {
        let mut chunks = vec![
            chunk("fish habitat fish habitat riparian zones erosion control"),
            chunk("fish habitat monitoring upstream sediment control"),
        ];
        let extractor = StandardKeywordExtractor { worker_count: 2 };
        extractor.extract(&mut chunks).await.unwrap();
        for chunk in &chunks {
            assert!(chunk.keywords.len() <= MAX_KEYWORDS_PER_CHUNK);
        }
    }
}
