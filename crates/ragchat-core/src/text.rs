//! Term normalization shared by the chunker, the index, and query parsing.
//!
//! Terms are maximal runs of alphanumeric characters, lowercased. Stop
//! words and single-character runs are dropped.

use std::collections::BTreeMap;

/// Sorted so membership is a binary search.
const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by",
    "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he", "her", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or",
    "our", "she", "so", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "those", "to", "was", "we", "were", "what", "when", "where", "which", "who", "why",
    "will", "with", "would", "you", "your",
];

/// Minimum length (in chars) for a term to become a topic keyword.
const MIN_KEYWORD_CHARS: usize = 4;

pub fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.binary_search(&term).is_ok()
}

/// Split text into normalized terms, in order of appearance.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|raw| !raw.is_empty())
        .map(|raw| raw.to_lowercase())
        .filter(|t| t.chars().count() > 1 && !is_stop_word(t))
        .collect()
}

/// Distinct query terms, in order of first appearance.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for t in terms(text) {
        if !seen.contains(&t) {
            seen.push(t);
        }
    }
    seen
}

/// Count occurrences of each normalized term.
pub fn term_frequencies(text: &str) -> BTreeMap<String, u32> {
    let mut freqs = BTreeMap::new();
    for t in terms(text) {
        *freqs.entry(t).or_insert(0) += 1;
    }
    freqs
}

/// Top `n` keywords by frequency (ties broken alphabetically).
///
/// Only terms of at least four characters qualify.
pub fn keywords(freqs: &BTreeMap<String, u32>, n: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, u32)> = freqs
        .iter()
        .filter(|(t, _)| t.chars().count() >= MIN_KEYWORD_CHARS)
        .map(|(t, f)| (t, *f))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked.into_iter().take(n).map(|(t, _)| t.clone()).collect()
}
