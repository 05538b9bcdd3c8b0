//! Boundary-aware, overlapping text chunker.
//!
//! Splits extracted document text into [`Chunk`]s whose byte length lies in
//! `[min_chars, max_chars]` (the final remainder chunk may be shorter).
//! Each chunk carries byte offsets into the parent text and its term
//! frequencies.
//!
//! # Algorithm
//!
//! 1. Find every whitespace gap in the text and classify it: a gap with two
//!    or more newlines is a paragraph break, a gap after `.`, `!`, `?` or
//!    containing a newline is a sentence break, anything else a word break.
//! 2. From the current start, if the rest fits in `max_chars`, emit it and stop.
//! 3. Otherwise cut at the last paragraph break in `[start + min, start + max]`,
//!    else the last sentence break, else the last word break, else hard-cut
//!    at `start + max` (snapped to a UTF-8 char boundary).
//! 4. Start the next chunk inside the tail of the previous one: the earliest
//!    sentence (else word) break within the last `overlap_chars` bytes, but
//!    never before the midpoint of the previous chunk.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default());
//! let chunks = chunker.chunk("doc-123", "Hello world.\n\nSecond paragraph.").unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use crate::error::{RagError, Result};
use crate::models::Chunk;
use crate::text::term_frequencies;

/// Chunk size limits, in bytes of UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub max_chars: usize,
    pub min_chars: usize,
    pub overlap_chars: usize,
    /// Documents producing more chunks than this are rejected.
    pub max_chunks: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            min_chars: 200,
            overlap_chars: 200,
            max_chunks: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BreakLevel {
    Word,
    Sentence,
    Paragraph,
}

/// A maximal whitespace run `[at, next)` between two non-whitespace bytes.
#[derive(Debug, Clone, Copy)]
struct Gap {
    at: usize,
    next: usize,
    level: BreakLevel,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into ordered chunks for `document_id`.
    ///
    /// # Guarantees
    ///
    /// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
    /// - Every non-whitespace byte of `text` lies in at least one chunk.
    /// - `chunks[i + 1].start <= chunks[i].end` unless only whitespace
    ///   separates them.
    ///
    /// # Errors
    ///
    /// - [`RagError::UnsupportedFormat`] if `text` is empty or whitespace-only.
    /// - [`RagError::TooManyChunks`] if more than `max_chunks` would be produced.
    pub fn chunk(&self, document_id: &str, text: &str) -> Result<Vec<Chunk>> {
        let lo = text.len() - text.trim_start().len();
        let hi = text.trim_end().len();
        if lo >= hi {
            return Err(RagError::UnsupportedFormat(
                "document contains no extractable text".to_string(),
            ));
        }

        let max = self.config.max_chars.max(1);
        let min = self.config.min_chars.min(max);
        let overlap = self.config.overlap_chars.min(max - 1);
        let gaps = find_gaps(text, lo, hi);

        let mut chunks = Vec::new();
        let mut start = lo;
        loop {
            if hi - start <= max {
                chunks.push(make_chunk(document_id, chunks.len(), text, start, hi));
                break;
            }

            let limit = snap_to_char_boundary(text, start + max);
            let floor = start + min;
            let cut = gaps
                .iter()
                .filter(|g| g.at > start && g.at >= floor && g.at <= limit)
                .max_by(|a, b| a.level.cmp(&b.level).then(a.at.cmp(&b.at)));

            let (end, mut next, hard_cut) = match cut {
                Some(g) => (g.at, g.next, false),
                None => {
                    let end = if limit > start {
                        limit
                    } else {
                        next_char_boundary(text, start)
                    };
                    (end, end, true)
                }
            };
            chunks.push(make_chunk(document_id, chunks.len(), text, start, end));
            if chunks.len() > self.config.max_chunks {
                return Err(RagError::TooManyChunks {
                    count: chunks.len(),
                    limit: self.config.max_chunks,
                });
            }

            if overlap > 0 {
                let earliest = end.saturating_sub(overlap).max(start + (end - start) / 2 + 1);
                next = overlap_start(text, &gaps, earliest, end, hard_cut).unwrap_or(next);
            }
            start = skip_whitespace(text, next);
            if start >= hi {
                break;
            }
        }

        if chunks.len() > self.config.max_chunks {
            return Err(RagError::TooManyChunks {
                count: chunks.len(),
                limit: self.config.max_chunks,
            });
        }
        Ok(chunks)
    }
}

/// Where the next chunk starts when overlapping the tail `[earliest, end)`.
///
/// Prefers the start of a sentence, then the start of a word. Only a hard
/// cut (no usable whitespace) may restart in the middle of a word.
fn overlap_start(
    text: &str,
    gaps: &[Gap],
    earliest: usize,
    end: usize,
    hard_cut: bool,
) -> Option<usize> {
    let in_tail = |g: &&Gap| g.next >= earliest && g.next < end;
    gaps.iter()
        .filter(in_tail)
        .find(|g| g.level >= BreakLevel::Sentence)
        .or_else(|| gaps.iter().find(in_tail))
        .map(|g| g.next)
        .or_else(|| {
            (hard_cut && earliest < end).then(|| next_char_boundary_at_or_after(text, earliest))
        })
}

fn find_gaps(text: &str, lo: usize, hi: usize) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut run_start: Option<usize> = None;
    let mut newlines = 0usize;
    let mut prev: Option<char> = None;
    let mut before_run: Option<char> = None;

    for (i, c) in text[lo..hi].char_indices() {
        let pos = lo + i;
        if c.is_whitespace() {
            if run_start.is_none() {
                run_start = Some(pos);
                before_run = prev;
                newlines = 0;
            }
            if c == '\n' {
                newlines += 1;
            }
        } else if let Some(at) = run_start.take() {
            let level = if newlines >= 2 {
                BreakLevel::Paragraph
            } else if newlines == 1 || matches!(before_run, Some('.' | '!' | '?')) {
                BreakLevel::Sentence
            } else {
                BreakLevel::Word
            };
            gaps.push(Gap {
                at,
                next: pos,
                level,
            });
        }
        prev = Some(c);
    }
    gaps
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    from + (rest.len() - rest.trim_start().len())
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Byte index just past the char starting at `index`.
fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| index + i)
        .unwrap_or(s.len())
}

fn next_char_boundary_at_or_after(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn make_chunk(document_id: &str, index: usize, text: &str, start: usize, end: usize) -> Chunk {
    let slice = &text[start..end];
    Chunk {
        document_id: document_id.to_string(),
        chunk_index: index,
        text: slice.to_string(),
        start,
        end,
        terms: term_frequencies(slice),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(max: usize, min: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            max_chars: max,
            min_chars: min,
            overlap_chars: overlap,
            max_chunks: 10_000,
        })
    }

    /// Every non-whitespace byte is covered by some chunk.
    fn assert_covers(text: &str, chunks: &[Chunk]) {
        for (i, c) in text.char_indices() {
            if c.is_whitespace() {
                continue;
            }
            assert!(
                chunks.iter().any(|ch| ch.start <= i && i < ch.end),
                "byte {} ({:?}) not covered",
                i,
                c
            );
        }
        for pair in chunks.windows(2) {
            let between = &text[pair[0].end.min(pair[1].start)..pair[1].start.max(pair[0].end)];
            assert!(
                pair[1].start <= pair[0].end || between.trim().is_empty(),
                "gap between chunk {} and {}",
                pair[0].chunk_index,
                pair[1].chunk_index
            );
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunker(1000, 200, 200).chunk("doc1", "Hello, world!").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 13));
    }

    #[test]
    fn test_empty_text_is_unsupported() {
        let err = chunker(1000, 200, 200).chunk("doc1", "  \n\n  ").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_offsets_point_into_parent() {
        let text = "\n  Leading space. Then more text here.\n\nAnd a paragraph.  ";
        let chunks = chunker(20, 5, 0).chunk("doc1", text).unwrap();
        for c in &chunks {
            assert_eq!(&text[c.start..c.end], c.text);
        }
        assert_eq!(chunks[0].start, 3);
        assert_eq!(chunks.last().unwrap().end, text.trim_end().len());
    }

    #[test]
    fn test_sentences_split_when_small() {
        let text = "The sky is blue. Grass is green.";
        let chunks = chunker(20, 5, 0).chunk("doc1", text).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "The sky is blue.");
        assert_eq!(chunks[1].text, "Grass is green.");
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = "One two three. Four five.\n\nSix seven eight nine.";
        let chunks = chunker(40, 5, 0).chunk("doc1", text).unwrap();
        assert_eq!(chunks[0].text, "One two three. Four five.");
    }

    #[test]
    fn test_lengths_within_bounds() {
        let text = (0..80)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunker(120, 60, 30).chunk("doc1", &text).unwrap();
        assert!(chunks.len() > 1);
        let (last, rest) = chunks.split_last().unwrap();
        for c in rest {
            let len = c.end - c.start;
            assert!((60..=120).contains(&len), "chunk {} has length {}", c.chunk_index, len);
        }
        assert!(last.end - last.start <= 120);
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_overlap_repeats_tail() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota. Kappa lambda mu.";
        let chunks = chunker(40, 10, 25).chunk("doc1", text).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start < pair[0].end, "expected overlap");
        }
        assert_covers(text, &chunks);
    }

    #[test]
    fn test_hard_split_without_whitespace() {
        let text = "x".repeat(250);
        let chunks = chunker(100, 50, 10).chunk("doc1", &text).unwrap();
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.end - c.start <= 100);
        }
        assert_covers(&text, &chunks);
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunker(12, 3, 4).chunk("doc1", text).unwrap();
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(text.is_char_boundary(c.start) && text.is_char_boundary(c.end));
        }
        assert_covers(text, &chunks);
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunker(60, 20, 10).chunk("doc1", &text).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_too_many_chunks() {
        let text = "word ".repeat(500);
        let err = Chunker::new(ChunkerConfig {
            max_chars: 20,
            min_chars: 5,
            overlap_chars: 0,
            max_chunks: 3,
        })
        .chunk("doc1", &text)
        .unwrap_err();
        assert!(matches!(err, RagError::TooManyChunks { limit: 3, .. }));
    }

    #[test]
    fn test_term_frequencies_attached() {
        let chunks = chunker(1000, 10, 0).chunk("doc1", "Rust rust cargo").unwrap();
        assert_eq!(chunks[0].terms.get("rust"), Some(&2));
        assert_eq!(chunks[0].terms.get("cargo"), Some(&1));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunker(12, 2, 3).chunk("doc1", text).unwrap();
        let c2 = chunker(12, 2, 3).chunk("doc1", text).unwrap();
        assert_eq!(c1, c2);
    }
}
