//! Inverted index: normalized term → postings.
//!
//! One shared index spans every document; scoping to a query's target set
//! happens at query time. Each posting carries the term's frequency in the
//! chunk, which the retriever turns into a TF-style weight.
//!
//! Posting lists sit behind `Arc`, so cloning the index for a new snapshot
//! copies pointers; only the lists a write touches are copied.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkRef};

/// Postings for one term: chunk → term frequency.
pub type Postings = BTreeMap<ChunkRef, u32>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvertedIndex {
    postings: BTreeMap<String, Arc<Postings>>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one posting per distinct term of `chunk`.
    pub fn insert(&mut self, chunk: &Chunk) {
        let reference = chunk.reference();
        for (term, tf) in &chunk.terms {
            Arc::make_mut(self.postings.entry(term.clone()).or_default())
                .insert(reference.clone(), *tf);
        }
    }

    /// Remove every posting `chunk` contributed.
    ///
    /// A missing posting means the index and the chunk disagree; that is
    /// reported as [`RagError::IndexCorruption`].
    pub fn remove(&mut self, chunk: &Chunk) -> Result<()> {
        let reference = chunk.reference();
        for term in chunk.terms.keys() {
            let list = self.postings.get_mut(term).ok_or_else(|| {
                RagError::IndexCorruption(format!(
                    "term '{}' has no postings while removing {}",
                    term, reference
                ))
            })?;
            let list = Arc::make_mut(list);
            if list.remove(&reference).is_none() {
                return Err(RagError::IndexCorruption(format!(
                    "posting for '{}' missing chunk {}",
                    term, reference
                )));
            }
            if list.is_empty() {
                self.postings.remove(term);
            }
        }
        Ok(())
    }

    pub fn postings(&self, term: &str) -> Option<&Postings> {
        self.postings.get(term).map(Arc::as_ref)
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}
