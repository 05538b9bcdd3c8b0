//! Immutable index snapshots.
//!
//! An [`IndexSnapshot`] bundles the indexed documents, their chunks, the
//! inverted index, and the topic clusters. Snapshots are never mutated once
//! published: [`IndexSnapshot::with_document`] and
//! [`IndexSnapshot::without_document`] build a successor, and the store
//! swaps it in atomically. Readers holding an older `Arc<IndexSnapshot>`
//! keep a consistent view for as long as they need it.

pub mod cluster;
pub mod inverted;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkRef, Document, DocumentStatus};

pub use cluster::{Cluster, ClusterMap};
pub use inverted::{InvertedIndex, Postings};

/// Tunables that shape index construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSettings {
    /// Keywords each chunk contributes as topic clusters.
    pub topic_terms_per_chunk: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            topic_terms_per_chunk: 3,
        }
    }
}

/// A document together with its chunks, as held by a snapshot.
#[derive(Debug)]
pub struct IndexedDocument {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    settings: IndexSettings,
    version: u64,
    documents: BTreeMap<String, Arc<IndexedDocument>>,
    inverted: InvertedIndex,
    clusters: ClusterMap,
}

impl IndexSnapshot {
    pub fn new(settings: IndexSettings) -> Self {
        Self {
            settings,
            version: 0,
            documents: BTreeMap::new(),
            inverted: InvertedIndex::new(),
            clusters: ClusterMap::new(),
        }
    }

    pub fn settings(&self) -> IndexSettings {
        self.settings
    }

    /// Incremented on every publish.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.documents.contains_key(document_id)
    }

    pub fn document(&self, document_id: &str) -> Option<&IndexedDocument> {
        self.documents.get(document_id).map(Arc::as_ref)
    }

    /// Indexed documents in id order.
    pub fn documents(&self) -> impl Iterator<Item = &IndexedDocument> {
        self.documents.values().map(Arc::as_ref)
    }

    pub fn chunk(&self, reference: &ChunkRef) -> Option<&Chunk> {
        self.documents
            .get(&reference.document_id)
            .and_then(|d| d.chunks.get(reference.chunk_index))
    }

    pub fn inverted(&self) -> &InvertedIndex {
        &self.inverted
    }

    pub fn clusters(&self) -> &ClusterMap {
        &self.clusters
    }

    /// Build the successor snapshot that also contains `document`.
    ///
    /// Fails with [`RagError::IndexCorruption`] if the chunks do not
    /// describe `document` exactly; `self` is left untouched either way.
    pub fn with_document(&self, mut document: Document, chunks: Vec<Chunk>) -> Result<Self> {
        if self.documents.contains_key(&document.id) {
            return Err(RagError::IndexCorruption(format!(
                "document {} is already indexed",
                document.id
            )));
        }
        validate_chunks(&document, &chunks)?;

        let mut next = self.clone();
        for chunk in &chunks {
            next.inverted.insert(chunk);
            next.clusters
                .insert(chunk, self.settings.topic_terms_per_chunk);
        }
        document.status = DocumentStatus::Indexed;
        next.documents.insert(
            document.id.clone(),
            Arc::new(IndexedDocument { document, chunks }),
        );
        next.version += 1;
        Ok(next)
    }

    /// Build the successor snapshot without `document_id`.
    pub fn without_document(&self, document_id: &str) -> Result<Self> {
        let entry = self
            .documents
            .get(document_id)
            .ok_or_else(|| RagError::DocumentNotFound(document_id.to_string()))?;

        let mut next = self.clone();
        for chunk in &entry.chunks {
            next.inverted.remove(chunk)?;
            next.clusters
                .remove(chunk, self.settings.topic_terms_per_chunk)?;
        }
        next.documents.remove(document_id);
        next.version += 1;
        Ok(next)
    }

    /// An empty successor with the same settings.
    pub fn cleared(&self) -> Self {
        Self {
            version: self.version + 1,
            ..Self::new(self.settings)
        }
    }

    /// Query-visible equality: same documents, postings, and clusters.
    pub fn same_contents(&self, other: &IndexSnapshot) -> bool {
        self.documents.keys().eq(other.documents.keys())
            && self.inverted == other.inverted
            && self.clusters == other.clusters
    }
}

impl Default for IndexSnapshot {
    fn default() -> Self {
        Self::new(IndexSettings::default())
    }
}

fn validate_chunks(document: &Document, chunks: &[Chunk]) -> Result<()> {
    if chunks.is_empty() {
        return Err(RagError::IndexCorruption(format!(
            "document {} has no chunks",
            document.id
        )));
    }
    for (position, chunk) in chunks.iter().enumerate() {
        let reference = chunk.reference();
        if chunk.document_id != document.id || chunk.chunk_index != position {
            return Err(RagError::IndexCorruption(format!(
                "chunk {} out of place at position {} of document {}",
                reference, position, document.id
            )));
        }
        let matches_source = chunk.start < chunk.end
            && document.text.get(chunk.start..chunk.end) == Some(chunk.text.as_str());
        if !matches_source {
            return Err(RagError::IndexCorruption(format!(
                "chunk {} text does not match source range {}..{}",
                reference, chunk.start, chunk.end
            )));
        }
    }
    Ok(())
}
