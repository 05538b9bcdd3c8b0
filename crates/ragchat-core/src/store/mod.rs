//! Storage abstraction for the document index.
//!
//! The [`Store`] trait covers the document lifecycle (admit, publish, fail,
//! remove) and hands out immutable [`IndexSnapshot`]s for retrieval. A
//! document's chunks and index entries become visible all at once when the
//! store publishes a new snapshot; a reader never sees half a document.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::index::IndexSnapshot;
use crate::models::{Chunk, Document, DocumentSummary};

pub use memory::InMemoryStore;

/// Outcome of [`Store::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Recorded as pending; the caller should extract, chunk, and publish.
    New,
    /// Same content is already indexed; nothing to do.
    AlreadyIndexed,
    /// Same content is being ingested by someone else.
    InProgress,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`admit`](Store::admit) | Record an upload as pending |
/// | [`add`](Store::add) | Publish a document with its chunks |
/// | [`fail`](Store::fail) | Mark a pending document as failed |
/// | [`remove`](Store::remove) | Drop a document and its index entries |
/// | [`clear`](Store::clear) | Drop everything |
/// | [`snapshot`](Store::snapshot) | Current published index |
#[async_trait]
pub trait Store: Send + Sync {
    /// Record `document` as pending unless its content is already known.
    ///
    /// A previously failed document is re-admitted.
    async fn admit(&self, document: &Document) -> Result<Admission>;

    /// Publish `document` with `chunks`, atomically.
    ///
    /// On error the published index is unchanged.
    async fn add(&self, document: Document, chunks: Vec<Chunk>) -> Result<()>;

    /// Mark a pending document as failed with `reason`.
    async fn fail(&self, document_id: &str, reason: &str) -> Result<()>;

    /// Remove a document and every index entry derived from it.
    async fn remove(&self, document_id: &str) -> Result<()>;

    /// Remove every document.
    async fn clear(&self) -> Result<()>;

    /// Look up a document in any state.
    async fn get_document(&self, document_id: &str) -> Result<Option<Document>>;

    /// All documents, oldest upload first.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// The currently published snapshot.
    async fn snapshot(&self) -> Result<Arc<IndexSnapshot>>;
}
