//! Upload pipeline: validate → admit → extract → chunk → publish.
//!
//! ```text
//! bytes ──▶ validate ──▶ Store::admit ──▶ extract (blocking pool)
//!                              │                  │
//!                        already known        Chunker
//!                              │                  │
//!                              ▼                  ▼
//!                       UploadStatus      Store::add (atomic publish)
//! ```
//!
//! Any failure after admission marks the document `failed` in the store;
//! the published index is never touched by a failed upload.

use std::path::Path;
use std::sync::Arc;

use ragchat_core::chunk::Chunker;
use ragchat_core::error::{RagError, Result};
use ragchat_core::models::{Chunk, Document};
use ragchat_core::store::{Admission, Store};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::extract::{content_type_for, extract_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Indexed,
    AlreadyIndexed,
    InProgress,
}

/// Result of one upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadStatus {
    pub document_id: String,
    pub name: String,
    pub state: UploadState,
    /// Chunks published by this upload (0 unless `Indexed`).
    pub chunks: usize,
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    chunker: Chunker,
    limits: UploadConfig,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>, chunker: Chunker, limits: UploadConfig) -> Self {
        Self {
            store,
            chunker,
            limits,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Ingest one uploaded file.
    pub async fn ingest(&self, name: &str, bytes: Vec<u8>) -> Result<UploadStatus> {
        let content_type = self.check_extension(name)?;
        if bytes.is_empty() {
            return Err(RagError::UnsupportedFormat(format!("{} is empty", name)));
        }

        let mut document = Document::new(name, content_type, &bytes, String::new());
        let status = |state, chunks| UploadStatus {
            document_id: document.id.clone(),
            name: name.to_string(),
            state,
            chunks,
        };

        match self.store.admit(&document).await? {
            Admission::New => {}
            Admission::AlreadyIndexed => {
                debug!(document_id = %document.id, name, "already indexed");
                return Ok(status(UploadState::AlreadyIndexed, 0));
            }
            Admission::InProgress => {
                debug!(document_id = %document.id, name, "ingestion already in progress");
                return Ok(status(UploadState::InProgress, 0));
            }
        }
        let pending = status(UploadState::Indexed, 0);

        match self.process(&document.id, content_type, bytes).await {
            Ok((text, chunks)) => {
                let count = chunks.len();
                document.text = text;
                if let Err(e) = self.store.add(document, chunks).await {
                    self.mark_failed(&pending.document_id, &e.user_message()).await;
                    return Err(e);
                }
                info!(name, chunks = count, "upload indexed");
                Ok(UploadStatus {
                    chunks: count,
                    ..pending
                })
            }
            Err(e) => {
                warn!(name, error = %e, "upload rejected");
                self.mark_failed(&document.id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Read and ingest a file from disk.
    pub async fn ingest_path(&self, path: &Path) -> Result<UploadStatus> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            RagError::UnsupportedFormat(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.ingest(&name, bytes).await
    }

    /// Record a failure; the upload's own error takes precedence over this one.
    async fn mark_failed(&self, document_id: &str, reason: &str) {
        if let Err(e) = self.store.fail(document_id, reason).await {
            warn!(document_id, error = %e, "could not record upload failure");
        }
    }

    fn check_extension(&self, name: &str) -> Result<&'static str> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let allowed = self
            .limits
            .allowed_extensions
            .iter()
            .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&ext));
        match content_type_for(name) {
            Some(content_type) if allowed => Ok(content_type),
            _ => Err(RagError::UnsupportedFormat(format!(
                "{}: allowed file types are {}",
                name,
                self.limits.allowed_extensions.join(", ")
            ))),
        }
    }

    async fn process(
        &self,
        document_id: &str,
        content_type: &'static str,
        bytes: Vec<u8>,
    ) -> Result<(String, Vec<Chunk>)> {
        if bytes.len() > self.limits.max_document_bytes {
            return Err(RagError::DocumentTooLarge {
                size: bytes.len(),
                limit: self.limits.max_document_bytes,
            });
        }
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, content_type))
            .await
            .map_err(|e| RagError::UnsupportedFormat(format!("extraction task failed: {}", e)))??;
        let chunks = self.chunker.chunk(document_id, &text)?;
        debug!(document_id, chunks = chunks.len(), "chunked document");
        Ok((text, chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragchat_core::chunk::ChunkerConfig;
    use ragchat_core::index::IndexSnapshot;
    use ragchat_core::models::{DocumentStatus, DocumentSummary};
    use ragchat_core::store::InMemoryStore;

    fn ingestor(limits: UploadConfig, chunker: ChunkerConfig) -> Ingestor {
        Ingestor::new(
            Arc::new(InMemoryStore::default()),
            Chunker::new(chunker),
            limits,
        )
    }

    fn default_ingestor() -> Ingestor {
        ingestor(UploadConfig::default(), ChunkerConfig::default())
    }

    #[tokio::test]
    async fn test_text_upload_indexed() {
        let ing = default_ingestor();
        let status = ing
            .ingest("notes.txt", b"The sky is blue.".to_vec())
            .await
            .unwrap();
        assert_eq!(status.state, UploadState::Indexed);
        assert_eq!(status.chunks, 1);
        let snap = ing.store().snapshot().await.unwrap();
        assert!(snap.contains(&status.document_id));
    }

    #[tokio::test]
    async fn test_reupload_is_idempotent() {
        let ing = default_ingestor();
        let first = ing.ingest("a.md", b"# Title\n\nBody.".to_vec()).await.unwrap();
        let second = ing.ingest("copy.md", b"# Title\n\nBody.".to_vec()).await.unwrap();
        assert_eq!(second.state, UploadState::AlreadyIndexed);
        assert_eq!(first.document_id, second.document_id);
        assert_eq!(ing.store().list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unknown_extension() {
        let ing = default_ingestor();
        let err = ing.ingest("photo.png", b"\x89PNG".to_vec()).await.unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
        assert!(ing.store().list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_file() {
        let ing = default_ingestor();
        let err = ing.ingest("empty.txt", Vec::new()).await.unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_too_large_marked_failed() {
        let limits = UploadConfig {
            max_document_bytes: 8,
            ..UploadConfig::default()
        };
        let ing = ingestor(limits, ChunkerConfig::default());
        let err = ing
            .ingest("big.txt", b"more than eight bytes".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DocumentTooLarge { limit: 8, .. }));

        let listed = ing.store().list_documents().await.unwrap();
        assert!(matches!(listed[0].status, DocumentStatus::Failed(_)));
        assert!(ing.store().snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_too_many_chunks_marked_failed() {
        let chunker = ChunkerConfig {
            max_chars: 10,
            min_chars: 2,
            overlap_chars: 0,
            max_chunks: 2,
        };
        let ing = ingestor(UploadConfig::default(), chunker);
        let err = ing
            .ingest("long.txt", b"alpha beta gamma delta epsilon zeta eta theta".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::TooManyChunks { limit: 2, .. }));
        assert!(ing.store().snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_doc_rejected_and_failed() {
        let ing = default_ingestor();
        let err = ing.ingest("old.doc", b"\xd0\xcf\x11\xe0".to_vec()).await.unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
        let listed = ing.store().list_documents().await.unwrap();
        assert!(matches!(listed[0].status, DocumentStatus::Failed(_)));
    }

    /// Store whose `fail` always errors, as after a concurrent clear.
    struct ForgetfulStore(InMemoryStore);

    #[async_trait::async_trait]
    impl Store for ForgetfulStore {
        async fn admit(&self, document: &Document) -> Result<Admission> {
            self.0.admit(document).await
        }
        async fn add(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
            self.0.add(document, chunks).await
        }
        async fn fail(&self, document_id: &str, _reason: &str) -> Result<()> {
            Err(RagError::DocumentNotFound(document_id.to_string()))
        }
        async fn remove(&self, document_id: &str) -> Result<()> {
            self.0.remove(document_id).await
        }
        async fn clear(&self) -> Result<()> {
            self.0.clear().await
        }
        async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
            self.0.get_document(document_id).await
        }
        async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
            self.0.list_documents().await
        }
        async fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
            self.0.snapshot().await
        }
    }

    #[tokio::test]
    async fn test_upload_error_survives_failed_bookkeeping() {
        let limits = UploadConfig {
            max_document_bytes: 4,
            ..UploadConfig::default()
        };
        let ing = Ingestor::new(
            Arc::new(ForgetfulStore(InMemoryStore::default())),
            Chunker::default(),
            limits,
        );
        let err = ing.ingest("x.txt", b"hello".to_vec()).await.unwrap_err();
        assert!(matches!(err, RagError::DocumentTooLarge { size: 5, limit: 4 }));
    }

    #[tokio::test]
    async fn test_failed_upload_can_be_retried() {
        let limits = UploadConfig {
            max_document_bytes: 4,
            ..UploadConfig::default()
        };
        let strict = ingestor(limits, ChunkerConfig::default());
        assert!(strict.ingest("x.txt", b"hello".to_vec()).await.is_err());

        let relaxed = Ingestor::new(
            strict.store().clone(),
            Chunker::default(),
            UploadConfig::default(),
        );
        let status = relaxed.ingest("x.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(status.state, UploadState::Indexed);
    }
}
