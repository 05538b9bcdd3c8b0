//! In-memory [`Store`] implementation.
//!
//! The published index lives behind `RwLock<Arc<IndexSnapshot>>`: readers
//! clone the `Arc` and release the lock immediately. Writers serialize on a
//! separate mutex, derive a successor snapshot off to the side, and swap it
//! in with a single pointer store. Pending and failed uploads are tracked
//! outside the snapshot since they are not searchable.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::{RagError, Result};
use crate::index::{IndexSettings, IndexSnapshot};
use crate::models::{Chunk, Document, DocumentStatus, DocumentSummary};

use super::{Admission, Store};

pub struct InMemoryStore {
    published: RwLock<Arc<IndexSnapshot>>,
    staged: Mutex<BTreeMap<String, Document>>,
    writer: Mutex<()>,
}

impl InMemoryStore {
    pub fn new(settings: IndexSettings) -> Self {
        Self {
            published: RwLock::new(Arc::new(IndexSnapshot::new(settings))),
            staged: Mutex::new(BTreeMap::new()),
            writer: Mutex::new(()),
        }
    }

    fn current(&self) -> Result<Arc<IndexSnapshot>> {
        Ok(self.published.read().map_err(poisoned)?.clone())
    }

    fn publish(&self, next: IndexSnapshot) -> Result<()> {
        let version = next.version();
        *self.published.write().map_err(poisoned)? = Arc::new(next);
        debug!(version, "published index snapshot");
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(IndexSettings::default())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> RagError {
    RagError::IndexCorruption("store lock poisoned".to_string())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn admit(&self, document: &Document) -> Result<Admission> {
        let _writer = self.writer.lock().map_err(poisoned)?;
        if self.current()?.contains(&document.id) {
            return Ok(Admission::AlreadyIndexed);
        }
        let mut staged = self.staged.lock().map_err(poisoned)?;
        if let Some(existing) = staged.get(&document.id) {
            if existing.status == DocumentStatus::Pending {
                return Ok(Admission::InProgress);
            }
        }
        let mut pending = document.clone();
        pending.status = DocumentStatus::Pending;
        staged.insert(pending.id.clone(), pending);
        Ok(Admission::New)
    }

    async fn add(&self, document: Document, chunks: Vec<Chunk>) -> Result<()> {
        let _writer = self.writer.lock().map_err(poisoned)?;
        let id = document.id.clone();
        let name = document.name.clone();
        let chunk_count = chunks.len();

        let next = match self.current()?.with_document(document, chunks) {
            Ok(next) => next,
            Err(e) => {
                error!(document_id = %id, error = %e, "rejected index update");
                return Err(e);
            }
        };
        self.publish(next)?;
        self.staged.lock().map_err(poisoned)?.remove(&id);
        info!(document_id = %id, name = %name, chunks = chunk_count, "indexed document");
        Ok(())
    }

    async fn fail(&self, document_id: &str, reason: &str) -> Result<()> {
        let mut staged = self.staged.lock().map_err(poisoned)?;
        let doc = staged
            .get_mut(document_id)
            .ok_or_else(|| RagError::DocumentNotFound(document_id.to_string()))?;
        warn!(document_id, reason, "document ingestion failed");
        doc.status = DocumentStatus::Failed(reason.to_string());
        Ok(())
    }

    async fn remove(&self, document_id: &str) -> Result<()> {
        let _writer = self.writer.lock().map_err(poisoned)?;
        if self
            .staged
            .lock()
            .map_err(poisoned)?
            .remove(document_id)
            .is_some()
        {
            debug!(document_id, "removed staged document");
            return Ok(());
        }
        let next = self.current()?.without_document(document_id)?;
        self.publish(next)?;
        info!(document_id, "removed document");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _writer = self.writer.lock().map_err(poisoned)?;
        let fresh = self.current()?.cleared();
        self.publish(fresh)?;
        self.staged.lock().map_err(poisoned)?.clear();
        info!("cleared all documents");
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<Document>> {
        if let Some(indexed) = self.current()?.document(document_id) {
            return Ok(Some(indexed.document.clone()));
        }
        Ok(self
            .staged
            .lock()
            .map_err(poisoned)?
            .get(document_id)
            .cloned())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let snapshot = self.current()?;
        let mut out: Vec<DocumentSummary> = snapshot
            .documents()
            .map(|indexed| {
                let d = &indexed.document;
                DocumentSummary {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    size_bytes: d.size_bytes,
                    chunks: indexed.chunks.len(),
                    uploaded_at: d.uploaded_at,
                    status: d.status.clone(),
                    ref_ids: indexed
                        .chunks
                        .iter()
                        .map(|c| c.reference().to_string())
                        .collect(),
                }
            })
            .collect();
        for d in self.staged.lock().map_err(poisoned)?.values() {
            out.push(DocumentSummary {
                id: d.id.clone(),
                name: d.name.clone(),
                size_bytes: d.size_bytes,
                chunks: 0,
                uploaded_at: d.uploaded_at,
                status: d.status.clone(),
                ref_ids: Vec::new(),
            });
        }
        out.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        self.current()
    }
}
