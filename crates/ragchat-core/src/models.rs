//! Core data models shared by ingestion, indexing, and retrieval.
//!
//! These types represent the documents, chunks, queries, and retrieval
//! results that flow through the RAG pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle state of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Indexed,
    Failed(String),
}

/// An uploaded document and its extracted text.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// SHA-256 of the raw upload bytes (lowercase hex).
    pub id: String,
    /// Display name, usually the uploaded file name.
    pub name: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub uploaded_at: DateTime<Utc>,
    pub status: DocumentStatus,
    /// Extracted plain text; chunk offsets index into this.
    #[serde(skip)]
    pub text: String,
}

impl Document {
    /// Build a pending document whose id is derived from `raw`.
    pub fn new(name: &str, content_type: &str, raw: &[u8], text: String) -> Self {
        Self {
            id: document_id(raw),
            name: name.to_string(),
            content_type: content_type.to_string(),
            size_bytes: raw.len(),
            uploaded_at: Utc::now(),
            status: DocumentStatus::Pending,
            text,
        }
    }
}

/// Content-addressed document identity: hex SHA-256 of the raw bytes.
pub fn document_id(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}

/// Stable reference to one chunk: `"{document_id}.{chunk_index}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChunkRef {
    pub document_id: String,
    pub chunk_index: usize,
}

impl ChunkRef {
    pub fn new(document_id: &str, chunk_index: usize) -> Self {
        Self {
            document_id: document_id.to_string(),
            chunk_index,
        }
    }
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.document_id, self.chunk_index)
    }
}

impl FromStr for ChunkRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (doc, idx) = s
            .rsplit_once('.')
            .ok_or_else(|| format!("invalid reference id '{}': expected <doc>.<index>", s))?;
        if doc.is_empty() {
            return Err(format!("invalid reference id '{}': empty document id", s));
        }
        let chunk_index = idx
            .parse::<usize>()
            .map_err(|_| format!("invalid reference id '{}': bad chunk index", s))?;
        Ok(ChunkRef::new(doc, chunk_index))
    }
}

/// A bounded text segment of one document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    /// Byte offset of the first byte in the parent's extracted text.
    pub start: usize,
    /// Byte offset one past the last byte.
    pub end: usize,
    /// Normalized term → occurrence count.
    pub terms: BTreeMap<String, u32>,
}

impl Chunk {
    pub fn reference(&self) -> ChunkRef {
        ChunkRef::new(&self.document_id, self.chunk_index)
    }
}

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Term-overlap ranking over every target document.
    Naive,
    /// Term-overlap ranking over explicitly referenced documents only.
    Local,
    /// One representative chunk per matching topic cluster.
    Global,
    /// Interleaved naive and global results.
    #[default]
    Hybrid,
}

impl QueryMode {
    pub const ALL: [QueryMode; 4] = [
        QueryMode::Naive,
        QueryMode::Local,
        QueryMode::Global,
        QueryMode::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Naive => "naive",
            QueryMode::Local => "local",
            QueryMode::Global => "global",
            QueryMode::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "Unknown query mode: {}. Use naive, local, global, or hybrid.",
                    s
                )
            })
    }
}

/// Bundles all inputs for a single retrieval.
#[derive(Debug, Clone)]
pub struct Query {
    pub mode: QueryMode,
    pub text: String,
    /// Target document ids. Nothing outside this set is ever returned.
    pub documents: Vec<String>,
    /// Maximum passages in the result (K).
    pub max_passages: usize,
    /// Token budget for the assembled context.
    pub max_tokens: usize,
}

/// Which retrieval structure produced a passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassageOrigin {
    /// Inverted-index term overlap (naive/local).
    Lexical,
    /// Topic cluster representative (global).
    Topical,
}

/// One ranked passage with provenance.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub reference: ChunkRef,
    pub document_name: String,
    pub score: f64,
    pub origin: PassageOrigin,
    pub text: String,
}

/// Ordered retrieval output: no duplicate chunks, scores non-increasing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalResult {
    pub mode: Option<QueryMode>,
    pub passages: Vec<Passage>,
}

impl RetrievalResult {
    pub fn empty(mode: QueryMode) -> Self {
        Self {
            mode: Some(mode),
            passages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }
}

/// Listing entry for one stored document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub size_bytes: usize,
    pub chunks: usize,
    pub uploaded_at: DateTime<Utc>,
    pub status: DocumentStatus,
    pub ref_ids: Vec<String>,
}
