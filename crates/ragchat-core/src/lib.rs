//! # ragchat core
//!
//! Runtime-agnostic retrieval logic for ragchat: data models, error
//! taxonomy, term analysis, chunking, index structures, the store
//! abstraction, the four retrieval modes, and context assembly.
//!
//! This crate contains no tokio runtime, network, or filesystem I/O.
//!
//! # Example
//!
//! ```rust
//! use ragchat_core::chunk::Chunker;
//! use ragchat_core::index::IndexSnapshot;
//! use ragchat_core::models::{Document, Query, QueryMode};
//! use ragchat_core::{assemble, retrieve};
//!
//! let text = "The sky is blue. Grass is green.";
//! let doc = Document::new("notes.txt", "text/plain", text.as_bytes(), text.to_string());
//! let chunks = Chunker::default().chunk(&doc.id, text).unwrap();
//! let id = doc.id.clone();
//! let snapshot = IndexSnapshot::default().with_document(doc, chunks).unwrap();
//!
//! let query = Query {
//!     mode: QueryMode::Naive,
//!     text: "sky color".to_string(),
//!     documents: vec![id],
//!     max_passages: 3,
//!     max_tokens: 500,
//! };
//! let result = retrieve::retrieve(&snapshot, &query);
//! let context = assemble::assemble(&result, query.max_tokens);
//! assert!(context.text.contains("sky is blue"));
//! ```

pub mod assemble;
pub mod chunk;
pub mod error;
pub mod index;
pub mod models;
pub mod retrieve;
pub mod store;
pub mod text;

pub use error::{RagError, Result};
