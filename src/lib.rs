//! # ragchat
//!
//! Document-grounded chat. Users upload PDF, DOCX, text or Markdown files
//! into a conversation; each message may ask for retrieval in one of four
//! modes (`naive`, `local`, `global`, `hybrid`), and the reply streams back
//! from an OpenAI-compatible completion API with the retrieved passages in
//! its prompt.
//!
//! Indexing, retrieval and context assembly live in the `ragchat-core`
//! crate and have no I/O. This crate adds the application layer:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with defaults and validation |
//! | [`extract`] | Plain text from PDF, DOCX, text and Markdown bytes |
//! | [`ingest`] | Upload validation, admission, extraction and publishing |
//! | [`completion`] | [`completion::CompletionService`] trait and providers |
//! | [`prompt`] | Prompt construction with context and history |
//! | [`session`] | Per-conversation FIFO message processing |
//! | [`logging`] | `tracing` subscriber setup |
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ragchat::completion::create_provider;
//! use ragchat::config::Config;
//! use ragchat::session::{ChatEvent, ChatRequest, SessionCoordinator};
//! use ragchat_core::store::InMemoryStore;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let store = Arc::new(InMemoryStore::new(config.retrieval.index_settings()));
//! let completion = create_provider(&config.completion)?;
//! let chat = SessionCoordinator::new(config, store, completion);
//!
//! chat.upload("conv-1", "notes.txt", b"The sky is blue.".to_vec()).await?;
//! let mut events = chat.query("conv-1", ChatRequest::parse("@ what color is the sky?")).await?;
//! while let Some(event) = events.recv().await {
//!     if let ChatEvent::Token(t) = event {
//!         print!("{}", t);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod config;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod prompt;
pub mod session;
