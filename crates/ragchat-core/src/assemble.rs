//! Context assembly: turn ranked passages into a bounded prompt context.
//!
//! Each passage is rendered as a block:
//!
//! ```text
//! [<ref_id>] <document name>
//! <chunk text>
//!
//! ```
//!
//! Blocks are appended greedily in retrieval order. A block that does not
//! fit the remaining budget is skipped whole and scanning continues, so a
//! smaller passage further down may still be included.

use serde::Serialize;

use crate::models::{Passage, RetrievalResult};

/// Rough characters-per-token ratio used for budget estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token cost of `text`: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Provenance of one passage included in the context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextReference {
    pub ref_id: String,
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssembledContext {
    pub text: String,
    /// Included passages, in inclusion order.
    pub references: Vec<ContextReference>,
    pub tokens_used: usize,
    /// Passages dropped because they did not fit.
    pub skipped: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

pub fn render_block(passage: &Passage) -> String {
    format!(
        "[{}] {}\n{}\n\n",
        passage.reference, passage.document_name, passage.text
    )
}

/// Pack `result` into at most `token_budget` estimated tokens.
pub fn assemble(result: &RetrievalResult, token_budget: usize) -> AssembledContext {
    let mut ctx = AssembledContext::default();
    for passage in &result.passages {
        let block = render_block(passage);
        let cost = estimate_tokens(&block);
        if ctx.tokens_used + cost > token_budget {
            ctx.skipped += 1;
            continue;
        }
        ctx.text.push_str(&block);
        ctx.tokens_used += cost;
        ctx.references.push(ContextReference {
            ref_id: passage.reference.to_string(),
            document_id: passage.reference.document_id.clone(),
            document_name: passage.document_name.clone(),
            chunk_index: passage.reference.chunk_index,
            score: passage.score,
        });
    }
    ctx
}
