//! Query-time retrieval over an [`IndexSnapshot`].
//!
//! Four strategies, selected by [`QueryMode`]:
//!
//! | Mode | Behavior |
//! |------|----------|
//! | `naive` | Rank every matching chunk of the target set by term overlap |
//! | `local` | Same ranking, over explicitly referenced documents only |
//! | `global` | Rank topic clusters, emit one representative chunk each |
//! | `hybrid` | Interleave naive and global, starting with naive |
//!
//! # Scoring
//!
//! A chunk matching `m` distinct query terms scores `m + w / (1 + w)`,
//! where `w = Σ (1 + ln tf) · ln(1 + N / df)` over the matched terms and
//! `N`, `df` are counted within the target set. The fractional part never
//! reaches 1, so a chunk sharing more terms always outranks one sharing
//! fewer. Clusters are scored the same way from their per-document term
//! profiles.
//!
//! Equal scores fall back to a total order: earlier upload first, then
//! lower chunk index, then document id. Identical inputs therefore always
//! produce identical output.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::Result;
use crate::index::{IndexSnapshot, IndexedDocument};
use crate::models::{ChunkRef, Passage, PassageOrigin, Query, QueryMode, RetrievalResult};
use crate::store::Store;
use crate::text::query_terms;

/// Fetch the current snapshot from `store` and run `query` against it.
pub async fn search<S: Store + ?Sized>(store: &S, query: &Query) -> Result<RetrievalResult> {
    let snapshot = store.snapshot().await?;
    Ok(retrieve(&snapshot, query))
}

/// Run `query` against `snapshot`.
///
/// The result never contains a chunk outside `query.documents`, holds at
/// most `query.max_passages` passages, and is ordered by non-increasing
/// score without duplicates.
pub fn retrieve(snapshot: &IndexSnapshot, query: &Query) -> RetrievalResult {
    let targets = Targets::new(snapshot, &query.documents);
    let terms = query_terms(&query.text);
    if targets.is_empty() || terms.is_empty() || query.max_passages == 0 {
        debug!(
            mode = %query.mode,
            targets = targets.len(),
            terms = terms.len(),
            "nothing to retrieve"
        );
        return RetrievalResult::empty(query.mode);
    }

    let k = query.max_passages;
    let passages = match query.mode {
        QueryMode::Naive => naive(&targets, snapshot, &terms, k),
        QueryMode::Local => local(&targets, snapshot, &terms, k),
        QueryMode::Global => global(&targets, snapshot, &terms, k),
        QueryMode::Hybrid => hybrid(&targets, snapshot, &terms, k),
    };
    debug!(
        mode = %query.mode,
        targets = targets.len(),
        passages = passages.len(),
        "retrieved passages"
    );
    RetrievalResult {
        mode: Some(query.mode),
        passages,
    }
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// The indexed documents a query may draw from.
struct Targets<'a> {
    docs: BTreeMap<&'a str, &'a IndexedDocument>,
}

impl<'a> Targets<'a> {
    fn new(snapshot: &'a IndexSnapshot, ids: &[String]) -> Self {
        let docs = ids
            .iter()
            .filter_map(|id| snapshot.document(id).map(|d| (d.document.id.as_str(), d)))
            .collect();
        Self { docs }
    }

    fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn len(&self) -> usize {
        self.docs.len()
    }

    fn contains(&self, document_id: &str) -> bool {
        self.docs.contains_key(document_id)
    }

    fn ids(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.docs.keys().copied()
    }

    fn chunk_count(&self) -> usize {
        self.docs.values().map(|d| d.chunks.len()).sum()
    }

    /// Deterministic order among equally scored chunks.
    fn tie(&self, a: &ChunkRef, b: &ChunkRef) -> Ordering {
        let uploaded = |r: &ChunkRef| {
            self.docs
                .get(r.document_id.as_str())
                .map(|d| d.document.uploaded_at)
        };
        uploaded(a)
            .cmp(&uploaded(b))
            .then(a.chunk_index.cmp(&b.chunk_index))
            .then_with(|| a.document_id.cmp(&b.document_id))
    }

    fn passage(&self, reference: &ChunkRef, score: f64, origin: PassageOrigin) -> Option<Passage> {
        let doc = self.docs.get(reference.document_id.as_str())?;
        let chunk = doc.chunks.get(reference.chunk_index)?;
        Some(Passage {
            reference: reference.clone(),
            document_name: doc.document.name.clone(),
            score,
            origin,
            text: chunk.text.clone(),
        })
    }
}

fn idf(total: usize, frequency: usize) -> f64 {
    (1.0 + total as f64 / frequency as f64).ln()
}

fn overlap_score(matched: usize, weight: f64) -> f64 {
    matched as f64 + weight / (1.0 + weight)
}

/// Score every target chunk sharing at least one term with the query.
fn lexical_scores(
    targets: &Targets,
    snapshot: &IndexSnapshot,
    terms: &[String],
) -> Vec<(ChunkRef, f64)> {
    let total = targets.chunk_count();
    let mut acc: BTreeMap<ChunkRef, (usize, f64)> = BTreeMap::new();

    for term in terms {
        let Some(postings) = snapshot.inverted().postings(term) else {
            continue;
        };
        let hits: Vec<(&ChunkRef, u32)> = postings
            .iter()
            .filter(|(r, _)| targets.contains(&r.document_id))
            .map(|(r, tf)| (r, *tf))
            .collect();
        if hits.is_empty() {
            continue;
        }
        let term_idf = idf(total, hits.len());
        for (reference, tf) in hits {
            let entry = acc.entry(reference.clone()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += (1.0 + (tf as f64).ln()) * term_idf;
        }
    }

    acc.into_iter()
        .map(|(r, (matched, weight))| (r, overlap_score(matched, weight)))
        .collect()
}

fn rank_lexical(
    targets: &Targets,
    snapshot: &IndexSnapshot,
    terms: &[String],
    k: usize,
) -> Vec<Passage> {
    let mut scored = lexical_scores(targets, snapshot, terms);
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| targets.tie(&a.0, &b.0))
    });
    scored
        .iter()
        .take(k)
        .filter_map(|(r, score)| targets.passage(r, *score, PassageOrigin::Lexical))
        .collect()
}

fn naive(targets: &Targets, snapshot: &IndexSnapshot, terms: &[String], k: usize) -> Vec<Passage> {
    rank_lexical(targets, snapshot, terms, k)
}

/// The caller narrows `targets` to explicitly referenced documents; within
/// them the ranking is lexical.
fn local(targets: &Targets, snapshot: &IndexSnapshot, terms: &[String], k: usize) -> Vec<Passage> {
    rank_lexical(targets, snapshot, terms, k)
}

fn global(targets: &Targets, snapshot: &IndexSnapshot, terms: &[String], k: usize) -> Vec<Passage> {
    let lexical: BTreeMap<ChunkRef, f64> =
        lexical_scores(targets, snapshot, terms).into_iter().collect();

    // Query-term frequencies of each cluster, restricted to target documents.
    let mut eligible = Vec::new();
    for (key, cluster) in snapshot.clusters().iter() {
        let profiles: Vec<_> = targets.ids().filter_map(|id| cluster.profile(id)).collect();
        if profiles.is_empty() {
            continue;
        }
        let tfs: Vec<u32> = terms
            .iter()
            .map(|t| profiles.iter().filter_map(|p| p.get(t)).sum())
            .collect();
        eligible.push((key, cluster, tfs));
    }

    let total = eligible.len();
    let cluster_freq: Vec<usize> = (0..terms.len())
        .map(|i| eligible.iter().filter(|(_, _, tfs)| tfs[i] > 0).count())
        .collect();

    let mut ranked: Vec<_> = eligible
        .iter()
        .filter_map(|(key, cluster, tfs)| {
            let mut matched = 0;
            let mut weight = 0.0;
            for (i, tf) in tfs.iter().enumerate() {
                if *tf == 0 {
                    continue;
                }
                matched += 1;
                weight += (1.0 + (*tf as f64).ln()) * idf(total, cluster_freq[i]);
            }
            (matched > 0).then(|| (*key, *cluster, overlap_score(matched, weight)))
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    let mut picked: BTreeSet<&ChunkRef> = BTreeSet::new();
    let mut out = Vec::new();
    for (key, cluster, score) in ranked {
        if out.len() >= k {
            break;
        }
        let lexical_of = |r: &ChunkRef| lexical.get(r).copied().unwrap_or(0.0);
        let representative = cluster
            .members()
            .iter()
            .filter(|(r, _)| targets.contains(&r.document_id) && !picked.contains(r))
            .max_by(|a, b| {
                lexical_of(a.0)
                    .partial_cmp(&lexical_of(b.0))
                    .unwrap_or(Ordering::Equal)
                    .then(a.1.cmp(b.1))
                    .then_with(|| targets.tie(b.0, a.0))
            });
        let Some((reference, _)) = representative else {
            continue;
        };
        picked.insert(reference);
        if let Some(passage) = targets.passage(reference, score, PassageOrigin::Topical) {
            debug!(cluster = %key, chunk = %reference, score, "cluster representative");
            out.push(passage);
        }
    }
    out
}

fn hybrid(targets: &Targets, snapshot: &IndexSnapshot, terms: &[String], k: usize) -> Vec<Passage> {
    let lexical = naive(targets, snapshot, terms, k);
    let topical = global(targets, snapshot, terms, k);
    let norm_lexical = normalize_scores(&lexical.iter().map(|p| p.score).collect::<Vec<_>>());
    let norm_topical = normalize_scores(&topical.iter().map(|p| p.score).collect::<Vec<_>>());

    let mut seen: BTreeSet<ChunkRef> = BTreeSet::new();
    let mut out = Vec::with_capacity(k);
    let (mut i, mut j) = (0, 0);
    let mut lexical_turn = true;
    let mut ceiling = f64::INFINITY;

    while out.len() < k {
        let pick = if lexical_turn {
            next_unseen(&lexical, &norm_lexical, &mut i, &seen)
                .or_else(|| next_unseen(&topical, &norm_topical, &mut j, &seen))
        } else {
            next_unseen(&topical, &norm_topical, &mut j, &seen)
                .or_else(|| next_unseen(&lexical, &norm_lexical, &mut i, &seen))
        };
        let Some((passage, score)) = pick else {
            break;
        };
        // Interleaving can raise a later score; clamp to keep the order valid.
        ceiling = ceiling.min(score);
        seen.insert(passage.reference.clone());
        out.push(Passage {
            score: ceiling,
            ..passage.clone()
        });
        lexical_turn = !lexical_turn;
    }
    out
}

fn next_unseen<'p>(
    passages: &'p [Passage],
    scores: &[f64],
    cursor: &mut usize,
    seen: &BTreeSet<ChunkRef>,
) -> Option<(&'p Passage, f64)> {
    while *cursor < passages.len() {
        let at = *cursor;
        *cursor += 1;
        if !seen.contains(&passages[at].reference) {
            return Some((&passages[at], scores[at]));
        }
    }
    None
}
