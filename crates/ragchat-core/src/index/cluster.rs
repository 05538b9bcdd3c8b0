//! Topic clusters for global retrieval.
//!
//! Every chunk nominates its top keywords (see [`keywords`]); each keyword
//! names a cluster. A cluster records its member chunks, weighted by the
//! keyword's frequency in the member, and one aggregate term profile per
//! document so query-time scoring can be restricted to a target set
//! without touching other documents' terms.
//!
//! Clusters are shared between snapshots through `Arc` and copied on write.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkRef};
use crate::text::keywords;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cluster {
    members: BTreeMap<ChunkRef, u32>,
    profiles: BTreeMap<String, BTreeMap<String, u32>>,
}

impl Cluster {
    /// Member chunk → weight (keyword frequency in that chunk).
    pub fn members(&self) -> &BTreeMap<ChunkRef, u32> {
        &self.members
    }

    /// Summed term frequencies of this cluster's members from `document_id`.
    pub fn profile(&self, document_id: &str) -> Option<&BTreeMap<String, u32>> {
        self.profiles.get(document_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMap {
    clusters: BTreeMap<String, Arc<Cluster>>,
}

impl ClusterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `chunk` under each of its top `topic_terms` keywords.
    pub fn insert(&mut self, chunk: &Chunk, topic_terms: usize) {
        let reference = chunk.reference();
        for key in keywords(&chunk.terms, topic_terms) {
            let weight = chunk.terms.get(&key).copied().unwrap_or(0);
            let cluster = Arc::make_mut(self.clusters.entry(key).or_default());
            cluster.members.insert(reference.clone(), weight);
            let profile = cluster
                .profiles
                .entry(chunk.document_id.clone())
                .or_default();
            for (term, tf) in &chunk.terms {
                *profile.entry(term.clone()).or_insert(0) += tf;
            }
        }
    }

    /// Undo [`insert`](Self::insert) for `chunk`.
    pub fn remove(&mut self, chunk: &Chunk, topic_terms: usize) -> Result<()> {
        let reference = chunk.reference();
        for key in keywords(&chunk.terms, topic_terms) {
            let cluster = self.clusters.get_mut(&key).ok_or_else(|| {
                RagError::IndexCorruption(format!(
                    "cluster '{}' missing while removing {}",
                    key, reference
                ))
            })?;
            let cluster = Arc::make_mut(cluster);
            if cluster.members.remove(&reference).is_none() {
                return Err(RagError::IndexCorruption(format!(
                    "cluster '{}' has no member {}",
                    key, reference
                )));
            }
            let profile = cluster
                .profiles
                .get_mut(&chunk.document_id)
                .ok_or_else(|| {
                    RagError::IndexCorruption(format!(
                        "cluster '{}' has no profile for document {}",
                        key, chunk.document_id
                    ))
                })?;
            for (term, tf) in &chunk.terms {
                match profile.get_mut(term) {
                    Some(total) if *total >= *tf => {
                        *total -= tf;
                        if *total == 0 {
                            profile.remove(term);
                        }
                    }
                    _ => {
                        return Err(RagError::IndexCorruption(format!(
                            "cluster '{}' profile underflow for term '{}'",
                            key, term
                        )))
                    }
                }
            }
            if profile.is_empty() {
                cluster.profiles.remove(&chunk.document_id);
            }
            if cluster.members.is_empty() {
                if !cluster.profiles.is_empty() {
                    return Err(RagError::IndexCorruption(format!(
                        "cluster '{}' has profiles but no members",
                        key
                    )));
                }
                self.clusters.remove(&key);
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Cluster> {
        self.clusters.get(key).map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Cluster)> {
        self.clusters.iter().map(|(key, cluster)| (key, cluster.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::term_frequencies;

    fn chunk(doc: &str, idx: usize, text: &str) -> Chunk {
        Chunk {
            document_id: doc.to_string(),
            chunk_index: idx,
            text: text.to_string(),
            start: 0,
            end: text.len(),
            terms: term_frequencies(text),
        }
    }

    #[test]
    fn test_shared_keyword_groups_documents() {
        let mut map = ClusterMap::new();
        map.insert(&chunk("d1", 0, "rust compiler rust borrow"), 2);
        map.insert(&chunk("d2", 0, "rust tooling rust cargo"), 2);

        let rust = map.get("rust").unwrap();
        assert_eq!(rust.members().len(), 2);
        assert_eq!(rust.members()[&ChunkRef::new("d1", 0)], 2);
        assert_eq!(rust.profile("d2").unwrap()["cargo"], 1);
        assert!(rust.profile("d2").unwrap().get("borrow").is_none());
    }

    #[test]
    fn test_remove_round_trip() {
        let mut map = ClusterMap::new();
        map.insert(&chunk("d1", 0, "rust compiler rust"), 3);
        let before = map.clone();

        let c = chunk("d2", 0, "rust cargo cargo");
        map.insert(&c, 3);
        assert_ne!(map, before);
        map.remove(&c, 3).unwrap();
        assert_eq!(map, before);
    }

    #[test]
    fn test_clone_copies_only_touched_clusters() {
        let mut base = ClusterMap::new();
        base.insert(&chunk("d1", 0, "compiler compiler rust"), 2);

        let mut next = base.clone();
        next.insert(&chunk("d2", 0, "rust rust tooling"), 1);

        assert!(Arc::ptr_eq(&base.clusters["compiler"], &next.clusters["compiler"]));
        assert!(!Arc::ptr_eq(&base.clusters["rust"], &next.clusters["rust"]));
        assert_eq!(base.get("rust").unwrap().members().len(), 1);
        assert_eq!(next.get("rust").unwrap().members().len(), 2);
    }

    #[test]
    fn test_remove_twice_is_corruption() {
        let mut map = ClusterMap::new();
        let c = chunk("d1", 0, "rust compiler");
        map.insert(&c, 3);
        map.remove(&c, 3).unwrap();
        assert!(matches!(map.remove(&c, 3), Err(RagError::IndexCorruption(_))));
    }
}
