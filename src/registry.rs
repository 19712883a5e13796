//! Bidirectional id ↔ dense-index mapping.
//!
//! Every matrix in this crate is indexed by a dense `usize` in `[0, n)`. The
//! registry owns the mapping from database ids to those indices for one entity
//! type. Indices are assigned in insertion order and are only stable within a
//! single run; anything persisted across runs is keyed by id.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{Result, SimilarityError};

#[derive(Clone, Debug, Default)]
pub struct IndexRegistry<K> {
    ids: Vec<K>,
    index: HashMap<K, usize>,
}

impl<K> IndexRegistry<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a registry from ids in order. Fails on the first repeated id.
    pub fn from_ids<I>(ids: I) -> std::result::Result<Self, K>
    where
        I: IntoIterator<Item = K>,
    {
        let mut registry = Self::new();
        for id in ids {
            if registry.index.contains_key(&id) {
                return Err(id);
            }
            registry.insert(id);
        }
        Ok(registry)
    }

    /// Register `id` and return its dense index. Re-inserting returns the existing index.
    pub fn insert(&mut self, id: K) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.index.insert(id.clone(), idx);
        self.ids.push(id);
        idx
    }

    #[inline]
    pub fn id_to_index(&self, id: &K) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[inline]
    pub fn index_to_id(&self, index: usize) -> Option<&K> {
        self.ids.get(index)
    }

    /// Like [`id_to_index`](Self::id_to_index) but reports the missing id as an error.
    pub fn require_index(&self, id: &K) -> Result<usize> {
        self.id_to_index(id)
            .ok_or_else(|| SimilarityError::UnknownEntity(format!("{:?}", id)))
    }

    pub fn require_id(&self, index: usize) -> Result<&K> {
        self.index_to_id(index)
            .ok_or_else(|| SimilarityError::UnknownEntity(format!("index {}", index)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &K) -> bool {
        self.index.contains_key(id)
    }

    /// Ids in index order.
    pub fn ids(&self) -> &[K] {
        &self.ids
    }
}
