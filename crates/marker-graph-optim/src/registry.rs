//! Bijective mapping between semantic node ids and dense vertex indices.

use anyhow::{ensure, Result};
use marker_graph_core::NodeId;
use std::collections::HashMap;

/// Dense index of a vertex in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexIndex(pub usize);

#[derive(Debug, Clone, Default)]
pub struct VertexRegistry {
    ids: Vec<NodeId>,
    index: HashMap<NodeId, VertexIndex>,
}

impl VertexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`, returning its new index. Each id may be registered once.
    pub fn insert(&mut self, id: NodeId) -> Result<VertexIndex> {
        ensure!(!self.index.contains_key(&id), "duplicate vertex id {id}");
        let idx = VertexIndex(self.ids.len());
        self.index.insert(id.clone(), idx);
        self.ids.push(id);
        debug_assert_eq!(self.ids.len(), self.index.len());
        Ok(idx)
    }

    pub fn index_of(&self, id: &NodeId) -> Option<VertexIndex> {
        self.index.get(id).copied()
    }

    pub fn id_of(&self, idx: VertexIndex) -> Option<&NodeId> {
        self.ids.get(idx.0)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(index, id)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (VertexIndex, &NodeId)> {
        self.ids.iter().enumerate().map(|(i, id)| (VertexIndex(i), id))
    }
}
