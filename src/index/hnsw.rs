//! HNSW graph model.
//!
//! Node `i` has `levels[i]` levels (its top level plus one). Its neighbor
//! slots start at `offsets[i]`; level `l` occupies
//! `cum_nneighbor_per_level[l]..cum_nneighbor_per_level[l + 1]` of them.
//! Unused slots hold `-1`.

use crate::error::{IndexIoError, Result};

use super::Index;

/// Persisted HNSW graph.
#[derive(Debug, Clone, PartialEq)]
pub struct HnswGraph {
    pub assign_probas: Vec<f64>,
    pub cum_nneighbor_per_level: Vec<i32>,
    pub levels: Vec<i32>,
    pub offsets: Vec<u64>,
    pub neighbors: Vec<i32>,
    pub entry_point: i32,
    pub max_level: i32,
    pub ef_construction: i32,
    pub ef_search: i32,
    pub upper_beam: i32,
}

impl HnswGraph {
    /// An empty graph with `m` neighbors per upper level (`2m` on level 0).
    pub fn new(m: usize) -> Self {
        let level_mult = 1.0 / (m.max(2) as f64).ln();
        let mut assign_probas = Vec::new();
        let mut cum_nneighbor_per_level = vec![0];
        let mut nn = 0i32;
        for level in 0.. {
            let proba =
                (-(level as f64) / level_mult).exp() * (1.0 - (-1.0 / level_mult).exp());
            if proba < 1e-9 {
                break;
            }
            assign_probas.push(proba);
            nn += if level == 0 { 2 * m as i32 } else { m as i32 };
            cum_nneighbor_per_level.push(nn);
        }

        HnswGraph {
            assign_probas,
            cum_nneighbor_per_level,
            levels: Vec::new(),
            offsets: vec![0],
            neighbors: Vec::new(),
            entry_point: -1,
            max_level: -1,
            ef_construction: 40,
            ef_search: 16,
            upper_beam: 1,
        }
    }

    /// Number of nodes.
    pub fn ntotal(&self) -> usize {
        self.levels.len()
    }

    /// Add a node whose top level is `level`, with empty neighbor slots.
    pub fn add_node(&mut self, level: usize) -> usize {
        let level = level.min(self.assign_probas.len().saturating_sub(1));
        let slots = self.cum_nneighbor_per_level[level + 1] as u64;
        let node = self.levels.len();

        self.levels.push(level as i32 + 1);
        let start = self.offsets.last().copied().unwrap_or(0);
        self.offsets.push(start + slots);
        self.neighbors.resize((start + slots) as usize, -1);

        if level as i32 > self.max_level {
            self.max_level = level as i32;
            self.entry_point = node as i32;
        }
        node
    }

    /// Neighbor slots of `node` at `level`.
    pub fn neighbors_mut(&mut self, node: usize, level: usize) -> Result<&mut [i32]> {
        if node >= self.levels.len() || level as i32 >= self.levels[node] {
            return Err(IndexIoError::format(
                "hnsw",
                format!("node {node} has no level {level}"),
            ));
        }
        let base = self.offsets[node] as usize;
        let begin = base + self.cum_nneighbor_per_level[level] as usize;
        let end = base + self.cum_nneighbor_per_level[level + 1] as usize;
        Ok(&mut self.neighbors[begin..end])
    }

    /// Check the structural invariants of a decoded graph.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.offsets.len() != self.levels.len() + 1 {
            return Err(format!(
                "offsets has {} entries for {} nodes",
                self.offsets.len(),
                self.levels.len()
            ));
        }
        let last = self.offsets.last().copied().unwrap_or(0);
        if self.neighbors.len() as u64 != last {
            return Err(format!(
                "neighbors has {} entries, offsets end at {last}",
                self.neighbors.len()
            ));
        }
        if self.offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err("offsets are not monotonic".to_string());
        }
        if self.ntotal() > 0 && !(0..self.ntotal() as i64).contains(&(self.entry_point as i64)) {
            return Err(format!("entry point {} out of range", self.entry_point));
        }
        Ok(())
    }
}

/// HNSW index over a storage index.
#[derive(Debug, Clone, PartialEq)]
pub struct HnswIndex {
    pub graph: HnswGraph,
    /// Absent when written without storage.
    pub storage: Option<Box<Index>>,
}
