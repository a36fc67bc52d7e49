// Flat vector index
//
// Exhaustive L2 nearest-neighbour search over a small, append-only set of
// embeddings. Entry ids are insertion positions. Persisted as JSON.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Nl2SqlError, Result};

/// Squared Euclidean distance; ordering is the same as L2
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

/// One search hit: entry id and its L2 distance to the query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: usize,
    pub distance: f32,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append a vector, returning its id
    pub fn add(&mut self, vector: Vec<f32>) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(Nl2SqlError::VectorIndex(format!(
                "Vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        self.vectors.push(vector);
        Ok(self.vectors.len() - 1)
    }

    /// Up to `k` nearest entries, nearest first. Equal distances keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(Nl2SqlError::VectorIndex(format!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }

        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(id, vector)| Neighbor {
                id,
                distance: l2_distance_squared(query, vector).sqrt(),
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);
        Ok(neighbors)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let index = Self::read_file(path)?;
        if let Some(bad) = index.vectors.iter().position(|v| v.len() != index.dimension) {
            return Err(Nl2SqlError::VectorIndex(format!(
                "Entry {} in {} has the wrong dimension",
                bad,
                path.display()
            )));
        }
        Ok(index)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vector index {}", path.display()))
            .map_err(|e| Nl2SqlError::VectorIndex(format!("{:#}", e)))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse vector index {}", path.display()))
            .map_err(|e| Nl2SqlError::VectorIndex(format!("{:#}", e)))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let write = || -> anyhow::Result<()> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let text = serde_json::to_string(self).context("Failed to serialize vector index")?;
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write vector index {}", path.display()))?;
            Ok(())
        };
        write().map_err(|e| Nl2SqlError::VectorIndex(format!("{:#}", e)))
    }
}
