//! Brute force engine.
//!
//! Linear scan over the raw dataset. Exact, O(n * d) per query, and the
//! family selected when the configuration asks for neither partitioning
//! nor hashing. Also the baseline the tree-AH engine is checked against.

use crate::config::ScannConfig;
use crate::engine::{
    check_query, finish_search, AnnEngine, EngineKind, EngineState, NeighborMatch, SearchParameters, TopK,
};
use crate::{EngineError, Result};

/// Exact linear-scan engine.
pub struct BruteForceEngine {
    config: ScannConfig,
    /// Row-major vectors, `len * dimensionality` values.
    dataset: Vec<f32>,
}

impl BruteForceEngine {
    /// Wrap an already validated dataset.
    pub fn new(config: ScannConfig, dataset: Vec<f32>) -> Self {
        Self { config, dataset }
    }
}

impl AnnEngine for BruteForceEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::BruteForce
    }

    fn config(&self) -> &ScannConfig {
        &self.config
    }

    fn len(&self) -> usize {
        match self.config.dimensionality {
            0 => 0,
            dim => self.dataset.len() / dim,
        }
    }

    fn extract_state(&self) -> EngineState {
        EngineState {
            config: self.config.clone(),
            codebook: None,
            partitioner: None,
            datapoints_by_token: None,
            hashed_dataset: None,
            dataset: Some(self.dataset.clone()),
        }
    }

    fn search(&self, query: &[f32], params: &SearchParameters) -> Result<Vec<NeighborMatch>> {
        let dim = self.config.dimensionality;
        check_query(query, dim)?;

        let pre = params
            .pre_reordering_num_neighbors
            .unwrap_or(self.config.num_neighbors);
        let measure = self.config.distance_measure;

        let mut top = TopK::new(pre, self.config.pre_reordering_epsilon);
        for (ordinal, point) in self.dataset.chunks_exact(dim).enumerate() {
            top.push(NeighborMatch::new(ordinal as u32, measure.distance(query, point)));
        }

        Ok(finish_search(&self.config, &self.dataset, query, top.into_sorted(), params))
    }

    fn add_points(&mut self, vectors: &[f32]) -> Result<()> {
        let dim = self.config.dimensionality;
        if dim == 0 || vectors.len() % dim != 0 {
            return Err(EngineError::DimensionMismatch {
                expected: dim,
                actual: vectors.len(),
            });
        }
        self.dataset.extend_from_slice(vectors);
        Ok(())
    }
}
