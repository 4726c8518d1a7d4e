//! K-means partitioner.
//!
//! Splits the dataset into partitions ("tokens") around trained centers.
//! Datapoints are assigned by squared L2; queries rank centers by the
//! configured query tokenization distance and probe the closest few.

use crate::config::PartitioningConfig;
use crate::distance::DistanceMeasure;
use crate::kmeans::{assign, kmeans, nearest_center, sample_rows};
use crate::{EngineError, Result};
use rand::rngs::StdRng;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

/// Trained partition centers, persisted as the `serialized_partitioner`
/// artifact section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedPartitioner {
    /// Dimensionality of each center.
    pub dimensionality: usize,
    /// Row-major centers, `n_tokens * dimensionality` values.
    pub centers: Vec<f32>,
    /// Distance used to rank centers for a query.
    pub query_tokenization_distance: DistanceMeasure,
}

impl SerializedPartitioner {
    /// Train partition centers on (a sample of) the dataset.
    pub(crate) fn train(
        dataset: &[f32],
        dimensionality: usize,
        config: &PartitioningConfig,
        rng: &mut StdRng,
        pool: Option<&ThreadPool>,
    ) -> Result<Self> {
        if dataset.is_empty() {
            return Err(EngineError::Training(
                "cannot train a partitioner on an empty dataset".to_string(),
            ));
        }

        let sample = sample_rows(dataset, dimensionality, config.expected_sample_size.max(1), rng);
        let sample_points = sample.len() / dimensionality;

        let max_children = (sample_points / config.min_cluster_size.max(1)).max(1);
        let num_children = config.num_children.clamp(1, max_children);
        if num_children < config.num_children {
            tracing::debug!(
                requested = config.num_children,
                effective = num_children,
                sample_points,
                "Capping partition count to training sample"
            );
        }

        let centers = kmeans(
            &sample,
            dimensionality,
            num_children,
            config.max_clustering_iterations,
            rng,
            pool,
        );

        Ok(Self {
            dimensionality,
            centers,
            query_tokenization_distance: config.query_tokenization_distance,
        })
    }

    /// Number of partitions.
    pub fn n_tokens(&self) -> usize {
        if self.dimensionality == 0 {
            0
        } else {
            self.centers.len() / self.dimensionality
        }
    }

    /// Center of partition `token`.
    pub fn center(&self, token: usize) -> &[f32] {
        &self.centers[token * self.dimensionality..(token + 1) * self.dimensionality]
    }

    /// Partition that owns `point`.
    pub fn token_for_datapoint(&self, point: &[f32]) -> u32 {
        nearest_center(point, &self.centers, self.dimensionality).0 as u32
    }

    /// Group every ordinal of `dataset` by owning partition.
    ///
    /// Ordinals within each partition are ascending.
    pub fn tokenize_dataset(&self, dataset: &[f32], pool: Option<&ThreadPool>) -> Vec<Vec<u32>> {
        let tokens = assign(dataset, self.dimensionality, &self.centers, pool);

        let mut by_token = vec![Vec::new(); self.n_tokens()];
        for (ordinal, token) in tokens.into_iter().enumerate() {
            by_token[token as usize].push(ordinal as u32);
        }
        by_token
    }

    /// The `count` partitions closest to `query`, closest first.
    pub fn tokens_for_query(&self, query: &[f32], count: usize) -> Vec<u32> {
        let mut scored: Vec<(f32, u32)> = self
            .centers
            .chunks_exact(self.dimensionality)
            .enumerate()
            .map(|(token, center)| {
                (self.query_tokenization_distance.distance(query, center), token as u32)
            })
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(count);
        scored.into_iter().map(|(_, token)| token).collect()
    }

    /// Check that a grouping of ordinals is usable with this partitioner.
    ///
    /// Every ordinal in `0..n_points` must appear exactly once.
    pub(crate) fn validate_grouping(&self, by_token: &[Vec<u32>], n_points: usize) -> Result<()> {
        if by_token.len() != self.n_tokens() {
            return Err(EngineError::InconsistentState(format!(
                "datapoint grouping has {} tokens, partitioner has {}",
                by_token.len(),
                self.n_tokens()
            )));
        }

        let mut seen = vec![false; n_points];
        for &ordinal in by_token.iter().flatten() {
            let slot = seen.get_mut(ordinal as usize).ok_or_else(|| {
                EngineError::InconsistentState(format!(
                    "ordinal {} out of range for {} datapoints",
                    ordinal, n_points
                ))
            })?;
            if *slot {
                return Err(EngineError::InconsistentState(format!(
                    "ordinal {} assigned to more than one partition",
                    ordinal
                )));
            }
            *slot = true;
        }

        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(EngineError::InconsistentState(format!(
                "ordinal {} not assigned to any partition",
                missing
            )));
        }

        Ok(())
    }
}
