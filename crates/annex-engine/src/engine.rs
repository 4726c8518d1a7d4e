//! Engine capability trait, state bundle and factory.
//!
//! The rest of the workspace only depends on what is declared here:
//! [`AnnEngine`] for querying a trained generation, [`EngineState`] for
//! exporting it, and [`train_engine`] / [`rehydrate_engine`] for producing
//! one.

use crate::brute::BruteForceEngine;
use crate::config::ScannConfig;
use crate::hash::Codebook;
use crate::partitioner::SerializedPartitioner;
use crate::tree_ah::TreeAhEngine;
use crate::{EngineError, Result};
use rayon::ThreadPool;
use std::collections::BinaryHeap;

/// One search result: an engine ordinal and its internal distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborMatch {
    /// Position of the datapoint in insertion order.
    pub ordinal: u32,
    /// Internal (minimised) distance.
    pub distance: f32,
}

impl NeighborMatch {
    pub fn new(ordinal: u32, distance: f32) -> Self {
        Self { ordinal, distance }
    }
}

impl Eq for NeighborMatch {}

impl PartialOrd for NeighborMatch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NeighborMatch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Lower distance first, ties broken by ordinal for stable output
        self.distance
            .total_cmp(&other.distance)
            .then(self.ordinal.cmp(&other.ordinal))
    }
}

/// Per-query search parameters. `None` means "use the engine default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchParameters {
    /// Candidates produced by the approximate stage.
    pub pre_reordering_num_neighbors: Option<usize>,
    /// Results kept after exact reordering. Unused without a reordering
    /// stage.
    pub post_reordering_num_neighbors: Option<usize>,
    /// Partitions probed, overriding the configured spill count.
    pub num_partitions_to_search_override: Option<usize>,
}

impl SearchParameters {
    pub fn new(pre: Option<usize>, post: Option<usize>) -> Self {
        Self {
            pre_reordering_num_neighbors: pre,
            post_reordering_num_neighbors: post,
            num_partitions_to_search_override: None,
        }
    }

    /// Probe exactly `leaves` partitions.
    pub fn with_leaves(mut self, leaves: usize) -> Self {
        self.num_partitions_to_search_override = Some(leaves);
        self
    }
}

/// Engine family, selected from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Exact linear scan.
    BruteForce,
    /// Partitioned tree with asymmetric hashing.
    TreeAh,
}

impl EngineKind {
    /// Brute force when the config asks for neither partitioning nor
    /// hashing, tree-AH otherwise.
    pub fn for_config(config: &ScannConfig) -> Self {
        if config.partitioning.is_none() && config.hash.is_none() {
            Self::BruteForce
        } else {
            Self::TreeAh
        }
    }
}

/// Everything needed to rebuild a trained engine without retraining.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub config: ScannConfig,
    pub codebook: Option<Codebook>,
    pub partitioner: Option<SerializedPartitioner>,
    /// Ordinals grouped by owning partition, ascending within each group.
    pub datapoints_by_token: Option<Vec<Vec<u32>>>,
    /// One code of `codebook.num_blocks()` bytes per ordinal.
    pub hashed_dataset: Option<Vec<u8>>,
    /// Raw vectors, row-major.
    pub dataset: Option<Vec<f32>>,
}

/// Pre-trained pieces handed to [`rehydrate_engine`]. Anything left `None`
/// is trained or recomputed from the dataset.
#[derive(Debug, Clone, Default)]
pub struct FactoryOptions {
    pub codebook: Option<Codebook>,
    pub partitioner: Option<SerializedPartitioner>,
    pub datapoints_by_token: Option<Vec<Vec<u32>>>,
    pub hashed_dataset: Option<Vec<u8>>,
}

/// Capability interface of a trained engine generation.
///
/// Engines are immutable while searched; `add_points` takes `&mut self`, so
/// it cannot overlap outstanding searches.
pub trait AnnEngine: Send + Sync {
    /// Family of this engine.
    fn kind(&self) -> EngineKind;

    /// Configuration the engine was built with.
    fn config(&self) -> &ScannConfig;

    /// Vector dimensionality.
    fn dimensionality(&self) -> usize {
        self.config().dimensionality
    }

    /// Number of datapoints.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Export the trained state.
    fn extract_state(&self) -> EngineState;

    /// Search one query. Parameters must be fully specified (see
    /// [`AnnEngine::set_unspecified_parameters_to_defaults`]).
    fn search(&self, query: &[f32], params: &SearchParameters) -> Result<Vec<NeighborMatch>>;

    /// Search a flattened batch of queries with shared parameters.
    fn search_batched(&self, queries: &[f32], params: &SearchParameters) -> Result<Vec<Vec<NeighborMatch>>> {
        let dim = self.dimensionality();
        if dim == 0 || queries.len() % dim != 0 {
            return Err(EngineError::DimensionMismatch {
                expected: dim,
                actual: queries.len(),
            });
        }
        queries.chunks_exact(dim).map(|q| self.search(q, params)).collect()
    }

    /// Fill unset neighbor counts from the configuration.
    ///
    /// With reordering, `post` defaults to `num_neighbors` and `pre` to
    /// `approx_num_neighbors`. Without it, `pre` defaults to
    /// `num_neighbors`. `pre` is never smaller than `post`.
    fn set_unspecified_parameters_to_defaults(&self, params: &mut SearchParameters) {
        let config = self.config();
        match &config.exact_reordering {
            Some(reordering) => {
                let post = params
                    .post_reordering_num_neighbors
                    .unwrap_or(config.num_neighbors);
                let pre = params
                    .pre_reordering_num_neighbors
                    .unwrap_or(reordering.approx_num_neighbors);
                params.post_reordering_num_neighbors = Some(post);
                params.pre_reordering_num_neighbors = Some(pre.max(post));
            }
            None => {
                let pre = params
                    .pre_reordering_num_neighbors
                    .unwrap_or(config.num_neighbors);
                params.pre_reordering_num_neighbors = Some(pre);
            }
        }
    }

    /// Search radius of the approximate stage.
    fn default_pre_reordering_epsilon(&self) -> f32 {
        self.config().pre_reordering_epsilon
    }

    /// Search radius of the reordering stage.
    fn default_post_reordering_epsilon(&self) -> f32 {
        self.config().post_reordering_epsilon
    }

    /// Append datapoints using the already trained structures.
    fn add_points(&mut self, vectors: &[f32]) -> Result<()>;
}

/// Train a new engine from raw vectors.
///
/// `pool` runs the parallel parts of training; `None` runs them on the
/// calling thread.
pub fn train_engine(
    dataset: &[f32],
    dimensionality: usize,
    mut config: ScannConfig,
    pool: Option<&ThreadPool>,
) -> Result<Box<dyn AnnEngine>> {
    validate_dataset(dataset, dimensionality)?;
    config.dimensionality = dimensionality;

    let kind = EngineKind::for_config(&config);
    tracing::info!(
        ?kind,
        points = dataset.len() / dimensionality,
        dimensionality,
        "Training engine"
    );

    match kind {
        EngineKind::BruteForce => Ok(Box::new(BruteForceEngine::new(config, dataset.to_vec()))),
        EngineKind::TreeAh => Ok(Box::new(TreeAhEngine::train(config, dataset.to_vec(), pool)?)),
    }
}

/// Rebuild an engine from previously extracted state.
pub fn rehydrate_engine(
    mut config: ScannConfig,
    dataset: Vec<f32>,
    dimensionality: usize,
    options: FactoryOptions,
    pool: Option<&ThreadPool>,
) -> Result<Box<dyn AnnEngine>> {
    validate_dataset(&dataset, dimensionality)?;
    if config.dimensionality != 0 && config.dimensionality != dimensionality {
        return Err(EngineError::DimensionMismatch {
            expected: config.dimensionality,
            actual: dimensionality,
        });
    }
    config.dimensionality = dimensionality;

    let kind = EngineKind::for_config(&config);
    tracing::debug!(?kind, points = dataset.len() / dimensionality, "Rehydrating engine");

    match kind {
        EngineKind::BruteForce => Ok(Box::new(BruteForceEngine::new(config, dataset))),
        EngineKind::TreeAh => Ok(Box::new(TreeAhEngine::rehydrate(config, dataset, options, pool)?)),
    }
}

pub(crate) fn validate_dataset(dataset: &[f32], dimensionality: usize) -> Result<()> {
    if dimensionality == 0 {
        return Err(EngineError::InvalidArgument(
            "dimensionality must be positive".to_string(),
        ));
    }
    if dataset.is_empty() {
        return Err(EngineError::InvalidArgument("dataset is empty".to_string()));
    }
    if dataset.len() % dimensionality != 0 {
        return Err(EngineError::InvalidArgument(format!(
            "dataset length {} is not a multiple of dimensionality {}",
            dataset.len(),
            dimensionality
        )));
    }
    Ok(())
}

pub(crate) fn check_query(query: &[f32], dimensionality: usize) -> Result<()> {
    if query.len() != dimensionality {
        return Err(EngineError::DimensionMismatch {
            expected: dimensionality,
            actual: query.len(),
        });
    }
    Ok(())
}

/// Keeps the `k` best candidates within `epsilon`.
pub(crate) struct TopK {
    k: usize,
    epsilon: f32,
    heap: BinaryHeap<NeighborMatch>,
}

impl TopK {
    pub(crate) fn new(k: usize, epsilon: f32) -> Self {
        Self {
            k,
            epsilon,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, candidate: NeighborMatch) {
        if self.k == 0 || candidate.distance.is_nan() || candidate.distance > self.epsilon {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// Ascending by (distance, ordinal).
    pub(crate) fn into_sorted(self) -> Vec<NeighborMatch> {
        self.heap.into_sorted_vec()
    }
}

/// Rescore candidates with exact distances and keep the best `post`.
pub(crate) fn reorder(
    config: &ScannConfig,
    dataset: &[f32],
    query: &[f32],
    candidates: Vec<NeighborMatch>,
    post: usize,
) -> Vec<NeighborMatch> {
    let dim = config.dimensionality;
    let measure = config.distance_measure;

    let mut top = TopK::new(post, config.post_reordering_epsilon);
    for candidate in candidates {
        let o = candidate.ordinal as usize;
        let exact = measure.distance(query, &dataset[o * dim..(o + 1) * dim]);
        top.push(NeighborMatch::new(candidate.ordinal, exact));
    }
    top.into_sorted()
}

/// Run the optional reordering stage on first-stage candidates.
pub(crate) fn finish_search(
    config: &ScannConfig,
    dataset: &[f32],
    query: &[f32],
    candidates: Vec<NeighborMatch>,
    params: &SearchParameters,
) -> Vec<NeighborMatch> {
    if config.has_reordering() {
        let post = params
            .post_reordering_num_neighbors
            .unwrap_or(config.num_neighbors);
        reorder(config, dataset, query, candidates, post)
    } else {
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExactReorderingConfig;

    #[test]
    fn test_neighbor_match_ordering() {
        let mut matches = vec![
            NeighborMatch::new(3, 0.5),
            NeighborMatch::new(1, 0.1),
            NeighborMatch::new(0, 0.5),
        ];
        matches.sort();
        assert_eq!(matches.iter().map(|m| m.ordinal).collect::<Vec<_>>(), vec![1, 0, 3]);
    }

    #[test]
    fn test_top_k_keeps_best_within_epsilon() {
        let mut top = TopK::new(2, 1.0);
        for (o, d) in [(0, 0.9), (1, 0.2), (2, 5.0), (3, 0.5), (4, f32::NAN)] {
            top.push(NeighborMatch::new(o, d));
        }
        let out = top.into_sorted();
        assert_eq!(out, vec![NeighborMatch::new(1, 0.2), NeighborMatch::new(3, 0.5)]);
    }

    #[test]
    fn test_top_k_zero() {
        let mut top = TopK::new(0, f32::INFINITY);
        top.push(NeighborMatch::new(0, 0.0));
        assert!(top.into_sorted().is_empty());
    }

    #[test]
    fn test_engine_kind_for_config() {
        assert_eq!(EngineKind::for_config(&ScannConfig::brute_force(4)), EngineKind::BruteForce);
        assert_eq!(EngineKind::for_config(&ScannConfig::default()), EngineKind::TreeAh);
    }

    #[test]
    fn test_defaults_with_reordering() {
        let mut config = ScannConfig::brute_force(2).with_num_neighbors(7);
        config.exact_reordering = Some(ExactReorderingConfig {
            approx_num_neighbors: 50,
        });
        let engine = BruteForceEngine::new(config, vec![0.0, 1.0]);

        let mut params = SearchParameters::default();
        engine.set_unspecified_parameters_to_defaults(&mut params);
        assert_eq!(params.pre_reordering_num_neighbors, Some(50));
        assert_eq!(params.post_reordering_num_neighbors, Some(7));

        // pre is raised to post
        let mut params = SearchParameters::new(Some(3), Some(20));
        engine.set_unspecified_parameters_to_defaults(&mut params);
        assert_eq!(params.pre_reordering_num_neighbors, Some(20));
    }

    #[test]
    fn test_defaults_without_reordering() {
        let engine = BruteForceEngine::new(ScannConfig::brute_force(2).with_num_neighbors(4), vec![0.0, 1.0]);

        let mut params = SearchParameters::default();
        engine.set_unspecified_parameters_to_defaults(&mut params);
        assert_eq!(params.pre_reordering_num_neighbors, Some(4));
        assert_eq!(params.post_reordering_num_neighbors, None);
    }

    #[test]
    fn test_train_rejects_bad_input() {
        let config = ScannConfig::brute_force(3);
        assert!(matches!(
            train_engine(&[], 3, config.clone(), None),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            train_engine(&[1.0, 2.0], 0, config.clone(), None),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            train_engine(&[1.0, 2.0, 3.0, 4.0], 3, config, None),
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_search_batched_default_impl() {
        let dataset = vec![0.0, 0.0, 1.0, 1.0, 5.0, 5.0];
        let config = ScannConfig::brute_force(2).with_distance_measure(crate::DistanceMeasure::SquaredL2);
        let engine = train_engine(&dataset, 2, config, None).unwrap();

        let mut params = SearchParameters::new(Some(1), None);
        engine.set_unspecified_parameters_to_defaults(&mut params);

        let results = engine.search_batched(&[0.1, 0.1, 4.9, 4.9], &params).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0][0].ordinal, 0);
        assert_eq!(results[1][0].ordinal, 2);

        assert!(matches!(
            engine.search_batched(&[0.1, 0.1, 4.9], &params),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }
}
