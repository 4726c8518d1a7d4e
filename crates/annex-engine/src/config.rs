//! Engine configuration.
//!
//! [`ScannConfig`] is the structured record persisted as the `scann_config`
//! artifact section. Sub-configs are optional: their presence is what
//! selects the engine family and whether a reordering stage exists.

use crate::distance::DistanceMeasure;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannConfig {
    /// Vector dimensionality. Set at build time.
    pub dimensionality: usize,

    /// Default number of neighbors returned when the caller leaves it unset.
    /// Default: 10
    pub num_neighbors: usize,

    /// Distance used for scoring datapoints. Default: dot product.
    pub distance_measure: DistanceMeasure,

    /// K-means partitioning (tree level). `None` scans every datapoint.
    pub partitioning: Option<PartitioningConfig>,

    /// Asymmetric hashing. `None` scores candidates with exact distances.
    pub hash: Option<AsymmetricHashConfig>,

    /// Exact reordering stage. `None` returns first-stage results directly.
    pub exact_reordering: Option<ExactReorderingConfig>,

    /// Search radius applied to first-stage distances.
    /// Default: unbounded (`f32::INFINITY`).
    pub pre_reordering_epsilon: f32,

    /// Search radius applied to reordered distances.
    /// Default: unbounded (`f32::INFINITY`).
    pub post_reordering_epsilon: f32,

    /// Seed for k-means initialisation and training samples.
    pub seed: u64,
}

impl Default for ScannConfig {
    fn default() -> Self {
        Self {
            dimensionality: 0,
            num_neighbors: 10,
            distance_measure: DistanceMeasure::DotProduct,
            partitioning: Some(PartitioningConfig::default()),
            hash: Some(AsymmetricHashConfig::default()),
            exact_reordering: Some(ExactReorderingConfig::default()),
            pre_reordering_epsilon: f32::INFINITY,
            post_reordering_epsilon: f32::INFINITY,
            seed: 0x5CA1_AB1E,
        }
    }
}

impl ScannConfig {
    /// Configuration for an exact scan: no partitions, no hashing, no
    /// reordering.
    pub fn brute_force(dimensionality: usize) -> Self {
        Self {
            dimensionality,
            partitioning: None,
            hash: None,
            exact_reordering: None,
            ..Default::default()
        }
    }

    /// Whether searches run a second, exact reordering stage.
    pub fn has_reordering(&self) -> bool {
        self.exact_reordering.is_some()
    }

    /// Set the distance measure, keeping the dependent settings in step.
    ///
    /// Query tokenization follows the scoring distance, and residual
    /// quantization is switched off for squared L2.
    pub fn with_distance_measure(mut self, measure: DistanceMeasure) -> Self {
        self.distance_measure = measure;
        if let Some(partitioning) = self.partitioning.as_mut() {
            partitioning.query_tokenization_distance = measure;
        }
        if measure == DistanceMeasure::SquaredL2 {
            if let Some(hash) = self.hash.as_mut() {
                hash.use_residual_quantization = false;
            }
        }
        self
    }

    /// Set the default number of neighbors.
    pub fn with_num_neighbors(mut self, num_neighbors: usize) -> Self {
        self.num_neighbors = num_neighbors;
        self
    }

    /// Set both search radii.
    pub fn with_epsilon(mut self, pre: f32, post: f32) -> Self {
        self.pre_reordering_epsilon = pre;
        self.post_reordering_epsilon = post;
        self
    }
}

/// K-means partitioning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitioningConfig {
    /// Requested number of partitions. Capped so that each partition can
    /// hold at least `min_cluster_size` training points.
    /// Default: 4000
    pub num_children: usize,

    /// Lloyd iterations during training. Default: 10
    pub max_clustering_iterations: usize,

    /// Minimum expected points per partition. Default: 50
    pub min_cluster_size: usize,

    /// Points sampled for training. Default: 60000
    pub expected_sample_size: usize,

    /// Partitions probed per query when no override is given.
    /// Default: 1000
    pub max_spill_centers: usize,

    /// Distance used to rank partition centers for a query.
    /// Default: dot product.
    pub query_tokenization_distance: DistanceMeasure,
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            num_children: 4000,
            max_clustering_iterations: 10,
            min_cluster_size: 50,
            expected_sample_size: 60000,
            max_spill_centers: 1000,
            query_tokenization_distance: DistanceMeasure::DotProduct,
        }
    }
}

/// Asymmetric hashing (product quantization) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsymmetricHashConfig {
    /// Dimensions per subspace block. An odd remainder gets its own block.
    /// Default: 2
    pub num_dims_per_block: usize,

    /// Centers per block (at most 256). Default: 16
    pub num_clusters_per_block: usize,

    /// Lloyd iterations per block. Default: 10
    pub max_clustering_iterations: usize,

    /// Anisotropic noise shaping threshold. Values outside (0, 1) disable
    /// noise shaping. Default: 0.2
    pub noise_shaping_threshold: f32,

    /// Quantize the residual to the partition center instead of the
    /// datapoint itself. Default: true
    pub use_residual_quantization: bool,

    /// Points sampled for codebook training. Default: 100000
    pub expected_sample_size: usize,
}

impl Default for AsymmetricHashConfig {
    fn default() -> Self {
        Self {
            num_dims_per_block: 2,
            num_clusters_per_block: 16,
            max_clustering_iterations: 10,
            noise_shaping_threshold: 0.2,
            use_residual_quantization: true,
            expected_sample_size: 100000,
        }
    }
}

/// Exact reordering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactReorderingConfig {
    /// First-stage candidates kept for rescoring when the caller leaves
    /// the pre-reordering count unset. Default: 1000
    pub approx_num_neighbors: usize,
}

impl Default for ExactReorderingConfig {
    fn default() -> Self {
        Self {
            approx_num_neighbors: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_tree_ah_with_reordering() {
        let config = ScannConfig::default();
        assert!(config.partitioning.is_some());
        assert!(config.hash.is_some());
        assert!(config.has_reordering());
        assert!(config.pre_reordering_epsilon.is_infinite());
    }

    #[test]
    fn test_squared_l2_disables_residuals() {
        let config = ScannConfig::default().with_distance_measure(DistanceMeasure::SquaredL2);
        assert_eq!(config.distance_measure, DistanceMeasure::SquaredL2);
        assert!(!config.hash.as_ref().unwrap().use_residual_quantization);
        assert_eq!(
            config.partitioning.as_ref().unwrap().query_tokenization_distance,
            DistanceMeasure::SquaredL2
        );
    }

    #[test]
    fn test_brute_force_config() {
        let config = ScannConfig::brute_force(16);
        assert_eq!(config.dimensionality, 16);
        assert!(!config.has_reordering());
        assert!(config.partitioning.is_none());
    }
}
