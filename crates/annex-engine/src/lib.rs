//! Approximate nearest neighbor engine for annex.
//!
//! This crate holds the trained representation that the rest of the
//! workspace persists, rehydrates and queries. Callers only ever see it
//! through the [`AnnEngine`] capability trait:
//!
//! - **Train**: build a generation from raw vectors ([`train_engine`])
//! - **Extract state**: export everything needed to rebuild it ([`EngineState`])
//! - **Rehydrate**: rebuild from an exported state without retraining ([`rehydrate_engine`])
//! - **Search**: ranked `(ordinal, distance)` lists, single or batched
//!
//! # Engine families
//!
//! The family is chosen by configuration ([`EngineKind::for_config`]):
//!
//! ```text
//! no partitioning, no hashing  ->  BruteForceEngine (exact scan)
//! otherwise                    ->  TreeAhEngine
//!                                    k-means partitions (probe `leaves` of them)
//!                                    asymmetric hashing (LUT distance estimates)
//!                                    exact reordering of the best candidates
//! ```
//!
//! All distances are minimised. Inner-product similarity is negated on the
//! way in; [`DistanceMeasure::result_multiplier`] tells the caller how to
//! flip it back.
//!
//! # Example
//!
//! ```
//! use annex_engine::{train_engine, AnnEngine, ScannConfig, SearchParameters};
//!
//! let dataset: Vec<f32> = (0..64 * 4).map(|i| (i % 17) as f32).collect();
//! let config = ScannConfig::brute_force(4);
//! let engine = train_engine(&dataset, 4, config, None).unwrap();
//!
//! let mut params = SearchParameters::new(Some(3), None);
//! engine.set_unspecified_parameters_to_defaults(&mut params);
//! let results = engine.search(&dataset[..4], &params).unwrap();
//! assert_eq!(results.len(), 3);
//! ```

mod brute;
mod config;
mod distance;
mod engine;
mod hash;
mod kmeans;
mod partitioner;
mod tree_ah;

pub use brute::BruteForceEngine;
pub use config::{AsymmetricHashConfig, ExactReorderingConfig, PartitioningConfig, ScannConfig};
pub use distance::{dot_product, squared_l2_distance, DistanceMeasure};
pub use engine::{
    rehydrate_engine, train_engine, AnnEngine, EngineKind, EngineState, FactoryOptions,
    NeighborMatch, SearchParameters,
};
pub use hash::{Codebook, SubspaceCenters};
pub use partitioner::SerializedPartitioner;
pub use tree_ah::TreeAhEngine;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Inconsistent engine state: {0}")]
    InconsistentState(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
