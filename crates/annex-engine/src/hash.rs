//! Asymmetric hashing (product quantization) for approximate scoring.
//!
//! # How It Works
//!
//! 1. **Split**: divide each vector into blocks of `num_dims_per_block`
//!    dimensions (an odd remainder becomes one extra, narrower block)
//! 2. **Cluster**: k-means per block finds `num_clusters_per_block` centers
//! 3. **Encode**: each block → index of its best center (one byte)
//! 4. **Score**: precompute query-to-center distances per block, then a
//!    datapoint's estimate is a sum of table lookups
//!
//! When residual quantization is on, the quantized vector is the datapoint
//! minus its partition center.
//!
//! # Noise shaping
//!
//! For dot product, encoding can penalise quantization error parallel to
//! the datapoint more than orthogonal error (anisotropic loss). The weight
//! is derived from `noise_shaping_threshold`; see [`noise_shaping_eta`].

use crate::config::AsymmetricHashConfig;
use crate::distance::{dot_product, squared_l2_distance, DistanceMeasure};
use crate::kmeans::{kmeans, sample_rows};
use crate::{EngineError, Result};
use rand::rngs::StdRng;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

/// Largest number of centers a one-byte code can address.
const MAX_CLUSTERS_PER_BLOCK: usize = 256;

/// Centers for one subspace block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubspaceCenters {
    /// First dimension covered by this block.
    pub offset: usize,
    /// Number of dimensions in this block.
    pub dims: usize,
    /// Row-major centers, `num_clusters * dims` values.
    pub centers: Vec<f32>,
}

/// Trained codebook for all subspaces, persisted as the `ah_codebook`
/// artifact section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    /// Total vector dimensionality.
    pub dimensionality: usize,
    /// Centers per block.
    pub num_clusters: usize,
    /// One entry per block, in dimension order.
    pub blocks: Vec<SubspaceCenters>,
}

/// Block boundaries `(offset, dims)` for a chunked projection.
fn block_spans(dimensionality: usize, dims_per_block: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::with_capacity(dimensionality / dims_per_block + 1);
    let mut offset = 0;
    while offset + dims_per_block <= dimensionality {
        spans.push((offset, dims_per_block));
        offset += dims_per_block;
    }
    if offset < dimensionality {
        spans.push((offset, dimensionality - offset));
    }
    spans
}

/// Weight of parallel quantization error relative to orthogonal error.
///
/// `eta = (d - 1) * T^2 / (1 - T^2)` for a threshold `T` in (0, 1);
/// any other threshold gives 1.0, i.e. plain squared error.
pub(crate) fn noise_shaping_eta(threshold: f32, dimensionality: usize) -> f32 {
    if threshold <= 0.0 || threshold >= 1.0 || dimensionality < 2 {
        return 1.0;
    }
    let t2 = threshold * threshold;
    ((dimensionality - 1) as f32 * t2 / (1.0 - t2)).max(1.0)
}

impl Codebook {
    /// Train a codebook on (a sample of) the vectors to be quantized.
    ///
    /// `targets` are the vectors that will later be encoded: raw datapoints,
    /// or residuals when residual quantization is on.
    pub(crate) fn train(
        targets: &[f32],
        dimensionality: usize,
        config: &AsymmetricHashConfig,
        rng: &mut StdRng,
        pool: Option<&ThreadPool>,
    ) -> Result<Self> {
        if config.num_dims_per_block == 0 {
            return Err(EngineError::InvalidArgument(
                "num_dims_per_block must be positive".to_string(),
            ));
        }
        if config.num_clusters_per_block == 0 || config.num_clusters_per_block > MAX_CLUSTERS_PER_BLOCK {
            return Err(EngineError::InvalidArgument(format!(
                "num_clusters_per_block must be in 1..={}, got {}",
                MAX_CLUSTERS_PER_BLOCK, config.num_clusters_per_block
            )));
        }
        if targets.is_empty() {
            return Err(EngineError::Training(
                "cannot train a codebook on an empty dataset".to_string(),
            ));
        }

        let sample = sample_rows(targets, dimensionality, config.expected_sample_size.max(1), rng);
        let sample_points = sample.len() / dimensionality;

        let mut blocks = Vec::new();
        for (offset, dims) in block_spans(dimensionality, config.num_dims_per_block) {
            let mut sub = Vec::with_capacity(sample_points * dims);
            for point in sample.chunks_exact(dimensionality) {
                sub.extend_from_slice(&point[offset..offset + dims]);
            }

            let centers = kmeans(
                &sub,
                dims,
                config.num_clusters_per_block,
                config.max_clustering_iterations,
                rng,
                pool,
            );
            blocks.push(SubspaceCenters { offset, dims, centers });
        }

        Ok(Self {
            dimensionality,
            num_clusters: config.num_clusters_per_block,
            blocks,
        })
    }

    /// Number of blocks, which is also the code length in bytes.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Check the geometry of a codebook that did not come from [`train`](Self::train).
    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_clusters == 0 || self.num_clusters > MAX_CLUSTERS_PER_BLOCK {
            return Err(EngineError::InconsistentState(format!(
                "codebook has {} clusters per block, expected 1..={}",
                self.num_clusters, MAX_CLUSTERS_PER_BLOCK
            )));
        }
        for (i, block) in self.blocks.iter().enumerate() {
            if block.dims == 0 || block.offset + block.dims > self.dimensionality {
                return Err(EngineError::InconsistentState(format!(
                    "codebook block {} spans {}..{} of {} dimensions",
                    i,
                    block.offset,
                    block.offset + block.dims,
                    self.dimensionality
                )));
            }
            if block.centers.len() != self.num_clusters * block.dims {
                return Err(EngineError::InconsistentState(format!(
                    "codebook block {} has {} center values, expected {}",
                    i,
                    block.centers.len(),
                    self.num_clusters * block.dims
                )));
            }
        }
        Ok(())
    }

    /// Check that every code byte addresses a trained center.
    pub(crate) fn validate_codes(&self, hashed: &[u8]) -> Result<()> {
        match hashed.iter().position(|&c| c as usize >= self.num_clusters) {
            Some(at) => Err(EngineError::InconsistentState(format!(
                "code {} at byte {} exceeds {} clusters per block",
                hashed[at], at, self.num_clusters
            ))),
            None => Ok(()),
        }
    }

    /// Encode one vector into `out`, which holds one byte per block.
    ///
    /// `target` is the vector being quantized, `datapoint` the original
    /// datapoint whose direction shapes the loss when `eta > 1`.
    pub(crate) fn encode(&self, target: &[f32], datapoint: &[f32], eta: f32, out: &mut [u8]) {
        debug_assert_eq!(target.len(), self.dimensionality);
        debug_assert_eq!(out.len(), self.blocks.len());

        for (block, slot) in self.blocks.iter().zip(out.iter_mut()) {
            let t = &target[block.offset..block.offset + block.dims];
            let x = &datapoint[block.offset..block.offset + block.dims];

            let x_norm = dot_product(x, x).sqrt();
            let shaped = eta > 1.0 && x_norm > f32::EPSILON;

            let mut best_idx = 0;
            let mut best_loss = f32::MAX;
            for (idx, center) in block.centers.chunks_exact(block.dims).enumerate() {
                let mut loss = squared_l2_distance(t, center);
                if shaped {
                    // Parallel component of the error along the datapoint direction
                    let parallel: f32 = t
                        .iter()
                        .zip(center)
                        .zip(x)
                        .map(|((a, b), xi)| (a - b) * xi)
                        .sum::<f32>()
                        / x_norm;
                    loss += (eta - 1.0) * parallel * parallel;
                }
                if loss < best_loss {
                    best_loss = loss;
                    best_idx = idx;
                }
            }
            *slot = best_idx as u8;
        }
    }

    /// Precompute per-block distances from `query` to every center.
    ///
    /// Layout: `table[block * num_clusters + center]`.
    pub(crate) fn lookup_table(&self, query: &[f32], measure: DistanceMeasure) -> Vec<f32> {
        let mut table = Vec::with_capacity(self.blocks.len() * self.num_clusters);
        for block in &self.blocks {
            let q = &query[block.offset..block.offset + block.dims];
            table.extend(block.centers.chunks_exact(block.dims).map(|c| measure.distance(q, c)));
        }
        table
    }

    /// Estimated distance of one encoded datapoint.
    #[inline]
    pub(crate) fn distance_from_table(&self, table: &[f32], code: &[u8]) -> f32 {
        code.iter()
            .enumerate()
            .map(|(block, &c)| table[block * self.num_clusters + c as usize])
            .sum()
    }

    /// Reconstruct the quantized vector for a code.
    #[cfg(test)]
    pub(crate) fn decode(&self, code: &[u8]) -> Vec<f32> {
        let mut out = vec![0.0; self.dimensionality];
        for (block, &c) in self.blocks.iter().zip(code) {
            let center = &block.centers[c as usize * block.dims..(c as usize + 1) * block.dims];
            out[block.offset..block.offset + block.dims].copy_from_slice(center);
        }
        out
    }
}
