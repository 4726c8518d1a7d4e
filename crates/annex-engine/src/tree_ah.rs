//! Partitioned asymmetric-hashing engine.
//!
//! Two-phase search:
//! 1. Probe the `leaves` partitions whose centers are closest to the query
//!    and score their datapoints with LUT distance estimates
//! 2. Re-rank the best `pre` candidates with exact distances and keep `post`
//!
//! Either half of the first phase can be switched off by configuration: no
//! partitioning means a single partition holding every datapoint, no
//! hashing means exact distances in phase 1.

use crate::config::ScannConfig;
use crate::distance::DistanceMeasure;
use crate::engine::{
    check_query, finish_search, validate_dataset, AnnEngine, EngineKind, EngineState, FactoryOptions,
    NeighborMatch, SearchParameters, TopK,
};
use crate::hash::{noise_shaping_eta, Codebook};
use crate::partitioner::SerializedPartitioner;
use crate::{EngineError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Partitioned asymmetric-hashing engine.
pub struct TreeAhEngine {
    config: ScannConfig,

    /// Row-major vectors, kept for reordering and live inserts.
    dataset: Vec<f32>,

    partitioner: Option<SerializedPartitioner>,

    /// Ordinals per partition, ascending. A single group when there is no
    /// partitioner.
    by_token: Vec<Vec<u32>>,

    codebook: Option<Codebook>,

    /// `num_blocks` bytes per ordinal. Empty when there is no codebook.
    hashed: Vec<u8>,
}

impl TreeAhEngine {
    /// Train every structure from scratch.
    pub(crate) fn train(config: ScannConfig, dataset: Vec<f32>, pool: Option<&ThreadPool>) -> Result<Self> {
        let dim = config.dimensionality;
        validate_dataset(&dataset, dim)?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let partitioner = match &config.partitioning {
            Some(partitioning) => Some(SerializedPartitioner::train(&dataset, dim, partitioning, &mut rng, pool)?),
            None => None,
        };
        let by_token = group_datapoints(partitioner.as_ref(), &dataset, dim, pool);

        let codebook = match &config.hash {
            Some(hash) => {
                let residual = uses_residuals(&config, partitioner.as_ref());
                let tokens = tokens_by_ordinal(&by_token, dataset.len() / dim);
                let targets = match (residual, partitioner.as_ref()) {
                    (true, Some(p)) => residuals(p, &dataset, dim, &tokens),
                    _ => dataset.clone(),
                };
                Some(Codebook::train(&targets, dim, hash, &mut rng, pool)?)
            }
            None => None,
        };

        let mut engine = Self {
            config,
            dataset,
            partitioner,
            by_token,
            codebook,
            hashed: Vec::new(),
        };
        engine.hashed = engine.encode_dataset(pool);

        tracing::info!(
            points = engine.len(),
            partitions = engine.by_token.len(),
            code_bytes = engine.codebook.as_ref().map(Codebook::num_blocks).unwrap_or(0),
            "Trained tree-AH engine"
        );
        Ok(engine)
    }

    /// Rebuild from exported pieces, training or recomputing whatever is
    /// missing.
    pub(crate) fn rehydrate(
        config: ScannConfig,
        dataset: Vec<f32>,
        options: FactoryOptions,
        pool: Option<&ThreadPool>,
    ) -> Result<Self> {
        let dim = config.dimensionality;
        validate_dataset(&dataset, dim)?;
        let n = dataset.len() / dim;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let partitioner = match (options.partitioner, &config.partitioning) {
            (Some(p), _) => {
                if p.dimensionality != dim {
                    return Err(EngineError::InconsistentState(format!(
                        "partitioner dimensionality {} does not match {}",
                        p.dimensionality, dim
                    )));
                }
                Some(p)
            }
            (None, Some(partitioning)) => {
                tracing::info!("No partitioner supplied, training one");
                Some(SerializedPartitioner::train(&dataset, dim, partitioning, &mut rng, pool)?)
            }
            (None, None) => None,
        };

        let by_token = match (options.datapoints_by_token, partitioner.as_ref()) {
            (Some(grouping), Some(p)) => {
                p.validate_grouping(&grouping, n)?;
                grouping
            }
            (Some(_), None) => {
                return Err(EngineError::InconsistentState(
                    "datapoint grouping supplied without a partitioner".to_string(),
                ))
            }
            (None, p) => group_datapoints(p, &dataset, dim, pool),
        };

        let codebook = match (options.codebook, &config.hash) {
            (Some(codebook), _) => {
                if codebook.dimensionality != dim {
                    return Err(EngineError::InconsistentState(format!(
                        "codebook dimensionality {} does not match {}",
                        codebook.dimensionality, dim
                    )));
                }
                codebook.validate()?;
                Some(codebook)
            }
            (None, Some(hash)) => {
                tracing::info!("No codebook supplied, training one");
                let tokens = tokens_by_ordinal(&by_token, n);
                let targets = match (uses_residuals(&config, partitioner.as_ref()), partitioner.as_ref()) {
                    (true, Some(p)) => residuals(p, &dataset, dim, &tokens),
                    _ => dataset.clone(),
                };
                Some(Codebook::train(&targets, dim, hash, &mut rng, pool)?)
            }
            (None, None) => None,
        };

        let hashed_supplied = options.hashed_dataset;
        let mut engine = Self {
            config,
            dataset,
            partitioner,
            by_token,
            codebook,
            hashed: Vec::new(),
        };

        engine.hashed = match (hashed_supplied, engine.codebook.as_ref()) {
            (Some(hashed), Some(codebook)) => {
                if hashed.len() != n * codebook.num_blocks() {
                    return Err(EngineError::InconsistentState(format!(
                        "hashed dataset has {} bytes, expected {} points of {} bytes",
                        hashed.len(),
                        n,
                        codebook.num_blocks()
                    )));
                }
                codebook.validate_codes(&hashed)?;
                hashed
            }
            (Some(_), None) => {
                return Err(EngineError::InconsistentState(
                    "hashed dataset supplied without a codebook".to_string(),
                ))
            }
            (None, Some(_)) => engine.encode_dataset(pool),
            (None, None) => Vec::new(),
        };

        Ok(engine)
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.by_token.len()
    }

    fn residual_partitioner(&self) -> Option<&SerializedPartitioner> {
        if uses_residuals(&self.config, self.partitioner.as_ref()) {
            self.partitioner.as_ref()
        } else {
            None
        }
    }

    fn eta(&self) -> f32 {
        match (&self.config.hash, self.config.distance_measure) {
            (Some(hash), DistanceMeasure::DotProduct) => {
                noise_shaping_eta(hash.noise_shaping_threshold, self.config.dimensionality)
            }
            _ => 1.0,
        }
    }

    /// Encode every datapoint with the current codebook.
    fn encode_dataset(&self, pool: Option<&ThreadPool>) -> Vec<u8> {
        let Some(codebook) = self.codebook.as_ref() else {
            return Vec::new();
        };
        let dim = self.config.dimensionality;
        let n = self.dataset.len() / dim;
        let num_blocks = codebook.num_blocks();

        let tokens = tokens_by_ordinal(&self.by_token, n);
        let residual = self.residual_partitioner();
        let eta = self.eta();

        let mut codes = vec![0u8; n * num_blocks];
        match pool {
            Some(pool) => pool.install(|| {
                codes
                    .par_chunks_mut(num_blocks)
                    .enumerate()
                    .for_each(|(ordinal, code)| {
                        encode_point(codebook, residual, &self.dataset, dim, &tokens, eta, ordinal, code)
                    })
            }),
            None => codes
                .chunks_mut(num_blocks)
                .enumerate()
                .for_each(|(ordinal, code)| {
                    encode_point(codebook, residual, &self.dataset, dim, &tokens, eta, ordinal, code)
                }),
        }
        codes
    }

    fn leaves_to_search(&self, params: &SearchParameters) -> usize {
        let n_tokens = self.by_token.len();
        let configured = self
            .config
            .partitioning
            .as_ref()
            .map(|p| p.max_spill_centers)
            .unwrap_or(n_tokens);
        params
            .num_partitions_to_search_override
            .filter(|&leaves| leaves > 0)
            .unwrap_or(configured)
            .clamp(1, n_tokens.max(1))
    }
}

/// Whether codes quantize the residual to the partition center.
fn uses_residuals(config: &ScannConfig, partitioner: Option<&SerializedPartitioner>) -> bool {
    partitioner.is_some()
        && config
            .hash
            .as_ref()
            .map(|h| h.use_residual_quantization)
            .unwrap_or(false)
}

fn group_datapoints(
    partitioner: Option<&SerializedPartitioner>,
    dataset: &[f32],
    dim: usize,
    pool: Option<&ThreadPool>,
) -> Vec<Vec<u32>> {
    match partitioner {
        Some(p) => p.tokenize_dataset(dataset, pool),
        None => vec![(0..(dataset.len() / dim) as u32).collect()],
    }
}

/// Invert a grouping into "which partition owns ordinal i".
fn tokens_by_ordinal(by_token: &[Vec<u32>], n: usize) -> Vec<u32> {
    let mut tokens = vec![0u32; n];
    for (token, ordinals) in by_token.iter().enumerate() {
        for &ordinal in ordinals {
            tokens[ordinal as usize] = token as u32;
        }
    }
    tokens
}

fn residuals(partitioner: &SerializedPartitioner, dataset: &[f32], dim: usize, tokens: &[u32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(dataset.len());
    for (point, &token) in dataset.chunks_exact(dim).zip(tokens) {
        let center = partitioner.center(token as usize);
        out.extend(point.iter().zip(center).map(|(x, c)| x - c));
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn encode_point(
    codebook: &Codebook,
    residual: Option<&SerializedPartitioner>,
    dataset: &[f32],
    dim: usize,
    tokens: &[u32],
    eta: f32,
    ordinal: usize,
    code: &mut [u8],
) {
    let point = &dataset[ordinal * dim..(ordinal + 1) * dim];
    match residual {
        Some(p) => {
            let center = p.center(tokens[ordinal] as usize);
            let r: Vec<f32> = point.iter().zip(center).map(|(x, c)| x - c).collect();
            codebook.encode(&r, point, eta, code);
        }
        None => codebook.encode(point, point, eta, code),
    }
}

impl AnnEngine for TreeAhEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::TreeAh
    }

    fn config(&self) -> &ScannConfig {
        &self.config
    }

    fn len(&self) -> usize {
        self.dataset.len() / self.config.dimensionality.max(1)
    }

    fn extract_state(&self) -> EngineState {
        EngineState {
            config: self.config.clone(),
            codebook: self.codebook.clone(),
            partitioner: self.partitioner.clone(),
            datapoints_by_token: self.partitioner.as_ref().map(|_| self.by_token.clone()),
            hashed_dataset: self.codebook.as_ref().map(|_| self.hashed.clone()),
            dataset: Some(self.dataset.clone()),
        }
    }

    fn search(&self, query: &[f32], params: &SearchParameters) -> Result<Vec<NeighborMatch>> {
        let dim = self.config.dimensionality;
        check_query(query, dim)?;

        let measure = self.config.distance_measure;
        let pre = params
            .pre_reordering_num_neighbors
            .unwrap_or(self.config.num_neighbors);
        let mut top = TopK::new(pre, self.config.pre_reordering_epsilon);

        let tokens = match &self.partitioner {
            Some(p) => p.tokens_for_query(query, self.leaves_to_search(params)),
            None => vec![0],
        };

        match &self.codebook {
            Some(codebook) => {
                let num_blocks = codebook.num_blocks();
                let residual = self.residual_partitioner();
                let per_token_table = residual.is_some() && measure == DistanceMeasure::SquaredL2;
                let shared = if per_token_table {
                    Vec::new()
                } else {
                    codebook.lookup_table(query, measure)
                };

                for token in tokens {
                    let local;
                    let (offset, table): (f32, &[f32]) = match residual {
                        // ||q - c - r||^2 needs a table for the shifted query
                        Some(p) if per_token_table => {
                            let center = p.center(token as usize);
                            let shifted: Vec<f32> = query.iter().zip(center).map(|(q, c)| q - c).collect();
                            local = codebook.lookup_table(&shifted, measure);
                            (0.0, &local)
                        }
                        // -(q . c) - (q . r)
                        Some(p) => (measure.distance(query, p.center(token as usize)), &shared),
                        None => (0.0, &shared),
                    };

                    for &ordinal in &self.by_token[token as usize] {
                        let o = ordinal as usize;
                        let code = &self.hashed[o * num_blocks..(o + 1) * num_blocks];
                        top.push(NeighborMatch::new(ordinal, offset + codebook.distance_from_table(table, code)));
                    }
                }
            }
            None => {
                for token in tokens {
                    for &ordinal in &self.by_token[token as usize] {
                        let o = ordinal as usize;
                        let point = &self.dataset[o * dim..(o + 1) * dim];
                        top.push(NeighborMatch::new(ordinal, measure.distance(query, point)));
                    }
                }
            }
        }

        Ok(finish_search(&self.config, &self.dataset, query, top.into_sorted(), params))
    }

    fn add_points(&mut self, vectors: &[f32]) -> Result<()> {
        let dim = self.config.dimensionality;
        if vectors.len() % dim != 0 {
            return Err(EngineError::DimensionMismatch {
                expected: dim,
                actual: vectors.len(),
            });
        }

        let eta = self.eta();
        let first = self.len();
        for (i, point) in vectors.chunks_exact(dim).enumerate() {
            let ordinal = (first + i) as u32;
            let token = match &self.partitioner {
                Some(p) => p.token_for_datapoint(point),
                None => 0,
            };
            // New ordinals are the largest so far, groups stay ascending
            self.by_token[token as usize].push(ordinal);

            if let Some(codebook) = &self.codebook {
                let mut code = vec![0u8; codebook.num_blocks()];
                match self.residual_partitioner() {
                    Some(p) => {
                        let center = p.center(token as usize);
                        let r: Vec<f32> = point.iter().zip(center).map(|(x, c)| x - c).collect();
                        codebook.encode(&r, point, eta, &mut code);
                    }
                    None => codebook.encode(point, point, eta, &mut code),
                }
                self.hashed.extend_from_slice(&code);
            }
        }
        self.dataset.extend_from_slice(vectors);

        tracing::debug!(added = vectors.len() / dim, total = self.len(), "Added points");
        Ok(())
    }
}
