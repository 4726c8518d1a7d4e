//! Engine adapter.
//!
//! [`ScannInterface`] owns exactly one trained engine generation. It turns
//! caller-level requests (`final_k`, `pre_reorder_k`, `leaves`) into engine
//! search parameters and records the distance sign of the build.

use crate::error::{IndexError, Result};
use annex_artifact::{scatter_tokens, ArtifactBundle};
use annex_engine::{
    rehydrate_engine, train_engine, AnnEngine, Codebook, EngineState, FactoryOptions, NeighborMatch, ScannConfig,
    SearchParameters, SerializedPartitioner,
};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Adapter around one trained engine generation.
///
/// Searches take `&self` and may run concurrently. Building replaces the
/// generation wholesale and takes `&mut self`.
pub struct ScannInterface {
    engine: Option<Box<dyn AnnEngine>>,
    result_multiplier: f32,
}

impl Default for ScannInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScannInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannInterface")
            .field("kind", &self.engine.as_ref().map(|e| e.kind()))
            .field("len", &self.len())
            .field("result_multiplier", &self.result_multiplier)
            .finish()
    }
}

impl ScannInterface {
    pub fn new() -> Self {
        Self {
            engine: None,
            result_multiplier: 1.0,
        }
    }

    /// Train a new generation from flattened vectors.
    ///
    /// `training_threads` of 0 means all available cores. The calling
    /// thread counts as one of them, so the training pool gets one worker
    /// fewer, and a single thread trains inline.
    pub fn build_from_vectors(
        &mut self,
        vectors: &[f32],
        dimensionality: usize,
        config: ScannConfig,
        training_threads: i64,
    ) -> Result<()> {
        let pool = training_pool(training_threads)?;
        let engine = train_engine(vectors, dimensionality, config, pool.as_ref())?;
        self.install(engine);
        Ok(())
    }

    /// Rehydrate a generation from persisted pieces without retraining.
    ///
    /// `datapoint_to_token` is in ordinal order. `hashed_dataset` is
    /// attached as is, one code per vector.
    #[allow(clippy::too_many_arguments)]
    pub fn build_from_artifact(
        &mut self,
        config: ScannConfig,
        codebook: Option<Codebook>,
        partitioner: Option<SerializedPartitioner>,
        datapoint_to_token: Option<&[i32]>,
        hashed_dataset: Option<Vec<u8>>,
        vectors: Vec<f32>,
        dimensionality: usize,
    ) -> Result<()> {
        if let Some(tokens) = datapoint_to_token {
            if tokens.len().checked_mul(dimensionality) != Some(vectors.len()) {
                return Err(IndexError::InvalidArgument(format!(
                    "{} token assignments for {} values of dimensionality {}",
                    tokens.len(),
                    vectors.len(),
                    dimensionality
                )));
            }
        }

        let datapoints_by_token = match (datapoint_to_token, partitioner.as_ref()) {
            (Some(tokens), Some(p)) => Some(scatter_tokens(tokens, p.n_tokens())?),
            (Some(_), None) => {
                return Err(IndexError::InvalidArgument(
                    "token assignments supplied without a partitioner".to_string(),
                ))
            }
            (None, _) => None,
        };

        let options = FactoryOptions {
            codebook,
            partitioner,
            datapoints_by_token,
            hashed_dataset,
        };
        self.rehydrate(config, options, vectors, dimensionality)
    }

    /// Rehydrate from a decoded artifact. The artifact must carry its
    /// dataset.
    pub fn build_from_bundle(&mut self, bundle: ArtifactBundle) -> Result<()> {
        let dimensionality = bundle.config.dimensionality;
        let vectors = bundle.dataset.ok_or_else(|| {
            IndexError::InvalidArgument("artifact was saved without its dataset".to_string())
        })?;

        let options = FactoryOptions {
            codebook: bundle.codebook,
            partitioner: bundle.partitioner,
            datapoints_by_token: bundle.datapoints_by_token,
            hashed_dataset: bundle.hashed_dataset,
        };
        self.rehydrate(bundle.config, options, vectors, dimensionality)
    }

    fn rehydrate(
        &mut self,
        config: ScannConfig,
        options: FactoryOptions,
        vectors: Vec<f32>,
        dimensionality: usize,
    ) -> Result<()> {
        if let Some(hashed) = options.hashed_dataset.as_ref() {
            let points = if dimensionality == 0 { 0 } else { vectors.len() / dimensionality };
            if points == 0 || hashed.len() % points != 0 {
                return Err(IndexError::InvalidArgument(format!(
                    "hashed dataset of {} bytes does not split into {} points",
                    hashed.len(),
                    points
                )));
            }
        }

        let engine = rehydrate_engine(config, vectors, dimensionality, options, None)?;
        self.install(engine);
        Ok(())
    }

    fn install(&mut self, engine: Box<dyn AnnEngine>) {
        self.result_multiplier = engine.config().distance_measure.result_multiplier();
        tracing::debug!(
            kind = ?engine.kind(),
            points = engine.len(),
            result_multiplier = self.result_multiplier,
            "Installed engine generation"
        );
        self.engine = Some(engine);
    }

    /// Export the trained state.
    pub fn extract_state(&self) -> Result<EngineState> {
        Ok(self.engine()?.extract_state())
    }

    /// `-1` when distances are negated similarities, `1` otherwise.
    pub fn result_multiplier(&self) -> f32 {
        self.result_multiplier
    }

    pub fn is_built(&self) -> bool {
        self.engine.is_some()
    }

    pub fn config(&self) -> Option<&ScannConfig> {
        self.engine.as_ref().map(|e| e.config())
    }

    /// Dimensionality of the built engine, 0 before a build.
    pub fn dimensionality(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.dimensionality())
    }

    /// Number of datapoints in the built engine.
    pub fn len(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append vectors to the built engine with its trained structures.
    pub fn add_points(&mut self, vectors: &[f32]) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(IndexError::NotBuilt)?;
        engine.add_points(vectors)?;
        Ok(())
    }

    /// Search one query. Distances are internal (minimised).
    pub fn search(
        &self,
        query: &[f32],
        final_k: usize,
        pre_reorder_k: Option<usize>,
        leaves: Option<usize>,
    ) -> Result<Vec<NeighborMatch>> {
        let engine = self.engine()?;
        if query.len() != engine.dimensionality() {
            return Err(IndexError::InvalidArgument(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                engine.dimensionality()
            )));
        }

        let params = self.search_parameters(engine, final_k, pre_reorder_k, leaves);
        Ok(engine.search(query, &params)?)
    }

    /// Search a flattened batch of queries with shared parameters.
    ///
    /// Rejected when the engine has a finite search radius.
    pub fn search_batched(
        &self,
        queries: &[f32],
        final_k: usize,
        pre_reorder_k: Option<usize>,
        leaves: Option<usize>,
    ) -> Result<Vec<Vec<NeighborMatch>>> {
        let engine = self.engine()?;
        let dim = engine.dimensionality();
        if queries.len() % dim != 0 {
            return Err(IndexError::InvalidArgument(format!(
                "query batch of {} values is not a multiple of dimensionality {}",
                queries.len(),
                dim
            )));
        }
        if engine.default_pre_reordering_epsilon().is_finite() || engine.default_post_reordering_epsilon().is_finite()
        {
            return Err(IndexError::InvalidArgument(
                "batched search is not supported with a finite epsilon".to_string(),
            ));
        }

        let params = self.search_parameters(engine, final_k, pre_reorder_k, leaves);
        Ok(engine.search_batched(queries, &params)?)
    }

    fn search_parameters(
        &self,
        engine: &dyn AnnEngine,
        final_k: usize,
        pre_reorder_k: Option<usize>,
        leaves: Option<usize>,
    ) -> SearchParameters {
        let mut params = if engine.config().has_reordering() {
            SearchParameters::new(pre_reorder_k, Some(final_k))
        } else {
            SearchParameters::new(Some(final_k), None)
        };
        if let Some(leaves) = leaves.filter(|&l| l > 0) {
            params = params.with_leaves(leaves);
        }
        engine.set_unspecified_parameters_to_defaults(&mut params);
        params
    }

    fn engine(&self) -> Result<&dyn AnnEngine> {
        self.engine.as_deref().ok_or(IndexError::NotBuilt)
    }
}

/// Pool for training, or `None` to train on the calling thread.
fn training_pool(training_threads: i64) -> Result<Option<ThreadPool>> {
    if training_threads < 0 {
        return Err(IndexError::InvalidArgument(format!(
            "training_threads must not be negative, got {}",
            training_threads
        )));
    }
    let threads = match training_threads {
        0 => available_threads(),
        n => n as usize,
    };

    let workers = threads - 1;
    if workers == 0 {
        return Ok(None);
    }
    tracing::debug!(workers, "Starting training pool");
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("annex-train-{}", i))
        .build()
        .map(Some)
        .map_err(|e| IndexError::Internal(format!("failed to start training pool: {}", e)))
}

pub(crate) fn available_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}
