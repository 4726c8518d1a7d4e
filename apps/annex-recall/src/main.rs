//! annex-recall: checks that a saved index answers like the one that wrote it.
//!
//! Trains an index over a data file, answers every query, saves the index,
//! loads it back, answers the queries again and prints the overlap of the
//! two result sets per query.
//!
//! ```text
//! annex-recall [DATA_FILE] [QUERY_FILE]
//! ```
//!
//! # Environment
//!
//! - `ANNEX_DIM` - vector dimensionality (default 128)
//! - `ANNEX_BUILD_OPTIONS` - build option string (default `num_children:4000,noise_shaping_threshold:0.3`)
//! - `ANNEX_TOP_K` - neighbors per query (default 1000)
//! - `ANNEX_ARTIFACT` - where the index is saved (default `data.annex`)
//! - `RUST_LOG` - log filter (default `info`)

mod records;

use annex_index::ScannIndex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Tool configuration.
#[derive(Debug, Clone)]
struct Config {
    data_file: PathBuf,
    query_file: PathBuf,
    dimensionality: usize,
    build_options: String,
    top_k: usize,
    artifact: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("./test.data"),
            query_file: PathBuf::from("./query.data"),
            dimensionality: 128,
            build_options: "num_children:4000,noise_shaping_threshold:0.3".to_string(),
            top_k: 1000,
            artifact: PathBuf::from("data.annex"),
        }
    }
}

impl Config {
    fn from_env_and_args() -> Self {
        let mut config = Self::default();

        let args: Vec<String> = std::env::args().skip(1).collect();
        if let [data, query] = args.as_slice() {
            config.data_file = PathBuf::from(data);
            config.query_file = PathBuf::from(query);
        }

        if let Some(dim) = std::env::var("ANNEX_DIM").ok().and_then(|v| v.parse().ok()) {
            config.dimensionality = dim;
        }
        if let Ok(options) = std::env::var("ANNEX_BUILD_OPTIONS") {
            config.build_options = options;
        }
        if let Some(k) = std::env::var("ANNEX_TOP_K").ok().and_then(|v| v.parse().ok()) {
            config.top_k = k;
        }
        if let Ok(path) = std::env::var("ANNEX_ARTIFACT") {
            config.artifact = PathBuf::from(path);
        }

        config
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::from_env_and_args();
    info!(
        data = %config.data_file.display(),
        queries = %config.query_file.display(),
        dimensionality = config.dimensionality,
        options = %config.build_options,
        "Starting annex-recall"
    );

    let dim = config.dimensionality;
    let data = records::read_vectors(&config.data_file, dim)?;
    let queries = records::read_vectors(&config.query_file, dim)?;
    info!(points = data.len() / dim, queries = queries.len() / dim, "Loaded vectors");

    let ids: Vec<i64> = (0..(data.len() / dim) as i64).collect();
    let mut index = ScannIndex::new(dim);
    let start = Instant::now();
    index.train(&ids, &data, &config.build_options)?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "Trained index");

    let start = Instant::now();
    let first = queries
        .chunks_exact(dim)
        .map(|query| index.search(query, config.top_k).map(|r| id_set(&r)))
        .collect::<Result<Vec<_>, _>>()?;
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "First pass");

    index.save(&config.artifact)?;
    let reloaded = ScannIndex::load(&config.artifact)?;

    let start = Instant::now();
    let second: Vec<HashSet<i64>> = reloaded
        .search_batch_parallel(&queries, config.top_k)?
        .iter()
        .map(|r| id_set(r))
        .collect();
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "Second pass");

    for (a, b) in first.iter().zip(&second) {
        println!("{:.4}", overlap(a, b));
    }
    Ok(())
}

fn id_set(results: &[annex_index::Neighbor]) -> HashSet<i64> {
    results.iter().map(|n| n.id).collect()
}

/// Share of `a` also present in `b`. Empty `a` counts as full agreement.
fn overlap(a: &HashSet<i64>, b: &HashSet<i64>) -> f64 {
    if a.is_empty() {
        return 1.0;
    }
    a.intersection(b).count() as f64 / a.len() as f64
}
