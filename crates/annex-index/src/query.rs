//! Parallel batch scheduling and result translation.
//!
//! A parallel batch is cut into contiguous chunks of [`BATCH_CHUNK_SIZE`]
//! queries. Each chunk is one task on a pool built for the call:
//!
//! ```text
//! queries:  [ chunk 0: 0..256 | chunk 1: 256..512 | chunk 2: 512..600 ]
//!                 |                   |                    |
//!            search_batched      search_batched       search_batched
//!                 v                   v                    v
//! results:  [      0..256     |      256..512      |      512..600    ]
//! ```
//!
//! Tasks only read the shared queries and write their own output range.

use crate::error::{IndexError, Result};
use crate::id_map::ExternalIdMap;
use crate::interface::{available_threads, ScannInterface};
use annex_engine::NeighborMatch;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

/// Queries per parallel task.
pub const BATCH_CHUNK_SIZE: usize = 256;

/// A search result with its external id and surfaced distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: i64,
    pub distance: f32,
}

/// Search a flattened batch in parallel chunks of [`BATCH_CHUNK_SIZE`].
pub fn search_batched_parallel(
    interface: &ScannInterface,
    queries: &[f32],
    final_k: usize,
    pre_reorder_k: Option<usize>,
    leaves: Option<usize>,
) -> Result<Vec<Vec<NeighborMatch>>> {
    search_batched_parallel_with_chunk_size(interface, queries, final_k, pre_reorder_k, leaves, BATCH_CHUNK_SIZE)
}

/// [`search_batched_parallel`] with an explicit chunk size.
///
/// If several chunks fail, one of their errors is returned and the partial
/// results are dropped.
pub fn search_batched_parallel_with_chunk_size(
    interface: &ScannInterface,
    queries: &[f32],
    final_k: usize,
    pre_reorder_k: Option<usize>,
    leaves: Option<usize>,
    chunk_size: usize,
) -> Result<Vec<Vec<NeighborMatch>>> {
    if chunk_size == 0 {
        return Err(IndexError::InvalidArgument("chunk size must be positive".to_string()));
    }
    if !interface.is_built() {
        return Err(IndexError::NotBuilt);
    }
    let dim = interface.dimensionality();
    if queries.len() % dim != 0 {
        return Err(IndexError::InvalidArgument(format!(
            "query batch of {} values is not a multiple of dimensionality {}",
            queries.len(),
            dim
        )));
    }

    let num_queries = queries.len() / dim;
    if num_queries == 0 {
        return interface.search_batched(queries, final_k, pre_reorder_k, leaves);
    }

    let threads = available_threads().saturating_sub(1).max(1);
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("annex-query-{}", i))
        .build()
        .map_err(|e| IndexError::Internal(format!("failed to start query pool: {}", e)))?;

    tracing::debug!(
        queries = num_queries,
        chunks = num_queries.div_ceil(chunk_size),
        threads,
        "Running parallel batched search"
    );

    let mut results = vec![Vec::new(); num_queries];
    pool.install(|| {
        results
            .par_chunks_mut(chunk_size)
            .zip(queries.par_chunks(chunk_size * dim))
            .try_for_each(|(out, chunk)| {
                let chunk = chunk.to_vec();
                let batch = interface.search_batched(&chunk, final_k, pre_reorder_k, leaves)?;
                for (slot, result) in out.iter_mut().zip(batch) {
                    *slot = result;
                }
                Ok::<(), IndexError>(())
            })
    })?;

    Ok(results)
}

/// Map ordinals to external ids and distances to their surfaced sign.
pub fn translate(results: &[NeighborMatch], id_map: &ExternalIdMap, result_multiplier: f32) -> Vec<Neighbor> {
    results
        .iter()
        .map(|m| Neighbor {
            id: id_map.translate(m.ordinal),
            distance: m.distance * result_multiplier,
        })
        .collect()
}
