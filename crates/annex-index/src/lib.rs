//! Queryable, persistent ANN index.
//!
//! This crate is the operational shell around [`annex_engine`]:
//!
//! - **Adapter** ([`ScannInterface`]): one trained engine generation,
//!   built from vectors or rehydrated from an artifact
//! - **External ids** ([`ExternalIdMap`]): ordinal `i` is the `i`-th id
//!   appended; unknown ordinals translate to [`INVALID_ID`]
//! - **Query orchestration**: single, batched and parallel batched search
//!   ([`search_batched_parallel`], chunks of [`BATCH_CHUNK_SIZE`])
//! - **Façade** ([`ScannIndex`]): staging, build options, save and load
//!
//! # Two-stage retrieval
//!
//! ```text
//! query ──> probe `leaves` partitions ──> approximate scores ──> best `pre_reorder_k`
//!                                                                   │
//!                                   exact rescoring (if configured) ┘──> best `final_k`
//! ```
//!
//! Without a reordering stage, `final_k` bounds the approximate stage
//! directly.
//!
//! # Example
//!
//! ```no_run
//! use annex_index::ScannIndex;
//!
//! # fn main() -> annex_index::Result<()> {
//! let vectors: Vec<f32> = (0..1000 * 8).map(|i| (i % 31) as f32).collect();
//! let ids: Vec<i64> = (0..1000).collect();
//!
//! let mut index = ScannIndex::new(8);
//! index.train(&ids, &vectors, "num_children:10,nprobe:4")?;
//! let neighbors = index.search(&vectors[..8], 10)?;
//!
//! index.save("/tmp/index.annex")?;
//! let reloaded = ScannIndex::load("/tmp/index.annex")?;
//! assert_eq!(reloaded.search(&vectors[..8], 10)?, neighbors);
//! # Ok(())
//! # }
//! ```

mod error;
mod id_map;
mod index;
mod interface;
mod options;
mod query;

pub use error::{IndexError, Result};
pub use id_map::{validate_append, ExternalIdMap, INVALID_ID};
pub use index::ScannIndex;
pub use interface::ScannInterface;
pub use options::{BuildOptions, DEFAULT_TRAINING_THREADS};
pub use query::{
    search_batched_parallel, search_batched_parallel_with_chunk_size, translate, Neighbor, BATCH_CHUNK_SIZE,
};
