//! Index façade.
//!
//! [`ScannIndex`] ties the adapter, the id map and the artifact codec
//! together behind external ids:
//!
//! ```text
//! add_with_ids ──> staged ids + vectors ──build──> ScannInterface + ExternalIdMap
//! add_with_ids_live ─────────────────────────────> both, without retraining
//! search ──> ordinals ──ExternalIdMap──> (id, distance)
//! save / load ──> ArtifactBundle (single file or directory)
//! ```
//!
//! Every vector ever added is kept staged, so a later `build` retrains over
//! the whole corpus. The option string of the last build is saved with the
//! index and reused by [`ScannIndex::rebuild`].

use crate::error::{IndexError, Result};
use crate::id_map::{validate_append, ExternalIdMap, INVALID_ID};
use crate::interface::ScannInterface;
use crate::options::BuildOptions;
use crate::query::{self, Neighbor};
use annex_artifact::ArtifactBundle;
use annex_engine::NeighborMatch;
use std::path::Path;

/// Persistent ANN index keyed by external `i64` ids.
#[derive(Debug)]
pub struct ScannIndex {
    dimensionality: usize,
    interface: ScannInterface,
    id_map: ExternalIdMap,
    staged_ids: Vec<i64>,
    staged_vectors: Vec<f32>,
    /// Partition probe count from the last build's `nprobe`.
    leaves: Option<usize>,
    /// Option string of the last build.
    build_options: Option<String>,
}

impl ScannIndex {
    pub fn new(dimensionality: usize) -> Self {
        Self {
            dimensionality,
            interface: ScannInterface::new(),
            id_map: ExternalIdMap::new(),
            staged_ids: Vec::new(),
            staged_vectors: Vec::new(),
            leaves: None,
            build_options: None,
        }
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    /// Stage vectors for the next [`build`](Self::build).
    ///
    /// Nothing is staged if `vectors` does not hold exactly one vector per
    /// id.
    pub fn add_with_ids(&mut self, ids: &[i64], vectors: &[f32]) -> Result<()> {
        validate_append(ids, vectors, self.dimensionality)?;
        self.staged_ids.extend_from_slice(ids);
        self.staged_vectors.extend_from_slice(vectors);
        Ok(())
    }

    /// Add vectors to the built index immediately, reusing its trained
    /// partitions and codebook.
    pub fn add_with_ids_live(&mut self, ids: &[i64], vectors: &[f32]) -> Result<()> {
        validate_append(ids, vectors, self.dimensionality)?;
        if !self.interface.is_built() {
            return Err(IndexError::NotBuilt);
        }
        if self.pending() > 0 {
            // Staged-but-unbuilt points would take the ordinals the engine
            // is about to assign
            return Err(IndexError::InvalidArgument(format!(
                "{} staged points must be built before adding live",
                self.pending()
            )));
        }

        self.interface.add_points(vectors)?;
        self.id_map.extend_from_slice(ids);
        self.staged_ids.extend_from_slice(ids);
        self.staged_vectors.extend_from_slice(vectors);

        if !self.is_consistent() {
            tracing::warn!(
                ids = self.id_map.len(),
                points = self.interface.len(),
                "Id map out of step with engine after live add"
            );
        }
        Ok(())
    }

    /// Train a new generation over every staged vector.
    pub fn build(&mut self, options: &str) -> Result<()> {
        let raw = options;
        let options = BuildOptions::parse(raw)?;
        let num_points = self.staged_ids.len();
        let config = options.to_config(num_points, self.dimensionality);

        self.interface.build_from_vectors(
            &self.staged_vectors,
            self.dimensionality,
            config,
            options.training_threads(),
        )?;
        self.id_map = ExternalIdMap::from_vec(self.staged_ids.clone());
        self.leaves = options.leaves();
        self.build_options = Some(raw.to_string());

        tracing::info!(
            points = num_points,
            dimensionality = self.dimensionality,
            leaves = ?self.leaves,
            "Built index"
        );
        Ok(())
    }

    /// Retrain with the options of the last build, or the defaults if
    /// there was none.
    pub fn rebuild(&mut self) -> Result<()> {
        let options = self.build_options.clone().unwrap_or_default();
        self.build(&options)
    }

    /// Option string of the last build, restored by [`load`](Self::load).
    pub fn build_options(&self) -> Option<&str> {
        self.build_options.as_deref()
    }

    /// Stage `ids`/`vectors` and build.
    pub fn train(&mut self, ids: &[i64], vectors: &[f32], options: &str) -> Result<()> {
        self.add_with_ids(ids, vectors)?;
        self.build(options)
    }

    /// The `k` nearest neighbors of `query`.
    ///
    /// Distances are surfaced with their natural sign: inner products for
    /// dot product, squared distances for squared L2.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let results = self.interface.search(query, k, None, self.leaves)?;
        Ok(self.translate(&results))
    }

    /// [`search`](Self::search) with explicit first-stage candidates and
    /// partition probes.
    pub fn search_with(
        &self,
        query: &[f32],
        k: usize,
        pre_reorder_k: Option<usize>,
        leaves: Option<usize>,
    ) -> Result<Vec<Neighbor>> {
        let results = self.interface.search(query, k, pre_reorder_k, leaves.or(self.leaves))?;
        Ok(self.translate(&results))
    }

    /// Search a flattened batch of queries on the calling thread.
    pub fn search_batch(&self, queries: &[f32], k: usize) -> Result<Vec<Vec<Neighbor>>> {
        let results = self.interface.search_batched(queries, k, None, self.leaves)?;
        Ok(self.translate_all(&results))
    }

    /// Search a flattened batch of queries on a thread pool.
    pub fn search_batch_parallel(&self, queries: &[f32], k: usize) -> Result<Vec<Vec<Neighbor>>> {
        let results = query::search_batched_parallel(&self.interface, queries, k, None, self.leaves)?;
        Ok(self.translate_all(&results))
    }

    fn translate(&self, results: &[NeighborMatch]) -> Vec<Neighbor> {
        self.warn_if_inconsistent();
        query::translate(results, &self.id_map, self.interface.result_multiplier())
    }

    fn translate_all(&self, results: &[Vec<NeighborMatch>]) -> Vec<Vec<Neighbor>> {
        self.warn_if_inconsistent();
        let multiplier = self.interface.result_multiplier();
        results
            .iter()
            .map(|r| query::translate(r, &self.id_map, multiplier))
            .collect()
    }

    fn warn_if_inconsistent(&self) {
        if !self.is_consistent() {
            tracing::warn!(
                ids = self.id_map.len(),
                points = self.interface.len(),
                "Id map does not cover every engine ordinal"
            );
        }
    }

    /// Save to a single artifact file, dataset and id map included.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bundle = self.bundle()?;
        bundle.save_file(path.as_ref(), true)?;
        tracing::info!(path = %path.as_ref().display(), points = self.len(), "Saved index");
        Ok(())
    }

    /// Save in the directory form.
    pub fn save_dir(&self, dir: impl AsRef<Path>) -> Result<()> {
        let bundle = self.bundle()?;
        bundle.save_dir(dir.as_ref(), true)?;
        tracing::info!(dir = %dir.as_ref().display(), points = self.len(), "Saved index directory");
        Ok(())
    }

    fn bundle(&self) -> Result<ArtifactBundle> {
        let state = self.interface.extract_state()?;
        let bundle = ArtifactBundle::from_state(state).with_id_map(self.id_map.as_slice().to_vec());
        Ok(match &self.build_options {
            Some(options) => bundle.with_build_options(options.as_str()),
            None => bundle,
        })
    }

    /// Load an index saved by [`save`](Self::save) or
    /// [`save_dir`](Self::save_dir).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut bundle = if path.is_dir() {
            ArtifactBundle::load_dir(path)?
        } else {
            ArtifactBundle::load_file(path)?
        };

        let dimensionality = bundle.config.dimensionality;
        let vectors = bundle.dataset.clone().unwrap_or_default();
        let points = if dimensionality == 0 { 0 } else { vectors.len() / dimensionality };

        // Ordinals without a saved id keep their slot so later appends line up
        let ids = match bundle.id_map.take() {
            Some(ids) if ids.len() == points => ids,
            Some(ids) => {
                return Err(IndexError::Corruption(format!(
                    "id map has {} ids for {} points",
                    ids.len(),
                    points
                )))
            }
            None => {
                tracing::warn!(path = %path.display(), points, "Artifact has no id map, ids are unknown");
                vec![INVALID_ID; points]
            }
        };

        let build_options = bundle.build_options.take();
        let leaves = match build_options.as_deref() {
            Some(raw) => BuildOptions::parse(raw)
                .map_err(|e| IndexError::Corruption(format!("saved build options: {}", e)))?
                .leaves(),
            None => None,
        };

        let mut interface = ScannInterface::new();
        interface.build_from_bundle(bundle)?;

        let index = Self {
            dimensionality,
            interface,
            id_map: ExternalIdMap::from_vec(ids.clone()),
            staged_ids: ids,
            staged_vectors: vectors,
            leaves,
            build_options,
        };

        tracing::info!(path = %path.display(), points = index.len(), dimensionality, "Loaded index");
        index.warn_if_inconsistent();
        Ok(index)
    }

    /// Drop the built engine, the id map and everything staged.
    pub fn clear(&mut self) {
        self.interface = ScannInterface::new();
        self.id_map.clear();
        self.staged_ids.clear();
        self.staged_vectors.clear();
        self.leaves = None;
        self.build_options = None;
    }

    /// Points in the built engine.
    pub fn len(&self) -> usize {
        self.interface.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_built(&self) -> bool {
        self.interface.is_built()
    }

    /// Staged points not yet in the built engine.
    pub fn pending(&self) -> usize {
        self.staged_ids.len().saturating_sub(self.id_map.len())
    }

    /// Whether every engine ordinal has exactly one external id.
    pub fn is_consistent(&self) -> bool {
        self.id_map.len() == self.interface.len()
    }

    pub fn supports_update(&self) -> bool {
        false
    }

    pub fn supports_delete(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annex_engine::DistanceMeasure;

    fn points(n: usize, dim: usize) -> Vec<f32> {
        (0..n * dim).map(|i| ((i * 37) % 113) as f32 / 7.0).collect()
    }

    #[test]
    fn test_add_with_ids_is_deferred() {
        let mut index = ScannIndex::new(2);
        index.add_with_ids(&[1, 2, 3], &points(3, 2)).unwrap();

        assert!(!index.is_built());
        assert_eq!(index.len(), 0);
        assert_eq!(index.pending(), 3);
        assert!(matches!(index.search(&[0.0, 0.0], 1), Err(IndexError::NotBuilt)));
    }

    #[test]
    fn test_add_with_ids_mismatch_is_rejected() {
        let mut index = ScannIndex::new(2);
        assert!(matches!(
            index.add_with_ids(&[1, 2], &points(3, 2)),
            Err(IndexError::InvalidArgument(_))
        ));
        assert_eq!(index.pending(), 0);
    }

    #[test]
    fn test_search_returns_external_ids() {
        let mut index = ScannIndex::new(2);
        let vectors = vec![0.0, 0.0, 10.0, 10.0, 20.0, 20.0];
        index
            .train(&[500, 600, 700], &vectors, "distance_measure:squared_l2,num_children:1")
            .unwrap();

        let results = index.search(&[9.0, 9.0], 2).unwrap();
        assert_eq!(results[0].id, 600);
        assert!((results[0].distance - 2.0).abs() < 1e-4);
        assert_eq!(results[1].id, 500);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_dot_product_distances_surface_positive() {
        let mut index = ScannIndex::new(2);
        let vectors = vec![1.0, 0.0, 0.0, 1.0, 3.0, 0.0];
        index.train(&[1, 2, 3], &vectors, "num_children:1").unwrap();

        let results = index.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].id, 3);
        assert!((results[0].distance - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_add_live_requires_built_and_no_pending() {
        let mut index = ScannIndex::new(2);
        assert!(matches!(index.add_with_ids_live(&[1], &[0.0, 0.0]), Err(IndexError::NotBuilt)));

        index.train(&[1, 2], &points(2, 2), "distance_measure:squared_l2").unwrap();
        index.add_with_ids(&[3], &[1.0, 1.0]).unwrap();
        assert!(matches!(
            index.add_with_ids_live(&[4], &[2.0, 2.0]),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_add_live_is_searchable() {
        let mut index = ScannIndex::new(2);
        index
            .train(&[1, 2], &[0.0, 0.0, 1.0, 1.0], "distance_measure:squared_l2")
            .unwrap();
        index.add_with_ids_live(&[99], &[50.0, 50.0]).unwrap();

        assert_eq!(index.len(), 3);
        assert!(index.is_consistent());
        assert_eq!(index.search(&[49.0, 49.0], 1).unwrap()[0].id, 99);
    }

    #[test]
    fn test_rebuild_includes_live_points() {
        let mut index = ScannIndex::new(2);
        index.train(&[1, 2], &[0.0, 0.0, 1.0, 1.0], "distance_measure:squared_l2").unwrap();
        index.add_with_ids_live(&[3], &[5.0, 5.0]).unwrap();
        index.add_with_ids(&[4], &[9.0, 9.0]).unwrap();
        index.build("distance_measure:squared_l2").unwrap();

        assert_eq!(index.len(), 4);
        assert_eq!(index.pending(), 0);
        assert_eq!(index.search(&[9.0, 9.0], 1).unwrap()[0].id, 4);
    }

    #[test]
    fn test_clear() {
        let mut index = ScannIndex::new(2);
        index.train(&[1, 2], &points(2, 2), "").unwrap();
        index.clear();

        assert!(!index.is_built());
        assert!(index.is_empty());
        assert_eq!(index.pending(), 0);
        assert!(index.is_consistent());
    }

    #[test]
    fn test_save_without_build() {
        let dir = tempfile::tempdir().unwrap();
        let index = ScannIndex::new(4);
        assert!(matches!(index.save(dir.path().join("x.annex")), Err(IndexError::NotBuilt)));
    }

    fn save_without_ids(path: &Path, vectors: &[f32]) {
        let config = annex_engine::ScannConfig::brute_force(2).with_distance_measure(DistanceMeasure::SquaredL2);
        let mut interface = ScannInterface::new();
        interface.build_from_vectors(vectors, 2, config, 1).unwrap();
        ArtifactBundle::from_state(interface.extract_state().unwrap())
            .save_file(path, true)
            .unwrap();
    }

    const CORNERS: [f32; 8] = [0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0];

    #[test]
    fn test_load_without_id_map_yields_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.annex");
        save_without_ids(&path, &CORNERS);

        let index = ScannIndex::load(&path).unwrap();
        assert!(index.is_consistent());
        assert_eq!(index.pending(), 0);
        let results = index.search(&[1.0, 1.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|n| n.id == INVALID_ID));
    }

    #[test]
    fn test_live_add_after_load_without_id_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.annex");
        save_without_ids(&path, &CORNERS);

        let mut index = ScannIndex::load(&path).unwrap();
        index.add_with_ids_live(&[777], &[100.0, 100.0]).unwrap();

        assert_eq!(index.len(), 5);
        assert!(index.is_consistent());
        assert_eq!(index.search(&[100.0, 100.0], 1).unwrap()[0].id, 777);
        assert_eq!(index.search(&[0.0, 0.0], 1).unwrap()[0].id, INVALID_ID);
    }

    #[test]
    fn test_deferred_add_after_load_without_id_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.annex");
        save_without_ids(&path, &CORNERS);

        let mut index = ScannIndex::load(&path).unwrap();
        index.add_with_ids(&[777], &[100.0, 100.0]).unwrap();
        assert_eq!(index.pending(), 1);
        index.build("distance_measure:squared_l2,num_children:1").unwrap();

        assert_eq!(index.len(), 5);
        assert!(index.is_consistent());
        assert_eq!(index.search(&[100.0, 100.0], 1).unwrap()[0].id, 777);
        assert_eq!(index.search(&[0.0, 0.0], 1).unwrap()[0].id, INVALID_ID);
    }

    #[test]
    fn test_load_rejects_short_id_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.annex");

        let config = annex_engine::ScannConfig::brute_force(2);
        let mut interface = ScannInterface::new();
        interface.build_from_vectors(&CORNERS, 2, config, 1).unwrap();
        ArtifactBundle::from_state(interface.extract_state().unwrap())
            .with_id_map(vec![1, 2, 3])
            .save_file(&path, true)
            .unwrap();

        assert!(matches!(ScannIndex::load(&path), Err(IndexError::Corruption(_))));
    }

    #[test]
    fn test_build_options_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opts.annex");
        let options = "distance_measure:squared_l2,num_children:4,nprobe:2,train_thread_num:1";

        let mut index = ScannIndex::new(2);
        let ids: Vec<i64> = (0..40).collect();
        index.train(&ids, &points(40, 2), options).unwrap();
        index.save(&path).unwrap();

        let mut reloaded = ScannIndex::load(&path).unwrap();
        assert_eq!(reloaded.build_options(), Some(options));
        assert_eq!(reloaded.leaves, Some(2));

        reloaded.add_with_ids(&[40], &[50.0, 50.0]).unwrap();
        reloaded.rebuild().unwrap();
        assert_eq!(reloaded.len(), 41);
        assert_eq!(reloaded.interface.result_multiplier(), 1.0);
        assert_eq!(reloaded.search(&[50.0, 50.0], 1).unwrap()[0].id, 40);
    }

    #[test]
    fn test_rebuild_without_prior_build_uses_defaults() {
        let mut index = ScannIndex::new(2);
        index.add_with_ids(&[1, 2, 3], &points(3, 2)).unwrap();
        index.rebuild().unwrap();

        assert!(index.is_built());
        assert_eq!(index.build_options(), Some(""));
    }

    #[test]
    fn test_capabilities() {
        let index = ScannIndex::new(8);
        assert!(!index.supports_update());
        assert!(!index.supports_delete());
        assert_eq!(index.dimensionality(), 8);
    }
}
