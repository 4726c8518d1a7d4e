//! Integration tests for saving and reloading indexes.
//!
//! These tests verify that a trained index survives persistence:
//! 1. Train on random vectors
//! 2. Save to a single file (or a directory)
//! 3. Load without retraining
//! 4. Verify searches return identical ids and distances

use annex_artifact::{migrate_directory_to_file, ArtifactBundle, ArtifactWriter, SectionKind};
use annex_index::{IndexError, ScannIndex, ScannInterface};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::OpenOptions;
use tempfile::TempDir;

fn random_vectors(rng: &mut StdRng, n: usize, dim: usize) -> Vec<f32> {
    (0..n * dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn trained_index(n: usize, dim: usize, options: &str, seed: u64) -> (ScannIndex, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let vectors = random_vectors(&mut rng, n, dim);
    let ids: Vec<i64> = (0..n as i64).map(|i| 10_000 + i * 3).collect();

    let mut index = ScannIndex::new(dim);
    index.train(&ids, &vectors, options).unwrap();
    (index, vectors)
}

#[test]
fn test_save_reload_identical_results() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.annex");

    let (index, _) = trained_index(1000, 128, "", 7);
    let mut rng = StdRng::seed_from_u64(99);
    let query = random_vectors(&mut rng, 1, 128);

    let before = index.search(&query, 10).unwrap();
    assert_eq!(before.len(), 10);

    index.save(&path).unwrap();
    let reloaded = ScannIndex::load(&path).unwrap();

    assert_eq!(reloaded.len(), 1000);
    assert_eq!(reloaded.dimensionality(), 128);
    assert!(reloaded.is_consistent());
    assert_eq!(reloaded.search(&query, 10).unwrap(), before);
}

#[test]
fn test_save_reload_squared_l2_with_nprobe() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("l2.annex");

    let (index, vectors) = trained_index(600, 16, "distance_measure:squared_l2,num_children:8,nprobe:3", 11);
    let queries = &vectors[..16 * 20];
    let before = index.search_batch(queries, 5).unwrap();

    index.save(&path).unwrap();
    let reloaded = ScannIndex::load(&path).unwrap();

    // nprobe is carried by the persisted spill count
    assert_eq!(reloaded.search_batch(queries, 5).unwrap(), before);
    for (i, results) in before.iter().enumerate() {
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(results[0].id, 10_000 + i as i64 * 3, "query {} finds itself", i);
    }
}

#[test]
fn test_extracted_state_survives_file_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.annex");

    let mut rng = StdRng::seed_from_u64(3);
    let vectors = random_vectors(&mut rng, 300, 12);
    let mut interface = ScannInterface::new();
    let config = annex_index::BuildOptions::parse("num_children:6")
        .unwrap()
        .to_config(300, 12);
    interface.build_from_vectors(&vectors, 12, config, 2).unwrap();
    let state = interface.extract_state().unwrap();

    ArtifactBundle::from_state(state.clone()).save_file(&path, true).unwrap();
    let bundle = ArtifactBundle::load_file(&path).unwrap();

    let mut restored = ScannInterface::new();
    restored.build_from_bundle(bundle).unwrap();
    assert_eq!(restored.extract_state().unwrap(), state);
    assert_eq!(restored.result_multiplier(), interface.result_multiplier());
}

#[test]
fn test_directory_form_and_migration() {
    let dir = TempDir::new().unwrap();
    let legacy = dir.path().join("legacy");
    let migrated = dir.path().join("migrated.annex");

    let (index, vectors) = trained_index(400, 8, "num_children:4", 5);
    let before = index.search(&vectors[..8], 7).unwrap();

    index.save_dir(&legacy).unwrap();
    let from_dir = ScannIndex::load(&legacy).unwrap();
    assert_eq!(from_dir.search(&vectors[..8], 7).unwrap(), before);

    migrate_directory_to_file(&legacy, &migrated).unwrap();
    let from_file = ScannIndex::load(&migrated).unwrap();
    assert_eq!(from_file.search(&vectors[..8], 7).unwrap(), before);
    assert_eq!(from_dir.build_options(), Some("num_children:4"));
    assert_eq!(from_file.build_options(), Some("num_children:4"));
}

#[test]
fn test_unknown_trailing_section_is_skipped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("extended.annex");

    let (index, vectors) = trained_index(200, 4, "num_children:2", 13);
    index.save(&path).unwrap();

    let file = OpenOptions::new().append(true).open(&path).unwrap();
    let mut writer = ArtifactWriter::new(file);
    writer
        .write_section(SectionKind::RawSpan, "future_stats", b"\x00\x01\n\x02")
        .unwrap();
    writer.finish().unwrap();

    let reloaded = ScannIndex::load(&path).unwrap();
    assert_eq!(
        reloaded.search(&vectors[..4], 3).unwrap(),
        index.search(&vectors[..4], 3).unwrap()
    );
}

#[test]
fn test_truncated_artifact_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truncated.annex");

    let (index, _) = trained_index(100, 4, "num_children:2", 17);
    index.save(&path).unwrap();

    let len = std::fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 5).unwrap();

    assert!(matches!(ScannIndex::load(&path), Err(IndexError::Corruption(_))));
}

#[test]
fn test_load_missing_file_is_io() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        ScannIndex::load(dir.path().join("absent.annex")),
        Err(IndexError::Io(_))
    ));
}

#[test]
fn test_live_additions_are_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("live.annex");

    let (mut index, _) = trained_index(200, 4, "distance_measure:squared_l2,num_children:2", 19);
    index.add_with_ids_live(&[-42], &[9.0, 9.0, 9.0, 9.0]).unwrap();
    index.save(&path).unwrap();

    let reloaded = ScannIndex::load(&path).unwrap();
    assert_eq!(reloaded.len(), 201);
    assert!(reloaded.is_consistent());
    assert_eq!(reloaded.search(&[8.5, 8.5, 8.5, 8.5], 1).unwrap()[0].id, -42);
}
