//! Lloyd's k-means over flattened datasets.
//!
//! Shared by the partitioner (full-dimensional centers) and the asymmetric
//! hasher (one small k-means per subspace block). Assignment steps run on
//! the training pool when one is supplied.

use crate::distance::squared_l2_distance;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use rayon::ThreadPool;

/// Train `k` centers on `data` (row-major, `dim` columns).
///
/// Centers are seeded from distinct random points. If there are fewer
/// points than `k`, the missing centers are zero vectors so the output is
/// always `k * dim` long. Empty clusters keep their previous center.
pub(crate) fn kmeans(
    data: &[f32],
    dim: usize,
    k: usize,
    iterations: usize,
    rng: &mut StdRng,
    pool: Option<&ThreadPool>,
) -> Vec<f32> {
    if data.is_empty() || dim == 0 || k == 0 {
        return vec![0.0; k * dim];
    }

    let n = data.len() / dim;

    // Initialize centers from distinct random points
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);

    let mut centers = Vec::with_capacity(k * dim);
    for &i in indices.iter().take(k.min(n)) {
        centers.extend_from_slice(&data[i * dim..(i + 1) * dim]);
    }
    centers.resize(k * dim, 0.0);

    for _ in 0..iterations {
        let assignments = assign(data, dim, &centers, pool);

        let mut sums = vec![0.0f32; k * dim];
        let mut counts = vec![0usize; k];
        for (point, &c) in data.chunks_exact(dim).zip(assignments.iter()) {
            let c = c as usize;
            counts[c] += 1;
            for (s, v) in sums[c * dim..(c + 1) * dim].iter_mut().zip(point) {
                *s += v;
            }
        }

        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let count = counts[c] as f32;
            for (dst, s) in centers[c * dim..(c + 1) * dim]
                .iter_mut()
                .zip(&sums[c * dim..(c + 1) * dim])
            {
                *dst = s / count;
            }
        }
    }

    centers
}

/// Assign each point to its nearest center (squared L2).
pub(crate) fn assign(data: &[f32], dim: usize, centers: &[f32], pool: Option<&ThreadPool>) -> Vec<u32> {
    match pool {
        Some(pool) => pool.install(|| {
            data.par_chunks_exact(dim)
                .map(|point| nearest_center(point, centers, dim).0 as u32)
                .collect()
        }),
        None => data
            .chunks_exact(dim)
            .map(|point| nearest_center(point, centers, dim).0 as u32)
            .collect(),
    }
}

/// Index and squared L2 distance of the center nearest to `point`.
///
/// Ties go to the lower index.
pub(crate) fn nearest_center(point: &[f32], centers: &[f32], dim: usize) -> (usize, f32) {
    let mut best_idx = 0;
    let mut best_dist = f32::MAX;

    for (idx, center) in centers.chunks_exact(dim).enumerate() {
        let dist = squared_l2_distance(point, center);
        if dist < best_dist {
            best_dist = dist;
            best_idx = idx;
        }
    }

    (best_idx, best_dist)
}

/// Copy a random sample of at most `sample_size` rows.
///
/// Returns the data unchanged (as an owned copy) when it is already small
/// enough.
pub(crate) fn sample_rows(data: &[f32], dim: usize, sample_size: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / dim;
    if n <= sample_size {
        return data.to_vec();
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(sample_size);
    indices.sort_unstable();

    let mut sample = Vec::with_capacity(sample_size * dim);
    for i in indices {
        sample.extend_from_slice(&data[i * dim..(i + 1) * dim]);
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_kmeans_basic() {
        let data = vec![0.0, 0.0, 0.1, 0.1, 10.0, 10.0, 10.1, 10.1];
        let mut rng = StdRng::seed_from_u64(7);

        let centers = kmeans(&data, 2, 2, 10, &mut rng, None);
        assert_eq!(centers.len(), 4);

        // One centroid should be near (0, 0), other near (10, 10)
        let c1_near_zero = centers[0] < 5.0;
        let c2_near_zero = centers[2] < 5.0;
        assert_ne!(c1_near_zero, c2_near_zero);
    }

    #[test]
    fn test_kmeans_pads_missing_centers() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let mut rng = StdRng::seed_from_u64(1);

        let centers = kmeans(&data, 2, 4, 3, &mut rng, None);
        assert_eq!(centers.len(), 8);
        assert_eq!(&centers[4..], &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_parallel_assignment_matches_serial() {
        let data: Vec<f32> = (0..200).map(|i| ((i * 37) % 23) as f32).collect();
        let centers = vec![0.0, 0.0, 10.0, 10.0, 20.0, 20.0];
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();

        assert_eq!(assign(&data, 2, &centers, None), assign(&data, 2, &centers, Some(&pool)));
    }

    #[test]
    fn test_sample_rows() {
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let mut rng = StdRng::seed_from_u64(3);

        assert_eq!(sample_rows(&data, 2, 100, &mut rng), data);

        let sample = sample_rows(&data, 2, 4, &mut rng);
        assert_eq!(sample.len(), 8);
        // Rows stay intact
        for row in sample.chunks_exact(2) {
            assert_eq!(row[1], row[0] + 1.0);
        }
    }
}
