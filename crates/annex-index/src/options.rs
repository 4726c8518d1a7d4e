//! Build options.
//!
//! Indexes are configured from a flat option string:
//!
//! ```text
//! num_children:2000,distance_measure:squared_l2,nprobe:32,train_thread_num:4
//! ```
//!
//! Pairs are separated by `,`, keys from values by `:`. Anything that is not
//! exactly one `key:value` pair, and any unknown key, is ignored.
//!
//! | Key | Effect |
//! |-----|--------|
//! | `num_children` | number of partitions (`0` means 4000) |
//! | `noise_shaping_threshold` | anisotropic threshold (`0` means 1, i.e. off) |
//! | `distance_measure` | `dot_product` or `squared_l2` |
//! | `train_sample_ratio` | partition training sample = points * ratio |
//! | `max_search_num` | approximate candidates = 2 * value |
//! | `nprobe` | partitions probed per query, raises `num_neighbors` to 500 |
//! | `train_thread_num` | training threads (default 2) |

use crate::error::{IndexError, Result};
use annex_engine::{DistanceMeasure, ScannConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const DEFAULT_NUM_CHILDREN: usize = 4000;
const NPROBE_NUM_NEIGHBORS: usize = 500;

/// Default training threads when `train_thread_num` is not given.
pub const DEFAULT_TRAINING_THREADS: i64 = 2;

/// Options parsed from a build option string. `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOptions {
    pub num_children: Option<usize>,
    pub noise_shaping_threshold: Option<f32>,
    pub distance_measure: Option<DistanceMeasure>,
    pub train_sample_ratio: Option<f32>,
    pub max_search_num: Option<usize>,
    pub nprobe: Option<usize>,
    pub train_thread_num: Option<i64>,
}

impl BuildOptions {
    /// Parse a `key:value,key:value` option string.
    ///
    /// Malformed pairs and unknown keys are skipped. A known key with a
    /// value that does not parse is an error.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = BuildOptions::default();

        for pair in options.split(',').filter(|p| !p.is_empty()) {
            let parts: Vec<&str> = pair.split(':').collect();
            let (key, value) = match parts.as_slice() {
                [key, value] => (key.trim(), value.trim()),
                _ => {
                    tracing::debug!(pair, "Ignoring malformed build option");
                    continue;
                }
            };

            match key {
                "num_children" => parsed.num_children = Some(parse_value(key, value)?),
                "noise_shaping_threshold" => parsed.noise_shaping_threshold = Some(parse_value(key, value)?),
                "distance_measure" => {
                    let measure = DistanceMeasure::from_option_value(value).ok_or_else(|| {
                        IndexError::InvalidArgument(format!("unknown distance_measure {:?}", value))
                    })?;
                    parsed.distance_measure = Some(measure);
                }
                "train_sample_ratio" => {
                    let ratio: f32 = parse_value(key, value)?;
                    if !ratio.is_finite() || ratio <= 0.0 {
                        return Err(IndexError::InvalidArgument(format!(
                            "train_sample_ratio must be positive, got {}",
                            value
                        )));
                    }
                    parsed.train_sample_ratio = Some(ratio);
                }
                "max_search_num" => parsed.max_search_num = Some(parse_value(key, value)?),
                "nprobe" => parsed.nprobe = Some(parse_value(key, value)?),
                "train_thread_num" => parsed.train_thread_num = Some(parse_value(key, value)?),
                _ => tracing::debug!(key, "Ignoring unknown build option"),
            }
        }

        Ok(parsed)
    }

    /// Training threads to request from the adapter.
    pub fn training_threads(&self) -> i64 {
        self.train_thread_num.unwrap_or(DEFAULT_TRAINING_THREADS)
    }

    /// Partition probe count applied to every query, if `nprobe` was given.
    pub fn leaves(&self) -> Option<usize> {
        self.nprobe
    }

    /// Engine configuration for a build over `num_points` vectors.
    pub fn to_config(&self, num_points: usize, dimensionality: usize) -> ScannConfig {
        let mut config = ScannConfig {
            dimensionality,
            ..ScannConfig::default()
        };

        if let (Some(num_children), Some(partitioning)) = (self.num_children, config.partitioning.as_mut()) {
            partitioning.num_children = if num_children == 0 {
                DEFAULT_NUM_CHILDREN
            } else {
                num_children
            };
        }
        if let (Some(threshold), Some(hash)) = (self.noise_shaping_threshold, config.hash.as_mut()) {
            hash.noise_shaping_threshold = if threshold == 0.0 { 1.0 } else { threshold };
        }
        if let Some(measure) = self.distance_measure {
            config = config.with_distance_measure(measure);
        }
        if let (Some(ratio), Some(partitioning)) = (self.train_sample_ratio, config.partitioning.as_mut()) {
            partitioning.expected_sample_size = ((num_points as f64 * ratio as f64) as usize).max(1);
        }
        if let (Some(max), Some(reordering)) = (self.max_search_num, config.exact_reordering.as_mut()) {
            reordering.approx_num_neighbors = max.saturating_mul(2);
        }
        if let Some(nprobe) = self.nprobe {
            if let Some(partitioning) = config.partitioning.as_mut() {
                partitioning.max_spill_centers = nprobe;
            }
            config.num_neighbors = NPROBE_NUM_NEIGHBORS;
        }

        config
    }
}

impl FromStr for BuildOptions {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| IndexError::InvalidArgument(format!("bad value {:?} for build option {}", value, key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_keys() {
        let options = BuildOptions::parse(
            "num_children:200,noise_shaping_threshold:0.3,distance_measure:squared_l2,\
             train_sample_ratio:0.5,max_search_num:64,nprobe:12,train_thread_num:4",
        )
        .unwrap();

        assert_eq!(options.num_children, Some(200));
        assert_eq!(options.noise_shaping_threshold, Some(0.3));
        assert_eq!(options.distance_measure, Some(DistanceMeasure::SquaredL2));
        assert_eq!(options.train_sample_ratio, Some(0.5));
        assert_eq!(options.max_search_num, Some(64));
        assert_eq!(options.leaves(), Some(12));
        assert_eq!(options.training_threads(), 4);
    }

    #[test]
    fn test_malformed_and_unknown_pairs_ignored() {
        let options = BuildOptions::parse("nprobe,a:b:c,,colour:blue,num_children:8").unwrap();
        assert_eq!(
            options,
            BuildOptions {
                num_children: Some(8),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_bad_values_rejected() {
        for s in [
            "num_children:many",
            "nprobe:-3",
            "distance_measure:cosine",
            "train_sample_ratio:0",
            "noise_shaping_threshold:x",
        ] {
            assert!(matches!(BuildOptions::parse(s), Err(IndexError::InvalidArgument(_))), "{}", s);
        }
    }

    #[test]
    fn test_empty_string_is_default() {
        let options: BuildOptions = "".parse().unwrap();
        assert_eq!(options, BuildOptions::default());
        assert_eq!(options.training_threads(), DEFAULT_TRAINING_THREADS);
        assert_eq!(options.to_config(10, 4), ScannConfig { dimensionality: 4, ..Default::default() });
    }

    #[test]
    fn test_zero_values_take_fallbacks() {
        let config = BuildOptions::parse("num_children:0,noise_shaping_threshold:0")
            .unwrap()
            .to_config(100, 8);

        assert_eq!(config.partitioning.unwrap().num_children, 4000);
        assert_eq!(config.hash.unwrap().noise_shaping_threshold, 1.0);
    }

    #[test]
    fn test_option_effects_on_config() {
        let config = BuildOptions::parse("distance_measure:squared_l2,train_sample_ratio:0.25,max_search_num:50,nprobe:7")
            .unwrap()
            .to_config(1000, 16);

        assert_eq!(config.dimensionality, 16);
        assert_eq!(config.distance_measure, DistanceMeasure::SquaredL2);
        assert_eq!(config.num_neighbors, 500);
        assert_eq!(config.exact_reordering.unwrap().approx_num_neighbors, 100);
        assert!(!config.hash.unwrap().use_residual_quantization);

        let partitioning = config.partitioning.unwrap();
        assert_eq!(partitioning.expected_sample_size, 250);
        assert_eq!(partitioning.max_spill_centers, 7);
        assert_eq!(partitioning.query_tokenization_distance, DistanceMeasure::SquaredL2);
    }
}
