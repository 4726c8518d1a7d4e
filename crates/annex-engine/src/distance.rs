//! Distance measures for the engine.
//!
//! Two measures are supported:
//! - **Dot product**: maximum inner product search (MIPS). Stored negated so
//!   that, like every other measure, lower means more similar.
//! - **Squared L2**: squared Euclidean distance, no square root.
//!
//! The kernels are written to be auto-vectorized in release builds.

use serde::{Deserialize, Serialize};

/// Distance measure used for scoring datapoints against a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistanceMeasure {
    /// Negated inner product: -(a · b).
    DotProduct,
    /// Squared Euclidean distance: sum((a[i] - b[i])^2).
    SquaredL2,
}

impl DistanceMeasure {
    /// Compute the (minimised) distance between two vectors.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::DotProduct => -dot_product(a, b),
            Self::SquaredL2 => squared_l2_distance(a, b),
        }
    }

    /// Whether the measure is a maximised similarity stored negated.
    pub fn is_negated(&self) -> bool {
        matches!(self, Self::DotProduct)
    }

    /// Multiplier applied to internal distances before they are surfaced.
    ///
    /// `-1.0` for negated measures (so callers see the raw inner product),
    /// `1.0` otherwise.
    pub fn result_multiplier(&self) -> f32 {
        if self.is_negated() {
            -1.0
        } else {
            1.0
        }
    }

    /// Parse the value used by the `distance_measure` build option.
    pub fn from_option_value(value: &str) -> Option<Self> {
        match value {
            "dot_product" => Some(Self::DotProduct),
            "squared_l2" => Some(Self::SquaredL2),
            _ => None,
        }
    }

    /// The build-option spelling of this measure.
    pub fn option_value(&self) -> &'static str {
        match self {
            Self::DotProduct => "dot_product",
            Self::SquaredL2 => "squared_l2",
        }
    }
}

/// Compute the inner product of two vectors.
///
/// # Example
///
/// ```
/// use annex_engine::dot_product;
///
/// let a = [1.0, 2.0, 3.0];
/// let b = [4.0, 5.0, 6.0];
/// assert!((dot_product(&a, &b) - 32.0).abs() < 0.001);
/// ```
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    // Process in chunks of 4 for better auto-vectorization
    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        sum += a[base] * b[base]
            + a[base + 1] * b[base + 1]
            + a[base + 2] * b[base + 2]
            + a[base + 3] * b[base + 3];
    }

    for i in (chunks * 4)..a.len() {
        sum += a[i] * b[i];
    }

    sum
}

/// Compute the squared Euclidean distance of two vectors.
///
/// # Example
///
/// ```
/// use annex_engine::squared_l2_distance;
///
/// let a = [0.0, 0.0];
/// let b = [3.0, 4.0];
/// assert!((squared_l2_distance(&a, &b) - 25.0).abs() < 0.001);
/// ```
#[inline]
pub fn squared_l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }

    for i in (chunks * 4)..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }

    sum
}
