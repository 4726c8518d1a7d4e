//! External id map.
//!
//! Ordinal `i` of the engine is the `i`-th id ever appended. The map is
//! append-only; it is replaced wholesale on load and cleared with the
//! index.

use crate::error::{IndexError, Result};

/// Id returned for ordinals the map does not cover.
pub const INVALID_ID: i64 = -1;

/// Ordinal to external id mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalIdMap {
    ids: Vec<i64>,
}

impl ExternalIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(ids: Vec<i64>) -> Self {
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn extend_from_slice(&mut self, ids: &[i64]) {
        self.ids.extend_from_slice(ids);
    }

    /// External id of `ordinal`, or [`INVALID_ID`] when out of range.
    #[inline]
    pub fn translate(&self, ordinal: u32) -> i64 {
        self.ids.get(ordinal as usize).copied().unwrap_or(INVALID_ID)
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.ids
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Check that `vectors` holds exactly one `dimensionality`-sized vector per
/// id.
pub fn validate_append(ids: &[i64], vectors: &[f32], dimensionality: usize) -> Result<()> {
    if dimensionality == 0 {
        return Err(IndexError::InvalidArgument("dimensionality must be positive".to_string()));
    }
    if ids.len().checked_mul(dimensionality) != Some(vectors.len()) {
        return Err(IndexError::InvalidArgument(format!(
            "{} ids need {} values at dimensionality {}, got {}",
            ids.len(),
            ids.len().saturating_mul(dimensionality),
            dimensionality,
            vectors.len()
        )));
    }
    Ok(())
}
