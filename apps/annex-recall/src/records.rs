//! Delimited vector records.
//!
//! One record per line, `|`-separated, the vector in the third field:
//!
//! ```text
//! 17|doc-17|0.12,-0.5,3.0,...
//! ```
//!
//! Lines with fewer than three fields, unparsable components, or a vector
//! of the wrong length are skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Read all vectors of `dimensionality` from `path`, flattened.
pub fn read_vectors(path: &Path, dimensionality: usize) -> io::Result<Vec<f32>> {
    let reader = BufReader::new(File::open(path)?);
    let mut vectors = Vec::new();
    let mut skipped = 0usize;

    for line in reader.lines() {
        match parse_line(&line?, dimensionality) {
            Some(vector) => vectors.extend(vector),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "Skipped unusable lines");
    }
    Ok(vectors)
}

fn parse_line(line: &str, dimensionality: usize) -> Option<Vec<f32>> {
    let field = line.trim().split('|').nth(2)?;
    let vector: Vec<f32> = field
        .split(',')
        .map(|v| v.trim().parse().ok())
        .collect::<Option<_>>()?;
    (vector.len() == dimensionality).then_some(vector)
}
