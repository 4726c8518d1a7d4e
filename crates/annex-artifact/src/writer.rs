//! Sequential artifact writer.
//!
//! Sections are written once, front to back. The writer never seeks, so it
//! works over any `Write` sink.

use crate::error::{ArtifactError, Result};
use crate::format::{SectionHeader, SectionKind};
use serde::Serialize;
use std::io::Write;

/// Writes framed sections to an underlying sink.
pub struct ArtifactWriter<W: Write> {
    inner: W,
    sections_written: usize,
    bytes_written: u64,
}

impl<W: Write> ArtifactWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            sections_written: 0,
            bytes_written: 0,
        }
    }

    /// Write one section: header line, payload, trailing newline.
    pub fn write_section(&mut self, kind: SectionKind, name: &str, payload: &[u8]) -> Result<()> {
        let header = SectionHeader::new(kind, name, payload.len() as u64).encode();

        self.inner.write_all(&header)?;
        self.inner.write_all(payload)?;
        self.inner.write_all(b"\n")?;

        self.sections_written += 1;
        self.bytes_written += (header.len() + payload.len() + 1) as u64;

        tracing::trace!(kind = kind.as_str(), name, len = payload.len(), "Wrote section");
        Ok(())
    }

    /// Serialize `record` with bincode into a `STRUCTURED_CONFIG` section.
    pub fn write_structured<T: Serialize>(&mut self, name: &str, record: &T) -> Result<()> {
        let payload = bincode::serialize(record)
            .map_err(|e| ArtifactError::Serialization(format!("{}: {}", name, e)))?;
        self.write_section(SectionKind::StructuredConfig, name, &payload)
    }

    /// Write an already encoded numeric array as a `RAW_SPAN` section.
    pub fn write_span(&mut self, name: &str, payload: &[u8]) -> Result<()> {
        self.write_section(SectionKind::RawSpan, name, payload)
    }

    pub fn sections_written(&self) -> usize {
        self.sections_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush and hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
