//! Forward-only artifact reader.
//!
//! The reader yields one header at a time. The caller then either reads the
//! payload or skips it; both consume exactly the declared length plus the
//! trailing newline, so unknown sections never desynchronise the stream.

use crate::error::{ArtifactError, Result};
use crate::format::{SectionHeader, MAX_HEADER_LEN};
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, Read};

/// Reads framed sections from an underlying source.
pub struct ArtifactReader<R: BufRead> {
    inner: R,
    sections_read: usize,
}

impl<R: BufRead> ArtifactReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            sections_read: 0,
        }
    }

    /// Read the next section header.
    ///
    /// Returns `None` at a clean end of input. A header cut off before its
    /// newline, or longer than [`MAX_HEADER_LEN`], is corruption.
    pub fn next_header(&mut self) -> Result<Option<SectionHeader>> {
        let mut line = Vec::new();
        let read = (&mut self.inner)
            .take(MAX_HEADER_LEN as u64)
            .read_until(b'\n', &mut line)?;

        if read == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            return Err(ArtifactError::Corruption(if read >= MAX_HEADER_LEN {
                format!("section header exceeds {} bytes", MAX_HEADER_LEN)
            } else {
                "truncated section header".to_string()
            }));
        }
        line.pop();

        let header = SectionHeader::parse(&line)?;
        self.sections_read += 1;
        Ok(Some(header))
    }

    /// Read the payload of `header`.
    pub fn read_payload(&mut self, header: &SectionHeader) -> Result<Vec<u8>> {
        // Grow with the data instead of trusting the declared length up front
        let mut payload = Vec::new();
        (&mut self.inner).take(header.len).read_to_end(&mut payload)?;

        if (payload.len() as u64) != header.len {
            return Err(short_payload(header, payload.len() as u64));
        }
        self.expect_terminator(header)?;
        Ok(payload)
    }

    /// Consume and discard the payload of `header`.
    pub fn skip_payload(&mut self, header: &SectionHeader) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(header.len), &mut io::sink())?;
        if skipped != header.len {
            return Err(short_payload(header, skipped));
        }
        self.expect_terminator(header)
    }

    /// Read the payload of `header` and decode it with bincode.
    pub fn read_structured<T: DeserializeOwned>(&mut self, header: &SectionHeader) -> Result<T> {
        let payload = self.read_payload(header)?;
        bincode::deserialize(&payload)
            .map_err(|e| ArtifactError::Corruption(format!("{} record: {}", header.name, e)))
    }

    pub fn sections_read(&self) -> usize {
        self.sections_read
    }

    fn expect_terminator(&mut self, header: &SectionHeader) -> Result<()> {
        let mut terminator = [0u8; 1];
        match self.inner.read_exact(&mut terminator) {
            Ok(()) if terminator[0] == b'\n' => Ok(()),
            Ok(()) => Err(ArtifactError::Corruption(format!(
                "section {} is longer than its declared {} bytes",
                header.name, header.len
            ))),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ArtifactError::Corruption(format!(
                "section {} is missing its terminating newline",
                header.name
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

fn short_payload(header: &SectionHeader, got: u64) -> ArtifactError {
    ArtifactError::Corruption(format!(
        "section {} declares {} bytes but only {} are present",
        header.name, header.len, got
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ArtifactWriter;

    fn open(bytes: &[u8]) -> ArtifactReader<&[u8]> {
        ArtifactReader::new(bytes)
    }

    #[test]
    fn test_read_and_skip() {
        let mut writer = ArtifactWriter::new(Vec::new());
        writer.write_span("first", b"abc").unwrap();
        writer.write_span("second", b"line\nbreak").unwrap();
        writer.write_span("third", b"xyz").unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = open(&bytes);
        let first = reader.next_header().unwrap().unwrap();
        assert_eq!(reader.read_payload(&first).unwrap(), b"abc");

        // Payload bytes that look like framing are skipped by length
        let second = reader.next_header().unwrap().unwrap();
        reader.skip_payload(&second).unwrap();

        let third = reader.next_header().unwrap().unwrap();
        assert_eq!(third.name, "third");
        assert_eq!(reader.read_payload(&third).unwrap(), b"xyz");

        assert!(reader.next_header().unwrap().is_none());
        assert_eq!(reader.sections_read(), 3);
    }

    #[test]
    fn test_short_payload_is_corruption() {
        let mut reader = open(b"RAW_SPAN:dataset:10\nabc");
        let header = reader.next_header().unwrap().unwrap();
        assert!(matches!(reader.read_payload(&header), Err(ArtifactError::Corruption(_))));

        let mut reader = open(b"RAW_SPAN:dataset:10\nabc");
        let header = reader.next_header().unwrap().unwrap();
        assert!(matches!(reader.skip_payload(&header), Err(ArtifactError::Corruption(_))));
    }

    #[test]
    fn test_oversized_payload_is_corruption() {
        let mut reader = open(b"RAW_SPAN:dataset:2\nabc\n");
        let header = reader.next_header().unwrap().unwrap();
        assert!(matches!(reader.read_payload(&header), Err(ArtifactError::Corruption(_))));
    }

    #[test]
    fn test_missing_terminator_is_corruption() {
        let mut reader = open(b"RAW_SPAN:dataset:3\nabc");
        let header = reader.next_header().unwrap().unwrap();
        assert!(matches!(reader.read_payload(&header), Err(ArtifactError::Corruption(_))));
    }

    #[test]
    fn test_truncated_header_is_corruption() {
        let mut reader = open(b"RAW_SPAN:data");
        assert!(matches!(reader.next_header(), Err(ArtifactError::Corruption(_))));
    }

    #[test]
    fn test_header_length_guard() {
        let mut bytes = vec![b'A'; MAX_HEADER_LEN + 10];
        bytes.push(b'\n');
        let mut reader = open(&bytes);
        assert!(matches!(reader.next_header(), Err(ArtifactError::Corruption(_))));
    }

    #[test]
    fn test_bad_structured_record_is_corruption() {
        let mut reader = open(b"STRUCTURED_CONFIG:scann_config:2\n\x01\x02\n");
        let header = reader.next_header().unwrap().unwrap();
        let decoded: Result<(u64, u64)> = reader.read_structured(&header);
        assert!(matches!(decoded, Err(ArtifactError::Corruption(_))));
    }
}
