//! Section framing and payload encodings.
//!
//! # Section Layout
//!
//! ```text
//! KIND:name:byteLength\n
//! [payload: byteLength bytes]
//! \n
//! ```
//!
//! `KIND` is `STRUCTURED_CONFIG` (a bincode-encoded record) or `RAW_SPAN`
//! (a little-endian numeric array). The name may itself contain `:`; the
//! length is everything after the last one.
//!
//! # Section Order
//!
//! | Name | Kind | Present |
//! |------|------|---------|
//! | `scann_config` | STRUCTURED_CONFIG | always |
//! | `ah_codebook` | STRUCTURED_CONFIG | engine has a codebook |
//! | `serialized_partitioner` | STRUCTURED_CONFIG | engine has a partitioner |
//! | `datapoint` | RAW_SPAN, i32 | dataset persisted, partitioner present |
//! | `hasheddata` | RAW_SPAN, u8 | dataset persisted, codebook present |
//! | `dataset` | RAW_SPAN, f32 | dataset persisted |
//! | `id_map` | RAW_SPAN, i64 | id map attached |
//! | `build_options` | RAW_SPAN, UTF-8 | build options attached |

use crate::error::{ArtifactError, Result};
use bytes::{Buf, BufMut, BytesMut};

pub const SCANN_CONFIG: &str = "scann_config";
pub const AH_CODEBOOK: &str = "ah_codebook";
pub const SERIALIZED_PARTITIONER: &str = "serialized_partitioner";
pub const DATAPOINT: &str = "datapoint";
pub const HASHED_DATA: &str = "hasheddata";
pub const DATASET: &str = "dataset";
pub const ID_MAP: &str = "id_map";
pub const BUILD_OPTIONS: &str = "build_options";

/// Longest header line accepted by the reader, newline included.
pub const MAX_HEADER_LEN: usize = 4096;

/// Section payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Serialized structured record.
    StructuredConfig,
    /// Flat little-endian numeric array.
    RawSpan,
}

impl SectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StructuredConfig => "STRUCTURED_CONFIG",
            Self::RawSpan => "RAW_SPAN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STRUCTURED_CONFIG" => Some(Self::StructuredConfig),
            "RAW_SPAN" => Some(Self::RawSpan),
            _ => None,
        }
    }
}

/// A decoded section header.
///
/// The kind is kept as written so that sections of unknown kinds can still
/// be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub kind: String,
    pub name: String,
    pub len: u64,
}

impl SectionHeader {
    pub fn new(kind: SectionKind, name: &str, len: u64) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            name: name.to_string(),
            len,
        }
    }

    /// The known kind, if any.
    pub fn section_kind(&self) -> Option<SectionKind> {
        SectionKind::parse(&self.kind)
    }

    /// Encode as a header line, trailing newline included.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}:{}:{}\n", self.kind, self.name, self.len).into_bytes()
    }

    /// Parse a header line with its trailing newline already removed.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let line = std::str::from_utf8(line)
            .map_err(|_| ArtifactError::Corruption("section header is not UTF-8".to_string()))?;

        let (kind, rest) = line
            .split_once(':')
            .ok_or_else(|| ArtifactError::Corruption(format!("malformed section header: {:?}", line)))?;
        let (name, len) = rest
            .rsplit_once(':')
            .ok_or_else(|| ArtifactError::Corruption(format!("malformed section header: {:?}", line)))?;

        if kind.is_empty() || name.is_empty() {
            return Err(ArtifactError::Corruption(format!(
                "section header has an empty field: {:?}",
                line
            )));
        }
        let len = len
            .parse::<u64>()
            .map_err(|_| ArtifactError::Corruption(format!("bad section length in header: {:?}", line)))?;

        Ok(Self {
            kind: kind.to_string(),
            name: name.to_string(),
            len,
        })
    }
}

pub fn encode_f32s(values: &[f32]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(values.len() * 4);
    for &v in values {
        buf.put_f32_le(v);
    }
    buf.to_vec()
}

pub fn encode_i32s(values: &[i32]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(values.len() * 4);
    for &v in values {
        buf.put_i32_le(v);
    }
    buf.to_vec()
}

pub fn encode_i64s(values: &[i64]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(values.len() * 8);
    for &v in values {
        buf.put_i64_le(v);
    }
    buf.to_vec()
}

fn check_width(name: &str, bytes: &[u8], width: usize) -> Result<usize> {
    if bytes.len() % width != 0 {
        return Err(ArtifactError::Corruption(format!(
            "{} span of {} bytes is not a whole number of {}-byte values",
            name,
            bytes.len(),
            width
        )));
    }
    Ok(bytes.len() / width)
}

pub fn decode_f32s(name: &str, mut bytes: &[u8]) -> Result<Vec<f32>> {
    let count = check_width(name, bytes, 4)?;
    let mut out = Vec::with_capacity(count);
    while bytes.has_remaining() {
        out.push(bytes.get_f32_le());
    }
    Ok(out)
}

pub fn decode_i32s(name: &str, mut bytes: &[u8]) -> Result<Vec<i32>> {
    let count = check_width(name, bytes, 4)?;
    let mut out = Vec::with_capacity(count);
    while bytes.has_remaining() {
        out.push(bytes.get_i32_le());
    }
    Ok(out)
}

pub fn decode_i64s(name: &str, mut bytes: &[u8]) -> Result<Vec<i64>> {
    let count = check_width(name, bytes, 8)?;
    let mut out = Vec::with_capacity(count);
    while bytes.has_remaining() {
        out.push(bytes.get_i64_le());
    }
    Ok(out)
}

pub fn decode_utf8(name: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| ArtifactError::Corruption(format!("{} section is not UTF-8: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode() {
        let header = SectionHeader::new(SectionKind::RawSpan, DATASET, 12);
        assert_eq!(header.encode(), b"RAW_SPAN:dataset:12\n");
    }

    #[test]
    fn test_header_parse() {
        let header = SectionHeader::parse(b"STRUCTURED_CONFIG:scann_config:345").unwrap();
        assert_eq!(header.section_kind(), Some(SectionKind::StructuredConfig));
        assert_eq!(header.name, SCANN_CONFIG);
        assert_eq!(header.len, 345);
    }

    #[test]
    fn test_header_name_with_colon() {
        let header = SectionHeader::parse(b"RAW_SPAN:ext:v2:8").unwrap();
        assert_eq!(header.name, "ext:v2");
        assert_eq!(header.len, 8);
    }

    #[test]
    fn test_unknown_kind_still_parses() {
        let header = SectionHeader::parse(b"FUTURE_KIND:thing:0").unwrap();
        assert_eq!(header.section_kind(), None);
    }

    #[test]
    fn test_header_parse_rejects_garbage() {
        let lines: [&[u8]; 6] = [
            b"RAW_SPAN",
            b"RAW_SPAN:dataset",
            b"RAW_SPAN:dataset:-1",
            b"RAW_SPAN::4",
            b":x:4",
            b"\xff:x:1",
        ];
        for line in lines {
            assert!(
                matches!(SectionHeader::parse(line), Err(ArtifactError::Corruption(_))),
                "{:?}",
                line
            );
        }
    }

    #[test]
    fn test_spans_are_little_endian() {
        assert_eq!(encode_i32s(&[1, -1]), vec![1, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(encode_f32s(&[1.0]), 1.0f32.to_le_bytes().to_vec());
        assert_eq!(decode_i64s("id_map", &encode_i64s(&[i64::MIN, 7])).unwrap(), vec![i64::MIN, 7]);
    }

    #[test]
    fn test_span_width_checked() {
        assert!(matches!(decode_f32s(DATASET, &[0, 0, 0]), Err(ArtifactError::Corruption(_))));
        assert!(matches!(decode_i64s(ID_MAP, &[0; 12]), Err(ArtifactError::Corruption(_))));
    }
}
