//! Minimal NumPy `.npy` (format version 1.0) encoding.
//!
//! Only what the directory form needs: C-order, little-endian arrays of
//! `f32`, `i32`, `i64` and `u8`.
//!
//! ```text
//! \x93NUMPY  major=1 minor=0  header_len: u16 LE
//! {'descr': '<f4', 'fortran_order': False, 'shape': (n, d), }   (space padded, '\n')
//! [raw data]
//! ```

use crate::error::{ArtifactError, Result};
use bytes::{Buf, BufMut, BytesMut};

const MAGIC: &[u8] = b"\x93NUMPY";

/// Preamble (magic, version, header length) plus header is padded to this.
const ALIGNMENT: usize = 64;

/// Element types supported by the directory form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpyDtype {
    F32,
    I32,
    I64,
    U8,
}

impl NpyDtype {
    pub fn descr(self) -> &'static str {
        match self {
            Self::F32 => "<f4",
            Self::I32 => "<i4",
            Self::I64 => "<i8",
            Self::U8 => "|u1",
        }
    }

    pub fn width(self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::I64 => 8,
            Self::U8 => 1,
        }
    }
}

/// Encode `data` (already little-endian) as a `.npy` file.
pub fn encode(dtype: NpyDtype, shape: &[usize], data: &[u8]) -> Vec<u8> {
    let shape_str = match shape {
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        dtype.descr(),
        shape_str
    );

    // magic (6) + version (2) + length (2) + header + '\n'
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let mut buf = BytesMut::with_capacity(MAGIC.len() + 4 + header.len() + data.len());
    buf.put_slice(MAGIC);
    buf.put_u8(1);
    buf.put_u8(0);
    buf.put_u16_le(header.len() as u16);
    buf.put_slice(header.as_bytes());
    buf.put_slice(data);
    buf.to_vec()
}

/// Decode a `.npy` file, returning its shape and raw data.
pub fn decode(name: &str, dtype: NpyDtype, bytes: &[u8]) -> Result<(Vec<usize>, Vec<u8>)> {
    let corrupt = |msg: String| ArtifactError::Corruption(format!("{}: {}", name, msg));

    if bytes.len() < MAGIC.len() + 4 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(corrupt("not a .npy file".to_string()));
    }
    let mut rest = &bytes[MAGIC.len()..];
    let major = rest.get_u8();
    let _minor = rest.get_u8();
    let header_len = match major {
        1 => rest.get_u16_le() as usize,
        2 | 3 if rest.remaining() >= 4 => rest.get_u32_le() as usize,
        _ => return Err(corrupt(format!("unsupported .npy version {}", major))),
    };
    if rest.remaining() < header_len {
        return Err(corrupt("truncated header".to_string()));
    }

    let header = std::str::from_utf8(&rest[..header_len]).map_err(|_| corrupt("header is not UTF-8".to_string()))?;
    let data = &rest[header_len..];

    let descr = dict_value(header, "descr")
        .map(|v| v.trim_matches(|c| c == '\'' || c == '"'))
        .ok_or_else(|| corrupt("header has no descr".to_string()))?;
    if descr != dtype.descr() {
        return Err(corrupt(format!("expected dtype {}, found {}", dtype.descr(), descr)));
    }
    if dict_value(header, "fortran_order") != Some("False") {
        return Err(corrupt("only C-order arrays are supported".to_string()));
    }

    let shape = parse_shape(header).ok_or_else(|| corrupt("header has no valid shape".to_string()))?;
    let count: usize = shape.iter().product();
    let expected = count
        .checked_mul(dtype.width())
        .ok_or_else(|| corrupt("shape overflows".to_string()))?;
    if data.len() != expected {
        return Err(corrupt(format!(
            "shape {:?} needs {} bytes of data, found {}",
            shape,
            expected,
            data.len()
        )));
    }

    Ok((shape, data.to_vec()))
}

/// Raw text of a scalar dict entry such as `'fortran_order': False`.
fn dict_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = header.find(&format!("'{}':", key))? + key.len() + 3;
    let value = header[start..].trim_start();
    let end = value.find(',').unwrap_or(value.len());
    Some(value[..end].trim())
}

fn parse_shape(header: &str) -> Option<Vec<usize>> {
    let start = header.find("'shape':")?;
    let open = start + header[start..].find('(')?;
    let close = open + header[open..].find(')')?;

    header[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::encode_f32s;

    #[test]
    fn test_header_alignment() {
        let bytes = encode(NpyDtype::F32, &[3, 2], &encode_f32s(&[0.0; 6]));
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;

        assert_eq!((10 + header_len) % ALIGNMENT, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 24);
    }

    #[test]
    fn test_decode_two_dimensional() {
        let data = encode_f32s(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let bytes = encode(NpyDtype::F32, &[3, 2], &data);

        let (shape, decoded) = decode("dataset.npy", NpyDtype::F32, &bytes).unwrap();
        assert_eq!(shape, vec![3, 2]);
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_one_dimensional() {
        let bytes = encode(NpyDtype::U8, &[4], &[1, 2, 3, 4]);
        let header = String::from_utf8_lossy(&bytes[10..]).to_string();
        assert!(header.contains("'shape': (4,)"));

        let (shape, decoded) = decode("hashed_dataset.npy", NpyDtype::U8, &bytes).unwrap();
        assert_eq!(shape, vec![4]);
        assert_eq!(decoded, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_checks_dtype_and_length() {
        let bytes = encode(NpyDtype::I32, &[2], &[0; 8]);
        assert!(matches!(
            decode("x.npy", NpyDtype::I64, &bytes),
            Err(ArtifactError::Corruption(_))
        ));

        let mut short = bytes.clone();
        short.pop();
        assert!(matches!(decode("x.npy", NpyDtype::I32, &short), Err(ArtifactError::Corruption(_))));

        assert!(matches!(decode("x.npy", NpyDtype::I32, b"PK\x03\x04"), Err(ArtifactError::Corruption(_))));
    }

    #[test]
    fn test_fortran_order_rejected() {
        let header = "{'descr': '<i4', 'fortran_order': True, 'shape': (1,), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0; 4]);

        assert!(matches!(decode("x.npy", NpyDtype::I32, &bytes), Err(ArtifactError::Corruption(_))));
    }
}
