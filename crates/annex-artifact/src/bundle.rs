//! Typed view of a complete index artifact.
//!
//! [`ArtifactBundle`] is what gets written to and read from storage, in
//! either the single-file or the directory form. Token assignment is kept
//! grouped by partition in memory and stored in ordinal order on disk:
//!
//! ```text
//! in memory:  token 0 -> [0, 3]   token 1 -> [1, 2]
//! on disk:    datapoint = [0, 1, 1, 0]   (token of ordinal i)
//! ```

use crate::error::{ArtifactError, Result};
use crate::format::{
    decode_f32s, decode_i32s, decode_i64s, decode_utf8, encode_f32s, encode_i32s, encode_i64s, SectionKind,
    AH_CODEBOOK, BUILD_OPTIONS, DATAPOINT, DATASET, HASHED_DATA, ID_MAP, SCANN_CONFIG, SERIALIZED_PARTITIONER,
};
use crate::reader::ArtifactReader;
use crate::writer::ArtifactWriter;
use annex_engine::{Codebook, EngineState, ScannConfig, SerializedPartitioner};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Everything an artifact can hold.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub config: ScannConfig,
    pub codebook: Option<Codebook>,
    pub partitioner: Option<SerializedPartitioner>,
    /// Ordinals grouped by owning partition.
    pub datapoints_by_token: Option<Vec<Vec<u32>>>,
    pub hashed_dataset: Option<Vec<u8>>,
    pub dataset: Option<Vec<f32>>,
    /// External id of each ordinal.
    pub id_map: Option<Vec<i64>>,
    /// Option string the index was last built with.
    pub build_options: Option<String>,
}

impl ArtifactBundle {
    /// A bundle holding only a configuration.
    pub fn new(config: ScannConfig) -> Self {
        Self {
            config,
            codebook: None,
            partitioner: None,
            datapoints_by_token: None,
            hashed_dataset: None,
            dataset: None,
            id_map: None,
            build_options: None,
        }
    }

    /// Take over an extracted engine state.
    pub fn from_state(state: EngineState) -> Self {
        Self {
            config: state.config,
            codebook: state.codebook,
            partitioner: state.partitioner,
            datapoints_by_token: state.datapoints_by_token,
            hashed_dataset: state.hashed_dataset,
            dataset: state.dataset,
            id_map: None,
            build_options: None,
        }
    }

    pub fn with_id_map(mut self, id_map: Vec<i64>) -> Self {
        self.id_map = Some(id_map);
        self
    }

    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = Some(options.into());
        self
    }

    /// Number of datapoints described by the persisted dataset, if any.
    pub fn num_datapoints(&self) -> Option<usize> {
        let dim = self.config.dimensionality;
        match (&self.dataset, dim) {
            (Some(dataset), dim) if dim > 0 => Some(dataset.len() / dim),
            _ => None,
        }
    }

    /// Token of each ordinal, in ordinal order.
    pub(crate) fn gathered_tokens(&self) -> Result<Option<Vec<i32>>> {
        match &self.datapoints_by_token {
            Some(by_token) => {
                let n = by_token.iter().map(Vec::len).sum();
                gather_tokens(by_token, n).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Write all sections in their fixed order.
    ///
    /// Datapoint, hashed and dataset spans are only written when
    /// `persist_dataset` is set. The id map and build options are written
    /// whenever present.
    pub fn write_to<W: Write>(&self, sink: W, persist_dataset: bool) -> Result<W> {
        let mut writer = ArtifactWriter::new(sink);

        writer.write_structured(SCANN_CONFIG, &self.config)?;
        if let Some(codebook) = &self.codebook {
            writer.write_structured(AH_CODEBOOK, codebook)?;
        }
        if let Some(partitioner) = &self.partitioner {
            writer.write_structured(SERIALIZED_PARTITIONER, partitioner)?;
        }

        if persist_dataset {
            if let Some(tokens) = self.gathered_tokens()? {
                writer.write_span(DATAPOINT, &encode_i32s(&tokens))?;
            }
            if let Some(hashed) = &self.hashed_dataset {
                writer.write_span(HASHED_DATA, hashed)?;
            }
            if let Some(dataset) = &self.dataset {
                writer.write_span(DATASET, &encode_f32s(dataset))?;
            }
        }

        if let Some(id_map) = &self.id_map {
            writer.write_span(ID_MAP, &encode_i64s(id_map))?;
        }
        if let Some(options) = &self.build_options {
            writer.write_span(BUILD_OPTIONS, options.as_bytes())?;
        }

        tracing::debug!(
            sections = writer.sections_written(),
            bytes = writer.bytes_written(),
            persist_dataset,
            "Wrote artifact"
        );
        writer.finish()
    }

    /// Read a bundle, skipping sections it does not recognise.
    pub fn read_from<R: BufRead>(source: R) -> Result<Self> {
        let mut reader = ArtifactReader::new(source);

        let mut config: Option<ScannConfig> = None;
        let mut codebook: Option<Codebook> = None;
        let mut partitioner: Option<SerializedPartitioner> = None;
        let mut tokens: Option<Vec<i32>> = None;
        let mut hashed_dataset: Option<Vec<u8>> = None;
        let mut dataset: Option<Vec<f32>> = None;
        let mut id_map: Option<Vec<i64>> = None;
        let mut build_options: Option<String> = None;

        while let Some(header) = reader.next_header()? {
            match (header.section_kind(), header.name.as_str()) {
                (Some(SectionKind::StructuredConfig), SCANN_CONFIG) => {
                    set_once(&mut config, reader.read_structured(&header)?, &header.name)?
                }
                (Some(SectionKind::StructuredConfig), AH_CODEBOOK) => {
                    set_once(&mut codebook, reader.read_structured(&header)?, &header.name)?
                }
                (Some(SectionKind::StructuredConfig), SERIALIZED_PARTITIONER) => {
                    set_once(&mut partitioner, reader.read_structured(&header)?, &header.name)?
                }
                (Some(SectionKind::RawSpan), DATAPOINT) => {
                    let payload = reader.read_payload(&header)?;
                    set_once(&mut tokens, decode_i32s(DATAPOINT, &payload)?, &header.name)?
                }
                (Some(SectionKind::RawSpan), HASHED_DATA) => {
                    set_once(&mut hashed_dataset, reader.read_payload(&header)?, &header.name)?
                }
                (Some(SectionKind::RawSpan), DATASET) => {
                    let payload = reader.read_payload(&header)?;
                    set_once(&mut dataset, decode_f32s(DATASET, &payload)?, &header.name)?
                }
                (Some(SectionKind::RawSpan), ID_MAP) => {
                    let payload = reader.read_payload(&header)?;
                    set_once(&mut id_map, decode_i64s(ID_MAP, &payload)?, &header.name)?
                }
                (Some(SectionKind::RawSpan), BUILD_OPTIONS) => {
                    let payload = reader.read_payload(&header)?;
                    set_once(&mut build_options, decode_utf8(BUILD_OPTIONS, payload)?, &header.name)?
                }
                _ => {
                    tracing::debug!(kind = %header.kind, name = %header.name, len = header.len, "Skipping unknown section");
                    reader.skip_payload(&header)?;
                }
            }
        }

        let config = config.ok_or_else(|| ArtifactError::Corruption("missing scann_config section".to_string()))?;

        let datapoints_by_token = match (tokens, partitioner.as_ref()) {
            (Some(tokens), Some(p)) => Some(scatter_tokens(&tokens, p.n_tokens())?),
            (Some(_), None) => {
                return Err(ArtifactError::Corruption(
                    "datapoint section present without a partitioner".to_string(),
                ))
            }
            (None, _) => None,
        };

        Ok(Self {
            config,
            codebook,
            partitioner,
            datapoints_by_token,
            hashed_dataset,
            dataset,
            id_map,
            build_options,
        })
    }

    /// Write the canonical single-file form.
    pub fn save_file(&self, path: impl AsRef<Path>, persist_dataset: bool) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.as_ref())?;
        let writer = self.write_to(BufWriter::new(file), persist_dataset)?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }

    /// Read the single-file form.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::read_from(BufReader::new(file))
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &str) -> Result<()> {
    if slot.is_some() {
        return Err(ArtifactError::Corruption(format!("duplicate {} section", name)));
    }
    *slot = Some(value);
    Ok(())
}

/// Turn partition-grouped ordinals into "token of ordinal i".
///
/// Every ordinal in `0..n` must be assigned exactly once.
pub fn gather_tokens(by_token: &[Vec<u32>], n: usize) -> Result<Vec<i32>> {
    let mut tokens = vec![-1i32; n];
    for (token, ordinals) in by_token.iter().enumerate() {
        for &ordinal in ordinals {
            let slot = tokens.get_mut(ordinal as usize).ok_or_else(|| {
                ArtifactError::InvalidBundle(format!("ordinal {} out of range for {} datapoints", ordinal, n))
            })?;
            if *slot != -1 {
                return Err(ArtifactError::InvalidBundle(format!(
                    "ordinal {} assigned to more than one partition",
                    ordinal
                )));
            }
            *slot = token as i32;
        }
    }
    if let Some(missing) = tokens.iter().position(|&t| t == -1) {
        return Err(ArtifactError::InvalidBundle(format!(
            "ordinal {} not assigned to any partition",
            missing
        )));
    }
    Ok(tokens)
}

/// Turn "token of ordinal i" back into partition-grouped ordinals.
///
/// Ordinals come out ascending within each partition.
pub fn scatter_tokens(tokens: &[i32], n_tokens: usize) -> Result<Vec<Vec<u32>>> {
    let mut by_token = vec![Vec::new(); n_tokens];
    for (ordinal, &token) in tokens.iter().enumerate() {
        let group = usize::try_from(token)
            .ok()
            .and_then(|t| by_token.get_mut(t))
            .ok_or_else(|| {
                ArtifactError::Corruption(format!(
                    "ordinal {} has token {} outside [0, {})",
                    ordinal, token, n_tokens
                ))
            })?;
        group.push(ordinal as u32);
    }
    Ok(by_token)
}
