//! Directory form of the artifact.
//!
//! Same logical sections as the single file, one file each:
//!
//! ```text
//! <dir>/
//!   scann_config.pb              bincode ScannConfig
//!   ah_codebook.pb               bincode Codebook           (optional)
//!   serialized_partitioner.pb    bincode partitioner        (optional)
//!   datapoint_to_token.npy       int32  [n]                 (optional)
//!   hashed_dataset.npy           uint8  [n, num_blocks]     (optional)
//!   dataset.npy                  float32 [n, dimensionality] (optional)
//!   id_map.npy                   int64  [n]                 (optional)
//!   build_options.txt            UTF-8 option string        (optional)
//! ```
//!
//! The single file is the canonical format; directories are read and
//! written for interchange and converted with [`migrate_directory_to_file`].

use crate::bundle::{scatter_tokens, ArtifactBundle};
use crate::error::{ArtifactError, Result};
use crate::format::{decode_f32s, decode_i32s, decode_i64s, decode_utf8, encode_f32s, encode_i32s, encode_i64s};
use crate::npy::{self, NpyDtype};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

pub const CONFIG_FILE: &str = "scann_config.pb";
pub const CODEBOOK_FILE: &str = "ah_codebook.pb";
pub const PARTITIONER_FILE: &str = "serialized_partitioner.pb";
pub const TOKENS_FILE: &str = "datapoint_to_token.npy";
pub const HASHED_FILE: &str = "hashed_dataset.npy";
pub const DATASET_FILE: &str = "dataset.npy";
pub const ID_MAP_FILE: &str = "id_map.npy";
pub const BUILD_OPTIONS_FILE: &str = "build_options.txt";

impl ArtifactBundle {
    /// Write the directory form, creating the directory if needed.
    pub fn save_dir(&self, dir: impl AsRef<Path>, persist_dataset: bool) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        write_record(&dir.join(CONFIG_FILE), &self.config)?;
        if let Some(codebook) = &self.codebook {
            write_record(&dir.join(CODEBOOK_FILE), codebook)?;
        }
        if let Some(partitioner) = &self.partitioner {
            write_record(&dir.join(PARTITIONER_FILE), partitioner)?;
        }

        if persist_dataset {
            if let Some(tokens) = self.gathered_tokens()? {
                let bytes = npy::encode(NpyDtype::I32, &[tokens.len()], &encode_i32s(&tokens));
                fs::write(dir.join(TOKENS_FILE), bytes)?;
            }
            if let Some(hashed) = &self.hashed_dataset {
                let shape = match self.codebook.as_ref().map(|c| c.num_blocks()) {
                    Some(blocks) if blocks > 0 && hashed.len() % blocks == 0 => vec![hashed.len() / blocks, blocks],
                    _ => vec![hashed.len()],
                };
                fs::write(dir.join(HASHED_FILE), npy::encode(NpyDtype::U8, &shape, hashed))?;
            }
            if let Some(dataset) = &self.dataset {
                let dim = self.config.dimensionality;
                let shape = if dim > 0 && dataset.len() % dim == 0 {
                    vec![dataset.len() / dim, dim]
                } else {
                    vec![dataset.len()]
                };
                fs::write(dir.join(DATASET_FILE), npy::encode(NpyDtype::F32, &shape, &encode_f32s(dataset)))?;
            }
        }

        if let Some(id_map) = &self.id_map {
            let bytes = npy::encode(NpyDtype::I64, &[id_map.len()], &encode_i64s(id_map));
            fs::write(dir.join(ID_MAP_FILE), bytes)?;
        }
        if let Some(options) = &self.build_options {
            fs::write(dir.join(BUILD_OPTIONS_FILE), options)?;
        }

        tracing::debug!(dir = %dir.display(), persist_dataset, "Wrote artifact directory");
        Ok(())
    }

    /// Read the directory form. Only `scann_config.pb` is required.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let config = read_record(&dir.join(CONFIG_FILE))?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found in {}", CONFIG_FILE, dir.display()),
            )
        })?;
        let mut bundle = ArtifactBundle::new(config);
        bundle.codebook = read_record(&dir.join(CODEBOOK_FILE))?;
        bundle.partitioner = read_record(&dir.join(PARTITIONER_FILE))?;

        if let Some(bytes) = read_optional(&dir.join(TOKENS_FILE))? {
            let (_, data) = npy::decode(TOKENS_FILE, NpyDtype::I32, &bytes)?;
            let tokens = decode_i32s(TOKENS_FILE, &data)?;
            let partitioner = bundle.partitioner.as_ref().ok_or_else(|| {
                ArtifactError::Corruption(format!("{} present without {}", TOKENS_FILE, PARTITIONER_FILE))
            })?;
            bundle.datapoints_by_token = Some(scatter_tokens(&tokens, partitioner.n_tokens())?);
        }
        if let Some(bytes) = read_optional(&dir.join(HASHED_FILE))? {
            let (_, data) = npy::decode(HASHED_FILE, NpyDtype::U8, &bytes)?;
            bundle.hashed_dataset = Some(data);
        }
        if let Some(bytes) = read_optional(&dir.join(DATASET_FILE))? {
            let (_, data) = npy::decode(DATASET_FILE, NpyDtype::F32, &bytes)?;
            bundle.dataset = Some(decode_f32s(DATASET_FILE, &data)?);
        }
        if let Some(bytes) = read_optional(&dir.join(ID_MAP_FILE))? {
            let (_, data) = npy::decode(ID_MAP_FILE, NpyDtype::I64, &bytes)?;
            bundle.id_map = Some(decode_i64s(ID_MAP_FILE, &data)?);
        }
        if let Some(bytes) = read_optional(&dir.join(BUILD_OPTIONS_FILE))? {
            bundle.build_options = Some(decode_utf8(BUILD_OPTIONS_FILE, bytes)?);
        }

        Ok(bundle)
    }
}

/// Convert a directory artifact to the canonical single file.
///
/// The dataset spans are carried over whenever the directory has them.
pub fn migrate_directory_to_file(dir: impl AsRef<Path>, file: impl AsRef<Path>) -> Result<ArtifactBundle> {
    let bundle = ArtifactBundle::load_dir(dir.as_ref())?;
    let persist_dataset = bundle.dataset.is_some();
    bundle.save_file(file.as_ref(), persist_dataset)?;

    tracing::info!(
        from = %dir.as_ref().display(),
        to = %file.as_ref().display(),
        persist_dataset,
        "Migrated directory artifact to single file"
    );
    Ok(bundle)
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let bytes = bincode::serialize(record)
        .map_err(|e| ArtifactError::Serialization(format!("{}: {}", path.display(), e)))?;
    fs::write(path, bytes)?;
    Ok(())
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_optional(path)? {
        Some(bytes) => bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| ArtifactError::Corruption(format!("{}: {}", path.display(), e))),
        None => Ok(None),
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
