//! Self-describing artifact format for trained annex indexes.
//!
//! An artifact is a flat sequence of framed sections, written once from
//! front to back and read forward-only:
//!
//! ```text
//! STRUCTURED_CONFIG:scann_config:<len>\n <bincode ScannConfig> \n
//! STRUCTURED_CONFIG:ah_codebook:<len>\n  <bincode Codebook>   \n   (optional)
//! STRUCTURED_CONFIG:serialized_partitioner:<len>\n ...        \n   (optional)
//! RAW_SPAN:datapoint:<len>\n   <i32 token per ordinal>         \n   (dataset persisted)
//! RAW_SPAN:hasheddata:<len>\n  <u8 codes>                      \n   (dataset persisted)
//! RAW_SPAN:dataset:<len>\n     <f32 vectors>                   \n   (dataset persisted)
//! RAW_SPAN:id_map:<len>\n      <i64 external ids>              \n   (optional)
//! RAW_SPAN:build_options:<len>\n <UTF-8 option string>        \n   (optional)
//! ```
//!
//! Readers skip sections they do not recognise, honouring the declared
//! length. A section that cannot supply its declared length is corruption.
//!
//! # Example
//!
//! ```
//! use annex_artifact::ArtifactBundle;
//! use annex_engine::ScannConfig;
//!
//! let mut bundle = ArtifactBundle::new(ScannConfig::brute_force(2));
//! bundle.dataset = Some(vec![1.0, 2.0, 3.0, 4.0]);
//!
//! let bytes = bundle.write_to(Vec::new(), true).unwrap();
//! let restored = ArtifactBundle::read_from(&bytes[..]).unwrap();
//! assert_eq!(restored, bundle);
//! ```

mod bundle;
mod dir;
mod error;
pub mod format;
mod npy;
mod reader;
mod writer;

pub use bundle::{gather_tokens, scatter_tokens, ArtifactBundle};
pub use dir::{
    migrate_directory_to_file, BUILD_OPTIONS_FILE, CODEBOOK_FILE, CONFIG_FILE, DATASET_FILE, HASHED_FILE, ID_MAP_FILE,
    PARTITIONER_FILE, TOKENS_FILE,
};
pub use error::{ArtifactError, Result};
pub use format::{SectionHeader, SectionKind};
pub use reader::ArtifactReader;
pub use writer::ArtifactWriter;
