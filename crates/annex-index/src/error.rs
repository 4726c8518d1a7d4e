use annex_artifact::ArtifactError;
use annex_engine::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted artifact: {0}")]
    Corruption(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Index has not been built")]
    NotBuilt,

    #[error("Engine error: {0}")]
    Engine(EngineError),
}

impl From<EngineError> for IndexError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidArgument(msg) => IndexError::InvalidArgument(msg),
            EngineError::DimensionMismatch { expected, actual } => IndexError::InvalidArgument(format!(
                "dimensionality mismatch: expected {}, got {}",
                expected, actual
            )),
            other => IndexError::Engine(other),
        }
    }
}

impl From<ArtifactError> for IndexError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Io(e) => IndexError::Io(e),
            ArtifactError::Corruption(msg) => IndexError::Corruption(msg),
            ArtifactError::Serialization(msg) | ArtifactError::InvalidBundle(msg) => IndexError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
