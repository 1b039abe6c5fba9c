use std::path::PathBuf;

/// Error kinds surfaced at the engine's boundary.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("engine used before initialization")]
    NotInitialised,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid environment at {path}: {reason}")]
    InvalidEnvironment { path: PathBuf, reason: String },

    #[error("storage error: {0}")]
    StorageIo(#[from] fjall::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("closure execution failed: {0}")]
    ClosureExecutionFailure(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),
}

pub type EngineResult<T> = Result<T, EngineError>;
