use thiserror::Error;

/// All errors produced by colloquy-core.
#[derive(Debug, Error)]
pub enum ColloquyError {
    #[error("microphone or recognition permission denied")]
    PermissionDenied,

    #[error("conflicting speech operation is already active")]
    ConflictingOperation,

    #[error("speech engine failure: {0}")]
    EngineFailure(String),

    #[error("synthesis text is empty")]
    EmptyInput,

    #[error("controller has been disposed")]
    Disposed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ColloquyError>;
