use thiserror::Error;

/// Errors raised while constructing the analysis and synthesis components.
///
/// Everything that can go wrong once a session is running is recovered
/// locally (zero-padding, clamping, skipped ticks), so this enum only covers
/// configuration and payload problems.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("frame size {0} is not a power of two")]
    InvalidFrameSize(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("audio buffer is empty")]
    EmptyBuffer,

    #[error("malformed feature payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MosaicError>;
