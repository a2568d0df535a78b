use thiserror::Error;

/// Failures reported by the spectral processing stages.
///
/// Every error is local to the call that produced it; a stage never keeps
/// error state around between calls.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// A format proposal was refused. The stage keeps its previous format.
    #[error("negotiation rejected: {0}")]
    NegotiationRejected(String),

    /// An incoming buffer does not have the length implied by the negotiated format.
    #[error("frame size mismatch: expected {expected}, got {actual}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    /// A configuration value was refused. The previous configuration is kept.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// The stage cannot accept data in its current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type StageResult<T> = std::result::Result<T, StageError>;
