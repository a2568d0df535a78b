//! Spectral analysis stages and the moodbar pipeline built from them.

pub mod analyzer;
pub mod audio;
pub mod error;
pub mod pipeline;
pub mod spectrum;

pub use error::{StageError, StageResult};
