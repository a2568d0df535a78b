//! Spectral processing stages.
//!
//! Every stage negotiates a [`Caps`] description with its neighbours, moves
//! through the [`State`] lifecycle, and converts one kind of frame into
//! another.

pub mod caps;
pub mod equalizer;
pub mod forward;
pub mod frame;
pub mod inverse;
pub mod state;
pub mod transform;

pub use caps::{band_freq, num_freqs, Caps, Field, MediaKind, StreamFormat};
pub use equalizer::{BandTable, EqualizerHandle, Preset, SpectrumEq};
pub use forward::{ForwardSpectrum, SpectrumSettings};
pub use frame::{samples_to_duration, BufferInfo, SampleBlock, SpectralFrame};
pub use inverse::InverseSpectrum;
pub use state::{Lifecycle, State, Transition};

use crate::error::StageResult;

/// Accepts an upstream format and reports the format produced downstream.
pub trait NegotiateFormat {
    fn negotiate(&mut self, caps: &Caps) -> StageResult<Caps>;
}

/// Converts one input unit into output.
pub trait ProcessFrame {
    type Input;
    type Output;

    fn process(&mut self, input: Self::Input) -> StageResult<Self::Output>;
}
