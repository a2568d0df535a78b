use crate::error::{StageError, StageResult};

/// What flows across a stage boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    /// Mono 32-bit float samples.
    Signal,
    /// Arrays of `size/2 + 1` complex floats, one per transform window.
    Spectrum,
    /// Packed 24-bit RGB pixels.
    Rgb,
}

/// A caps field: either pinned to one value or still open within a range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Fixed(u32),
    Range(u32, u32),
}

impl Field {
    pub const ANY: Field = Field::Range(1, u32::MAX);

    pub fn fixed(self) -> Option<u32> {
        match self {
            Field::Fixed(v) => Some(v),
            Field::Range(..) => None,
        }
    }

    /// Pick a concrete value, preferring `preferred` and clamping it into an open range.
    pub fn fixate(self, preferred: u32) -> u32 {
        match self {
            Field::Fixed(v) => v,
            Field::Range(lo, hi) => preferred.clamp(lo, hi),
        }
    }
}

/// Format description attached to a stage boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caps {
    pub kind: MediaKind,
    pub rate: Option<Field>,
    pub size: Option<Field>,
    pub step: Option<Field>,
}

impl Caps {
    pub fn signal_template() -> Self {
        Self {
            kind: MediaKind::Signal,
            rate: Some(Field::ANY),
            size: None,
            step: None,
        }
    }

    pub fn spectrum_template() -> Self {
        Self {
            kind: MediaKind::Spectrum,
            rate: Some(Field::ANY),
            size: Some(Field::ANY),
            step: Some(Field::ANY),
        }
    }

    pub fn rgb_template() -> Self {
        Self {
            kind: MediaKind::Rgb,
            rate: None,
            size: None,
            step: None,
        }
    }

    pub fn signal(rate: u32) -> Self {
        Self {
            rate: Some(Field::Fixed(rate)),
            ..Self::signal_template()
        }
    }

    pub fn spectrum(rate: u32, size: u32, step: u32) -> Self {
        Self {
            kind: MediaKind::Spectrum,
            rate: Some(Field::Fixed(rate)),
            size: Some(Field::Fixed(size)),
            step: Some(Field::Fixed(step)),
        }
    }

    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = Some(Field::Fixed(rate));
        self
    }

    pub fn rate(&self) -> Option<u32> {
        self.rate.and_then(Field::fixed)
    }

    pub fn size(&self) -> Option<u32> {
        self.size.and_then(Field::fixed)
    }

    pub fn step(&self) -> Option<u32> {
        self.step.and_then(Field::fixed)
    }

    pub fn expect_kind(&self, kind: MediaKind) -> StageResult<()> {
        if self.kind != kind {
            return Err(StageError::NegotiationRejected(format!(
                "expected {:?} caps, got {:?}",
                kind, self.kind
            )));
        }
        Ok(())
    }

    /// Read the full (rate, size, step) triple of spectrum caps.
    pub fn stream_format(&self) -> StageResult<StreamFormat> {
        self.expect_kind(MediaKind::Spectrum)?;
        let rate = self.rate().ok_or_else(|| missing("rate"))?;
        let size = self.size().ok_or_else(|| missing("size"))?;
        let step = self.step().ok_or_else(|| missing("step"))?;
        StreamFormat::new(rate, size as usize, step as usize)
    }
}

fn missing(field: &str) -> StageError {
    StageError::NegotiationRejected(format!("caps field '{}' is missing or not fixed", field))
}

/// Negotiated spectrum stream parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate of the original signal (Hz)
    pub rate: u32,
    /// Transform window length in samples
    pub size: usize,
    /// Hop between consecutive windows in samples
    pub step: usize,
}

impl StreamFormat {
    pub fn new(rate: u32, size: usize, step: usize) -> StageResult<Self> {
        if rate == 0 || size == 0 || step == 0 {
            return Err(StageError::NegotiationRejected(format!(
                "rate, size and step must be positive (rate={}, size={}, step={})",
                rate, size, step
            )));
        }
        Ok(Self { rate, size, step })
    }

    /// Complex bins per spectral frame.
    pub fn num_freqs(&self) -> usize {
        num_freqs(self.size)
    }

    /// Samples shared between consecutive windows.
    pub fn overlap(&self) -> usize {
        self.size.saturating_sub(self.step)
    }

    pub fn caps(&self) -> Caps {
        Caps::spectrum(self.rate, self.size as u32, self.step as u32)
    }
}

pub fn num_freqs(size: usize) -> usize {
    size / 2 + 1
}

/// Centre frequency (Hz) of spectral bin `bin` for a window of `size` samples at `rate`.
pub fn band_freq(bin: usize, size: usize, rate: u32) -> f32 {
    bin as f32 * rate as f32 / size as f32
}
