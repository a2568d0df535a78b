//! Signal -> spectrum conversion.
//!
//! Samples are queued until a full window is available; each window of
//! `size` samples becomes one frame of `size/2 + 1` complex bins, and the
//! window then advances by `step` samples. No window function is applied.

use super::caps::{Caps, MediaKind, StreamFormat};
use super::frame::{samples_to_duration, BufferInfo, SampleBlock, SpectralFrame};
use super::state::{Lifecycle, State, Transition};
use super::transform::ForwardTransform;
use super::{NegotiateFormat, ProcessFrame};
use crate::error::{StageError, StageResult};

const LOG_TARGET: &str = "moodbar::spectrum";

pub const DEFAULT_SIZE: u32 = 1024;
pub const DEFAULT_STEP: u32 = 512;

/// Preferred framing, used when downstream leaves size/step open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpectrumSettings {
    pub size: u32,
    pub step: u32,
    pub hi_quality: bool,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            step: DEFAULT_STEP,
            hi_quality: true,
        }
    }
}

pub struct ForwardSpectrum {
    settings: SpectrumSettings,
    rate: Option<u32>,
    format: Option<StreamFormat>,
    state: State,
    transform: Option<ForwardTransform>,
    /// Queued samples; allocated while Active
    pending: Option<Vec<f32>>,
    offset: u64,
}

impl Default for ForwardSpectrum {
    fn default() -> Self {
        Self::new(SpectrumSettings::default())
    }
}

impl ForwardSpectrum {
    pub fn new(settings: SpectrumSettings) -> Self {
        Self {
            settings,
            rate: None,
            format: None,
            state: State::Null,
            transform: None,
            pending: None,
            offset: 0,
        }
    }

    pub fn settings(&self) -> SpectrumSettings {
        self.settings
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Samples waiting for a complete window.
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, Vec::len)
    }

    /// Negotiate the input signal caps against what downstream accepts.
    ///
    /// Size and step left open by `peer` are fixated from the settings.
    pub fn negotiate_with_peer(&mut self, caps: &Caps, peer: &Caps) -> StageResult<Caps> {
        caps.expect_kind(MediaKind::Signal)?;
        peer.expect_kind(MediaKind::Spectrum)?;
        let rate = caps.rate().ok_or_else(|| {
            StageError::NegotiationRejected("caps field 'rate' is missing or not fixed".into())
        })?;
        if let Some(peer_rate) = peer.rate().filter(|&r| r != rate) {
            return Err(StageError::NegotiationRejected(format!(
                "downstream requires rate {}, input is {}",
                peer_rate, rate
            )));
        }

        let size = peer.size.map_or(self.settings.size, |f| f.fixate(self.settings.size));
        let step = peer.step.map_or(self.settings.step, |f| f.fixate(self.settings.step));
        let src = Caps::spectrum(rate, size, step);

        let previous = self.rate.replace(rate);
        if let Err(e) = self.set_src_caps(&src) {
            self.rate = previous;
            return Err(e);
        }
        Ok(src)
    }

    /// Downstream (re)negotiation of the output framing. The rate cannot change.
    pub fn set_src_caps(&mut self, caps: &Caps) -> StageResult<()> {
        let format = caps.stream_format()?;
        if Some(format.rate) != self.rate {
            return Err(StageError::NegotiationRejected(format!(
                "rate {} does not match the input rate {:?}",
                format.rate, self.rate
            )));
        }
        if self.format != Some(format) {
            log::debug!(
                target: LOG_TARGET,
                "Framing set to size={}, step={} at {} Hz",
                format.size,
                format.step,
                format.rate
            );
            self.format = Some(format);
            if self.state >= State::Ready {
                self.alloc_transform();
            }
        }
        Ok(())
    }

    fn alloc_transform(&mut self) {
        if let Some(format) = self.format {
            log::debug!(
                target: LOG_TARGET,
                "Allocating forward transform: size={}, step={}",
                format.size,
                format.step
            );
            self.transform = Some(ForwardTransform::new(format.size, self.settings.hi_quality));
        }
    }

    fn push_samples(&mut self, block: SampleBlock) -> StageResult<Vec<SpectralFrame>> {
        if self.state != State::Active {
            return Err(StageError::InvalidState(format!(
                "samples are only accepted while active (state is {:?})",
                self.state
            )));
        }
        let (format, transform, pending) =
            match (self.format, self.transform.as_mut(), self.pending.as_mut()) {
                (Some(f), Some(t), Some(p)) => (f, t, p),
                _ => {
                    return Err(StageError::InvalidState(
                        "no format has been negotiated".into(),
                    ))
                }
            };

        pending.extend_from_slice(&block.samples);

        let mut frames = Vec::new();
        while pending.len() >= format.size.max(format.step) {
            let bins = transform.execute(pending)?;
            let info = BufferInfo {
                offset: self.offset,
                offset_end: self.offset + format.step as u64,
                timestamp: samples_to_duration(self.offset, format.rate),
                duration: samples_to_duration(format.step as u64, format.rate),
            };
            frames.push(SpectralFrame { bins, info });

            pending.drain(..format.step);
            self.offset += format.step as u64;
        }

        log::trace!(
            target: LOG_TARGET,
            "{} samples in, {} frames out, {} pending",
            block.samples.len(),
            frames.len(),
            pending.len()
        );
        Ok(frames)
    }
}

impl NegotiateFormat for ForwardSpectrum {
    fn negotiate(&mut self, caps: &Caps) -> StageResult<Caps> {
        self.negotiate_with_peer(caps, &Caps::spectrum_template())
    }
}

impl ProcessFrame for ForwardSpectrum {
    type Input = SampleBlock;
    type Output = Vec<SpectralFrame>;

    fn process(&mut self, block: SampleBlock) -> StageResult<Vec<SpectralFrame>> {
        self.push_samples(block)
    }
}

impl Lifecycle for ForwardSpectrum {
    fn state(&self) -> State {
        self.state
    }

    fn change_state(&mut self, transition: Transition) -> StageResult<()> {
        match transition {
            Transition::NullToReady => self.alloc_transform(),
            Transition::ReadyToActive => {
                self.pending = Some(Vec::new());
                self.offset = 0;
            }
            Transition::ActiveToReady => self.pending = None,
            Transition::ReadyToNull => self.transform = None,
        }
        log::debug!(target: LOG_TARGET, "{:?}", transition);
        self.state = transition.target();
        Ok(())
    }
}
