//! Spectrum -> signal conversion.
//!
//! Every incoming frame is inverse transformed into `size` samples, of
//! which exactly `step` are emitted. The `size - step` samples that
//! overlap the following windows are kept in an overlap buffer and blended
//! with the next frames' samples as they arrive.

use super::caps::{Caps, MediaKind, StreamFormat};
use super::frame::{SampleBlock, SpectralFrame};
use super::state::{Lifecycle, State, Transition};
use super::transform::InverseTransform;
use super::{NegotiateFormat, ProcessFrame};
use crate::error::{StageError, StageResult};

const LOG_TARGET: &str = "moodbar::unspectrum";

pub const HI_QUALITY_DEFAULT: bool = true;

pub struct InverseSpectrum {
    hi_quality: bool,
    format: Option<StreamFormat>,
    state: State,
    /// Allocated from Ready onward
    transform: Option<InverseTransform>,
    /// Allocated while Active; empty when size == step
    overlap: Option<Vec<f32>>,
}

impl Default for InverseSpectrum {
    fn default() -> Self {
        Self::new()
    }
}

impl InverseSpectrum {
    pub fn new() -> Self {
        Self {
            hi_quality: HI_QUALITY_DEFAULT,
            format: None,
            state: State::Null,
            transform: None,
            overlap: None,
        }
    }

    pub fn hi_quality(&self) -> bool {
        self.hi_quality
    }

    /// Choose between a precise (slower to set up) and a fast transform plan.
    /// An existing plan is rebuilt right away.
    pub fn set_hi_quality(&mut self, hi_quality: bool) {
        if self.hi_quality == hi_quality {
            return;
        }
        self.hi_quality = hi_quality;
        if self.transform.is_some() {
            self.alloc_transform();
        }
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Caps this stage can produce. Only the rate is ever constrained.
    pub fn src_caps(&self) -> Caps {
        match self.format {
            Some(format) => Caps::signal_template().with_rate(format.rate),
            None => Caps::signal_template(),
        }
    }

    /// Caps this stage can accept.
    pub fn sink_caps(&self) -> Caps {
        match self.format {
            Some(format) => Caps::spectrum_template().with_rate(format.rate),
            None => Caps::spectrum_template(),
        }
    }

    /// Downstream-initiated renegotiation. The output rate follows the input
    /// rate, so only the caps already in effect are accepted.
    pub fn accept_src_caps(&self, caps: &Caps) -> StageResult<()> {
        caps.expect_kind(MediaKind::Signal)?;
        match (self.format, caps.rate()) {
            (Some(format), Some(rate)) if format.rate == rate => Ok(()),
            (current, requested) => Err(StageError::NegotiationRejected(format!(
                "output rate is fixed by the input (current {:?}, requested {:?})",
                current.map(|f| f.rate),
                requested
            ))),
        }
    }

    fn alloc_transform(&mut self) {
        if let Some(format) = self.format {
            log::debug!(
                target: LOG_TARGET,
                "Allocating inverse transform: size={}, hi_quality={}",
                format.size,
                self.hi_quality
            );
            self.transform = Some(InverseTransform::new(format.size, self.hi_quality));
        }
    }

    fn alloc_overlap(&mut self) {
        if let Some(format) = self.format {
            log::debug!(
                target: LOG_TARGET,
                "Allocating overlap buffer: {} samples",
                format.overlap()
            );
            self.overlap = Some(vec![0.0; format.overlap()]);
        }
    }

    fn process_frame(&mut self, frame: SpectralFrame) -> StageResult<SampleBlock> {
        if self.state != State::Active {
            return Err(StageError::InvalidState(format!(
                "frames are only accepted while active (state is {:?})",
                self.state
            )));
        }
        let (format, transform, overlap) =
            match (self.format, self.transform.as_mut(), self.overlap.as_mut()) {
                (Some(f), Some(t), Some(o)) => (f, t, o),
                _ => {
                    return Err(StageError::InvalidState(
                        "no format has been negotiated".into(),
                    ))
                }
            };

        if frame.len() != format.num_freqs() {
            return Err(StageError::FrameSizeMismatch {
                expected: format.num_freqs(),
                actual: frame.len(),
            });
        }

        let fresh = transform.execute(&frame.bins)?;
        let mut out = vec![0.0f32; format.step];
        if overlap.is_empty() {
            out.copy_from_slice(fresh);
        } else {
            overlap_add(overlap, fresh, format.step, &mut out);
        }

        log::trace!(
            target: LOG_TARGET,
            "Frame at offset {} -> {} samples",
            frame.info.offset,
            out.len()
        );

        Ok(SampleBlock {
            samples: out,
            info: frame.info,
        })
    }
}

/// Blend a freshly transformed window into the overlap buffer and emit `step` samples.
///
/// A sample of the overlap region may already hold a weighted average of up to
/// `(extra - 1) / step + 1` earlier windows. The weight given to the new window
/// ramps linearly inside each run of positions that share the same number of
/// contributors, so it never jumps where a contributor starts or stops counting.
fn overlap_add(overlap: &mut [f32], fresh: &[f32], step: usize, out: &mut [f32]) {
    let extra = overlap.len();
    let size = fresh.len();
    let max_others = (extra - 1) / step + 1;

    for i in 0..extra {
        let num_others = (extra - i - 1) / step + 1;
        let n = num_others as f32;

        let start_weight = if num_others == max_others {
            0.0
        } else {
            (1.0 / n + 1.0 / (n + 1.0)) / 2.0
        };
        let end_weight = if num_others == 1 {
            1.0
        } else {
            (1.0 / n + 1.0 / (n - 1.0)) / 2.0
        };

        // Fraction of the way to the next position where num_others changes
        let run_start = extra.saturating_sub(num_others * step);
        let run_len = extra - (num_others - 1) * step - run_start;
        let pct = (i - run_start) as f32 / run_len as f32;
        let weight = start_weight * (1.0 - pct) + end_weight * pct;

        overlap[i] = fresh[i] * weight + overlap[i] * (1.0 - weight);
    }

    let carried = extra.min(step);
    out[..carried].copy_from_slice(&overlap[..carried]);
    if step > extra {
        out[extra..step].copy_from_slice(&fresh[extra..step]);
    }

    if extra > step {
        overlap.copy_within(step..extra, 0);
    }
    let tail = extra.saturating_sub(step);
    overlap[tail..].copy_from_slice(&fresh[size - carried..]);
}

impl NegotiateFormat for InverseSpectrum {
    fn negotiate(&mut self, caps: &Caps) -> StageResult<Caps> {
        let format = caps.stream_format()?;
        if format.size < format.step {
            return Err(StageError::NegotiationRejected(format!(
                "decoding with size {} smaller than step {} is not supported",
                format.size, format.step
            )));
        }

        let out = Caps::signal(format.rate);
        if self.format == Some(format) {
            return Ok(out);
        }

        log::debug!(
            target: LOG_TARGET,
            "Negotiated rate={}, size={}, step={}",
            format.rate,
            format.size,
            format.step
        );
        self.format = Some(format);
        if self.state >= State::Ready {
            self.alloc_transform();
        }
        if self.state >= State::Active {
            self.alloc_overlap();
        }
        Ok(out)
    }
}

impl ProcessFrame for InverseSpectrum {
    type Input = SpectralFrame;
    type Output = SampleBlock;

    fn process(&mut self, frame: SpectralFrame) -> StageResult<SampleBlock> {
        self.process_frame(frame)
    }
}

impl Lifecycle for InverseSpectrum {
    fn state(&self) -> State {
        self.state
    }

    fn change_state(&mut self, transition: Transition) -> StageResult<()> {
        match transition {
            Transition::NullToReady => self.alloc_transform(),
            Transition::ReadyToActive => self.alloc_overlap(),
            Transition::ActiveToReady => self.overlap = None,
            Transition::ReadyToNull => self.transform = None,
        }
        log::debug!(target: LOG_TARGET, "{:?}", transition);
        self.state = transition.target();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::num_complex::Complex;

    fn active(size: u32, step: u32) -> InverseSpectrum {
        let mut stage = InverseSpectrum::new();
        stage.set_state(State::Active).unwrap();
        stage.negotiate(&Caps::spectrum(44100, size, step)).unwrap();
        stage
    }

    fn dc_frame(size: usize, magnitude: f32) -> SpectralFrame {
        let mut frame = SpectralFrame::zeroed(size);
        frame.bins[0] = Complex::new(magnitude, 0.0);
        frame
    }

    fn test_frame(size: usize) -> SpectralFrame {
        let mut frame = SpectralFrame::zeroed(size);
        for (k, bin) in frame.bins.iter_mut().enumerate().skip(1) {
            *bin = Complex::new(1.0 / k as f32, 0.5 - k as f32 * 0.1);
        }
        frame
    }

    #[test]
    fn rejects_size_smaller_than_step() {
        let mut stage = InverseSpectrum::new();
        let res = stage.negotiate(&Caps::spectrum(44100, 8, 16));
        assert!(matches!(res, Err(StageError::NegotiationRejected(_))));
        assert_eq!(stage.format(), None);
    }

    #[test]
    fn rejects_missing_fields() {
        let mut stage = InverseSpectrum::new();
        let caps = Caps::spectrum_template().with_rate(44100);
        assert!(stage.negotiate(&caps).is_err());
        assert!(stage.negotiate(&Caps::signal(44100)).is_err());
    }

    #[test]
    fn failed_negotiation_keeps_previous_format() {
        let mut stage = active(16, 8);
        assert!(stage.negotiate(&Caps::spectrum(48000, 4, 8)).is_err());
        assert_eq!(stage.format(), Some(StreamFormat::new(44100, 16, 8).unwrap()));
        assert_eq!(stage.process(SpectralFrame::zeroed(16)).unwrap().len(), 8);
    }

    #[test]
    fn output_caps_carry_only_the_rate() {
        let mut stage = InverseSpectrum::new();
        let out = stage.negotiate(&Caps::spectrum(22050, 1024, 512)).unwrap();
        assert_eq!(out, Caps::signal(22050));
        assert!(out.size.is_none() && out.step.is_none());
        assert_eq!(stage.src_caps().rate(), Some(22050));
    }

    #[test]
    fn downstream_cannot_change_rate() {
        let mut stage = InverseSpectrum::new();
        stage.negotiate(&Caps::spectrum(44100, 16, 8)).unwrap();
        assert!(stage.accept_src_caps(&Caps::signal(44100)).is_ok());
        assert!(stage.accept_src_caps(&Caps::signal(48000)).is_err());
    }

    #[test]
    fn no_overlap_emits_plain_transform() {
        let size = 16;
        let mut stage = active(size as u32, size as u32);
        let frame = test_frame(size);

        let mut reference = InverseTransform::new(size, true);
        let expected = reference.execute(&frame.bins).unwrap().to_vec();

        for _ in 0..3 {
            let block = stage.process(frame.clone()).unwrap();
            assert_eq!(block.len(), size);
            for (a, b) in block.samples.iter().zip(&expected) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn silence_stays_silent() {
        for (size, step) in [(16, 8), (16, 4), (12, 5), (32, 1), (9, 7)] {
            let mut stage = active(size, step);
            for _ in 0..10 {
                let block = stage.process(SpectralFrame::zeroed(size as usize)).unwrap();
                assert_eq!(block.len(), step as usize);
                assert!(block.samples.iter().all(|&s| s == 0.0));
            }
            assert!(stage.overlap.as_ref().unwrap().iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn dc_without_overlap_is_constant() {
        let mut stage = active(16, 16);
        let block = stage.process(dc_frame(16, 8.0)).unwrap();
        for &s in &block.samples {
            assert!((s - 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn dc_with_half_overlap_settles_after_one_frame() {
        let size = 16;
        let mut stage = active(size as u32, 8);
        let value = 8.0 / (size as f32).sqrt();

        let first = stage.process(dc_frame(size, 8.0)).unwrap();
        // The blend fades in from the empty overlap buffer.
        assert!(first.samples[0].abs() < 1e-6);
        let second = stage.process(dc_frame(size, 8.0)).unwrap();
        for &s in &second.samples {
            assert!((s - value).abs() < 1e-5, "got {}", s);
        }
    }

    #[test]
    fn dc_with_deep_overlap_converges() {
        let (size, step) = (16usize, 3usize);
        let mut stage = active(size as u32, step as u32);
        let value = 4.0 / (size as f32).sqrt();

        let mut last = Vec::new();
        for _ in 0..(size / step + 2) {
            last = stage.process(dc_frame(size, 4.0)).unwrap().samples;
        }
        for &s in &last {
            assert!((s - value).abs() < 1e-5, "got {}", s);
        }
        for &s in stage.overlap.as_ref().unwrap() {
            assert!((s - value).abs() < 1e-5);
        }
    }

    #[test]
    fn blend_weights_for_single_contributor() {
        // size = 2 * step: one earlier window overlaps, weight ramps 0 -> 1
        let mut overlap = vec![1.0f32; 4];
        let fresh = vec![0.0f32; 8];
        let mut out = vec![0.0f32; 4];
        overlap_add(&mut overlap, &fresh, 4, &mut out);
        assert_eq!(out, vec![1.0, 0.75, 0.5, 0.25]);
        assert_eq!(overlap, vec![0.0; 4]);
    }

    #[test]
    fn blend_weights_for_multiple_contributors() {
        // extra = 3, step = 1: positions see 3, 2 and 1 earlier windows
        let mut overlap = vec![0.0f32; 3];
        let fresh = vec![1.0f32; 4];
        let mut out = vec![0.0f32; 1];
        overlap_add(&mut overlap, &fresh, 1, &mut out);

        let w1 = (1.0 / 2.0 + 1.0 / 3.0) / 2.0;
        let w2 = (1.0 + 1.0 / 2.0) / 2.0;
        assert_eq!(out, vec![0.0]);
        assert!((overlap[0] - w1).abs() < 1e-6);
        assert!((overlap[1] - w2).abs() < 1e-6);
        assert_eq!(overlap[2], 1.0);
    }

    #[test]
    fn short_overlap_copies_fresh_samples() {
        // extra = 2 < step = 5
        let mut overlap = vec![0.0f32; 2];
        let fresh: Vec<f32> = (0..7).map(|i| i as f32).collect();
        let mut out = vec![0.0f32; 5];
        overlap_add(&mut overlap, &fresh, 5, &mut out);
        assert_eq!(out, vec![0.0, 0.5, 2.0, 3.0, 4.0]);
        assert_eq!(overlap, vec![5.0, 6.0]);
    }

    #[test]
    fn wrong_frame_size_is_an_error() {
        let mut stage = active(16, 8);
        let res = stage.process(SpectralFrame::zeroed(32));
        assert_eq!(
            res,
            Err(StageError::FrameSizeMismatch {
                expected: 9,
                actual: 17
            })
        );
    }

    #[test]
    fn frames_require_active_state() {
        let mut stage = InverseSpectrum::new();
        stage.negotiate(&Caps::spectrum(44100, 16, 8)).unwrap();
        stage.set_state(State::Ready).unwrap();
        assert!(matches!(
            stage.process(SpectralFrame::zeroed(16)),
            Err(StageError::InvalidState(_))
        ));

        let mut unnegotiated = InverseSpectrum::new();
        unnegotiated.set_state(State::Active).unwrap();
        assert!(matches!(
            unnegotiated.process(SpectralFrame::zeroed(16)),
            Err(StageError::InvalidState(_))
        ));
    }

    #[test]
    fn lifecycle_allocates_and_frees_buffers() {
        let mut stage = InverseSpectrum::new();
        stage.negotiate(&Caps::spectrum(44100, 16, 4)).unwrap();
        assert!(stage.transform.is_none() && stage.overlap.is_none());

        stage.set_state(State::Ready).unwrap();
        assert!(stage.transform.is_some() && stage.overlap.is_none());

        stage.set_state(State::Active).unwrap();
        assert_eq!(stage.overlap.as_ref().map(Vec::len), Some(12));

        stage.set_state(State::Ready).unwrap();
        assert!(stage.overlap.is_none());

        stage.set_state(State::Null).unwrap();
        assert!(stage.transform.is_none());
    }

    #[test]
    fn renegotiation_reallocates_buffers() {
        let mut stage = active(16, 4);
        stage.process(dc_frame(16, 1.0)).unwrap();

        stage.negotiate(&Caps::spectrum(44100, 32, 8)).unwrap();
        assert_eq!(stage.transform.as_ref().map(|t| t.size()), Some(32));
        let overlap = stage.overlap.as_ref().unwrap();
        assert_eq!(overlap.len(), 24);
        assert!(overlap.iter().all(|&s| s == 0.0));
        assert_eq!(stage.process(SpectralFrame::zeroed(32)).unwrap().len(), 8);
    }

    #[test]
    fn buffer_info_is_propagated() {
        let mut stage = active(16, 8);
        let info = crate::spectrum::BufferInfo {
            offset: 64,
            offset_end: 72,
            ..Default::default()
        };
        let block = stage.process(SpectralFrame::zeroed(16).with_info(info)).unwrap();
        assert_eq!(block.info, info);
    }
}
