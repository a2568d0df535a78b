//! Multi-band equalizer working directly on spectral frames.
//!
//! The band table is a list of equally spaced gain control points spanning
//! the whole spectrum; each bin gets the linearly interpolated gain of its
//! two neighbouring control points. Real and imaginary parts are scaled
//! together, so phase is untouched.

use rustfft::num_complex::Complex;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use super::caps::{num_freqs, Caps, MediaKind};
use super::frame::SpectralFrame;
use super::state::{Lifecycle, State, Transition};
use super::{NegotiateFormat, ProcessFrame};
use crate::error::{StageError, StageResult};

const LOG_TARGET: &str = "moodbar::spectrumeq";

/// Largest accepted band gain.
pub const MAX_GAIN: f32 = 1.0e10;

// Presets are sections of the curve 0.5 + 0.5 * exp(-(k/10)^2).
const PRESET_LOW: [f32; 21] = [
    1.0000000, 0.99502491, 0.98039471, 0.95696559, 0.92607189, 0.88940039, 0.84883816,
    0.80631319, 0.76364621, 0.72242903, 0.68393972, 0.64909863, 0.61846387, 0.59225976,
    0.57042921, 0.55269961, 0.53865237, 0.52778810, 0.51958194, 0.51352592, 0.50915781,
];

const PRESET_MEDIUM: [f32; 21] = [
    0.68393972, 0.72242903, 0.76364621, 0.80631319, 0.84883816, 0.88940039, 0.92607189,
    0.95696559, 0.98039471, 0.99502491, 1.0000000, 0.99502491, 0.98039471, 0.95696559,
    0.92607189, 0.88940039, 0.84883816, 0.80631319, 0.76364621, 0.72242903, 0.68393972,
];

const PRESET_HIGH: [f32; 21] = [
    0.50915781, 0.51352592, 0.51958194, 0.52778810, 0.53865237, 0.55269961, 0.57042921,
    0.59225976, 0.61846387, 0.64909863, 0.68393972, 0.72242903, 0.76364621, 0.80631319,
    0.84883816, 0.88940039, 0.92607189, 0.95696559, 0.98039471, 0.99502491, 1.0000000,
];

/// Fixed 21-band gain curves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preset {
    /// Emphasises low frequencies
    Low,
    /// Emphasises the middle of the spectrum
    Medium,
    /// Emphasises high frequencies
    High,
}

impl Preset {
    pub fn gains(self) -> &'static [f32] {
        match self {
            Preset::Low => &PRESET_LOW,
            Preset::Medium => &PRESET_MEDIUM,
            Preset::High => &PRESET_HIGH,
        }
    }
}

impl FromStr for Preset {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "lowpreset" => Ok(Preset::Low),
            "medium" | "med" | "mediumpreset" => Ok(Preset::Medium),
            "high" | "highpreset" => Ok(Preset::High),
            other => Err(StageError::UnsupportedConfiguration(format!(
                "unknown equalizer preset '{}' (expected low, medium or high)",
                other
            ))),
        }
    }
}

/// Immutable list of band gains. Cloning shares the underlying storage.
#[derive(Clone, Debug, PartialEq)]
pub struct BandTable(Arc<[f32]>);

impl Default for BandTable {
    fn default() -> Self {
        Self::unity()
    }
}

impl BandTable {
    /// A single band at gain 1.0.
    pub fn unity() -> Self {
        Self(Arc::from([1.0f32].as_slice()))
    }

    /// Build a table from gains. An empty list yields [`BandTable::unity`].
    pub fn new(gains: &[f32]) -> StageResult<Self> {
        if gains.is_empty() {
            return Ok(Self::unity());
        }
        if let Some((i, g)) = gains
            .iter()
            .enumerate()
            .find(|(_, g)| !g.is_finite() || **g < 0.0 || **g > MAX_GAIN)
        {
            return Err(StageError::UnsupportedConfiguration(format!(
                "band {} has gain {} outside [0, {:e}]",
                i, g, MAX_GAIN
            )));
        }
        Ok(Self(Arc::from(gains)))
    }

    pub fn preset(preset: Preset) -> Self {
        Self(Arc::from(preset.gains()))
    }

    pub fn gains(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Gain for `bin` out of `num_freqs` bins.
    ///
    /// The first bin sits on the first band and the last bin on the last band.
    pub fn gain_at(&self, bin: usize, num_freqs: usize) -> f32 {
        let bands = &self.0;
        if bands.len() == 1 {
            return bands[0];
        }
        let last = bands.len() - 1;
        let pct = if num_freqs > 1 {
            bin as f32 / (num_freqs - 1) as f32
        } else {
            0.0
        };
        let band = pct * last as f32;
        let prev = band.floor();
        let idx = prev as usize;
        if idx >= last {
            return bands[last];
        }
        let frac = band - prev;
        frac * bands[idx + 1] + (1.0 - frac) * bands[idx]
    }
}

/// Control-plane handle for replacing the band table of a running equalizer.
///
/// Replacement is a single pointer swap; a frame being processed keeps using
/// the table it started with.
#[derive(Clone, Debug, Default)]
pub struct EqualizerHandle {
    table: Arc<RwLock<BandTable>>,
}

impl EqualizerHandle {
    pub fn bands(&self) -> BandTable {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_table(&self, table: BandTable) {
        log::debug!(target: LOG_TARGET, "Band table replaced ({} bands)", table.len());
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = table;
    }

    pub fn set_bands(&self, gains: &[f32]) -> StageResult<()> {
        self.set_table(BandTable::new(gains)?);
        Ok(())
    }

    pub fn set_preset(&self, name: &str) -> StageResult<()> {
        let preset: Preset = name.parse()?;
        self.set_table(BandTable::preset(preset));
        Ok(())
    }
}

pub struct SpectrumEq {
    handle: EqualizerHandle,
    num_freqs: usize,
    state: State,
}

impl Default for SpectrumEq {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumEq {
    pub fn new() -> Self {
        Self {
            handle: EqualizerHandle::default(),
            num_freqs: 0,
            state: State::Null,
        }
    }

    /// A handle that may be moved to another thread to reconfigure the bands.
    pub fn handle(&self) -> EqualizerHandle {
        self.handle.clone()
    }

    pub fn bands(&self) -> BandTable {
        self.handle.bands()
    }

    pub fn set_bands(&self, gains: &[f32]) -> StageResult<()> {
        self.handle.set_bands(gains)
    }

    pub fn set_preset(&self, name: &str) -> StageResult<()> {
        self.handle.set_preset(name)
    }

    /// Bins per frame expected by [`SpectrumEq::process_in_place`]; 0 until negotiated.
    pub fn num_freqs(&self) -> usize {
        self.num_freqs
    }

    /// Accept a transform whose input and output formats are identical.
    pub fn set_caps(&mut self, incaps: &Caps, outcaps: &Caps) -> StageResult<()> {
        self.num_freqs = 0;
        if incaps != outcaps {
            return Err(StageError::NegotiationRejected(
                "equalizer does not convert formats; input and output caps differ".into(),
            ));
        }
        incaps.expect_kind(MediaKind::Spectrum)?;
        let size = incaps.size().ok_or_else(|| {
            StageError::NegotiationRejected("caps field 'size' is missing or not fixed".into())
        })?;
        if size == 0 {
            return Err(StageError::NegotiationRejected("size must be positive".into()));
        }
        self.num_freqs = num_freqs(size as usize);
        log::debug!(target: LOG_TARGET, "Negotiated {} frequency bins", self.num_freqs);
        Ok(())
    }

    /// Scale every bin of `bins` by its interpolated band gain.
    pub fn process_in_place(&self, bins: &mut [Complex<f32>]) -> StageResult<()> {
        if bins.len() != self.num_freqs {
            return Err(StageError::FrameSizeMismatch {
                expected: self.num_freqs,
                actual: bins.len(),
            });
        }
        let table = self.handle.bands();
        for (i, bin) in bins.iter_mut().enumerate() {
            let gain = table.gain_at(i, self.num_freqs);
            bin.re *= gain;
            bin.im *= gain;
        }
        Ok(())
    }
}

impl NegotiateFormat for SpectrumEq {
    fn negotiate(&mut self, caps: &Caps) -> StageResult<Caps> {
        self.set_caps(caps, caps)?;
        Ok(*caps)
    }
}

impl ProcessFrame for SpectrumEq {
    type Input = SpectralFrame;
    type Output = SpectralFrame;

    fn process(&mut self, mut frame: SpectralFrame) -> StageResult<SpectralFrame> {
        self.process_in_place(&mut frame.bins)?;
        Ok(frame)
    }
}

impl Lifecycle for SpectrumEq {
    fn state(&self) -> State {
        self.state
    }

    fn change_state(&mut self, transition: Transition) -> StageResult<()> {
        self.state = transition.target();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated(size: u32) -> SpectrumEq {
        let mut eq = SpectrumEq::new();
        eq.negotiate(&Caps::spectrum(44100, size, size / 2)).unwrap();
        eq
    }

    fn ones(n: usize) -> Vec<Complex<f32>> {
        vec![Complex::new(1.0, 1.0); n]
    }

    #[test]
    fn default_table_is_identity() {
        let mut eq = negotiated(64);
        let frame = SpectralFrame::new(
            (0..33)
                .map(|k| Complex::new(k as f32 * 0.3 - 2.0, 1.0 / (k as f32 + 1.0)))
                .collect(),
        );
        let out = eq.process(frame.clone()).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn empty_bands_mean_unity() {
        let eq = negotiated(16);
        eq.set_bands(&[3.0, 2.0]).unwrap();
        eq.set_bands(&[]).unwrap();
        assert_eq!(eq.bands(), BandTable::unity());
        assert_eq!(eq.bands().gains(), &[1.0]);
    }

    #[test]
    fn single_band_is_flat_gain() {
        let eq = negotiated(16);
        eq.set_bands(&[0.5]).unwrap();
        let mut bins = ones(9);
        eq.process_in_place(&mut bins).unwrap();
        assert!(bins.iter().all(|c| *c == Complex::new(0.5, 0.5)));
    }

    #[test]
    fn edges_hit_first_and_last_band() {
        let bands = [2.0, 0.7, 0.1, 5.0];
        let eq = negotiated(32);
        eq.set_bands(&bands).unwrap();
        let mut bins = ones(17);
        eq.process_in_place(&mut bins).unwrap();
        assert_eq!(bins[0], Complex::new(2.0, 2.0));
        assert_eq!(bins[16], Complex::new(5.0, 5.0));
    }

    #[test]
    fn interior_bins_interpolate_linearly() {
        let table = BandTable::new(&[0.0, 1.0]).unwrap();
        for bin in 0..9 {
            let expected = bin as f32 / 8.0;
            assert!((table.gain_at(bin, 9) - expected).abs() < 1e-6);
        }

        let table = BandTable::new(&[1.0, 3.0, 2.0]).unwrap();
        // 9 bins over 2 band intervals: bin 4 sits on the middle band
        assert!((table.gain_at(4, 9) - 3.0).abs() < 1e-6);
        assert!((table.gain_at(2, 9) - 2.0).abs() < 1e-6);
        assert!((table.gain_at(6, 9) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn phase_is_preserved() {
        let eq = negotiated(8);
        eq.set_bands(&[0.25, 4.0]).unwrap();
        let mut bins: Vec<Complex<f32>> = (0..5).map(|k| Complex::new(1.0, k as f32 - 2.0)).collect();
        let before = bins.clone();
        eq.process_in_place(&mut bins).unwrap();
        for (a, b) in before.iter().zip(&bins) {
            assert!((a.arg() - b.arg()).abs() < 1e-5);
        }
    }

    #[test]
    fn presets_by_name() {
        let eq = SpectrumEq::new();
        eq.set_preset("low").unwrap();
        assert_eq!(eq.bands().gains(), &PRESET_LOW);
        eq.set_preset("mediumpreset").unwrap();
        assert_eq!(eq.bands().len(), 21);
        assert_eq!(eq.bands().gains()[10], 1.0);
        eq.set_preset("HIGH").unwrap();
        assert_eq!(eq.bands().gains()[20], 1.0);
    }

    #[test]
    fn invalid_preset_keeps_previous_table() {
        let eq = SpectrumEq::new();
        eq.set_preset("high").unwrap();
        let res = eq.set_preset("loudness");
        assert!(matches!(res, Err(StageError::UnsupportedConfiguration(_))));
        assert_eq!(eq.bands(), BandTable::preset(Preset::High));
    }

    #[test]
    fn invalid_gains_are_rejected() {
        let eq = SpectrumEq::new();
        eq.set_bands(&[0.5, 2.0]).unwrap();
        assert!(eq.set_bands(&[1.0, -0.5]).is_err());
        assert!(eq.set_bands(&[f32::NAN]).is_err());
        assert!(eq.set_bands(&[2.0e10]).is_err());
        assert_eq!(eq.bands().gains(), &[0.5, 2.0]);
    }

    #[test]
    fn presets_follow_gaussian_curve() {
        for (k, &g) in PRESET_LOW.iter().enumerate() {
            let x = k as f32 / 10.0;
            assert!((g - (0.5 + 0.5 * (-x * x).exp())).abs() < 1e-6);
        }
        let mut reversed = PRESET_HIGH;
        reversed.reverse();
        assert_eq!(reversed, PRESET_LOW);
        assert_eq!(&PRESET_MEDIUM[10..], &PRESET_LOW[..11]);
    }

    #[test]
    fn negotiation_requires_identical_caps_and_size() {
        let mut eq = negotiated(16);
        assert_eq!(eq.num_freqs(), 9);

        let a = Caps::spectrum(44100, 16, 8);
        let b = Caps::spectrum(44100, 32, 8);
        assert!(eq.set_caps(&a, &b).is_err());
        assert_eq!(eq.num_freqs(), 0);
        assert!(matches!(
            eq.process_in_place(&mut ones(9)),
            Err(StageError::FrameSizeMismatch { expected: 0, actual: 9 })
        ));

        let no_size = Caps::spectrum_template().with_rate(44100);
        assert!(eq.set_caps(&no_size, &no_size).is_err());
        assert!(eq.set_caps(&a, &a).is_ok());
        assert_eq!(eq.num_freqs(), 9);
    }

    #[test]
    fn bin_count_must_match() {
        let eq = negotiated(16);
        assert!(matches!(
            eq.process_in_place(&mut ones(8)),
            Err(StageError::FrameSizeMismatch { expected: 9, actual: 8 })
        ));
    }

    #[test]
    fn table_swaps_from_another_thread() {
        let eq = negotiated(16);
        let handle = eq.handle();
        std::thread::spawn(move || handle.set_bands(&[0.0]).unwrap())
            .join()
            .unwrap();
        let mut bins = ones(9);
        eq.process_in_place(&mut bins).unwrap();
        assert!(bins.iter().all(|c| c.re == 0.0 && c.im == 0.0));
    }
}
