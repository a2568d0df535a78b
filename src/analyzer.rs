//! Spectrum -> moodbar conversion.
//!
//! Each spectral frame is reduced to one (red, green, blue) triple: bin
//! magnitudes are summed into 24 bark bands, and the low, middle and high
//! thirds of those bands give the three channels. When the stream ends the
//! channels are normalised independently and resampled into an image.

use crate::error::{StageError, StageResult};
use crate::spectrum::{
    band_freq, num_freqs, Caps, Lifecycle, MediaKind, NegotiateFormat, ProcessFrame,
    SpectralFrame, State, Transition,
};

const LOG_TARGET: &str = "moodbar::analyzer";

/// Upper edges (Hz) of the bark bands the spectrum is split into.
const BARK_BANDS: [u32; 24] = [
    100, 200, 300, 400, 510, 630, 770, 920, 1080, 1270, 1480, 1720, 2000, 2320, 2700, 3150, 3700,
    4400, 5300, 6400, 7700, 9500, 12000, 15500,
];

/// Bark bands folded into each colour channel.
const BANDS_PER_CHANNEL: usize = 8;

/// Frames accepted before the analyzer refuses more input.
pub const MAX_FRAMES: usize = 4 * 1024 * 1024;

pub const HEIGHT_DEFAULT: u32 = 1;
pub const MAX_WIDTH_DEFAULT: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoodbarSettings {
    /// Rows in the rendered image, at least 1
    pub height: u32,
    /// Maximum image width; 0 keeps one pixel per frame
    pub max_width: u32,
}

impl Default for MoodbarSettings {
    fn default() -> Self {
        Self {
            height: HEIGHT_DEFAULT,
            max_width: MAX_WIDTH_DEFAULT,
        }
    }
}

/// Rendered moodbar: `height` identical rows of packed RGB24 pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoodImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl MoodImage {
    pub fn is_empty(&self) -> bool {
        self.width == 0
    }

    /// One row of `width * 3` bytes.
    pub fn row(&self, line: u32) -> Option<&[u8]> {
        let stride = self.width as usize * 3;
        let start = line as usize * stride;
        self.pixels.get(start..start + stride).filter(|_| line < self.height)
    }
}

#[derive(Debug, Default)]
struct Channels {
    r: Vec<f32>,
    g: Vec<f32>,
    b: Vec<f32>,
}

impl Channels {
    fn len(&self) -> usize {
        self.r.len()
    }
}

pub struct MoodbarAnalyzer {
    settings: MoodbarSettings,
    /// Bin index -> bark band index, built at negotiation
    bark_table: Vec<usize>,
    state: State,
    channels: Option<Channels>,
    frame_limit: usize,
}

impl Default for MoodbarAnalyzer {
    fn default() -> Self {
        Self::new(MoodbarSettings::default())
    }
}

impl MoodbarAnalyzer {
    pub fn new(settings: MoodbarSettings) -> Self {
        Self {
            settings,
            bark_table: Vec::new(),
            state: State::Null,
            channels: None,
            frame_limit: MAX_FRAMES,
        }
    }

    pub fn settings(&self) -> MoodbarSettings {
        self.settings
    }

    pub fn set_height(&mut self, height: u32) -> StageResult<()> {
        if height == 0 {
            return Err(StageError::UnsupportedConfiguration(
                "height must be at least 1".into(),
            ));
        }
        self.settings.height = height;
        Ok(())
    }

    pub fn set_max_width(&mut self, max_width: u32) {
        self.settings.max_width = max_width;
    }

    /// Frames analysed since the stage became active.
    pub fn frame_count(&self) -> usize {
        self.channels.as_ref().map_or(0, Channels::len)
    }

    fn analyze(&mut self, frame: &SpectralFrame) -> StageResult<()> {
        if self.state != State::Active {
            return Err(StageError::InvalidState(format!(
                "frames are only accepted while active (state is {:?})",
                self.state
            )));
        }
        if self.bark_table.is_empty() {
            return Err(StageError::InvalidState("no format has been negotiated".into()));
        }
        if frame.len() != self.bark_table.len() {
            return Err(StageError::FrameSizeMismatch {
                expected: self.bark_table.len(),
                actual: frame.len(),
            });
        }
        let limit = self.frame_limit;
        let channels = self
            .channels
            .as_mut()
            .ok_or_else(|| StageError::InvalidState("analysis buffers not allocated".into()))?;
        if channels.len() >= limit {
            return Err(StageError::InvalidState(format!(
                "frame limit of {} reached",
                limit
            )));
        }

        let mut amplitudes = [0.0f32; BARK_BANDS.len()];
        for (bin, &band) in frame.bins.iter().zip(&self.bark_table) {
            amplitudes[band] += bin.norm();
        }

        let mut rgb = [0.0f32; 3];
        for (i, a) in amplitudes.iter().enumerate() {
            rgb[i / BANDS_PER_CHANNEL] += a * a;
        }
        channels.r.push(rgb[0].sqrt());
        channels.g.push(rgb[1].sqrt());
        channels.b.push(rgb[2].sqrt());
        Ok(())
    }

    /// Normalise the collected channels and render the image.
    ///
    /// The collected frames are consumed; a following stream starts empty.
    pub fn finish(&mut self) -> StageResult<MoodImage> {
        if self.state != State::Active {
            return Err(StageError::InvalidState(format!(
                "finish requires an active stage (state is {:?})",
                self.state
            )));
        }
        let Channels { mut r, mut g, mut b } = self
            .channels
            .replace(Channels::default())
            .unwrap_or_default();

        normalize(&mut r);
        normalize(&mut g);
        normalize(&mut b);

        let frames = r.len();
        let max_width = self.settings.max_width as usize;
        let width = if max_width == 0 || frames <= max_width {
            frames
        } else {
            max_width
        };

        let mut row = Vec::with_capacity(width * 3);
        for i in 0..width {
            let start = i * frames / width;
            let end = ((i + 1) * frames / width).max(start + 1);
            let n = (end - start) as f32;
            for channel in [&r, &g, &b] {
                let sum: f32 = channel[start..end].iter().map(|v| v * 255.0).sum();
                row.push((sum / n) as u8);
            }
        }
        let pixels = row.repeat(self.settings.height as usize);

        log::info!(
            target: LOG_TARGET,
            "Rendered {} frames into a {}x{} moodbar",
            frames,
            width,
            self.settings.height
        );
        Ok(MoodImage {
            width: width as u32,
            height: self.settings.height,
            pixels,
        })
    }
}

/// Assign every bin of a `size`-sample window at `rate` to a bark band.
fn bark_table(size: usize, rate: u32) -> Vec<usize> {
    let mut band = 0;
    (0..num_freqs(size))
        .map(|bin| {
            if band < BARK_BANDS.len() - 1 && band_freq(bin, size, rate) as u32 >= BARK_BANDS[band] {
                band += 1;
            }
            band
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f32>, fallback: f32) -> f32 {
    let (sum, count) = values.fold((0.0f32, 0u32), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        fallback
    } else {
        sum / count as f32
    }
}

/// Map a channel into [0, 1] using a spread estimated from trimmed averages.
///
/// The extreme values are left out of the statistics. Groups that turn out
/// empty fall back to the enclosing average; non-finite values map to 0.
fn normalize(vals: &mut [f32]) {
    if vals.is_empty() {
        return;
    }
    let finite: Vec<f32> = vals.iter().copied().filter(|v| v.is_finite()).collect();
    let (lo, hi) = finite
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let interior: Vec<f32> = finite.into_iter().filter(|&v| v != lo && v != hi).collect();

    let total = vals.len() as f32;
    let avg: f32 = interior.iter().map(|v| v / total).sum();

    let avgu = mean(interior.iter().copied().filter(|&v| v > avg), avg);
    let avgb = mean(interior.iter().copied().filter(|&v| v <= avg), avg);
    let avguu = mean(interior.iter().copied().filter(|&v| v > avgu), avgu);
    let avgbb = mean(
        interior.iter().copied().filter(|&v| v <= avgu && v < avgb),
        avgb,
    );

    let mini = (avg + (avgb - avg) * 2.0).max(avgbb);
    let maxi = (avg + (avgu - avg) * 2.0).min(avguu);
    let delta = if maxi - mini == 0.0 { 1.0 } else { maxi - mini };

    for v in vals.iter_mut() {
        *v = if v.is_finite() {
            ((*v - mini) / delta).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

impl NegotiateFormat for MoodbarAnalyzer {
    fn negotiate(&mut self, caps: &Caps) -> StageResult<Caps> {
        caps.expect_kind(MediaKind::Spectrum)?;
        let rate = caps.rate().ok_or_else(|| {
            StageError::NegotiationRejected("caps field 'rate' is missing or not fixed".into())
        })?;
        let size = caps.size().filter(|&s| s > 0).ok_or_else(|| {
            StageError::NegotiationRejected("caps field 'size' is missing or not fixed".into())
        })?;

        self.bark_table = bark_table(size as usize, rate);
        log::debug!(
            target: LOG_TARGET,
            "Bark table for size={} at {} Hz: {} bins",
            size,
            rate,
            self.bark_table.len()
        );
        Ok(Caps::rgb_template())
    }
}

impl ProcessFrame for MoodbarAnalyzer {
    type Input = SpectralFrame;
    type Output = ();

    fn process(&mut self, frame: SpectralFrame) -> StageResult<()> {
        self.analyze(&frame)
    }
}

impl Lifecycle for MoodbarAnalyzer {
    fn state(&self) -> State {
        self.state
    }

    fn change_state(&mut self, transition: Transition) -> StageResult<()> {
        match transition {
            Transition::ReadyToActive => self.channels = Some(Channels::default()),
            Transition::ActiveToReady => self.channels = None,
            Transition::NullToReady | Transition::ReadyToNull => {}
        }
        log::debug!(target: LOG_TARGET, "{:?}", transition);
        self.state = transition.target();
        Ok(())
    }
}
