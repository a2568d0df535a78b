use rustfft::num_complex::Complex;
use std::time::Duration;

use super::caps::num_freqs;
use crate::error::{StageError, StageResult};

/// Timing metadata carried alongside every buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Sample offset of the first sample covered by the buffer
    pub offset: u64,
    /// Sample offset where the next buffer starts
    pub offset_end: u64,
    pub timestamp: Duration,
    pub duration: Duration,
}

/// Convert a sample count at `rate` into a stream time.
pub fn samples_to_duration(samples: u64, rate: u32) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * 1_000_000_000 / rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// One windowed transform: `size/2 + 1` complex bins.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralFrame {
    pub bins: Vec<Complex<f32>>,
    pub info: BufferInfo,
}

impl SpectralFrame {
    pub fn new(bins: Vec<Complex<f32>>) -> Self {
        Self {
            bins,
            info: BufferInfo::default(),
        }
    }

    /// A silent frame for a window of `size` samples.
    pub fn zeroed(size: usize) -> Self {
        Self::new(vec![Complex::new(0.0, 0.0); num_freqs(size)])
    }

    pub fn with_info(mut self, info: BufferInfo) -> Self {
        self.info = info;
        self
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Parse the wire layout: interleaved (re, im) native-endian `f32` pairs.
    pub fn from_bytes(bytes: &[u8], size: usize) -> StageResult<Self> {
        let expected = num_freqs(size) * 2 * std::mem::size_of::<f32>();
        if bytes.len() != expected {
            return Err(StageError::FrameSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let bins = bytes
            .chunks_exact(8)
            .map(|pair| {
                let re = f32::from_ne_bytes([pair[0], pair[1], pair[2], pair[3]]);
                let im = f32::from_ne_bytes([pair[4], pair[5], pair[6], pair[7]]);
                Complex::new(re, im)
            })
            .collect();
        Ok(Self::new(bins))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let flat: Vec<f32> = self.bins.iter().flat_map(|c| [c.re, c.im]).collect();
        bytemuck::cast_slice::<f32, u8>(&flat).to_vec()
    }
}

/// A block of mono samples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBlock {
    pub samples: Vec<f32>,
    pub info: BufferInfo,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            info: BufferInfo::default(),
        }
    }

    pub fn with_info(mut self, info: BufferInfo) -> Self {
        self.info = info;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice::<f32, u8>(&self.samples).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_have_exact_length() {
        let mut frame = SpectralFrame::zeroed(8);
        frame.bins[1] = Complex::new(1.5, -2.0);
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 5 * 8);

        let parsed = SpectralFrame::from_bytes(&bytes, 8).unwrap();
        assert_eq!(parsed.bins, frame.bins);
    }

    #[test]
    fn frame_bytes_reject_wrong_length() {
        let bytes = vec![0u8; 36];
        assert_eq!(
            SpectralFrame::from_bytes(&bytes, 8),
            Err(StageError::FrameSizeMismatch {
                expected: 40,
                actual: 36
            })
        );
    }

    #[test]
    fn sample_block_bytes() {
        let block = SampleBlock::new(vec![0.25; 6]);
        assert_eq!(block.to_bytes().len(), 24);
    }

    #[test]
    fn duration_from_samples() {
        assert_eq!(samples_to_duration(44100, 44100), Duration::from_secs(1));
        assert_eq!(samples_to_duration(512, 0), Duration::ZERO);
        assert_eq!(samples_to_duration(1, 1000), Duration::from_millis(1));
    }
}
