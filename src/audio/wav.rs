use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::spectrum::SampleBlock;

/// Streams reconstructed blocks into a 32-bit float mono WAV file.
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    written: u64,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
        Ok(Self { writer, written: 0 })
    }

    pub fn write_block(&mut self, block: &SampleBlock) -> Result<()> {
        for &sample in &block.samples {
            self.writer
                .write_sample(sample)
                .context("Failed to write sample")?;
        }
        self.written += block.len() as u64;
        Ok(())
    }

    /// Samples written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finalize(self) -> Result<()> {
        self.writer
            .finalize()
            .context("Failed to finalize WAV file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_float_mono() {
        let path = std::env::temp_dir().join(format!("moodbar-wav-{}.wav", std::process::id()));
        let mut sink = WavSink::create(&path, 8000).unwrap();
        sink.write_block(&SampleBlock::new(vec![0.25, -0.5])).unwrap();
        sink.write_block(&SampleBlock::new(vec![1.0])).unwrap();
        assert_eq!(sink.written(), 3);
        sink.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 8000);
        assert_eq!(spec.sample_format, SampleFormat::Float);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.25, -0.5, 1.0]);
        std::fs::remove_file(&path).unwrap();
    }
}
