//! Fixed stage chains driven by the `moodbar` binary.
//!
//! A pipeline negotiates its stages in stream order, brings them up through
//! the lifecycle together, pushes sample blocks through, and tears them
//! down when the stream is finished.

use crate::analyzer::{MoodImage, MoodbarAnalyzer, MoodbarSettings};
use crate::error::{StageError, StageResult};
use crate::spectrum::{
    BandTable, Caps, EqualizerHandle, ForwardSpectrum, InverseSpectrum, Lifecycle,
    NegotiateFormat, Preset, ProcessFrame, SampleBlock, SpectralFrame, SpectrumEq,
    SpectrumSettings, State, StreamFormat,
};

const LOG_TARGET: &str = "moodbar::pipeline";

#[derive(Clone, Debug, PartialEq)]
pub enum EqualizerSettings {
    Preset(Preset),
    Bands(Vec<f32>),
}

impl EqualizerSettings {
    fn table(&self) -> StageResult<BandTable> {
        match self {
            EqualizerSettings::Preset(p) => Ok(BandTable::preset(*p)),
            EqualizerSettings::Bands(b) => BandTable::new(b),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineSettings {
    pub spectrum: SpectrumSettings,
    /// No equalizer stage is inserted when unset
    pub equalizer: Option<EqualizerSettings>,
    pub moodbar: MoodbarSettings,
}

fn build_equalizer(settings: &Option<EqualizerSettings>) -> StageResult<Option<SpectrumEq>> {
    settings
        .as_ref()
        .map(|eq| -> StageResult<SpectrumEq> {
            let stage = SpectrumEq::new();
            stage.handle().set_table(eq.table()?);
            Ok(stage)
        })
        .transpose()
}

fn set_all(stages: &mut [&mut dyn Lifecycle], target: State) -> StageResult<()> {
    for stage in stages.iter_mut() {
        stage.set_state(target)?;
    }
    Ok(())
}

fn equalize(eq: &mut Option<SpectrumEq>, frame: SpectralFrame) -> StageResult<SpectralFrame> {
    match eq {
        Some(eq) => eq.process(frame),
        None => Ok(frame),
    }
}

/// Signal -> spectrum -> (equalizer) -> moodbar image.
pub struct AnalysisPipeline {
    forward: ForwardSpectrum,
    equalizer: Option<SpectrumEq>,
    analyzer: MoodbarAnalyzer,
    format: Option<StreamFormat>,
}

impl AnalysisPipeline {
    pub fn new(settings: &PipelineSettings) -> StageResult<Self> {
        let mut analyzer = MoodbarAnalyzer::default();
        analyzer.set_height(settings.moodbar.height)?;
        analyzer.set_max_width(settings.moodbar.max_width);
        Ok(Self {
            forward: ForwardSpectrum::new(settings.spectrum),
            equalizer: build_equalizer(&settings.equalizer)?,
            analyzer,
            format: None,
        })
    }

    /// Handle for live band changes, when an equalizer is in the chain.
    pub fn equalizer(&self) -> Option<EqualizerHandle> {
        self.equalizer.as_ref().map(SpectrumEq::handle)
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    fn stages(&mut self) -> Vec<&mut dyn Lifecycle> {
        let mut stages: Vec<&mut dyn Lifecycle> = Vec::with_capacity(3);
        stages.push(&mut self.forward);
        if let Some(eq) = self.equalizer.as_mut() {
            stages.push(eq);
        }
        stages.push(&mut self.analyzer);
        stages
    }

    /// Negotiate every stage for a signal at `rate` and make them active.
    pub fn start(&mut self, rate: u32) -> StageResult<()> {
        set_all(&mut self.stages(), State::Ready)?;

        let mut caps = self.forward.negotiate(&Caps::signal(rate))?;
        let format = caps.stream_format()?;
        if let Some(eq) = self.equalizer.as_mut() {
            caps = eq.negotiate(&caps)?;
        }
        self.analyzer.negotiate(&caps)?;

        set_all(&mut self.stages(), State::Active)?;
        log::info!(
            target: LOG_TARGET,
            "Analysis started: {} Hz, size={}, step={}",
            format.rate,
            format.size,
            format.step
        );
        self.format = Some(format);
        Ok(())
    }

    pub fn push(&mut self, block: SampleBlock) -> StageResult<()> {
        for frame in self.forward.process(block)? {
            let frame = equalize(&mut self.equalizer, frame)?;
            self.analyzer.process(frame)?;
        }
        Ok(())
    }

    /// Frames analysed so far in this stream.
    pub fn frame_count(&self) -> usize {
        self.analyzer.frame_count()
    }

    /// Render the moodbar and shut every stage down.
    pub fn finish(&mut self) -> StageResult<MoodImage> {
        let image = self.analyzer.finish()?;
        set_all(&mut self.stages(), State::Null)?;
        self.format = None;
        Ok(image)
    }
}

/// Signal -> spectrum -> (equalizer) -> signal.
pub struct ResynthesisPipeline {
    forward: ForwardSpectrum,
    equalizer: Option<SpectrumEq>,
    inverse: InverseSpectrum,
    format: Option<StreamFormat>,
}

impl ResynthesisPipeline {
    pub fn new(settings: &PipelineSettings) -> StageResult<Self> {
        let mut inverse = InverseSpectrum::new();
        inverse.set_hi_quality(settings.spectrum.hi_quality);
        Ok(Self {
            forward: ForwardSpectrum::new(settings.spectrum),
            equalizer: build_equalizer(&settings.equalizer)?,
            inverse,
            format: None,
        })
    }

    pub fn equalizer(&self) -> Option<EqualizerHandle> {
        self.equalizer.as_ref().map(SpectrumEq::handle)
    }

    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    fn stages(&mut self) -> Vec<&mut dyn Lifecycle> {
        let mut stages: Vec<&mut dyn Lifecycle> = Vec::with_capacity(3);
        stages.push(&mut self.forward);
        if let Some(eq) = self.equalizer.as_mut() {
            stages.push(eq);
        }
        stages.push(&mut self.inverse);
        stages
    }

    pub fn start(&mut self, rate: u32) -> StageResult<()> {
        set_all(&mut self.stages(), State::Ready)?;

        let mut caps = self.forward.negotiate(&Caps::signal(rate))?;
        let format = caps.stream_format()?;
        if let Some(eq) = self.equalizer.as_mut() {
            caps = eq.negotiate(&caps)?;
        }
        let out = self.inverse.negotiate(&caps)?;
        if out.rate() != Some(rate) {
            return Err(StageError::NegotiationRejected(format!(
                "reconstructed rate {:?} differs from input rate {}",
                out.rate(),
                rate
            )));
        }

        set_all(&mut self.stages(), State::Active)?;
        log::info!(
            target: LOG_TARGET,
            "Resynthesis started: {} Hz, size={}, step={}",
            format.rate,
            format.size,
            format.step
        );
        self.format = Some(format);
        Ok(())
    }

    /// Push samples through; returns the blocks reconstructed so far.
    pub fn push(&mut self, block: SampleBlock) -> StageResult<Vec<SampleBlock>> {
        self.forward
            .process(block)?
            .into_iter()
            .map(|frame| {
                let frame = equalize(&mut self.equalizer, frame)?;
                self.inverse.process(frame)
            })
            .collect()
    }

    pub fn finish(&mut self) -> StageResult<()> {
        set_all(&mut self.stages(), State::Null)?;
        self.format = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, freq: f32, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn small(equalizer: Option<EqualizerSettings>) -> PipelineSettings {
        PipelineSettings {
            spectrum: SpectrumSettings {
                size: 64,
                step: 32,
                hi_quality: true,
            },
            equalizer,
            moodbar: MoodbarSettings::default(),
        }
    }

    #[test]
    fn analysis_renders_one_pixel_per_frame() {
        let mut pipeline = AnalysisPipeline::new(&small(None)).unwrap();
        pipeline.start(8000).unwrap();
        assert_eq!(pipeline.format().map(|f| f.num_freqs()), Some(33));

        let samples = sine(64 * 10, 440.0, 8000);
        for chunk in samples.chunks(100) {
            pipeline.push(SampleBlock::new(chunk.to_vec())).unwrap();
        }
        // windows start every 32 samples while 64 remain
        assert_eq!(pipeline.frame_count(), 19);

        let image = pipeline.finish().unwrap();
        assert_eq!(image.width, 19);
        assert_eq!(image.pixels.len(), 19 * 3);
        assert!(pipeline.format().is_none());
    }

    #[test]
    fn analysis_can_run_twice() {
        let mut pipeline = AnalysisPipeline::new(&small(Some(EqualizerSettings::Preset(
            Preset::Medium,
        ))))
        .unwrap();
        for _ in 0..2 {
            pipeline.start(8000).unwrap();
            pipeline.push(SampleBlock::new(sine(128, 300.0, 8000))).unwrap();
            assert_eq!(pipeline.finish().unwrap().width, 3);
        }
    }

    #[test]
    fn invalid_bands_are_rejected_up_front() {
        let settings = small(Some(EqualizerSettings::Bands(vec![1.0, f32::NAN])));
        assert!(matches!(
            AnalysisPipeline::new(&settings),
            Err(StageError::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn resynthesis_with_unity_equalizer_reproduces_input() {
        let mut settings = small(Some(EqualizerSettings::Bands(vec![1.0])));
        settings.spectrum.step = 64;
        let mut pipeline = ResynthesisPipeline::new(&settings).unwrap();
        pipeline.start(8000).unwrap();

        let input = sine(64 * 4, 440.0, 8000);
        let blocks = pipeline.push(SampleBlock::new(input.clone())).unwrap();
        let output: Vec<f32> = blocks.into_iter().flat_map(|b| b.samples).collect();

        assert_eq!(output.len(), input.len());
        for (a, b) in input.iter().zip(&output) {
            assert!((a - b).abs() < 1e-4);
        }
        pipeline.finish().unwrap();
    }

    #[test]
    fn equalizer_handle_mutes_resynthesis() {
        let mut settings = small(Some(EqualizerSettings::Bands(vec![1.0])));
        settings.spectrum.step = 64;
        let mut pipeline = ResynthesisPipeline::new(&settings).unwrap();
        pipeline.start(8000).unwrap();

        pipeline.equalizer().unwrap().set_bands(&[0.0]).unwrap();
        let blocks = pipeline.push(SampleBlock::new(sine(128, 440.0, 8000))).unwrap();
        assert!(blocks.iter().flat_map(|b| &b.samples).all(|s| *s == 0.0));
    }

    #[test]
    fn resynthesis_rejects_step_above_size() {
        let mut settings = small(None);
        settings.spectrum.step = 128;
        let mut pipeline = ResynthesisPipeline::new(&settings).unwrap();
        assert!(matches!(
            pipeline.start(8000),
            Err(StageError::NegotiationRejected(_))
        ));
    }
}
