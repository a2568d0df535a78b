mod cli;
mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::process::ExitCode;
use std::time::SystemTime;

use cli::Cli;
use moodbar::analyzer::MoodbarSettings;
use moodbar::audio::{decode_audio, WavSink};
use moodbar::pipeline::{
    AnalysisPipeline, EqualizerSettings, PipelineSettings, ResynthesisPipeline,
};
use moodbar::spectrum::{BandTable, Preset, SpectrumSettings};

/// Runs allowed while the input keeps changing underneath us
const MAX_TRIES: usize = 10;

/// Samples fed to the pipelines per push
const BLOCK_LEN: usize = 4096;

const EXIT_SUCCESS: u8 = 0;
const EXIT_NO_FILE: u8 = 2;
const EXIT_COMMAND_LINE: u8 = 3;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_COMMAND_LINE } else { EXIT_SUCCESS };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    if let Some(path) = config::find_config(cli.config.as_deref()) {
        if let Some(cfg) = config::load_config(&path) {
            log::info!("Loaded config from {}", path.display());
            config::merge(&mut cli, cfg);
        }
    }

    let Some(output) = cli.output.clone() else {
        log::error!("Please specify an output .mood file");
        return ExitCode::from(EXIT_COMMAND_LINE);
    };
    let Some(input) = cli.input.clone() else {
        log::error!("Please specify a file to analyze");
        return ExitCode::from(EXIT_COMMAND_LINE);
    };

    let settings = match pipeline_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{:#}", e);
            return ExitCode::from(EXIT_COMMAND_LINE);
        }
    };

    ExitCode::from(analyze_with_retries(
        &input,
        &output,
        cli.resynth.as_deref(),
        &settings,
    ))
}

fn pipeline_settings(cli: &Cli) -> Result<PipelineSettings> {
    if cli.size == 0 || cli.step == 0 {
        bail!("--size and --step must be positive");
    }
    if cli.height == 0 {
        bail!("--height must be at least 1");
    }

    let equalizer = match &cli.preset {
        Some(name) => Some(EqualizerSettings::Preset(name.parse::<Preset>()?)),
        None if !cli.bands.is_empty() => {
            BandTable::new(&cli.bands).context("Invalid --bands")?;
            Some(EqualizerSettings::Bands(cli.bands.clone()))
        }
        None => None,
    };

    Ok(PipelineSettings {
        spectrum: SpectrumSettings {
            size: cli.size,
            step: cli.step,
            hi_quality: !cli.low_quality,
        },
        equalizer,
        moodbar: MoodbarSettings {
            height: cli.height,
            max_width: cli.max_width,
        },
    })
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Re-run the analysis while the input's modification time changes during a run.
fn analyze_with_retries(
    input: &Path,
    output: &Path,
    resynth: Option<&Path>,
    settings: &PipelineSettings,
) -> u8 {
    for attempt in 1..=MAX_TRIES {
        let Some(before) = modified(input) else {
            log::error!("Cannot access {}", input.display());
            return EXIT_NO_FILE;
        };

        let code = match run(input, output, resynth, settings) {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                log::error!("Analysis failed: {:#}", e);
                let _ = std::fs::remove_file(output);
                if let Some(path) = resynth {
                    let _ = std::fs::remove_file(path);
                }
                EXIT_NO_FILE
            }
        };

        if modified(input) == Some(before) {
            return code;
        }
        log::warn!(
            "{} changed during analysis, retrying ({}/{})",
            input.display(),
            attempt,
            MAX_TRIES
        );
    }

    log::error!(
        "{} was modified {} times during analysis, giving up",
        input.display(),
        MAX_TRIES
    );
    EXIT_NO_FILE
}

fn run(
    input: &Path,
    output: &Path,
    resynth: Option<&Path>,
    settings: &PipelineSettings,
) -> Result<()> {
    log::info!("Analyzing file {}", input.display());
    let audio = decode_audio(input)?;
    if audio.samples.is_empty() {
        bail!("{} contains no audio", input.display());
    }
    let rate = audio.sample_rate;

    let mut analysis = AnalysisPipeline::new(settings)?;
    analysis.start(rate)?;

    let mut resynthesis = match resynth {
        Some(path) => {
            let mut pipeline = ResynthesisPipeline::new(settings)?;
            pipeline.start(rate)?;
            Some((pipeline, WavSink::create(path, rate)?))
        }
        None => None,
    };

    let total = audio.samples.len().div_ceil(BLOCK_LEN) as u64;
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} blocks ({eta} remaining)")
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );

    for (i, block) in audio.blocks(BLOCK_LEN).enumerate() {
        if let Some((pipeline, sink)) = resynthesis.as_mut() {
            for out in pipeline.push(block.clone())? {
                sink.write_block(&out)?;
            }
        }
        analysis.push(block)?;
        pb.set_position(i as u64 + 1);
    }
    pb.finish_with_message("Analysis complete");

    let image = analysis.finish()?;
    if image.is_empty() {
        bail!(
            "{} is too short to analyze ({} samples)",
            input.display(),
            audio.samples.len()
        );
    }
    std::fs::write(output, &image.pixels)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    log::info!(
        "Wrote {}x{} moodbar to {}",
        image.width,
        image.height,
        output.display()
    );

    if let Some((mut pipeline, sink)) = resynthesis {
        pipeline.finish()?;
        log::info!("Wrote {} resynthesized samples", sink.written());
        sink.finalize()?;
    }
    Ok(())
}
