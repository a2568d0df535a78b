use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_SIZE: u32 = 2048;
pub const DEFAULT_STEP: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 1;
pub const DEFAULT_MAX_WIDTH: u32 = 1000;

#[derive(Parser, Debug)]
#[command(name = "moodbar", about = "Analyze an audio file into a moodbar (.mood) file")]
pub struct Cli {
    /// The file to analyze
    pub input: Option<PathBuf>,

    /// The output .mood file (raw RGB24 rows)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file (defaults to ./moodbar.toml or the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Transform window size in samples
    #[arg(long, default_value_t = DEFAULT_SIZE)]
    pub size: u32,

    /// Hop between transform windows in samples
    #[arg(long, default_value_t = DEFAULT_STEP)]
    pub step: u32,

    /// Compute transforms in single precision
    #[arg(long)]
    pub low_quality: bool,

    /// Image height in rows
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    pub height: u32,

    /// Maximum image width (0 for one pixel per frame)
    #[arg(long, default_value_t = DEFAULT_MAX_WIDTH)]
    pub max_width: u32,

    /// Equalizer preset applied before analysis (low, medium, high)
    #[arg(long, conflicts_with = "bands")]
    pub preset: Option<String>,

    /// Equalizer band gains (comma-separated)
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub bands: Vec<f32>,

    /// Also write the reconstructed (equalized) signal to this WAV file
    #[arg(long)]
    pub resynth: Option<PathBuf>,
}
