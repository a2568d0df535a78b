use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cli::{Cli, DEFAULT_HEIGHT, DEFAULT_MAX_WIDTH, DEFAULT_SIZE, DEFAULT_STEP};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub moodbar: MoodbarConfig,
    #[serde(default)]
    pub equalizer: EqualizerConfig,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_size")]
    pub size: u32,
    #[serde(default = "default_step")]
    pub step: u32,
    #[serde(default = "default_hiquality")]
    pub hiquality: bool,
}

#[derive(Debug, Deserialize)]
pub struct MoodbarConfig {
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct EqualizerConfig {
    pub preset: Option<String>,
    #[serde(default)]
    pub bands: Vec<f32>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            step: default_step(),
            hiquality: default_hiquality(),
        }
    }
}

impl Default for MoodbarConfig {
    fn default() -> Self {
        Self {
            height: default_height(),
            max_width: default_max_width(),
        }
    }
}

fn default_size() -> u32 { DEFAULT_SIZE }
fn default_step() -> u32 { DEFAULT_STEP }
fn default_hiquality() -> bool { true }
fn default_height() -> u32 { DEFAULT_HEIGHT }
fn default_max_width() -> u32 { DEFAULT_MAX_WIDTH }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Ignoring invalid config {}: {}", path.display(), e);
            None
        }
    }
}

/// Explicit `--config`, then `./moodbar.toml`, then the user config directory.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("moodbar.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("moodbar").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("moodbar").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Config values apply only where the CLI still holds its default.
pub fn merge(cli: &mut Cli, cfg: Config) {
    if cli.size == DEFAULT_SIZE {
        cli.size = cfg.analysis.size;
    }
    if cli.step == DEFAULT_STEP {
        cli.step = cfg.analysis.step;
    }
    if !cli.low_quality {
        cli.low_quality = !cfg.analysis.hiquality;
    }
    if cli.height == DEFAULT_HEIGHT {
        cli.height = cfg.moodbar.height;
    }
    if cli.max_width == DEFAULT_MAX_WIDTH {
        cli.max_width = cfg.moodbar.max_width;
    }
    if cli.preset.is_none() && cli.bands.is_empty() {
        cli.preset = cfg.equalizer.preset;
        if cli.preset.is_none() {
            cli.bands = cfg.equalizer.bands;
        }
    }
}
