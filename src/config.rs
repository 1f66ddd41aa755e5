use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub synth: SynthConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    #[serde(default = "default_nbr_bands")]
    pub nbr_bands: usize,
    #[serde(default = "default_nbr_coefs")]
    pub nbr_coefs: usize,
    #[serde(default)]
    pub min_freq: f32,
    /// Nyquist of the source when unset.
    #[serde(default)]
    pub max_freq: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_period")]
    pub period: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default)]
    pub loop_start: f64,
    #[serde(default)]
    pub loop_end: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SynthConfig {
    #[serde(default)]
    pub volume_db: f32,
    #[serde(default)]
    pub detune: f32,
    #[serde(default = "default_period")]
    pub grain_period: f64,
    #[serde(default = "default_grain_duration")]
    pub grain_duration: f64,
    #[serde(default = "default_randomizer")]
    pub randomizer: usize,
    #[serde(default = "default_jitter")]
    pub onset_jitter: f64,
    #[serde(default = "default_true")]
    pub scale_with_loudness: bool,
    #[serde(default)]
    pub loop_grains: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionSettings {
    /// Run analyzer and synth as two networked nodes.
    #[serde(default)]
    pub split: bool,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Simulated skew between the two nodes' clocks, in seconds.
    #[serde(default)]
    pub clock_offset: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            hop_size: default_hop_size(),
            nbr_bands: default_nbr_bands(),
            nbr_coefs: default_nbr_coefs(),
            min_freq: 0.0,
            max_freq: None,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            jitter: default_jitter(),
            loop_start: 0.0,
            loop_end: None,
        }
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            volume_db: 0.0,
            detune: 0.0,
            grain_period: default_period(),
            grain_duration: default_grain_duration(),
            randomizer: default_randomizer(),
            onset_jitter: default_jitter(),
            scale_with_loudness: true,
            loop_grains: false,
        }
    }
}

fn default_frame_size() -> usize { 1024 }
fn default_hop_size() -> usize { 512 }
fn default_nbr_bands() -> usize { 24 }
fn default_nbr_coefs() -> usize { 12 }
fn default_period() -> f64 { 0.05 }
fn default_jitter() -> f64 { 0.004 }
fn default_grain_duration() -> f64 { 0.2 }
fn default_randomizer() -> usize { 1 }
fn default_true() -> bool { true }

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}
