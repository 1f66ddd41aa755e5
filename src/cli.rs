use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mosaic", about = "Concatenative synthesis: resynthesize a target from grains of a source")]
pub struct Cli {
    /// Source audio file providing the grains (WAV, MP3, FLAC, OGG)
    pub source: PathBuf,

    /// Target audio file whose timbre is followed
    pub target: PathBuf,

    /// Output WAV file
    #[arg(short, long, default_value = "mosaic.wav")]
    pub output: PathBuf,

    /// Config file (defaults to ./mosaic.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seconds to render (defaults to the target duration)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Analyzer period in seconds
    #[arg(long, default_value_t = 0.05)]
    pub period: f64,

    /// Analyzer position jitter in seconds
    #[arg(long, default_value_t = 0.004)]
    pub jitter: f64,

    /// Seconds between grains
    #[arg(long, default_value_t = 0.05)]
    pub grain_period: f64,

    /// Grain length in seconds
    #[arg(long, default_value_t = 0.2)]
    pub grain_duration: f64,

    /// Choose among this many nearest corpus entries (1 = nearest match)
    #[arg(short = 'k', long, default_value_t = 1)]
    pub randomizer: usize,

    /// Grain detune in cents
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub detune: f32,

    /// Output volume in dB
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub volume_db: f32,

    /// Seed for reproducible jitter and neighbor choice
    #[arg(long)]
    pub seed: Option<u64>,

    /// Run analyzer and synth as two nodes linked by a replication channel
    #[arg(long)]
    pub split: bool,

    /// Ignore target loudness when setting grain gain
    #[arg(long)]
    pub no_loudness_scale: bool,

    /// Let grains that run past the source end wrap to its start
    #[arg(long)]
    pub loop_grains: bool,
}
