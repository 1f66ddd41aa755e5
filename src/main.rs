mod cli;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use cli::Cli;
use config::Config;
use mosaic::audio::buffer::AudioBuffer;
use mosaic::audio::decode::decode_audio;
use mosaic::audio::mfcc::MfccConfig;
use mosaic::encode::wav::write_wav;
use mosaic::engine::analyzer::AnalyzerParams;
use mosaic::engine::grain::OfflineRenderer;
use mosaic::engine::synth::SynthParams;
use mosaic::session::{Node, Role, SessionConfig};
use mosaic::sync::clock::{ClockSync, ManualClock};
use mosaic::sync::replication::LocalChannel;

/// Simulated time step of the offline render loop.
const RENDER_STEP: f64 = 0.005;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect mosaic.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("mosaic.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("mosaic").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("mosaic").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });

    let cfg = match config_path {
        Some(ref path) => match config::load_config(path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };
    merge_config(&mut cli, &cfg);

    log::info!("mosaic - concatenative synthesis");
    log::info!("Source: {}", cli.source.display());
    log::info!("Target: {}", cli.target.display());
    log::info!("Output: {}", cli.output.display());

    // 1. Decode both files
    let source = Arc::new(decode_audio(&cli.source)?);
    let target = Arc::new(decode_audio(&cli.target)?);
    if source.sample_rate != target.sample_rate {
        log::warn!(
            "Source is {}Hz but target is {}Hz; the target is analyzed with frames of the same duration",
            source.sample_rate,
            target.sample_rate
        );
    }

    // 2. Session parameters
    let session = session_config(&cli, &cfg, &source, &target)?;
    let duration = cli.duration.unwrap_or_else(|| target.duration());
    log::info!(
        "Render {:.1}s: period={:.3}s grain={:.3}s/{:.3}s k={} split={}",
        duration,
        session.analyzer.period,
        session.synth.grain_period,
        session.synth.grain_duration,
        session.synth.randomizer,
        cli.split
    );

    // 3. Run the session offline
    let renderer = Rc::new(RefCell::new(OfflineRenderer::new(source.sample_rate, duration)));
    if cli.split {
        render_split(session, &source, &target, &renderer, duration, cfg.session.clock_offset)?;
    } else {
        render_standalone(session, &source, &target, &renderer, duration)?;
    }

    // 4. Write the result
    let renderer = Rc::try_unwrap(renderer)
        .map_err(|_| anyhow::anyhow!("Renderer still in use after session end"))?
        .into_inner();
    log::info!("Triggered {} grains", renderer.grain_count());
    let sample_rate = renderer.sample_rate();
    write_wav(&cli.output, &renderer.into_output(), sample_rate)?;

    log::info!("Done! Output: {}", cli.output.display());
    Ok(())
}

/// Config values apply only where the CLI was left at its default.
fn merge_config(cli: &mut Cli, cfg: &Config) {
    if cli.period == 0.05 { cli.period = cfg.analyzer.period; }
    if cli.jitter == 0.004 { cli.jitter = cfg.analyzer.jitter; }
    if cli.grain_period == 0.05 { cli.grain_period = cfg.synth.grain_period; }
    if cli.grain_duration == 0.2 { cli.grain_duration = cfg.synth.grain_duration; }
    if cli.randomizer == 1 { cli.randomizer = cfg.synth.randomizer; }
    if cli.detune == 0.0 { cli.detune = cfg.synth.detune; }
    if cli.volume_db == 0.0 { cli.volume_db = cfg.synth.volume_db; }
    if cli.seed.is_none() { cli.seed = cfg.session.seed; }
    if cli.duration.is_none() { cli.duration = cfg.session.duration; }
    if !cli.split { cli.split = cfg.session.split; }
    if !cli.loop_grains { cli.loop_grains = cfg.synth.loop_grains; }
    if !cli.no_loudness_scale { cli.no_loudness_scale = !cfg.synth.scale_with_loudness; }
}

fn session_config(
    cli: &Cli,
    cfg: &Config,
    source: &AudioBuffer,
    target: &AudioBuffer,
) -> Result<SessionConfig> {
    let analysis = &cfg.analysis;
    // Mel bands must sit at the same frequencies on both sides.
    let nyquist = source.sample_rate.min(target.sample_rate) as f32 / 2.0;
    let mfcc = MfccConfig {
        frame_size: analysis.frame_size,
        sample_rate: source.sample_rate,
        nbr_bands: analysis.nbr_bands,
        nbr_coefs: analysis.nbr_coefs,
        min_freq: analysis.min_freq,
        max_freq: analysis.max_freq.map_or(nyquist, |f| f.min(nyquist)),
    };
    mfcc.validate().context("Invalid [analysis] settings")?;

    Ok(SessionConfig {
        mfcc,
        hop_size: analysis.hop_size,
        analyzer: AnalyzerParams {
            period: cli.period,
            jitter: cli.jitter,
            loop_start: cfg.analyzer.loop_start,
            loop_end: cfg.analyzer.loop_end,
        },
        synth: SynthParams {
            volume_db: cli.volume_db,
            detune: cli.detune,
            grain_period: cli.grain_period,
            grain_duration: cli.grain_duration,
            randomizer: cli.randomizer,
            onset_jitter: cfg.synth.onset_jitter,
            scale_with_loudness: !cli.no_loudness_scale,
            loop_grains: cli.loop_grains,
        },
        seed: cli.seed,
    })
}

fn progress_bar(duration: f64) -> ProgressBar {
    let pb = ProgressBar::new((duration * 1000.0).ceil() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ms ({eta} remaining)")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb
}

fn render_standalone(
    session: SessionConfig,
    source: &Arc<AudioBuffer>,
    target: &Arc<AudioBuffer>,
    renderer: &Rc<RefCell<OfflineRenderer>>,
    duration: f64,
) -> Result<()> {
    let node = Node::new(
        Role::Standalone {
            player: Box::new(renderer.clone()),
        },
        session,
        ManualClock::new(0.0),
    )?;

    log::info!("Indexing source...");
    node.load_source(Arc::clone(source));
    node.wait_for_corpus()?;
    node.set_target(Arc::clone(target));

    let start = node.start_synced(0.0);
    renderer.borrow_mut().set_origin(start);

    let pb = progress_bar(duration);
    let mut t = start;
    while t <= start + duration {
        node.advance_to(t);
        pb.set_position(((t - start) * 1000.0) as u64);
        t += RENDER_STEP;
    }
    pb.finish_with_message("Rendering complete");
    node.stop();
    Ok(())
}

/// Analyzer and synth on separate nodes with skewed clocks, linked only by
/// the replication channel and the shared timeline.
fn render_split(
    session: SessionConfig,
    source: &Arc<AudioBuffer>,
    target: &Arc<AudioBuffer>,
    renderer: &Rc<RefCell<OfflineRenderer>>,
    duration: f64,
    clock_offset: f64,
) -> Result<()> {
    let channel = LocalChannel::new();
    let loop_length = match session.analyzer.loop_end {
        Some(end) => end - session.analyzer.loop_start,
        None => target.duration() - session.analyzer.loop_start,
    };

    let analyzer = Node::new(
        Role::Analyzer {
            channel: Rc::new(channel.clone()),
        },
        session.clone(),
        ManualClock::new(0.0),
    )?;
    let synth = Node::new(
        Role::Synth {
            channel: Rc::new(channel.clone()),
            player: Box::new(renderer.clone()),
        },
        session,
        ManualClock::new(clock_offset),
    )?;

    log::info!("Indexing source on the synth node...");
    synth.load_source(Arc::clone(source));
    synth.wait_for_corpus()?;
    analyzer.set_target(Arc::clone(target));
    // Ship the corpus stats to the analyzer before anything starts.
    channel.flush();

    // Both nodes look at the same shared instant, each through its own clock.
    let mut shared = loop_length.max(0.0) * 0.5;
    analyzer.advance_to(analyzer.clock().to_local_time(shared));
    synth.advance_to(synth.clock().to_local_time(shared));

    analyzer.start_synced(loop_length);
    let synth_start = synth.start_synced(loop_length);
    let shared_start = synth.clock().to_shared_time(synth_start);
    renderer.borrow_mut().set_origin(synth_start);

    let pb = progress_bar(duration);
    while shared <= shared_start + duration {
        analyzer.advance_to(analyzer.clock().to_local_time(shared));
        channel.flush();
        synth.advance_to(synth.clock().to_local_time(shared));
        pb.set_position(((shared - shared_start).max(0.0) * 1000.0) as u64);
        shared += RENDER_STEP;
    }
    pb.finish_with_message("Rendering complete");
    analyzer.stop();
    synth.stop();
    Ok(())
}
