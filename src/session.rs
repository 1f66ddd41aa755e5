//! Wiring of analyzer, synth, scheduler and clock for one node.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::audio::buffer::AudioBuffer;
use crate::audio::features::{CorpusStats, FeatureFrame};
use crate::audio::mfcc::{FeatureExtractor, MfccConfig};
use crate::engine::analyzer::{AnalyzerEngine, AnalyzerParams, FeatureSink, FEATURE_KEY};
use crate::engine::grain::GrainPlayer;
use crate::engine::synth::{SynthEngine, SynthParams};
use crate::error::Result;
use crate::scheduler::{Scheduler, TickableRef};
use crate::sync::clock::{next_loop_boundary, ClockSync, ManualClock};
use crate::sync::replication::ReplicationChannel;

/// Replication key the synth side publishes its corpus stats under.
pub const STATS_KEY: &str = "corpus:stats";

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub mfcc: MfccConfig,
    pub hop_size: usize,
    pub analyzer: AnalyzerParams,
    pub synth: SynthParams,
    pub seed: Option<u64>,
}

/// What a node does, with the collaborators that role needs.
pub enum Role {
    /// Analyzer and synth on one node, linked by a local mailbox.
    Standalone { player: Box<dyn GrainPlayer> },
    /// Analyzer only; features go out over the channel, stats come in.
    Analyzer { channel: Rc<dyn ReplicationChannel> },
    /// Synth only; features come in over the channel, stats go out.
    Synth {
        channel: Rc<dyn ReplicationChannel>,
        player: Box<dyn GrainPlayer>,
    },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Standalone { .. } => "standalone",
            Role::Analyzer { .. } => "analyzer",
            Role::Synth { .. } => "synth",
        }
    }
}

pub struct Node {
    name: &'static str,
    config: SessionConfig,
    clock: ManualClock,
    scheduler: Rc<RefCell<Scheduler>>,
    analyzer: Option<Rc<RefCell<AnalyzerEngine>>>,
    synth: Option<Rc<RefCell<SynthEngine>>>,
}

impl Node {
    pub fn new(role: Role, config: SessionConfig, clock: ManualClock) -> Result<Self> {
        let name = role.name();
        let mut node = Self {
            name,
            config,
            clock,
            scheduler: Rc::new(RefCell::new(Scheduler::new())),
            analyzer: None,
            synth: None,
        };

        match role {
            Role::Standalone { player } => {
                let synth = node.build_synth(player);
                let sink = FeatureSink::Local(synth.borrow().input());
                let analyzer = node.build_analyzer(sink)?;

                let target = Rc::clone(&analyzer);
                synth
                    .borrow_mut()
                    .on_corpus(move |stats| target.borrow_mut().set_stats(stats.clone()));

                node.analyzer = Some(analyzer);
                node.synth = Some(synth);
            }
            Role::Analyzer { channel } => {
                let sink = FeatureSink::Remote {
                    channel: Rc::clone(&channel),
                    key: FEATURE_KEY.to_string(),
                };
                let analyzer = node.build_analyzer(sink)?;

                let target = Rc::clone(&analyzer);
                channel.subscribe(Box::new(move |updates| {
                    for (key, value) in updates {
                        if key != STATS_KEY {
                            continue;
                        }
                        match serde_json::from_value::<CorpusStats>(value.clone()) {
                            Ok(stats) => target.borrow_mut().set_stats(stats),
                            Err(e) => log::warn!("Analyzer: ignoring malformed stats: {}", e),
                        }
                    }
                }));
                node.analyzer = Some(analyzer);
            }
            Role::Synth { channel, player } => {
                let synth = node.build_synth(player);

                let inbox = synth.borrow().input();
                let clock = node.clock.clone();
                channel.subscribe(Box::new(move |updates| {
                    for (key, value) in updates {
                        if key != FEATURE_KEY {
                            continue;
                        }
                        match FeatureFrame::from_payload(value) {
                            Ok(frame) => {
                                log::debug!(
                                    "Synth: feature relayed after {:.3}s",
                                    clock.shared_time() - frame.time
                                );
                                inbox.put(frame);
                            }
                            Err(e) => log::warn!("Synth: ignoring malformed feature: {}", e),
                        }
                    }
                }));

                let outbound = Rc::clone(&channel);
                synth.borrow_mut().on_corpus(move |stats| match serde_json::to_value(stats) {
                    Ok(value) => outbound.set(STATS_KEY, value),
                    Err(e) => log::warn!("Synth: could not publish stats: {}", e),
                });
                node.synth = Some(synth);
            }
        }

        log::info!("Node '{}' ready", name);
        Ok(node)
    }

    fn build_analyzer(&self, sink: FeatureSink) -> Result<Rc<RefCell<AnalyzerEngine>>> {
        let extractor = FeatureExtractor::new(self.config.mfcc.clone())?;
        Ok(Rc::new(RefCell::new(AnalyzerEngine::new(
            extractor,
            self.config.analyzer.clone(),
            sink,
            Box::new(self.clock.clone()),
            self.config.seed,
        ))))
    }

    fn build_synth(&self, player: Box<dyn GrainPlayer>) -> Rc<RefCell<SynthEngine>> {
        // Offset the seed so analyzer and synth draw different sequences.
        let seed = self.config.seed.map(|s| s.wrapping_add(1));
        Rc::new(RefCell::new(SynthEngine::new(self.config.synth.clone(), player, seed)))
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn analyzer(&self) -> Option<&Rc<RefCell<AnalyzerEngine>>> {
        self.analyzer.as_ref()
    }

    pub fn synth(&self) -> Option<&Rc<RefCell<SynthEngine>>> {
        self.synth.as_ref()
    }

    /// Begin indexing a new source in the background (synth-bearing roles only).
    pub fn load_source(&self, source: Arc<AudioBuffer>) {
        if let Some(synth) = &self.synth {
            synth
                .borrow_mut()
                .load_source(self.config.mfcc.clone(), source, self.config.hop_size);
        }
    }

    /// Block until the background index is ready.
    pub fn wait_for_corpus(&self) -> Result<()> {
        match &self.synth {
            Some(synth) => synth.borrow_mut().wait_for_corpus(),
            None => Ok(()),
        }
    }

    pub fn set_target(&self, target: Arc<AudioBuffer>) {
        if let Some(analyzer) = &self.analyzer {
            analyzer.borrow_mut().set_target(target);
        }
    }

    /// Register the engines and start them at the next multiple of
    /// `loop_length` on the shared clock, so independently clocked nodes
    /// start together. Returns the local start time.
    pub fn start_synced(&self, loop_length: f64) -> f64 {
        let boundary = next_loop_boundary(self.clock.shared_time(), loop_length);
        let local_start = self.clock.to_local_time(boundary);
        log::info!(
            "Node '{}': start at shared {:.3}s (local {:.3}s)",
            self.name,
            boundary,
            local_start
        );

        let mut scheduler = self.scheduler.borrow_mut();
        if let Some(analyzer) = &self.analyzer {
            let engine = Rc::clone(analyzer);
            scheduler.defer(move |_| engine.borrow_mut().start(), local_start);
            let tickable: TickableRef = analyzer.clone();
            scheduler.add(tickable, local_start);
        }
        if let Some(synth) = &self.synth {
            let engine = Rc::clone(synth);
            scheduler.defer(move |_| engine.borrow_mut().start(), local_start);
            let tickable: TickableRef = synth.clone();
            scheduler.add(tickable, local_start);
        }
        local_start
    }

    /// Stop emitting/playing. Engines stay scheduled; state is reset on the next start.
    pub fn stop(&self) {
        if let Some(analyzer) = &self.analyzer {
            analyzer.borrow_mut().stop();
        }
        if let Some(synth) = &self.synth {
            synth.borrow_mut().stop();
        }
        log::info!("Node '{}' stopped", self.name);
    }

    /// Move this node's local clock to `local_time` and run everything due.
    pub fn advance_to(&self, local_time: f64) -> usize {
        self.clock.set(local_time);
        self.scheduler.borrow_mut().advance_to(local_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::grain::{Grain, OfflineRenderer};
    use crate::sync::replication::LocalChannel;

    /// Renders like the offline player and keeps every grain for inspection.
    struct Recording {
        renderer: OfflineRenderer,
        grains: Vec<Grain>,
    }

    impl Recording {
        fn new(sample_rate: u32, duration: f64) -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self {
                renderer: OfflineRenderer::new(sample_rate, duration),
                grains: Vec::new(),
            }))
        }
    }

    impl GrainPlayer for Recording {
        fn play(&mut self, grain: &Grain, source: &AudioBuffer) {
            self.grains.push(grain.clone());
            self.renderer.play(grain, source);
        }
    }

    const SAMPLE_RATE: u32 = 8000;
    const HOP: usize = 256;

    fn config(jitter: f64) -> SessionConfig {
        SessionConfig {
            mfcc: MfccConfig {
                frame_size: 512,
                ..MfccConfig::for_sample_rate(SAMPLE_RATE)
            },
            hop_size: HOP,
            analyzer: AnalyzerParams {
                period: HOP as f64 / SAMPLE_RATE as f64,
                jitter,
                loop_start: 0.0,
                loop_end: None,
            },
            synth: SynthParams {
                onset_jitter: 0.0,
                grain_period: HOP as f64 / SAMPLE_RATE as f64,
                ..SynthParams::default()
            },
            seed: Some(17),
        }
    }

    /// Gliding tone with a slow amplitude swell: every hop sounds different.
    fn glide() -> Arc<AudioBuffer> {
        let len = SAMPLE_RATE as usize * 2;
        let mut phase = 0.0f32;
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                phase += 2.0 * std::f32::consts::PI * (150.0 + 1500.0 * t) / SAMPLE_RATE as f32;
                (0.2 + 0.3 * t) * phase.sin() + 0.05 * (phase * 3.7).sin()
            })
            .collect();
        Arc::new(AudioBuffer::new(samples, SAMPLE_RATE))
    }

    fn run(node: &Node, until: f64, step: f64) {
        let mut t = 0.0;
        while t <= until {
            node.advance_to(t);
            t += step;
        }
    }

    #[test]
    fn source_equal_to_target_retraces_transport() {
        let recording = Recording::new(SAMPLE_RATE, 3.0);
        let node = Node::new(
            Role::Standalone {
                player: Box::new(recording.clone()),
            },
            config(0.0),
            ManualClock::new(0.0),
        )
        .unwrap();

        let buffer = glide();
        node.load_source(buffer.clone());
        node.wait_for_corpus().unwrap();
        node.set_target(buffer.clone());
        let start = node.start_synced(0.0);
        assert_eq!(start, 0.0);
        run(&node, 1.5, 0.01);

        let recording = recording.borrow();
        let grains = &recording.grains;
        assert!(grains.len() > 40);

        let period = HOP as f64 / SAMPLE_RATE as f64;
        let hop_time = HOP as f64 / SAMPLE_RATE as f64;
        let duration = buffer.duration();
        for (i, grain) in grains.iter().enumerate() {
            let expected = (i as f64 * period) % duration;
            assert!(
                (grain.source_offset - expected).abs() <= hop_time + 1e-9,
                "grain {i}: offset {} vs transport {}",
                grain.source_offset,
                expected
            );
        }
    }

    #[test]
    fn silent_corpus_plays_silently() {
        let recording = Recording::new(SAMPLE_RATE, 1.0);
        let node = Node::new(
            Role::Standalone {
                player: Box::new(recording.clone()),
            },
            config(0.004),
            ManualClock::new(0.0),
        )
        .unwrap();
        let silence = Arc::new(AudioBuffer::new(vec![0.0; 100], SAMPLE_RATE));
        node.load_source(silence.clone());
        node.wait_for_corpus().unwrap();
        node.set_target(silence);
        node.start_synced(0.0);
        run(&node, 0.5, 0.01);

        let recording = recording.borrow();
        assert!(!recording.grains.is_empty());
        assert!(recording.grains.iter().all(|g| g.gain == 0.0));
        assert!(recording.renderer.output().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn split_nodes_relay_over_the_channel() {
        let channel = LocalChannel::new();
        let recording = Recording::new(SAMPLE_RATE, 3.0);

        let analyzer_clock = ManualClock::new(50.0);
        let synth_clock = ManualClock::new(50.3);
        let analyzer = Node::new(
            Role::Analyzer {
                channel: Rc::new(channel.clone()),
            },
            config(0.0),
            analyzer_clock,
        )
        .unwrap();
        let synth = Node::new(
            Role::Synth {
                channel: Rc::new(channel.clone()),
                player: Box::new(recording.clone()),
            },
            config(0.0),
            synth_clock,
        )
        .unwrap();

        let buffer = glide();
        synth.load_source(buffer.clone());
        synth.wait_for_corpus().unwrap();
        analyzer.set_target(buffer);
        channel.flush();
        assert!(channel.get(STATS_KEY).is_some());

        // Bring both nodes to shared time 50.5 before arming the start.
        analyzer.advance_to(analyzer.clock().to_local_time(50.5));
        synth.advance_to(synth.clock().to_local_time(50.5));

        let a_start = analyzer.start_synced(1.0);
        let s_start = synth.start_synced(1.0);
        // Both wait for shared time 51.0.
        assert!((a_start - 1.0).abs() < 1e-9);
        assert!((s_start - 0.7).abs() < 1e-9);

        let mut shared = 50.5;
        while shared < 52.0 {
            analyzer.advance_to(analyzer.clock().to_local_time(shared));
            channel.flush();
            synth.advance_to(synth.clock().to_local_time(shared));
            shared += 0.01;
        }

        assert!(analyzer.analyzer().unwrap().borrow().is_running());
        assert!(synth.synth().unwrap().borrow().is_running());
        let recording = recording.borrow();
        assert!(!recording.grains.is_empty());
        assert!(recording.grains.iter().all(|g| g.onset_time >= s_start));
    }

    /// Band-limited harmonic tone, partials up to 7.9 kHz at 1/h amplitude.
    fn harmonic_tone(fundamental: f64, sample_rate: u32, seconds: f64) -> Vec<f32> {
        let partials = (7900.0 / fundamental) as usize;
        let len = (seconds * sample_rate as f64) as usize;
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                let sum: f64 = (1..=partials)
                    .map(|h| (2.0 * std::f64::consts::PI * fundamental * h as f64 * t).sin() / h as f64)
                    .sum();
                (0.3 * sum) as f32
            })
            .collect()
    }

    #[test]
    fn target_at_another_sample_rate_finds_the_matching_source_half() {
        let config = SessionConfig {
            mfcc: MfccConfig {
                frame_size: 512,
                ..MfccConfig::for_sample_rate(16000)
            },
            hop_size: 256,
            analyzer: AnalyzerParams {
                period: 0.05,
                jitter: 0.0,
                loop_start: 0.0,
                loop_end: None,
            },
            synth: SynthParams {
                onset_jitter: 0.0,
                ..SynthParams::default()
            },
            seed: Some(3),
        };
        let recording = Recording::new(16000, 1.0);
        let node = Node::new(
            Role::Standalone {
                player: Box::new(recording.clone()),
            },
            config,
            ManualClock::new(0.0),
        )
        .unwrap();

        // First second one tone, second second another, both at 16 kHz.
        let mut source = harmonic_tone(125.0, 16000, 1.0);
        source.extend(harmonic_tone(200.0, 16000, 1.0));
        node.load_source(Arc::new(AudioBuffer::new(source, 16000)));
        node.wait_for_corpus().unwrap();

        // The target is the second tone, recorded at 32 kHz.
        node.set_target(Arc::new(AudioBuffer::new(harmonic_tone(200.0, 32000, 2.0), 32000)));
        node.start_synced(0.0);
        run(&node, 0.8, 0.01);

        let recording = recording.borrow();
        assert!(recording.grains.len() >= 15);
        for grain in &recording.grains {
            assert!(grain.source_offset > 0.95, "grain from {:.3}s", grain.source_offset);
        }
    }
}
