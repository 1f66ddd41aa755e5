//! Target analysis: reads the target at the transport position every tick and
//! emits a normalized feature with its loudness.

use std::rc::Rc;
use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::mailbox::Mailbox;
use super::transport::Transport;
use crate::audio::buffer::{rms, AudioBuffer};
use crate::audio::features::{CorpusStats, FeatureFrame};
use crate::audio::mfcc::{FeatureExtractor, MfccConfig};
use crate::scheduler::Tickable;
use crate::sync::clock::ClockSync;
use crate::sync::replication::ReplicationChannel;

/// Replication key the analyzer publishes its features under.
pub const FEATURE_KEY: &str = "analyzer:feature";

#[derive(Clone, Debug, PartialEq)]
pub struct AnalyzerParams {
    pub period: f64,
    pub jitter: f64,
    pub loop_start: f64,
    /// `None` loops over the whole target.
    pub loop_end: Option<f64>,
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        Self {
            period: 0.05,
            jitter: 0.004,
            loop_start: 0.0,
            loop_end: None,
        }
    }
}

/// Where emitted features go. Fire-and-forget either way.
pub enum FeatureSink {
    Local(Mailbox<FeatureFrame>),
    Remote {
        channel: Rc<dyn ReplicationChannel>,
        key: String,
    },
}

impl FeatureSink {
    fn emit(&self, frame: FeatureFrame) {
        match self {
            FeatureSink::Local(mailbox) => {
                mailbox.put(frame);
            }
            FeatureSink::Remote { channel, key } => match frame.to_payload() {
                Ok(payload) => channel.set(key, payload),
                Err(e) => log::warn!("Analyzer: could not encode feature: {}", e),
            },
        }
    }
}

pub struct AnalyzerEngine {
    extractor: FeatureExtractor,
    /// The corpus-side analysis the extractor is retuned from for each target rate.
    analysis: MfccConfig,
    stats: Option<CorpusStats>,
    target: Option<Arc<AudioBuffer>>,
    transport: Transport,
    params: AnalyzerParams,
    running: bool,
    sink: FeatureSink,
    clock: Box<dyn ClockSync>,
    rng: SmallRng,
}

impl AnalyzerEngine {
    pub fn new(
        extractor: FeatureExtractor,
        params: AnalyzerParams,
        sink: FeatureSink,
        clock: Box<dyn ClockSync>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let transport = Transport::new(params.loop_start, params.loop_end.unwrap_or(params.loop_start));
        let mut engine = Self {
            analysis: extractor.config().clone(),
            extractor,
            stats: None,
            target: None,
            transport,
            params: AnalyzerParams::default(),
            running: false,
            sink,
            clock,
            rng,
        };
        engine.set_period(params.period);
        engine.set_jitter(params.jitter);
        engine.params.loop_start = params.loop_start;
        engine.params.loop_end = params.loop_end;
        engine
    }

    pub fn start(&mut self) {
        self.transport.reset();
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn position(&self) -> f64 {
        self.transport.position()
    }

    pub fn set_stats(&mut self, stats: CorpusStats) {
        if stats.dims() != self.extractor.nbr_coefs() {
            log::warn!(
                "Analyzer: stats have {} dims, extractor produces {}",
                stats.dims(),
                self.extractor.nbr_coefs()
            );
        }
        self.stats = Some(stats);
    }

    /// A target at another sample rate than the corpus gets its own extractor,
    /// so its mel bands line up with the corpus features.
    pub fn set_target(&mut self, target: Arc<AudioBuffer>) {
        if target.sample_rate != self.extractor.config().sample_rate {
            self.retune(target.sample_rate);
        }
        self.target = Some(target);
        self.apply_loop();
    }

    fn retune(&mut self, sample_rate: u32) {
        let config = self.analysis.at_sample_rate(sample_rate);
        if config.max_freq < self.analysis.max_freq {
            log::warn!(
                "Analyzer: {}Hz target stops at {} Hz, corpus bands reach {} Hz",
                sample_rate,
                config.max_freq,
                self.analysis.max_freq
            );
        }
        match FeatureExtractor::new(config) {
            Ok(extractor) => {
                log::info!(
                    "Analyzer: {}Hz target analyzed with {}-sample frames",
                    sample_rate,
                    extractor.frame_size()
                );
                self.extractor = extractor;
            }
            Err(e) => log::warn!("Analyzer: cannot analyze at {}Hz: {}", sample_rate, e),
        }
    }

    pub fn set_period(&mut self, period: f64) {
        self.params.period = if period.is_finite() { period.max(0.001) } else { 0.001 };
    }

    pub fn set_jitter(&mut self, jitter: f64) {
        self.params.jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
    }

    /// Takes effect at the next wrap check; an in-flight position is not moved.
    pub fn set_loop(&mut self, loop_start: f64, loop_end: Option<f64>) {
        self.params.loop_start = loop_start;
        self.params.loop_end = loop_end;
        self.apply_loop();
    }

    fn apply_loop(&mut self) {
        let full = self.target.as_ref().map_or(0.0, |t| t.duration());
        let end = self.params.loop_end.unwrap_or(full);
        self.transport.set_loop(self.params.loop_start, end);
    }

    fn analyze(&self, target: &AudioBuffer, stats: &CorpusStats, time: f64) -> FeatureFrame {
        let frame = target.frame_at_time(self.transport.position(), self.extractor.frame_size());
        let mut feature = self.extractor.extract(&frame);
        stats.normalize(&mut feature);
        FeatureFrame {
            feature,
            loudness: stats.loudness(rms(&frame)),
            time: self.clock.to_shared_time(time),
        }
    }
}

impl Tickable for AnalyzerEngine {
    fn tick(&mut self, time: f64) -> anyhow::Result<Option<f64>> {
        if self.running {
            if let (Some(target), Some(stats)) = (self.target.as_ref(), self.stats.as_ref()) {
                let frame = self.analyze(target, stats, time);
                log::debug!(
                    "Analyzer: pos {:.3}s loudness {:.3}",
                    self.transport.position(),
                    frame.loudness
                );
                self.sink.emit(frame);

                let jitter = if self.params.jitter > 0.0 {
                    self.rng.random_range(-0.5..0.5) * self.params.jitter
                } else {
                    0.0
                };
                self.transport.advance(self.params.period + jitter);
            }
        }
        Ok(Some(time + self.params.period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mfcc::MfccConfig;
    use crate::sync::clock::ManualClock;
    use crate::sync::replication::LocalChannel;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(MfccConfig {
            frame_size: 256,
            ..MfccConfig::for_sample_rate(8000)
        })
        .unwrap()
    }

    fn stats() -> CorpusStats {
        CorpusStats {
            mean: vec![0.0; 12],
            std: vec![1.0; 12],
            min_rms: 0.0,
            max_rms: 1.0,
        }
    }

    fn ramp_target() -> Arc<AudioBuffer> {
        let samples = (0..8000).map(|i| (i as f32 / 8000.0) * ((i as f32) * 0.3).sin()).collect();
        Arc::new(AudioBuffer::new(samples, 8000))
    }

    fn analyzer(params: AnalyzerParams, sink: FeatureSink) -> AnalyzerEngine {
        AnalyzerEngine::new(extractor(), params, sink, Box::new(ManualClock::new(0.0)), Some(9))
    }

    #[test]
    fn emits_and_advances_while_running() {
        let mailbox = Mailbox::new();
        let mut engine = analyzer(
            AnalyzerParams {
                jitter: 0.0,
                ..AnalyzerParams::default()
            },
            FeatureSink::Local(mailbox.clone()),
        );
        engine.set_target(ramp_target());
        engine.set_stats(stats());

        assert_eq!(engine.tick(0.0).unwrap(), Some(0.05));
        assert!(mailbox.take().is_none());

        engine.start();
        engine.tick(0.0).unwrap();
        let frame = mailbox.take().unwrap();
        assert_eq!(frame.feature.len(), 12);
        assert!(frame.loudness >= 0.0 && frame.loudness <= 1.0);
        assert!((engine.position() - 0.05).abs() < 1e-12);

        engine.stop();
        engine.tick(0.05).unwrap();
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn start_resets_to_loop_start() {
        let mut engine = analyzer(
            AnalyzerParams {
                jitter: 0.0,
                loop_start: 0.25,
                ..AnalyzerParams::default()
            },
            FeatureSink::Local(Mailbox::new()),
        );
        engine.set_target(ramp_target());
        engine.set_stats(stats());
        engine.start();
        for i in 0..5 {
            engine.tick(i as f64 * 0.05).unwrap();
        }
        assert!((engine.position() - 0.5).abs() < 1e-9);
        engine.start();
        assert_eq!(engine.position(), 0.25);
    }

    #[test]
    fn missing_stats_or_target_is_a_no_op() {
        let mailbox = Mailbox::new();
        let mut engine = analyzer(AnalyzerParams::default(), FeatureSink::Local(mailbox.clone()));
        engine.start();
        assert_eq!(engine.tick(1.0).unwrap(), Some(1.05));
        engine.set_target(ramp_target());
        let next = engine.tick(1.05).unwrap().unwrap();
        assert!((next - 1.1).abs() < 1e-12);
        assert!(mailbox.take().is_none());
        assert_eq!(engine.position(), 0.0);
    }

    #[test]
    fn jittered_position_stays_in_loop() {
        let mut engine = analyzer(
            AnalyzerParams {
                period: 0.03,
                jitter: 0.5,
                loop_start: 0.2,
                loop_end: Some(0.6),
            },
            FeatureSink::Local(Mailbox::new()),
        );
        engine.set_target(ramp_target());
        engine.set_stats(stats());
        engine.start();
        let mut t = 0.0;
        for _ in 0..2000 {
            t = engine.tick(t).unwrap().unwrap();
            let p = engine.position();
            assert!((0.2..0.6).contains(&p), "{p}");
        }
    }

    #[test]
    fn loop_change_waits_for_the_next_wrap() {
        let mut engine = analyzer(
            AnalyzerParams {
                jitter: 0.0,
                ..AnalyzerParams::default()
            },
            FeatureSink::Local(Mailbox::new()),
        );
        engine.set_target(ramp_target());
        engine.set_stats(stats());
        engine.start();
        let mut t = 0.0;
        while engine.position() <= 0.8 {
            t = engine.tick(t).unwrap().unwrap();
        }

        let before = engine.position();
        engine.set_loop(0.2, Some(0.4));
        assert_eq!(engine.position(), before);

        engine.tick(t).unwrap();
        let p = engine.position();
        assert!((0.2..0.4).contains(&p), "{p}");
        assert!((p - (before + 0.05 - 0.6)).abs() < 1e-9);
    }

    #[test]
    fn target_at_another_rate_gets_a_retuned_extractor() {
        let mailbox = Mailbox::new();
        let mut engine = analyzer(AnalyzerParams::default(), FeatureSink::Local(mailbox.clone()));
        let samples = (0..16000).map(|i| (i as f32 * 0.2).sin()).collect();
        engine.set_target(Arc::new(AudioBuffer::new(samples, 16000)));
        assert_eq!(engine.extractor.config().sample_rate, 16000);
        assert_eq!(engine.extractor.frame_size(), 512);
        assert_eq!(engine.extractor.config().max_freq, 4000.0);

        engine.set_stats(stats());
        engine.start();
        engine.tick(0.0).unwrap();
        assert_eq!(mailbox.take().unwrap().feature.len(), 12);

        engine.set_target(ramp_target());
        assert_eq!(engine.extractor.frame_size(), 256);
    }

    #[test]
    fn silent_target_has_zero_loudness() {
        let mailbox = Mailbox::new();
        let mut engine = analyzer(AnalyzerParams::default(), FeatureSink::Local(mailbox.clone()));
        engine.set_target(Arc::new(AudioBuffer::new(vec![0.0; 4000], 8000)));
        engine.set_stats(CorpusStats {
            min_rms: 0.0,
            max_rms: 0.0,
            ..stats()
        });
        engine.start();
        for i in 0..10 {
            engine.tick(i as f64).unwrap();
            assert_eq!(mailbox.take().unwrap().loudness, 0.0);
        }
    }

    #[test]
    fn remote_sink_publishes_shared_time() {
        let channel = LocalChannel::new();
        let sink = FeatureSink::Remote {
            channel: Rc::new(channel.clone()),
            key: FEATURE_KEY.to_string(),
        };
        let mut engine = AnalyzerEngine::new(
            extractor(),
            AnalyzerParams::default(),
            sink,
            Box::new(ManualClock::new(10.0)),
            Some(1),
        );
        engine.set_target(ramp_target());
        engine.set_stats(stats());
        engine.start();
        engine.tick(2.0).unwrap();

        let payload = channel.get(FEATURE_KEY).unwrap();
        let frame = FeatureFrame::from_payload(&payload).unwrap();
        assert_eq!(frame.time, 12.0);
    }
}
