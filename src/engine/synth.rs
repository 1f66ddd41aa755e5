//! Reactive grain synth: turns the latest analyzed feature into one grain per tick.

use std::sync::Arc;

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::grain::{db_to_gain, Grain, GrainPlayer};
use super::mailbox::Mailbox;
use crate::audio::analysis::{Corpus, CorpusIndexer, PendingCorpus};
use crate::audio::buffer::AudioBuffer;
use crate::audio::features::{CorpusStats, FeatureFrame};
use crate::audio::mfcc::MfccConfig;
use crate::scheduler::Tickable;

const MIN_GRAIN_PERIOD: f64 = 0.001;
const MAX_GRAIN_DURATION: f64 = 10.0;

/// Live-updatable synth settings. Changes apply from the next grain on.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthParams {
    pub volume_db: f32,
    pub detune: f32,
    pub grain_period: f64,
    pub grain_duration: f64,
    /// How many nearest neighbors to choose from; 1 is plain nearest match.
    pub randomizer: usize,
    /// Upper bound of the random onset delay, in seconds.
    pub onset_jitter: f64,
    pub scale_with_loudness: bool,
    pub loop_grains: bool,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            volume_db: 0.0,
            detune: 0.0,
            grain_period: 0.05,
            grain_duration: 0.2,
            randomizer: 1,
            onset_jitter: 0.004,
            scale_with_loudness: true,
            loop_grains: false,
        }
    }
}

type CorpusListener = Box<dyn FnMut(&CorpusStats)>;

pub struct SynthEngine {
    params: SynthParams,
    running: bool,
    corpus: Option<Corpus>,
    pending: Option<PendingCorpus>,
    input: Mailbox<FeatureFrame>,
    latest: Option<FeatureFrame>,
    player: Box<dyn GrainPlayer>,
    on_corpus: Option<CorpusListener>,
    rng: SmallRng,
}

impl SynthEngine {
    pub fn new(params: SynthParams, player: Box<dyn GrainPlayer>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let mut engine = Self {
            params: SynthParams::default(),
            running: false,
            corpus: None,
            pending: None,
            input: Mailbox::new(),
            latest: None,
            player,
            on_corpus: None,
            rng,
        };
        engine.set_params(params);
        engine
    }

    /// The slot analyzed features are delivered to.
    pub fn input(&self) -> Mailbox<FeatureFrame> {
        self.input.clone()
    }

    /// Called with the corpus stats whenever a new corpus is swapped in.
    pub fn on_corpus(&mut self, listener: impl FnMut(&CorpusStats) + 'static) {
        self.on_corpus = Some(Box::new(listener));
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_params(&mut self, params: SynthParams) {
        self.params = params;
        self.set_grain_period(self.params.grain_period);
        self.set_grain_duration(self.params.grain_duration);
        self.set_randomizer(self.params.randomizer);
        self.set_onset_jitter(self.params.onset_jitter);
    }

    pub fn set_volume(&mut self, db: f32) {
        self.params.volume_db = db;
    }

    pub fn set_detune(&mut self, cents: f32) {
        self.params.detune = cents;
    }

    pub fn set_grain_period(&mut self, period: f64) {
        self.params.grain_period = if period.is_finite() {
            period.max(MIN_GRAIN_PERIOD)
        } else {
            MIN_GRAIN_PERIOD
        };
    }

    pub fn set_grain_duration(&mut self, duration: f64) {
        self.params.grain_duration = if duration.is_finite() {
            duration.clamp(0.0, MAX_GRAIN_DURATION)
        } else {
            0.0
        };
    }

    pub fn set_randomizer(&mut self, k: usize) {
        self.params.randomizer = k.max(1);
    }

    pub fn set_onset_jitter(&mut self, jitter: f64) {
        self.params.onset_jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
    }

    pub fn corpus(&self) -> Option<&Corpus> {
        self.corpus.as_ref()
    }

    /// Swap in a complete corpus, replacing the previous one wholesale.
    pub fn set_corpus(&mut self, corpus: Corpus) {
        if corpus.index.is_empty() {
            log::warn!("Synth: corpus has no entries; the synth stays silent");
        }
        log::info!(
            "Synth: corpus ready ({} entries, {:.1}s of source)",
            corpus.index.len(),
            corpus.buffer.duration()
        );
        if let Some(listener) = self.on_corpus.as_mut() {
            listener(&corpus.stats);
        }
        self.corpus = Some(corpus);
    }

    /// Start analyzing a new source in the background. The current corpus
    /// keeps playing until the new one is complete.
    pub fn load_source(&mut self, config: MfccConfig, buffer: Arc<AudioBuffer>, hop_size: usize) {
        self.pending = Some(CorpusIndexer::spawn(config, buffer, hop_size));
    }

    /// Block until a pending build finishes and swap it in.
    pub fn wait_for_corpus(&mut self) -> crate::error::Result<()> {
        if let Some(pending) = self.pending.take() {
            let corpus = pending.wait()?;
            self.set_corpus(corpus);
        }
        Ok(())
    }

    fn poll_pending(&mut self) {
        let Some(result) = self.pending.as_ref().and_then(PendingCorpus::try_take) else {
            return;
        };
        self.pending = None;
        match result {
            Ok(corpus) => self.set_corpus(corpus),
            Err(e) => log::warn!("Synth: corpus build failed: {}", e),
        }
    }

    /// Pick a corpus entry for the latest feature and build its grain.
    fn select_grain(&mut self, time: f64) -> Option<Grain> {
        let corpus = self.corpus.as_ref()?;
        let frame = self.latest.as_ref()?;

        if frame.feature.len() != corpus.index.dims() {
            log::debug!(
                "Synth: feature has {} dims, corpus has {}",
                frame.feature.len(),
                corpus.index.dims()
            );
            return None;
        }

        let neighbors = corpus.index.nearest(&frame.feature, self.params.randomizer);
        if neighbors.is_empty() {
            return None;
        }
        let choice = neighbors[self.rng.random_range(0..neighbors.len())];
        let source_offset = corpus.index.offset(choice.index)?;

        let loudness = if self.params.scale_with_loudness { frame.loudness } else { 1.0 };
        let jitter = if self.params.onset_jitter > 0.0 {
            self.rng.random_range(0.0..self.params.onset_jitter)
        } else {
            0.0
        };

        Some(Grain {
            source_offset,
            duration: self.params.grain_duration,
            gain: db_to_gain(self.params.volume_db) * loudness,
            detune_cents: self.params.detune,
            onset_time: time + jitter,
            looped: self.params.loop_grains,
        })
    }
}

impl Tickable for SynthEngine {
    fn tick(&mut self, time: f64) -> anyhow::Result<Option<f64>> {
        self.poll_pending();
        if let Some(frame) = self.input.take() {
            self.latest = Some(frame);
        }

        if self.running {
            if let Some(grain) = self.select_grain(time) {
                log::debug!(
                    "Synth: grain at {:.3}s from offset {:.3}s, gain {:.3}",
                    grain.onset_time,
                    grain.source_offset,
                    grain.gain
                );
                if let Some(corpus) = self.corpus.as_ref() {
                    self.player.play(&grain, &corpus.buffer);
                }
            }
        }

        Ok(Some(time + self.params.grain_period))
    }
}
