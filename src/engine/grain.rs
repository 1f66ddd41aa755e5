use std::cell::RefCell;
use std::rc::Rc;

use crate::audio::buffer::AudioBuffer;

/// A single playback instruction, created per trigger and then discarded.
#[derive(Clone, Debug, PartialEq)]
pub struct Grain {
    /// Where to start reading the source, in seconds.
    pub source_offset: f64,
    pub duration: f64,
    /// Peak of the triangular envelope.
    pub gain: f32,
    pub detune_cents: f32,
    /// When the grain starts sounding, in the synth node's local time.
    pub onset_time: f64,
    /// Wrap to the source start instead of running into silence at its end.
    pub looped: bool,
}

impl Grain {
    /// Resampling ratio for the detune.
    pub fn playback_rate(&self) -> f64 {
        2f64.powf(self.detune_cents as f64 / 1200.0)
    }

    /// Envelope gain at `t` seconds into the grain.
    pub fn envelope(&self, t: f64) -> f32 {
        triangle_envelope(t, self.duration) * self.gain
    }
}

/// Symmetric triangle: 0 -> 1 over the first half, 1 -> 0 over the second.
pub fn triangle_envelope(t: f64, duration: f64) -> f32 {
    if !(duration > 0.0) || t < 0.0 || t > duration {
        return 0.0;
    }
    let half = duration / 2.0;
    let level = if t <= half { t / half } else { (duration - t) / half };
    level as f32
}

pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Playback side of the audio buffer provider: start a grain of `source`.
pub trait GrainPlayer {
    fn play(&mut self, grain: &Grain, source: &AudioBuffer);
}

impl<T: GrainPlayer> GrainPlayer for Rc<RefCell<T>> {
    fn play(&mut self, grain: &Grain, source: &AudioBuffer) {
        self.borrow_mut().play(grain, source);
    }
}

/// Mixes grains into a fixed-length output track. Whatever a grain would
/// play past the end of the track is dropped.
#[derive(Debug)]
pub struct OfflineRenderer {
    sample_rate: u32,
    /// Local time that maps to the first output sample.
    origin: f64,
    output: Vec<f32>,
    grain_count: usize,
}

impl OfflineRenderer {
    pub fn new(sample_rate: u32, duration: f64) -> Self {
        let len = (duration.max(0.0) * sample_rate as f64).ceil() as usize;
        Self {
            sample_rate,
            origin: 0.0,
            output: vec![0.0; len],
            grain_count: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_origin(&mut self, origin: f64) {
        self.origin = origin;
    }

    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// Grains played so far, including those that fell outside the track.
    pub fn grain_count(&self) -> usize {
        self.grain_count
    }

    pub fn into_output(self) -> Vec<f32> {
        self.output
    }
}

impl GrainPlayer for OfflineRenderer {
    fn play(&mut self, grain: &Grain, source: &AudioBuffer) {
        self.grain_count += 1;
        let onset = grain.onset_time - self.origin;
        if source.is_empty() || !(onset >= 0.0) {
            return;
        }

        let out_rate = self.sample_rate as f64;
        let start = (onset * out_rate).round() as usize;
        if start >= self.output.len() {
            return;
        }
        let len = (grain.duration * out_rate).round() as usize;
        let end = start.saturating_add(len).min(self.output.len());

        let step = grain.playback_rate() * source.sample_rate as f64 / out_rate;
        let source_len = source.len() as f64;
        let first = grain.source_offset * source.sample_rate as f64;

        for (i, out) in self.output[start..end].iter_mut().enumerate() {
            let mut pos = first + i as f64 * step;
            if grain.looped {
                pos = pos.rem_euclid(source_len);
            }
            let env = grain.envelope(i as f64 / out_rate);
            *out += source.read_interpolated(pos) * env;
        }
    }
}
