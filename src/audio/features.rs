use serde::{Deserialize, Serialize};

/// One MFCC vector, raw or normalized.
pub type FeatureVector = Vec<f32>;

/// Per-dimension mean/std plus the loudness range of a corpus.
///
/// Built once by the corpus indexer and shared with the analyzer so that the
/// target is normalized with the same statistics as the source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
    pub min_rms: f32,
    pub max_rms: f32,
}

impl CorpusStats {
    /// Mean and population standard deviation per dimension.
    pub fn from_frames(features: &[FeatureVector], rms: &[f32]) -> Self {
        let dims = features.first().map_or(0, Vec::len);
        let count = features.len().max(1) as f64;

        let mut mean = vec![0.0f64; dims];
        for v in features {
            for (m, &x) in mean.iter_mut().zip(v) {
                *m += x as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= count);

        let mut var = vec![0.0f64; dims];
        for v in features {
            for ((acc, &x), m) in var.iter_mut().zip(v).zip(&mean) {
                let d = x as f64 - m;
                *acc += d * d;
            }
        }

        let (min_rms, max_rms) = if rms.is_empty() {
            (0.0, 0.0)
        } else {
            rms.iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &r| (lo.min(r), hi.max(r)))
        };

        Self {
            mean: mean.iter().map(|&m| m as f32).collect(),
            std: var.iter().map(|&v| (v / count).sqrt() as f32).collect(),
            min_rms,
            max_rms,
        }
    }

    pub fn dims(&self) -> usize {
        self.mean.len()
    }

    /// `(x - mean) / std` in place; dimensions with zero spread collapse to 0.
    pub fn normalize(&self, vector: &mut [f32]) {
        for ((x, &m), &s) in vector.iter_mut().zip(&self.mean).zip(&self.std) {
            *x = if s > 0.0 { (*x - m) / s } else { 0.0 };
        }
    }

    /// Rescale a frame RMS into `[0, 1]` against the corpus loudness range.
    pub fn loudness(&self, rms: f32) -> f32 {
        let range = self.max_rms - self.min_rms;
        if self.max_rms <= 0.0 || range <= 0.0 {
            return 0.0;
        }
        ((rms - self.min_rms) / range).clamp(0.0, 1.0)
    }

    pub fn has_degenerate_dims(&self) -> bool {
        self.std.iter().any(|&s| s <= 0.0)
    }
}

/// What the analyzer emits each tick and the synth consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Normalized MFCC vector.
    pub feature: FeatureVector,
    /// Loudness in `[0, 1]`.
    pub loudness: f32,
    /// Logical (shared) time of emission.
    pub time: f64,
}

impl FeatureFrame {
    pub fn to_payload(&self) -> crate::error::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_payload(value: &serde_json::Value) -> crate::error::Result<Self> {
        Ok(Self::deserialize(value)?)
    }
}
