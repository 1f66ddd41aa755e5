//! MFCC extraction: Hann window, power spectrum, HTK mel filterbank, DCT-II.
//!
//! The filter weights, window and DCT matrix are computed once in
//! [`FeatureExtractor::new`]; [`FeatureExtractor::extract`] is a pure
//! function of the configuration and the frame.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{MosaicError, Result};

/// Floor applied to near-zero band energies before taking the log.
const MIN_LOG_VALUE: f32 = 1e-48;
const MIN_LOG_DB: f32 = -480.0;

#[derive(Clone, Debug, PartialEq)]
pub struct MfccConfig {
    pub frame_size: usize,
    pub sample_rate: u32,
    pub nbr_bands: usize,
    pub nbr_coefs: usize,
    pub min_freq: f32,
    pub max_freq: f32,
}

impl MfccConfig {
    /// Defaults for a given sample rate: 1024-sample frames, 24 bands, 12 coefficients, full band.
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self {
            frame_size: 1024,
            sample_rate,
            nbr_bands: 24,
            nbr_coefs: 12,
            min_freq: 0.0,
            max_freq: sample_rate as f32 / 2.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_size < 2 || !self.frame_size.is_power_of_two() {
            return Err(MosaicError::InvalidFrameSize(self.frame_size));
        }
        if self.sample_rate == 0 {
            return Err(MosaicError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.nbr_bands == 0 || self.nbr_coefs == 0 {
            return Err(MosaicError::InvalidConfig(
                "band and coefficient counts must be positive".into(),
            ));
        }
        if self.nbr_coefs > self.nbr_bands {
            return Err(MosaicError::InvalidConfig(format!(
                "{} coefficients requested from {} bands",
                self.nbr_coefs, self.nbr_bands
            )));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if !(self.min_freq >= 0.0 && self.min_freq < self.max_freq && self.max_freq <= nyquist) {
            return Err(MosaicError::InvalidConfig(format!(
                "frequency range {}..{} Hz must lie within 0..{} Hz",
                self.min_freq, self.max_freq, nyquist
            )));
        }
        Ok(())
    }

    /// The same analysis at another sample rate: frames keep their duration
    /// (to the nearest power of two) and the band edges keep their frequencies,
    /// with `max_freq` capped at the new Nyquist.
    pub fn at_sample_rate(&self, sample_rate: u32) -> Self {
        if sample_rate == self.sample_rate || self.sample_rate == 0 {
            return Self {
                sample_rate,
                ..self.clone()
            };
        }
        let scaled = self.frame_size as f64 * sample_rate as f64 / self.sample_rate as f64;
        let exponent = scaled.max(2.0).log2().round() as u32;
        Self {
            frame_size: 1usize << exponent,
            sample_rate,
            max_freq: self.max_freq.min(sample_rate as f32 / 2.0),
            ..self.clone()
        }
    }
}

/// One triangular mel filter: a run of consecutive spectrum bins and their weights.
#[derive(Clone, Debug)]
struct MelBand {
    start_bin: usize,
    weights: Vec<f32>,
}

pub struct FeatureExtractor {
    config: MfccConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    bands: Vec<MelBand>,
    /// Row-major `nbr_coefs x nbr_bands`.
    dct: Vec<f32>,
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FeatureExtractor {
    /// Fails fast on a frame size that is not a power of two.
    pub fn new(config: MfccConfig) -> Result<Self> {
        config.validate()?;

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.frame_size);
        let window = power_normalized_hann(config.frame_size);
        let bands = mel_bands(&config);
        let dct = dct_weights(config.nbr_coefs, config.nbr_bands);

        Ok(Self {
            config,
            fft,
            window,
            bands,
            dct,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size
    }

    pub fn nbr_coefs(&self) -> usize {
        self.config.nbr_coefs
    }

    /// Compute the MFCC vector of one frame. Short frames are zero-padded at the tail,
    /// longer ones are truncated to the frame size.
    pub fn extract(&self, frame: &[f32]) -> Vec<f32> {
        let spectrum = self.power_spectrum(frame);
        let log_mel = self.log_mel(&spectrum);
        self.cepstrum(&log_mel)
    }

    fn power_spectrum(&self, frame: &[f32]) -> Vec<f32> {
        let n = self.config.frame_size;
        let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n];
        for (i, (&s, &w)) in frame.iter().zip(self.window.iter()).enumerate() {
            buffer[i] = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut buffer);

        let half = n / 2;
        let norm = 1.0 / (n as f32 * n as f32);
        (0..=half)
            .map(|k| {
                let p = buffer[k].norm_sqr() * norm;
                if k == 0 || k == half {
                    p
                } else {
                    2.0 * p
                }
            })
            .collect()
    }

    fn log_mel(&self, spectrum: &[f32]) -> Vec<f32> {
        let scale = self.config.nbr_bands as f32;
        self.bands
            .iter()
            .map(|band| {
                let energy: f32 = band
                    .weights
                    .iter()
                    .zip(&spectrum[band.start_bin..])
                    .map(|(w, p)| w * p)
                    .sum::<f32>()
                    * scale;
                if energy > MIN_LOG_VALUE {
                    10.0 * energy.log10()
                } else {
                    MIN_LOG_DB
                }
            })
            .collect()
    }

    fn cepstrum(&self, log_mel: &[f32]) -> Vec<f32> {
        let nbr_bands = self.config.nbr_bands;
        self.dct
            .chunks(nbr_bands)
            .map(|row| row.iter().zip(log_mel).map(|(w, v)| w * v).sum())
            .collect()
    }
}

/// Periodic Hann window scaled so that the windowed signal keeps its power.
fn power_normalized_hann(size: usize) -> Vec<f32> {
    let raw: Vec<f64> = (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos())
        .collect();
    let energy: f64 = raw.iter().map(|w| w * w).sum();
    let norm = (size as f64 / energy).sqrt();
    raw.iter().map(|w| (w * norm) as f32).collect()
}

pub fn hz_to_mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

fn mel_bands(config: &MfccConfig) -> Vec<MelBand> {
    let nbr_bins = config.frame_size / 2 + 1;
    let bin_hz = config.sample_rate as f32 / config.frame_size as f32;
    let min_mel = hz_to_mel(config.min_freq);
    let max_mel = hz_to_mel(config.max_freq);
    let step = (max_mel - min_mel) / (config.nbr_bands + 1) as f32;

    let edges: Vec<f32> = (0..config.nbr_bands + 2)
        .map(|i| mel_to_hz(min_mel + step * i as f32))
        .collect();

    (0..config.nbr_bands)
        .map(|b| {
            let (lo, center, hi) = (edges[b], edges[b + 1], edges[b + 2]);
            let mut start_bin = None;
            let mut weights = Vec::new();
            for k in 0..nbr_bins {
                let f = k as f32 * bin_hz;
                let w = if f > lo && f < center {
                    (f - lo) / (center - lo)
                } else if f >= center && f < hi {
                    (hi - f) / (hi - center)
                } else {
                    0.0
                };
                if w > 0.0 {
                    start_bin.get_or_insert(k);
                }
                if start_bin.is_some() {
                    if f >= hi {
                        break;
                    }
                    weights.push(w);
                }
            }
            MelBand {
                start_bin: start_bin.unwrap_or(0),
                weights,
            }
        })
        .collect()
}

/// Orthonormal DCT-II; the first row carries the extra `1/sqrt(2)`.
fn dct_weights(order: usize, size: usize) -> Vec<f32> {
    let scale = (2.0 / size as f64).sqrt();
    let mut weights = Vec::with_capacity(order * size);
    for k in 0..order {
        let row_scale = if k == 0 { scale / std::f64::consts::SQRT_2 } else { scale };
        for n in 0..size {
            let phi = std::f64::consts::PI * k as f64 * (2 * n + 1) as f64 / (2 * size) as f64;
            weights.push((phi.cos() * row_scale) as f32);
        }
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn rejects_non_power_of_two_frames() {
        let mut config = MfccConfig::for_sample_rate(44100);
        config.frame_size = 1000;
        assert!(matches!(
            FeatureExtractor::new(config),
            Err(MosaicError::InvalidFrameSize(1000))
        ));
    }

    #[test]
    fn rejects_inverted_frequency_range() {
        let mut config = MfccConfig::for_sample_rate(44100);
        config.min_freq = 5000.0;
        config.max_freq = 100.0;
        assert!(FeatureExtractor::new(config).is_err());
    }

    #[test]
    fn window_preserves_power() {
        let w = power_normalized_hann(512);
        let mean_sq: f32 = w.iter().map(|x| x * x).sum::<f32>() / 512.0;
        assert!((mean_sq - 1.0).abs() < 1e-4);
    }

    #[test]
    fn mel_scale_round_trips() {
        for f in [0.0f32, 440.0, 1000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(f)) - f).abs() < 0.5);
        }
        assert!((hz_to_mel(1000.0) - 1000.0).abs() < 1.0);
    }

    #[test]
    fn dct_rows_are_orthonormal() {
        let n = 8;
        let w = dct_weights(n, n);
        for a in 0..n {
            for b in 0..n {
                let dot: f32 = (0..n).map(|i| w[a * n + i] * w[b * n + i]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4, "rows {a},{b}: {dot}");
            }
        }
    }

    #[test]
    fn silence_hits_the_log_floor() {
        let extractor = FeatureExtractor::new(MfccConfig::for_sample_rate(44100)).unwrap();
        let coefs = extractor.extract(&[0.0; 1024]);
        assert_eq!(coefs.len(), 12);
        // All bands at -480 dB: only the DC coefficient is non-zero.
        let expected_c0 = -480.0 * (24.0f32).sqrt();
        assert!((coefs[0] - expected_c0).abs() < 0.1);
        assert!(coefs[1..].iter().all(|c| c.abs() < 1e-2));
    }

    #[test]
    fn short_frame_matches_explicit_padding() {
        let extractor = FeatureExtractor::new(MfccConfig::for_sample_rate(22050)).unwrap();
        let short = sine(440.0, 22050, 700);
        let mut padded = short.clone();
        padded.resize(1024, 0.0);
        assert_eq!(extractor.extract(&short), extractor.extract(&padded));
    }

    #[test]
    fn different_tones_give_different_coefficients() {
        let extractor = FeatureExtractor::new(MfccConfig::for_sample_rate(22050)).unwrap();
        let low = extractor.extract(&sine(200.0, 22050, 1024));
        let high = extractor.extract(&sine(4000.0, 22050, 1024));
        let dist: f32 = low.iter().zip(&high).map(|(a, b)| (a - b).powi(2)).sum::<f32>().sqrt();
        assert!(dist > 1.0);
        assert!(low.iter().chain(high.iter()).all(|c| c.is_finite()));
    }

    /// Band-limited harmonic tone: every partial stays below 8 kHz.
    fn harmonic_tone(fundamental: f64, sample_rate: u32, len: usize) -> Vec<f32> {
        let partials = (7900.0 / fundamental) as usize;
        (0..len)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                (1..=partials)
                    .map(|h| (2.0 * std::f64::consts::PI * fundamental * h as f64 * t).sin() / h as f64)
                    .sum::<f64>() as f32
            })
            .collect()
    }

    #[test]
    fn retuned_config_keeps_frame_duration_and_band_edges() {
        let base = MfccConfig {
            frame_size: 1024,
            ..MfccConfig::for_sample_rate(44100)
        };
        let up = base.at_sample_rate(48000);
        assert_eq!(up.frame_size, 1024);
        assert_eq!(up.max_freq, 22050.0);
        let down = base.at_sample_rate(22050);
        assert_eq!(down.frame_size, 512);
        assert_eq!(down.max_freq, 11025.0);
        assert_eq!(base.at_sample_rate(44100), base);
        assert!(down.validate().is_ok());
    }

    #[test]
    fn retuned_extractor_matches_across_sample_rates() {
        let base = MfccConfig {
            frame_size: 512,
            ..MfccConfig::for_sample_rate(16000)
        };
        let retuned = base.at_sample_rate(32000);
        assert_eq!(retuned.frame_size, 1024);
        assert_eq!(retuned.max_freq, 8000.0);

        let at_16k = FeatureExtractor::new(base).unwrap();
        let at_32k = FeatureExtractor::new(retuned).unwrap();
        let low_rate = at_16k.extract(&harmonic_tone(100.0, 16000, 512));
        let high_rate_frame = harmonic_tone(100.0, 32000, 1024);
        let high_rate = at_32k.extract(&high_rate_frame);
        for (a, b) in low_rate.iter().zip(&high_rate) {
            assert!((a - b).abs() < 0.1, "{a} vs {b}");
        }

        // Read through the 16 kHz extractor the same tone looks an octave up.
        let misread = at_16k.extract(&high_rate_frame);
        let dist: f32 = low_rate.iter().zip(&misread).map(|(a, b)| (a - b).powi(2)).sum::<f32>().sqrt();
        assert!(dist > 1.0);
    }

    #[test]
    fn filterbank_covers_the_spectrum() {
        let config = MfccConfig::for_sample_rate(16000);
        let bands = mel_bands(&config);
        assert_eq!(bands.len(), 24);
        for band in &bands {
            assert!(!band.weights.is_empty());
            assert!(band.weights.iter().all(|w| (0.0..=1.0).contains(w)));
        }
        // Centers increase monotonically.
        assert!(bands.windows(2).all(|b| b[0].start_bin <= b[1].start_bin));
    }
}
