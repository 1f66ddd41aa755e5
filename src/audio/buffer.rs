/// Decoded mono PCM plus its sample rate.
///
/// This is the read side of the audio buffer provider: everything the
/// analysis and synthesis code needs from a source or target file.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Copy `frame_size` samples starting at `start`, zero-padding past the end.
    pub fn frame_at(&self, start: usize, frame_size: usize) -> Vec<f32> {
        let mut frame = vec![0.0f32; frame_size];
        if start < self.samples.len() {
            let end = (start + frame_size).min(self.samples.len());
            frame[..end - start].copy_from_slice(&self.samples[start..end]);
        }
        frame
    }

    /// Same as [`frame_at`](Self::frame_at) with the start given in seconds.
    pub fn frame_at_time(&self, time: f64, frame_size: usize) -> Vec<f32> {
        let start = (time.max(0.0) * self.sample_rate as f64).floor() as usize;
        self.frame_at(start, frame_size)
    }

    /// Linear interpolation at a fractional sample position. Out of range reads are silent.
    pub fn read_interpolated(&self, position: f64) -> f32 {
        if self.samples.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position as usize;
        if idx + 1 >= self.samples.len() {
            return if idx < self.samples.len() {
                self.samples[idx]
            } else {
                0.0
            };
        }

        let frac = (position - idx as f64) as f32;
        self.samples[idx] * (1.0 - frac) + self.samples[idx + 1] * frac
    }
}

/// Root mean square of a frame. Empty frames are silent.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}
