use anyhow::{Context, Result};
use std::path::Path;

/// Write mono float samples as a 32-bit float WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;

    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak > 1.0 {
        log::warn!("Output peaks at {:.2}; it will clip in integer formats", peak);
    }

    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize().context("Failed to finalize WAV file")?;

    log::info!(
        "Wrote {} samples ({:.1}s) to {}",
        samples.len(),
        samples.len() as f32 / sample_rate as f32,
        path.display()
    );
    Ok(())
}
