/// A 0..=100 loudness summary of one block of samples, used for visualizers.
pub type AmplitudeLevel = f32;

/// Loudness of normalized float samples: `sqrt(rms) * 100`, clamped to [0, 100].
pub fn amplitude_level(samples: &[f32]) -> AmplitudeLevel {
    if samples.is_empty() {
        return 0.0;
    }

    let mean_square =
        samples.iter().map(|s| (*s as f64) * (*s as f64)).sum::<f64>() / samples.len() as f64;
    let rms = mean_square.sqrt();

    (rms.sqrt() * 100.0).clamp(0.0, 100.0) as f32
}

/// Same measure over 16-bit PCM.
pub fn amplitude_level_i16(samples: &[i16]) -> AmplitudeLevel {
    if samples.is_empty() {
        return 0.0;
    }

    let mean_square = samples
        .iter()
        .map(|s| {
            let v = *s as f64 / 32768.0;
            v * v
        })
        .sum::<f64>()
        / samples.len() as f64;

    (mean_square.sqrt().sqrt() * 100.0).clamp(0.0, 100.0) as f32
}
