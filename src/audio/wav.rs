//! WAV container encoding for raw model/microphone PCM
//!
//! Pure and stateless; used for exporting audio outside a live session.

use anyhow::{Context, Result};
use base64::Engine;
use std::io::Cursor;

use super::convert::le_bytes_to_samples;

/// Wrap 16-bit little-endian mono PCM in a RIFF/WAVE container
pub fn pcm_to_wav(pcm_bytes: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm_bytes.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .context("Failed to create WAV writer")?;

        for sample in le_bytes_to_samples(pcm_bytes) {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }

        writer.finalize().context("Failed to finalize WAV data")?;
    }

    Ok(cursor.into_inner())
}

/// Same as [`pcm_to_wav`] for base64-encoded PCM, as carried on the wire
pub fn base64_pcm_to_wav(pcm_base64: &str, sample_rate: u32) -> Result<Vec<u8>> {
    let pcm = base64::engine::general_purpose::STANDARD
        .decode(pcm_base64.trim())
        .context("PCM payload is not valid base64")?;

    pcm_to_wav(&pcm, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let pcm = [0u8; 8];
        let wav = pcm_to_wav(&pcm, 24000).unwrap();

        assert_eq!(wav.len(), 44 + pcm.len());
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 24000);
        assert_eq!(u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]), 48000);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 8);
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(base64_pcm_to_wav("not base64 !!", 16000).is_err());
    }
}
