//! Fingerprint pipeline glue.
//!
//! Wires decoding, framing, spectral analysis and hashing together:
//! WAV bytes -> mono 11025 Hz samples -> dB spectrogram -> one
//! [`PeakTriple`] per frame -> SHA-1 hashed landmark pairs.
//!
//! An empty result means the audio was too short to fingerprint. It is not
//! an error and callers must not treat it as "no catalog match".

use tracing::debug;

use crate::error::Result;
use crate::fingerprint::{
    decode::ingest,
    extraction::spectrogram,
    hashing::{find_peaks, generate_hashes},
};

pub mod decode;
pub mod extraction;
pub mod hashing;

pub use hashing::{Fingerprint, PeakTriple};

/// Analysis sample rate in Hz.
pub const SAMPLE_RATE: u32 = 11_025;
/// STFT window length in samples.
pub const FRAME_SIZE: usize = 1024;
/// STFT hop in samples (50% overlap).
pub const HOP_SIZE: usize = 512;
/// Divisor applied to peak bin indices (about 43 Hz of tolerance).
pub const FREQ_QUANT: i32 = 4;
/// Frame distances between paired landmarks.
pub const TARGET_DELTAS: &[usize] = &[9, 11, 13];

/// Run the end-to-end fingerprint pipeline on raw WAV bytes.
pub fn fingerprint_pipeline(audio_bytes: &[u8]) -> Result<Vec<Fingerprint>> {
    let pcm_buffer = ingest(audio_bytes)?;
    let spectrogram = spectrogram(&pcm_buffer);
    let peaks = find_peaks(&spectrogram);
    let fingerprints = generate_hashes(&peaks);

    debug!(
        samples = pcm_buffer.len(),
        frames = spectrogram.len(),
        fingerprints = fingerprints.len(),
        "fingerprinted audio"
    );

    Ok(fingerprints)
}

/// Run [`fingerprint_pipeline`] on the blocking thread pool.
pub async fn fingerprint_blocking(audio_bytes: Vec<u8>) -> Result<Vec<Fingerprint>> {
    tokio::task::spawn_blocking(move || fingerprint_pipeline(&audio_bytes)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fingerprint::decode::tests::wav_bytes;
    use crate::fingerprint::extraction::frame_count;

    fn silent_wav(samples: usize) -> Vec<u8> {
        wav_bytes(1, 1, SAMPLE_RATE, 16, &vec![0u8; samples * 2])
    }

    #[test]
    fn short_audio_yields_no_fingerprints() {
        let fps = fingerprint_pipeline(&silent_wav(FRAME_SIZE - 1)).unwrap();
        assert!(fps.is_empty());
    }

    #[test]
    fn silence_fingerprint_count_follows_frame_count() {
        for samples in [1024, 7_000, 7_680, 8_192, 22_050] {
            let frames = frame_count(samples);
            let fps = fingerprint_pipeline(&silent_wav(samples)).unwrap();
            assert_eq!(fps.len(), 3 * frames.saturating_sub(13), "{} samples", samples);
        }
    }

    #[test]
    fn pipeline_is_deterministic() {
        let data: Vec<u8> = (0..30_000u32)
            .flat_map(|i| (((i * 7919) % 65_536) as u16 as i16).to_le_bytes())
            .collect();
        let wav = wav_bytes(1, 1, SAMPLE_RATE, 16, &data);

        let first = fingerprint_pipeline(&wav).unwrap();
        let second = fingerprint_pipeline(&wav).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_audio_is_a_format_error() {
        assert!(matches!(fingerprint_pipeline(b"not a wav"), Err(Error::Format(_))));
    }

    #[tokio::test]
    async fn blocking_variant_matches_inline() {
        let wav = silent_wav(10_000);
        let inline = fingerprint_pipeline(&wav).unwrap();
        let offloaded = fingerprint_blocking(wav).await.unwrap();
        assert_eq!(inline, offloaded);
    }
}
