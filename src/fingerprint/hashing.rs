use rayon::prelude::*;
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use serde::{Deserialize, Serialize};

use crate::fingerprint::{FREQ_QUANT, TARGET_DELTAS};

/// A hashed landmark pair anchored at a frame index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Hex-encoded SHA-1 digest (40 characters).
    pub hash: String,
    pub anchor_frame: u32,
}

/// Quantized spectral landmark of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakTriple {
    pub f_peak: i32,
    pub f_midlow: i32,
    /// `f_peak - f_midlow`, may be negative.
    pub distance: i32,
}

/// Largest pairing delta; anchors must leave this many frames after them.
pub fn max_delta() -> usize {
    TARGET_DELTAS.iter().copied().max().unwrap_or(0)
}

/// Pair every anchor frame with the frames `TARGET_DELTAS` ahead of it and
/// hash each pair.
///
/// Each anchor yields exactly `TARGET_DELTAS.len()` fingerprints, in delta
/// order. Returns nothing when there are no more frames than the largest
/// delta.
pub fn generate_hashes(peaks: &[PeakTriple]) -> Vec<Fingerprint> {
    let anchors = peaks.len().saturating_sub(max_delta());

    (0..anchors)
        .into_par_iter()
        .flat_map_iter(|t1| {
            TARGET_DELTAS.iter().map(move |&delta| Fingerprint {
                hash: pair_hash(&peaks[t1], &peaks[t1 + delta]),
                anchor_frame: t1 as u32,
            })
        })
        .collect()
}

/// SHA-1 over `fp1|fm1|d1|fp2|fm2|d2`.
pub fn pair_hash(anchor: &PeakTriple, target: &PeakTriple) -> String {
    let raw = format!(
        "{}|{}|{}|{}|{}|{}",
        anchor.f_peak,
        anchor.f_midlow,
        anchor.distance,
        target.f_peak,
        target.f_midlow,
        target.distance
    );

    hex::encode(digest(&SHA1_FOR_LEGACY_USE_ONLY, raw.as_bytes()).as_ref())
}

/// Extract one landmark per frame of a dB spectrogram.
///
/// The DC bin never wins. Ties resolve to the lowest bin.
pub fn find_peaks(spectrogram: &[Vec<f32>]) -> Vec<PeakTriple> {
    spectrogram
        .iter()
        .map(|bins| {
            let mid = bins.len() / 2;

            let f_peak = (argmax(&bins[1..]) + 1) as i32 / FREQ_QUANT;
            let f_midlow = (argmax(&bins[1..mid.max(2)]) + 1) as i32 / FREQ_QUANT;

            PeakTriple {
                f_peak,
                f_midlow,
                distance: f_peak - f_midlow,
            }
        })
        .collect()
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}
