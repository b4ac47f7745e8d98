//! Spectral extraction helpers.
//!
//! Provides framing, windowing and FFT power computation used by the
//! fingerprinting pipeline. Output is a dB spectrogram with one row per frame.

use std::f32::consts::PI;

use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::fingerprint::{FRAME_SIZE, HOP_SIZE};

const TUKEY_ALPHA: f32 = 0.25;
const DB_EPSILON: f32 = 1e-10;

/// Per-frame power in dB, `FRAME_SIZE / 2 + 1` bins per frame.
pub type Spectrogram = Vec<Vec<f32>>;

/// Compute the dB power spectrogram of `pcm_buffer`.
///
/// Returns zero frames when the buffer is shorter than one window.
pub fn spectrogram(pcm_buffer: &[f32]) -> Spectrogram {
    power_spectrum(frame(pcm_buffer))
        .into_par_iter()
        .map(|bins| bins.into_iter().map(|p| 10.0 * (p + DB_EPSILON).log10()).collect())
        .collect()
}

/// Number of complete analysis frames that fit in `samples` samples.
pub fn frame_count(samples: usize) -> usize {
    if samples < FRAME_SIZE {
        0
    } else {
        (samples - FRAME_SIZE) / HOP_SIZE + 1
    }
}

/// Split a PCM buffer into overlapping, detrended, windowed frames.
///
/// Only complete windows are produced; a trailing partial window is dropped.
pub fn frame(pcm_buffer: &[f32]) -> Vec<Vec<f32>> {
    let window = tukey_window(FRAME_SIZE, TUKEY_ALPHA);

    (0..frame_count(pcm_buffer.len()))
        .map(|index| {
            let start = index * HOP_SIZE;
            let segment = &pcm_buffer[start..start + FRAME_SIZE];
            let mean = segment.iter().sum::<f32>() / FRAME_SIZE as f32;

            segment
                .iter()
                .zip(window.iter())
                .map(|(sample, w)| (sample - mean) * w)
                .collect()
        })
        .collect()
}

/// One-sided power spectrum of each frame, scaled by the window energy.
///
/// Bins strictly between DC and Nyquist are doubled to account for the
/// discarded negative frequencies.
pub fn power_spectrum(frames: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    if frames.is_empty() {
        return vec![];
    }

    let n = frames[0].len();
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n);

    let window_sum: f32 = tukey_window(n, TUKEY_ALPHA).iter().sum();
    let scale = 1.0 / (window_sum * window_sum);
    let bins = n / 2 + 1;

    frames
        .into_par_iter()
        .map(|frame| {
            let mut buffer: Vec<Complex<f32>> =
                frame.iter().map(|&v| Complex { re: v, im: 0.0 }).collect();
            fft.process(&mut buffer);

            buffer[..bins]
                .iter()
                .enumerate()
                .map(|(k, c)| {
                    let power = (c.re * c.re + c.im * c.im) * scale;
                    if k == 0 || (n % 2 == 0 && k == n / 2) {
                        power
                    } else {
                        power * 2.0
                    }
                })
                .collect()
        })
        .collect()
}

/// Periodic Tukey (tapered cosine) window.
///
/// Built as the symmetric window of length `size + 1` with the last sample
/// dropped, which is the form used for spectral analysis.
fn tukey_window(size: usize, alpha: f32) -> Vec<f32> {
    let n = size + 1;
    let span = (n - 1) as f32;
    let width = (alpha * span / 2.0).floor() as usize;

    (0..size)
        .map(|i| {
            let x = i as f32;
            if i <= width {
                0.5 * (1.0 + (PI * (-1.0 + 2.0 * x / alpha / span)).cos())
            } else if i >= n - width - 1 {
                0.5 * (1.0 + (PI * (-2.0 / alpha + 1.0 + 2.0 * x / alpha / span)).cos())
            } else {
                1.0
            }
        })
        .collect()
}
