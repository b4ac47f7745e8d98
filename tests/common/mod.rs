#![allow(dead_code)]

use byteorder::{LittleEndian, WriteBytesExt};

pub const RATE: u32 = 11_025;

/// Deterministic white noise, so every landmark hash is distinctive.
pub fn noise(seed: u64, len: usize) -> Vec<i16> {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) as i32 % 20_000 - 10_000) as i16
        })
        .collect()
}

/// A steady sine at `freq` Hz.
pub fn tone(freq: f64, len: usize) -> Vec<i16> {
    (0..len)
        .map(|n| {
            let t = n as f64 / RATE as f64;
            ((2.0 * std::f64::consts::PI * freq * t).sin() * 16_000.0) as i16
        })
        .collect()
}

/// Mono 16-bit PCM WAV at 11025 Hz.
pub fn wav(samples: &[i16]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.write_u32::<LittleEndian>(36 + data_len).unwrap();
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.write_u32::<LittleEndian>(16).unwrap();
    out.write_u16::<LittleEndian>(1).unwrap();
    out.write_u16::<LittleEndian>(1).unwrap();
    out.write_u32::<LittleEndian>(RATE).unwrap();
    out.write_u32::<LittleEndian>(RATE * 2).unwrap();
    out.write_u16::<LittleEndian>(2).unwrap();
    out.write_u16::<LittleEndian>(16).unwrap();
    out.extend_from_slice(b"data");
    out.write_u32::<LittleEndian>(data_len).unwrap();
    for &sample in samples {
        out.write_i16::<LittleEndian>(sample).unwrap();
    }
    out
}
