//! WAV decoding, downmixing and resampling.
//!
//! Turns raw container bytes into mono `f32` samples at the analysis rate.

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fingerprint::SAMPLE_RATE;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Mono samples together with the rate they were recorded at.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSamples {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
struct WavFormat {
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

/// Decode WAV bytes and resample them to the analysis rate.
pub fn ingest(bytes: &[u8]) -> Result<Vec<f32>> {
    let audio = decode_wav(bytes)?;

    debug!(
        bytes = bytes.len(),
        samples = audio.samples.len(),
        rate = audio.sample_rate,
        "decoded wav"
    );

    Ok(resample(&audio.samples, audio.sample_rate, SAMPLE_RATE))
}

/// Parse a RIFF/WAVE container into mono samples.
///
/// Chunks other than `fmt ` and `data` are skipped by their declared size.
/// A `data` chunk whose declared size runs past the end of the buffer is
/// read up to the end, which is what a growing stream looks like.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioSamples> {
    let mut cursor = Cursor::new(bytes);

    if read_tag(&mut cursor)? != *b"RIFF" {
        return Err(Error::Format("missing RIFF header".into()));
    }
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::Format("truncated RIFF header".into()))?;
    if read_tag(&mut cursor)? != *b"WAVE" {
        return Err(Error::Format("missing WAVE header".into()));
    }

    let mut format: Option<WavFormat> = None;
    let mut data: Option<&[u8]> = None;

    loop {
        let mut id = [0u8; 4];
        if cursor.read_exact(&mut id).is_err() {
            break;
        }
        let size = match cursor.read_u32::<LittleEndian>() {
            Ok(size) => size,
            Err(_) => break,
        };

        let start = cursor.position() as usize;
        // streaming encoders write u32::MAX, or 0 with nothing after the header
        let placeholder = size == u32::MAX || (size == 0 && !starts_with_chunk(&bytes[start..]));
        let end = if &id == b"data" && placeholder {
            bytes.len()
        } else {
            start.saturating_add(size as usize).min(bytes.len())
        };

        match &id {
            b"fmt " => format = Some(parse_fmt(&bytes[start..end])?),
            b"data" => {
                data = Some(&bytes[start..end]);
                break;
            }
            _ => {}
        }

        cursor.set_position(end as u64);
    }

    let format = format.ok_or_else(|| Error::Format("missing fmt chunk".into()))?;
    let data = data.ok_or_else(|| Error::Format("missing data chunk".into()))?;

    if format.channels == 0 {
        return Err(Error::Format("fmt chunk declares zero channels".into()));
    }
    if format.sample_rate == 0 {
        return Err(Error::Format("fmt chunk declares a zero sample rate".into()));
    }

    let interleaved = convert_samples(data, &format)?;

    Ok(AudioSamples {
        sample_rate: format.sample_rate,
        samples: to_mono(&interleaved, format.channels as usize),
    })
}

/// True when `rest` opens with a plausible chunk header: a printable id and
/// a size that fits in what remains.
fn starts_with_chunk(rest: &[u8]) -> bool {
    if rest.len() < 8 {
        return false;
    }
    let printable_id = rest[..4]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b' ');
    let size = LittleEndian::read_u32(&rest[4..8]) as usize;
    printable_id && size <= rest.len() - 8
}

fn read_tag(cursor: &mut Cursor<&[u8]>) -> Result<[u8; 4]> {
    let mut tag = [0u8; 4];
    cursor
        .read_exact(&mut tag)
        .map_err(|_| Error::Format("truncated RIFF header".into()))?;
    Ok(tag)
}

fn parse_fmt(chunk: &[u8]) -> Result<WavFormat> {
    if chunk.len() < 16 {
        return Err(Error::Format(format!("fmt chunk too short ({} bytes)", chunk.len())));
    }

    let mut cursor = Cursor::new(chunk);
    let short = |_| Error::Format("fmt chunk too short".into());

    let mut audio_format = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let channels = cursor.read_u16::<LittleEndian>().map_err(short)?;
    let sample_rate = cursor.read_u32::<LittleEndian>().map_err(short)?;
    cursor.set_position(14);
    let bits_per_sample = cursor.read_u16::<LittleEndian>().map_err(short)?;

    // WAVE_FORMAT_EXTENSIBLE stores the real format code at the head of the
    // sub-format GUID.
    if audio_format == FORMAT_EXTENSIBLE && chunk.len() >= 26 {
        cursor.set_position(24);
        audio_format = cursor.read_u16::<LittleEndian>().map_err(short)?;
    }

    Ok(WavFormat {
        audio_format,
        channels,
        sample_rate,
        bits_per_sample,
    })
}

/// Convert raw little-endian sample data to `f32` in `[-1, 1]`.
///
/// A trailing partial sample is ignored.
fn convert_samples(data: &[u8], format: &WavFormat) -> Result<Vec<f32>> {
    let samples = match (format.audio_format, format.bits_per_sample) {
        (FORMAT_PCM, 8) => data.iter().map(|&b| b as f32 / 128.0 - 1.0).collect(),
        (FORMAT_PCM, 16) => data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
            .collect(),
        (FORMAT_PCM, 32) => data
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        (FORMAT_IEEE_FLOAT, 32) => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (FORMAT_IEEE_FLOAT, 64) => data
            .chunks_exact(8)
            .map(|b| {
                f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
            })
            .collect(),
        (FORMAT_PCM, bits) | (FORMAT_IEEE_FLOAT, bits) => {
            return Err(Error::Format(format!(
                "unsupported bit depth {} for format {}",
                bits, format.audio_format
            )))
        }
        (code, _) => return Err(Error::Format(format!("unsupported audio format {}", code))),
    };

    Ok(samples)
}

/// Downmix interleaved frames by averaging the channels.
///
/// An incomplete trailing frame is dropped.
fn to_mono(input: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return input.to_vec();
    }

    input
        .par_chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linearly resample `input` from `input_rate` to `output_rate`.
///
/// Produces `round(len * output_rate / input_rate)` samples taken at
/// uniformly spaced positions over `[0, len - 1]`.
pub fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    if input_rate == output_rate || input.is_empty() {
        return input.to_vec();
    }

    let target_len =
        (input.len() as f64 * output_rate as f64 / input_rate as f64).round() as usize;

    match target_len {
        0 => vec![],
        1 => vec![input[0]],
        _ => {
            let last = input.len() - 1;
            let step = last as f64 / (target_len - 1) as f64;

            (0..target_len)
                .into_par_iter()
                .map(|i| {
                    let position = i as f64 * step;
                    let lower = (position.floor() as usize).min(last);
                    let upper = (lower + 1).min(last);
                    let frac = (position - lower as f64) as f32;

                    input[lower] + (input[upper] - input[lower]) * frac
                })
                .collect()
        }
    }
}
