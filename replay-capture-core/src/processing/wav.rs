use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::models::error::CaptureError;
use crate::models::format::AudioFormat;

/// Size of the standard RIFF WAV header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Generate a 44-byte WAV RIFF header (PCM format code 1, little-endian).
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    file size - 8 (= 36 + data_size)
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * channels * bit_depth / 8
/// [32-33]  block_align = channels * bit_depth / 8
/// [34-35]  bit_depth
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(
    sample_rate: u32,
    bit_depth: u16,
    channels: u16,
    data_size: u32,
) -> [u8; WAV_HEADER_SIZE] {
    let byte_rate = sample_rate * channels as u32 * bit_depth as u32 / 8;
    let block_align = channels * bit_depth / 8;
    let chunk_size = 36 + data_size;

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bit_depth.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Convert f32 samples `[-1.0, 1.0]` to 16-bit PCM little-endian bytes,
/// clamping out-of-range values.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Write a complete 16-bit PCM WAV file in one shot, creating the parent
/// directory if needed. `format` describes the sample layout of `pcm`.
pub fn write_wav(path: &Path, format: AudioFormat, pcm: &[u8]) -> Result<(), CaptureError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::StorageFailure(format!("failed to create directory: {e}"))
            })?;
        }
    }

    let header = generate_wav_header(
        format.sample_rate,
        format.bytes_per_sample * 8,
        format.channels,
        pcm.len() as u32,
    );

    let mut file = File::create(path)
        .map_err(|e| CaptureError::EncodeWriteFailure(format!("failed to create file: {e}")))?;
    file.write_all(&header)
        .map_err(|e| CaptureError::EncodeWriteFailure(format!("header write failed: {e}")))?;
    file.write_all(pcm)
        .map_err(|e| CaptureError::EncodeWriteFailure(format!("data write failed: {e}")))?;
    file.flush()
        .map_err(|e| CaptureError::EncodeWriteFailure(format!("flush failed: {e}")))?;
    Ok(())
}
