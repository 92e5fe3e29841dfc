use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::format::AudioFormat;
use crate::processing::circular_buffer::CircularAudioBuffer;

/// Linear gain multiplier tunable from another thread while audio is pulled.
#[derive(Debug)]
pub struct AtomicGain(AtomicU32);

impl AtomicGain {
    pub fn new(gain: f32) -> Self {
        Self(AtomicU32::new(gain.max(0.0).to_bits()))
    }

    pub fn set(&self, gain: f32) {
        self.0.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Streaming peak/RMS meter. A side-channel observable fed by the chain;
/// never part of the audio path itself.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelReading {
    pub rms: f32,
    pub peak: f32,
}

#[derive(Debug, Default)]
pub struct LevelMeter {
    reading: Mutex<LevelReading>,
}

impl LevelMeter {
    pub fn update(&self, samples: &[f32]) {
        *self.reading.lock() = LevelReading {
            rms: rms_level(samples),
            peak: peak_level(samples),
        };
    }

    pub fn read(&self) -> LevelReading {
        *self.reading.lock()
    }
}

/// Root-mean-square level of normalized samples.
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Peak absolute level of samples.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}

/// Decode little-endian f32 bytes into samples. A trailing partial sample
/// is dropped.
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Keep the first `dst_channels` channels of every frame, dropping the rest.
pub fn select_channels(samples: &[f32], src_channels: u16, dst_channels: u16) -> Vec<f32> {
    let src = src_channels as usize;
    let dst = dst_channels as usize;
    if src == 0 || dst >= src {
        return samples.to_vec();
    }

    let frames = samples.len() / src;
    let mut out = Vec::with_capacity(frames * dst);
    for frame in 0..frames {
        out.extend_from_slice(&samples[frame * src..frame * src + dst]);
    }
    out
}

/// Widen interleaved frames to `dst_channels` by cycling the source
/// channels, so a mono source fills every output channel.
pub fn upmix_channels(samples: &[f32], src_channels: u16, dst_channels: u16) -> Vec<f32> {
    let src = src_channels as usize;
    let dst = dst_channels as usize;
    if src == 0 || dst <= src {
        return samples.to_vec();
    }

    let frames = samples.len() / src;
    let mut out = Vec::with_capacity(frames * dst);
    for frame in 0..frames {
        for ch in 0..dst {
            out.push(samples[frame * src + ch % src]);
        }
    }
    out
}

/// Downmix interleaved stereo to mono with equal 0.5/0.5 weighting.
/// Mono input passes through.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels as usize;
    if channels <= 1 {
        return samples.to_vec();
    }
    let frames = samples.len() / channels;
    let scale = 1.0 / channels as f32;
    let mut mono = Vec::with_capacity(frames);
    for frame in 0..frames {
        let sum: f32 = samples[frame * channels..(frame + 1) * channels].iter().sum();
        mono.push(sum * scale);
    }
    mono
}

/// Linear-interpolation resampling of interleaved audio.
///
/// Returns the input unchanged when rates already match.
pub fn resample(samples: &[f32], channels: u16, source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() || channels == 0 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    let frames = samples.len() / channels;
    let ratio = target_rate as f64 / source_rate as f64;
    let output_frames = (frames as f64 * ratio) as usize;
    if output_frames == 0 {
        return Vec::new();
    }

    let mut out = vec![0.0f32; output_frames * channels];
    for i in 0..output_frames {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            if index + 1 < frames {
                out[i * channels + ch] = samples[index * channels + ch] * (1.0 - fraction)
                    + samples[(index + 1) * channels + ch] * fraction;
            } else if index < frames {
                out[i * channels + ch] = samples[index * channels + ch];
            }
        }
    }
    out
}

/// Per-source processing chain over one rolling buffer.
///
/// Pull order: decode f32 → channel-select down → mono downmix → resample to
/// the target rate → gain → meter. The gain stage reads an atomic so the
/// session can retune it while the chain is live.
pub struct SourceChain {
    buffer: Arc<Mutex<CircularAudioBuffer>>,
    source_format: AudioFormat,
    target_rate: u32,
    target_channels: u16,
    gain: Arc<AtomicGain>,
    meter: Arc<LevelMeter>,
}

impl SourceChain {
    pub fn new(
        buffer: Arc<Mutex<CircularAudioBuffer>>,
        source_format: AudioFormat,
        target_rate: u32,
        target_channels: u16,
        gain: Arc<AtomicGain>,
        meter: Arc<LevelMeter>,
    ) -> Self {
        Self {
            buffer,
            source_format,
            target_rate,
            target_channels,
            gain,
            meter,
        }
    }

    pub fn target_channels(&self) -> u16 {
        self.target_channels
    }

    pub fn meter(&self) -> Arc<LevelMeter> {
        Arc::clone(&self.meter)
    }

    /// Pull the current rolling window through the whole chain.
    ///
    /// Holds the buffer lock only for the snapshot copy.
    pub fn pull_window(&self) -> Vec<f32> {
        let bytes = self.buffer.lock().snapshot();
        self.process(&bytes)
    }

    fn process(&self, bytes: &[u8]) -> Vec<f32> {
        let mut samples = bytes_to_f32(bytes);
        let mut channels = self.source_format.channels;

        // Multi-channel sources collapse onto the target layout before any
        // rate conversion, mirroring the capture-side chain order.
        if channels > 2 && channels > self.target_channels {
            let keep = self.target_channels.max(2);
            samples = select_channels(&samples, channels, keep);
            channels = keep;
        }

        if self.target_channels == 1 && channels > 1 {
            samples = downmix_to_mono(&samples, channels);
            channels = 1;
        }

        // A narrower source meets a wider combine target (e.g. mono mic
        // next to a stereo loopback) by cycling its channels.
        if channels < self.target_channels {
            samples = upmix_channels(&samples, channels, self.target_channels);
            channels = self.target_channels;
        }

        samples = resample(&samples, channels, self.source_format.sample_rate, self.target_rate);

        let gain = self.gain.get();
        if gain != 1.0 {
            for sample in &mut samples {
                *sample *= gain;
            }
        }

        self.meter.update(&samples);
        samples
    }

    /// Compute the per-source target channel count.
    ///
    /// An explicit override wins; in separate-tracks mode each source keeps
    /// its own channels; otherwise both sources meet at the larger of the
    /// two native counts.
    pub fn resolve_target_channels(
        source_channels: u16,
        override_channels: Option<u16>,
        max_channels: u16,
        separate_tracks: bool,
    ) -> u16 {
        if let Some(channels) = override_channels {
            if channels > 0 {
                return channels;
            }
        }

        if separate_tracks {
            return source_channels;
        }

        max_channels
    }
}
