use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::format::AudioFormat;
use crate::processing::chain::SourceChain;
use crate::traits::audio_backend::SampleSource;

/// How two source chains are combined into the final stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    /// Sample-wise sum; output channel count is the larger of the two
    /// per-source target counts, never more.
    Mixdown,
    /// Channel multiplex; each source keeps its own channels side by side.
    SeparateTracks,
}

/// Combines one or two per-source chains into the final pull stream.
///
/// The combine topology is fixed when the pipeline is built; changing the
/// mode requires rebuilding the session.
pub struct MixingPipeline {
    chains: Vec<SourceChain>,
    mode: CombineMode,
    target_rate: u32,
}

impl MixingPipeline {
    pub fn new(chains: Vec<SourceChain>, mode: CombineMode, target_rate: u32) -> Self {
        debug_assert!(
            (1..=2).contains(&chains.len()),
            "pipeline supports one or two sources"
        );
        Self {
            chains,
            mode,
            target_rate,
        }
    }

    pub fn output_channels(&self) -> u16 {
        match (self.chains.len(), self.mode) {
            (1, _) => self.chains[0].target_channels(),
            (_, CombineMode::Mixdown) => self
                .chains
                .iter()
                .map(SourceChain::target_channels)
                .max()
                .unwrap_or(0),
            (_, CombineMode::SeparateTracks) => self
                .chains
                .iter()
                .map(SourceChain::target_channels)
                .sum(),
        }
    }

    /// Format of pulled samples before PCM encoding.
    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::f32(self.target_rate, self.output_channels())
    }

    /// Pull each source's current rolling window and combine.
    pub fn pull(&self) -> Vec<f32> {
        if self.chains.len() == 1 {
            return self.chains[0].pull_window();
        }

        let first = self.chains[0].pull_window();
        let second = self.chains[1].pull_window();

        match self.mode {
            CombineMode::Mixdown => mixdown(
                &first,
                self.chains[0].target_channels(),
                &second,
                self.chains[1].target_channels(),
            ),
            CombineMode::SeparateTracks => multiplex(
                &first,
                self.chains[0].target_channels(),
                &second,
                self.chains[1].target_channels(),
            ),
        }
    }
}

/// Sample-wise sum of two interleaved streams at the wider channel count.
/// The shorter stream is zero-padded; a narrower frame is spread across the
/// wider layout by repeating its last channel.
fn mixdown(a: &[f32], a_channels: u16, b: &[f32], b_channels: u16) -> Vec<f32> {
    let channels = a_channels.max(b_channels).max(1) as usize;
    let a_frames = frames(a, a_channels);
    let b_frames = frames(b, b_channels);
    let frame_count = a_frames.max(b_frames);

    let mut out = vec![0.0f32; frame_count * channels];
    for frame in 0..frame_count {
        for ch in 0..channels {
            out[frame * channels + ch] =
                sample_at(a, a_channels, frame, ch) + sample_at(b, b_channels, frame, ch);
        }
    }
    out
}

/// Concatenate channels per frame: output frame = a-frame channels then
/// b-frame channels, zero-padding whichever source runs out of frames.
fn multiplex(a: &[f32], a_channels: u16, b: &[f32], b_channels: u16) -> Vec<f32> {
    let a_ch = a_channels as usize;
    let b_ch = b_channels as usize;
    let frame_count = frames(a, a_channels).max(frames(b, b_channels));

    let mut out = Vec::with_capacity(frame_count * (a_ch + b_ch));
    for frame in 0..frame_count {
        for ch in 0..a_ch {
            out.push(raw_sample(a, a_ch, frame, ch));
        }
        for ch in 0..b_ch {
            out.push(raw_sample(b, b_ch, frame, ch));
        }
    }
    out
}

fn frames(samples: &[f32], channels: u16) -> usize {
    if channels == 0 {
        0
    } else {
        samples.len() / channels as usize
    }
}

fn raw_sample(samples: &[f32], channels: usize, frame: usize, ch: usize) -> f32 {
    samples.get(frame * channels + ch).copied().unwrap_or(0.0)
}

/// Read a sample for mixing, clamping the channel index into the source's
/// own layout so a mono source fills every output channel.
fn sample_at(samples: &[f32], channels: u16, frame: usize, ch: usize) -> f32 {
    let channels = channels.max(1) as usize;
    let ch = ch.min(channels - 1);
    raw_sample(samples, channels, frame, ch)
}

/// Pull source producing silence, used to keep an open playback stream fed.
pub struct SilenceSource {
    format: AudioFormat,
}

impl SilenceSource {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

impl SampleSource for SilenceSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn fill(&self, out: &mut [f32]) {
        out.fill(0.0);
    }
}

/// Pull source that delegates to an inner source when one is set and yields
/// silence otherwise, so the consumer's pull cadence never stalls.
pub struct SwitchingSource {
    format: AudioFormat,
    inner: Mutex<Option<Arc<dyn SampleSource>>>,
}

impl SwitchingSource {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            inner: Mutex::new(None),
        }
    }

    pub fn set_source(&self, source: Option<Arc<dyn SampleSource>>) {
        *self.inner.lock() = source;
    }
}

impl SampleSource for SwitchingSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn fill(&self, out: &mut [f32]) {
        let inner = self.inner.lock();
        match inner.as_ref() {
            Some(source) => source.fill(out),
            None => out.fill(0.0),
        }
    }
}
