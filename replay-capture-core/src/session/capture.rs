use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::events::{EventBus, RecorderEvent};
use crate::models::device::{DeviceInfo, Direction};
use crate::models::error::CaptureError;
use crate::models::format::AudioFormat;
use crate::processing::chain::{AtomicGain, LevelMeter, LevelReading, SourceChain};
use crate::processing::circular_buffer::CircularAudioBuffer;
use crate::processing::mixer::{CombineMode, MixingPipeline, SilenceSource, SwitchingSource};
use crate::processing::wav;
use crate::traits::audio_backend::{AudioBackend, CaptureStream, PlaybackStream};

/// Session lifecycle.
///
/// ```text
/// Idle → Starting → Running → Stopping → Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Tunables applied at `start`. Gain and buffer duration can also be
/// retuned while Running; the combine topology cannot.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub buffer_duration: Duration,
    pub mic_gain: f32,
    pub sound_gain: f32,
    pub separate_tracks: bool,
    /// Keep a silence-fed playback stream open on the output device so its
    /// loopback capture clock keeps ticking.
    pub play_silence: bool,
    pub mic_channel_override: Option<u16>,
    pub sound_channel_override: Option<u16>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 32_000,
            buffer_duration: Duration::from_secs(20),
            mic_gain: 1.0,
            sound_gain: 1.0,
            separate_tracks: false,
            play_silence: true,
            mic_channel_override: None,
            sound_channel_override: None,
        }
    }
}

/// Result of a `save` call.
pub enum SaveOutcome {
    /// The session was not Running; nothing was written.
    NothingToSave,
    Saved(SavedSnapshot),
}

/// A snapshot pulled from the rolling buffers, being encoded in the
/// background. The in-memory window is already cleared; if the encode
/// fails, that audio is lost.
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub duration: Duration,
    pub pcm_bytes: u64,
    writer: JoinHandle<Result<(), CaptureError>>,
}

impl SavedSnapshot {
    /// Block until the background encode finished and surface its result.
    pub fn wait(self) -> Result<(), CaptureError> {
        self.writer
            .join()
            .unwrap_or_else(|_| Err(CaptureError::EncodeWriteFailure("writer panicked".into())))
    }
}

/// Live per-direction capture resources, present only between a successful
/// `start` and the next `stop`.
struct SourceRuntime {
    stream: Box<dyn CaptureStream>,
    buffer: Arc<Mutex<CircularAudioBuffer>>,
    gain: Arc<AtomicGain>,
    meter: Arc<LevelMeter>,
    format: AudioFormat,
}

/// Rolling-buffer capture session over one or two directions.
///
/// Owns the hardware stream handles, the ring buffers, and the mixing
/// pipeline. At most one session is Running at a time; callers share it as
/// `Arc<Mutex<CaptureSession<B>>>`.
pub struct CaptureSession<B: AudioBackend> {
    backend: Arc<B>,
    bus: Arc<EventBus>,
    config: SessionConfig,
    state: SessionState,

    mic: Option<SourceRuntime>,
    sound: Option<SourceRuntime>,
    playback: Option<Box<dyn PlaybackStream>>,
    pipeline: Option<MixingPipeline>,

    input_device: Option<DeviceInfo>,
    output_device: Option<DeviceInfo>,
}

impl<B: AudioBackend> CaptureSession<B> {
    pub fn new(backend: Arc<B>, bus: Arc<EventBus>, config: SessionConfig) -> Self {
        Self {
            backend,
            bus,
            config,
            state: SessionState::Idle,
            mic: None,
            sound: None,
            playback: None,
            pipeline: None,
            input_device: None,
            output_device: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn input_device(&self) -> Option<&DeviceInfo> {
        self.input_device.as_ref()
    }

    pub fn output_device(&self) -> Option<&DeviceInfo> {
        self.output_device.as_ref()
    }

    /// Bytes currently buffered for one direction (0 when that direction is
    /// not being captured).
    pub fn buffered_bytes(&self, direction: Direction) -> usize {
        self.runtime(direction)
            .map(|r| r.buffer.lock().buffered_bytes())
            .unwrap_or(0)
    }

    /// Capacity of one direction's rolling buffer.
    pub fn buffer_capacity(&self, direction: Direction) -> usize {
        self.runtime(direction)
            .map(|r| r.buffer.lock().capacity())
            .unwrap_or(0)
    }

    /// Latest level meter reading for one direction.
    pub fn levels(&self, direction: Direction) -> LevelReading {
        self.runtime(direction)
            .map(|r| r.meter.read())
            .unwrap_or_default()
    }

    /// Open the hardware streams and begin rolling capture.
    ///
    /// Requires at least one device, and every provided device must be
    /// Active. Any failure rolls back already-opened resources and leaves
    /// the session Idle.
    pub fn start(
        &mut self,
        input_device: Option<DeviceInfo>,
        output_device: Option<DeviceInfo>,
    ) -> Result<(), CaptureError> {
        if input_device.is_none() && output_device.is_none() {
            return Err(CaptureError::InvalidConfiguration(
                "cannot start recording with no devices".into(),
            ));
        }
        if !self.state.is_idle() {
            return Err(CaptureError::InvalidConfiguration(
                "recording already in progress".into(),
            ));
        }

        for device in [&input_device, &output_device].into_iter().flatten() {
            if !device.is_active() {
                log::warn!(
                    "{:?} device '{}' is not active, won't start recording",
                    device.direction,
                    device.id
                );
                return Err(CaptureError::DeviceUnavailable {
                    id: device.id.clone(),
                    direction: device.direction,
                });
            }
        }

        log::debug!(
            "starting recording with input ({:?}), output ({:?}), {} Hz...",
            input_device.as_ref().map(|d| d.id.as_str()),
            output_device.as_ref().map(|d| d.id.as_str()),
            self.config.sample_rate
        );
        self.state = SessionState::Starting;

        if let Err(e) = self.open_streams(input_device, output_device) {
            log::error!("error while starting recording: {e}");
            self.teardown();
            self.state = SessionState::Idle;
            return Err(e);
        }

        self.state = SessionState::Running;
        self.bus.emit(&RecorderEvent::RecordingStarted);
        log::info!("recording started");
        Ok(())
    }

    fn open_streams(
        &mut self,
        input_device: Option<DeviceInfo>,
        output_device: Option<DeviceInfo>,
    ) -> Result<(), CaptureError> {
        if let Some(device) = &input_device {
            self.mic = Some(self.open_source(device, Direction::Input)?);
        }
        if let Some(device) = &output_device {
            self.sound = Some(self.open_source(device, Direction::Output)?);
        }

        let mic_channels = self.mic.as_ref().map(|r| r.format.channels).unwrap_or(0);
        let sound_channels = self.sound.as_ref().map(|r| r.format.channels).unwrap_or(0);
        let max_channels = mic_channels.max(sound_channels);

        let mut chains = Vec::new();
        if let Some(runtime) = &self.mic {
            let target = SourceChain::resolve_target_channels(
                mic_channels,
                self.config.mic_channel_override,
                max_channels,
                self.config.separate_tracks,
            );
            chains.push(SourceChain::new(
                Arc::clone(&runtime.buffer),
                runtime.format,
                self.config.sample_rate,
                target,
                Arc::clone(&runtime.gain),
                Arc::clone(&runtime.meter),
            ));
        }
        if let Some(runtime) = &self.sound {
            let target = SourceChain::resolve_target_channels(
                sound_channels,
                self.config.sound_channel_override,
                max_channels,
                self.config.separate_tracks,
            );
            chains.push(SourceChain::new(
                Arc::clone(&runtime.buffer),
                runtime.format,
                self.config.sample_rate,
                target,
                Arc::clone(&runtime.gain),
                Arc::clone(&runtime.meter),
            ));
        }

        if chains.len() == 1 {
            log::info!("recording only a single device");
        }

        let mode = if self.config.separate_tracks {
            CombineMode::SeparateTracks
        } else {
            CombineMode::Mixdown
        };
        self.pipeline = Some(MixingPipeline::new(chains, mode, self.config.sample_rate));

        // A silence-fed playback stream keeps the loopback capture in sync
        // with the output device's own clock.
        if let (Some(device), Some(runtime)) = (&output_device, &self.sound) {
            if self.config.play_silence {
                let source = SwitchingSource::new(runtime.format);
                source.set_source(Some(Arc::new(SilenceSource::new(runtime.format))));
                self.playback = Some(self.backend.open_playback(device, Arc::new(source))?);
            }
        }

        self.input_device = input_device;
        self.output_device = output_device;
        Ok(())
    }

    fn open_source(
        &self,
        device: &DeviceInfo,
        direction: Direction,
    ) -> Result<SourceRuntime, CaptureError> {
        // The buffer is created empty and sized once the stream reports its
        // actual format.
        let buffer = Arc::new(Mutex::new(CircularAudioBuffer::new(0)));
        let gain = Arc::new(AtomicGain::new(match direction {
            Direction::Input => self.config.mic_gain,
            Direction::Output => self.config.sound_gain,
        }));

        let callback = {
            let buffer = Arc::clone(&buffer);
            let bus = Arc::clone(&self.bus);
            Arc::new(move |bytes: &[u8]| {
                log::trace!("{direction:?} data available ({} bytes)", bytes.len());
                buffer.lock().write(bytes);
                bus.emit(&RecorderEvent::NewDataAvailable { direction });
            })
        };

        let stream = self.backend.open_capture(device, callback)?;
        let format = stream.format();
        let capacity = self.config.buffer_duration.as_secs_f64() * format.bytes_per_second() as f64;
        buffer.lock().set_capacity(capacity.ceil() as usize);

        Ok(SourceRuntime {
            stream,
            buffer,
            gain,
            meter: Arc::new(LevelMeter::default()),
            format,
        })
    }

    /// Stop capture and release every hardware handle. Idempotent when
    /// already Idle.
    pub fn stop(&mut self) {
        if self.state.is_idle() {
            return;
        }

        log::debug!("stopping recording...");
        self.state = SessionState::Stopping;
        self.teardown();
        self.state = SessionState::Idle;

        self.bus.emit(&RecorderEvent::RecordingStopped);
        log::info!("recording stopped");
    }

    fn teardown(&mut self) {
        if let Some(mut runtime) = self.mic.take() {
            runtime.stream.stop();
        }
        if let Some(mut runtime) = self.sound.take() {
            runtime.stream.stop();
        }
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
        }
        self.pipeline = None;
        self.input_device = None;
        self.output_device = None;
    }

    /// Snapshot the current rolling window to a WAV file.
    ///
    /// Holds the session only for the in-memory pull + clear; the encode
    /// runs on a background thread. Returns `NothingToSave` when not
    /// Running. The realized duration is `min(buffer_duration, buffered)`.
    pub fn save(&mut self, path: &Path) -> Result<SaveOutcome, CaptureError> {
        if !self.state.is_running() {
            log::warn!("save requested while not recording");
            return Ok(SaveOutcome::NothingToSave);
        }
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| CaptureError::InvalidConfiguration("pipeline missing".into()))?;

        // Critical section: copy out the window, reset the buffers. The
        // capture callbacks keep the ring rolling from empty.
        let samples = pipeline.pull();
        let format = pipeline.output_format();
        for runtime in [&self.mic, &self.sound].into_iter().flatten() {
            runtime.buffer.lock().clear();
        }

        let frames = if format.channels == 0 {
            0
        } else {
            samples.len() / format.channels as usize
        };
        let duration = Duration::from_secs_f64(frames as f64 / format.sample_rate as f64);

        let file_format = AudioFormat::pcm16(format.sample_rate, format.channels);
        let pcm = wav::f32_to_pcm16(&samples);
        let pcm_bytes = pcm.len() as u64;
        log::debug!("saving {} kB of audio", pcm_bytes / 1024);

        let path_buf = path.to_path_buf();
        let bus = Arc::clone(&self.bus);
        let writer = thread::Builder::new()
            .name("snapshot-writer".into())
            .spawn(move || {
                match wav::write_wav(&path_buf, file_format, &pcm) {
                    Ok(()) => {
                        log::info!(
                            "saved {} kB of audio to '{}'",
                            pcm_bytes / 1024,
                            path_buf.display()
                        );
                        bus.emit(&RecorderEvent::SnapshotSaved {
                            path: path_buf,
                            duration,
                        });
                        Ok(())
                    }
                    Err(e) => {
                        log::error!("failed to save snapshot to '{}': {e}", path_buf.display());
                        bus.emit(&RecorderEvent::SnapshotFailed {
                            path: path_buf,
                            error: e.clone(),
                        });
                        Err(e)
                    }
                }
            })
            .map_err(|e| CaptureError::StorageFailure(format!("spawn failed: {e}")))?;

        Ok(SaveOutcome::Saved(SavedSnapshot {
            path: path.to_path_buf(),
            format: file_format,
            duration,
            pcm_bytes,
            writer,
        }))
    }

    /// Retune one direction's gain. Applies immediately to a live chain.
    pub fn set_gain(&mut self, direction: Direction, gain: f32) {
        match direction {
            Direction::Input => self.config.mic_gain = gain,
            Direction::Output => self.config.sound_gain = gain,
        }
        if let Some(runtime) = self.runtime(direction) {
            runtime.gain.set(gain);
        }
    }

    /// Change the rolling window length. Live buffers are resized in place,
    /// discarding the oldest overflow when shrinking.
    pub fn set_buffer_duration(&mut self, duration: Duration) {
        self.config.buffer_duration = duration;
        for runtime in [&self.mic, &self.sound].into_iter().flatten() {
            let capacity = duration.as_secs_f64() * runtime.format.bytes_per_second() as f64;
            runtime.buffer.lock().set_capacity(capacity.ceil() as usize);
        }
    }

    /// Change the combine topology for the next start. Returns true when a
    /// session is Running and must be restarted for the change to apply.
    pub fn set_separate_tracks(&mut self, separate_tracks: bool) -> bool {
        let changed = self.config.separate_tracks != separate_tracks;
        self.config.separate_tracks = separate_tracks;
        changed && self.state.is_running()
    }

    /// Update channel overrides used at the next start.
    pub fn set_channel_overrides(&mut self, mic: Option<u16>, sound: Option<u16>) {
        self.config.mic_channel_override = mic;
        self.config.sound_channel_override = sound;
    }

    fn runtime(&self, direction: Direction) -> Option<&SourceRuntime> {
        match direction {
            Direction::Input => self.mic.as_ref(),
            Direction::Output => self.sound.as_ref(),
        }
    }
}

impl<B: AudioBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
