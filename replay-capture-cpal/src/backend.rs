//! `AudioBackend` implementation over cpal.
//!
//! Device ids are `direction:name` strings — cpal exposes no stable
//! endpoint ids, and names are unique per direction on every supported
//! host. Capturing from an Output device opens a loopback stream on that
//! render endpoint (supported on WASAPI; other hosts reject the open).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use crossbeam_channel::{bounded, Sender};

use replay_capture_core::models::device::{DeviceInfo, DeviceState, Direction};
use replay_capture_core::models::error::CaptureError;
use replay_capture_core::models::format::AudioFormat;
use replay_capture_core::traits::audio_backend::{
    AudioBackend, CaptureDataCallback, CaptureStream, DeviceNotification, PlaybackStream,
    SampleSource,
};

use crate::watcher::DeviceWatcher;

pub fn device_id(direction: Direction, name: &str) -> String {
    match direction {
        Direction::Input => format!("input:{name}"),
        Direction::Output => format!("output:{name}"),
    }
}

/// cpal-backed audio subsystem.
pub struct CpalBackend {
    watcher: DeviceWatcher,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            watcher: DeviceWatcher::start(Duration::from_secs(1)),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn enumerate(&self, direction: Direction) -> Result<Vec<DeviceInfo>, CaptureError> {
        enumerate_direction(&cpal::default_host(), direction)
    }

    fn default_device_id(&self, direction: Direction) -> Option<String> {
        let host = cpal::default_host();
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }?;
        device.name().ok().map(|name| device_id(direction, &name))
    }

    fn open_capture(
        &self,
        device: &DeviceInfo,
        callback: CaptureDataCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        CpalCaptureStream::open(device.clone(), callback).map(|s| Box::new(s) as _)
    }

    fn open_playback(
        &self,
        device: &DeviceInfo,
        source: Arc<dyn SampleSource>,
    ) -> Result<Box<dyn PlaybackStream>, CaptureError> {
        CpalPlaybackStream::open(device.clone(), source).map(|s| Box::new(s) as _)
    }

    fn subscribe_notifications(&self, tx: Sender<DeviceNotification>) {
        self.watcher.subscribe(tx);
    }
}

pub(crate) fn enumerate_direction(
    host: &cpal::Host,
    direction: Direction,
) -> Result<Vec<DeviceInfo>, CaptureError> {
    let devices: Box<dyn Iterator<Item = cpal::Device>> = match direction {
        Direction::Input => Box::new(
            host.input_devices()
                .map_err(|e| CaptureError::BackendFailure(format!("enumeration failed: {e}")))?,
        ),
        Direction::Output => Box::new(
            host.output_devices()
                .map_err(|e| CaptureError::BackendFailure(format!("enumeration failed: {e}")))?,
        ),
    };

    let mut out = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else { continue };
        let config = match direction {
            Direction::Input => device.default_input_config(),
            Direction::Output => device.default_output_config(),
        };
        let Ok(config) = config else { continue };

        out.push(DeviceInfo {
            id: device_id(direction, &name),
            direction,
            name,
            state: DeviceState::Active,
            channels: config.channels(),
        });
    }
    Ok(out)
}

fn find_device(direction: Direction, name: &str) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    let devices: Box<dyn Iterator<Item = cpal::Device>> = match direction {
        Direction::Input => Box::new(host.input_devices().map_err(|e| {
            CaptureError::BackendFailure(format!("enumeration failed: {e}"))
        })?),
        Direction::Output => Box::new(host.output_devices().map_err(|e| {
            CaptureError::BackendFailure(format!("enumeration failed: {e}"))
        })?),
    };

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(CaptureError::DeviceUnavailable {
        id: device_id(direction, name),
        direction,
    })
}

fn open_error(info: &DeviceInfo, reason: impl std::fmt::Display) -> CaptureError {
    CaptureError::HardwareOpenFailure {
        id: info.id.clone(),
        direction: info.direction,
        reason: reason.to_string(),
    }
}

/// Capture stream whose `cpal::Stream` lives on a dedicated thread.
struct CpalCaptureStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    format: AudioFormat,
}

impl CpalCaptureStream {
    fn open(info: DeviceInfo, callback: CaptureDataCallback) -> Result<Self, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<AudioFormat, CaptureError>>(1);

        let thread_running = Arc::clone(&running);
        let thread_info = info.clone();
        let handle = thread::Builder::new()
            .name(format!("capture-{:?}", info.direction).to_lowercase())
            .spawn(move || {
                capture_thread(thread_info, callback, thread_running, ready_tx);
            })
            .map_err(|e| CaptureError::BackendFailure(format!("spawn failed: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(format)) => Ok(Self {
                running,
                handle: Some(handle),
                format,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(open_error(&info, "capture thread died during open"))
            }
        }
    }
}

impl CaptureStream for CpalCaptureStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns the stream for its whole life; parks until stopped.
fn capture_thread(
    info: DeviceInfo,
    callback: CaptureDataCallback,
    running: Arc<AtomicBool>,
    ready_tx: Sender<Result<AudioFormat, CaptureError>>,
) {
    let opened = (|| -> Result<(cpal::Stream, AudioFormat), CaptureError> {
        let device = find_device(info.direction, &info.name)?;

        // Loopback capture of a render endpoint uses the device's output
        // mix format.
        let supported = match info.direction {
            Direction::Input => device.default_input_config(),
            Direction::Output => device.default_output_config(),
        }
        .map_err(|e| open_error(&info, format!("no usable config: {e}")))?;

        let sample_format = supported.sample_format();
        let config = supported.config();
        let format = AudioFormat::f32(config.sample_rate.0, config.channels);

        let err_info = info.clone();
        let err_fn = move |e: cpal::StreamError| {
            log::error!("stream error on '{}': {e}", err_info.id);
        };

        // Deliveries are normalized to little-endian f32 bytes regardless
        // of the device's native sample format.
        let stream = match sample_format {
            SampleFormat::F32 => {
                let mut scratch = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().flat_map(|s| s.to_le_bytes()));
                        callback(&scratch);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut scratch = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(
                            data.iter()
                                .flat_map(|s| (*s as f32 / i16::MAX as f32).to_le_bytes()),
                        );
                        callback(&scratch);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::U16 => {
                let mut scratch = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        scratch.clear();
                        scratch.extend(data.iter().flat_map(|s| {
                            ((*s as f32 - u16::MAX as f32 / 2.0) / (u16::MAX as f32 / 2.0))
                                .to_le_bytes()
                        }));
                        callback(&scratch);
                    },
                    err_fn,
                    None,
                )
            }
            other => {
                return Err(open_error(&info, format!("unsupported sample format {other:?}")))
            }
        }
        .map_err(|e| open_error(&info, e))?;

        stream.play().map_err(|e| open_error(&info, e))?;
        Ok((stream, format))
    })();

    match opened {
        Ok((stream, format)) => {
            if ready_tx.send(Ok(format)).is_err() {
                return;
            }
            log::debug!("capture stream open on '{}'", info.id);
            while running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
            log::debug!("capture stream closed on '{}'", info.id);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}

/// Playback stream pulling from a `SampleSource`, confined to its own
/// thread like the capture streams.
struct CpalPlaybackStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CpalPlaybackStream {
    fn open(info: DeviceInfo, source: Arc<dyn SampleSource>) -> Result<Self, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);

        let thread_running = Arc::clone(&running);
        let thread_info = info.clone();
        let handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                playback_thread(thread_info, source, thread_running, ready_tx);
            })
            .map_err(|e| CaptureError::BackendFailure(format!("spawn failed: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(open_error(&info, "playback thread died during open"))
            }
        }
    }
}

impl PlaybackStream for CpalPlaybackStream {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalPlaybackStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn playback_thread(
    info: DeviceInfo,
    source: Arc<dyn SampleSource>,
    running: Arc<AtomicBool>,
    ready_tx: Sender<Result<(), CaptureError>>,
) {
    let opened = (|| -> Result<cpal::Stream, CaptureError> {
        let device = find_device(Direction::Output, &info.name)?;
        let supported = device
            .default_output_config()
            .map_err(|e| open_error(&info, format!("no usable config: {e}")))?;

        if supported.sample_format() != SampleFormat::F32 {
            return Err(open_error(
                &info,
                format!("unsupported sample format {:?}", supported.sample_format()),
            ));
        }
        let config = supported.config();

        let err_info = info.clone();
        let err_fn = move |e: cpal::StreamError| {
            log::error!("playback error on '{}': {e}", err_info.id);
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    source.fill(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| open_error(&info, e))?;

        stream.play().map_err(|e| open_error(&info, e))?;
        Ok(stream)
    })();

    match opened {
        Ok(stream) => {
            if ready_tx.send(Ok(())).is_err() {
                return;
            }
            log::debug!("playback stream open on '{}'", info.id);
            while running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
        }
    }
}
