//! Scripted in-memory `AudioBackend` for integration tests.
//!
//! Tests add and remove devices, flip defaults, and inject capture data;
//! the backend forwards notifications to every subscriber exactly like a
//! platform watcher would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use replay_capture_core::models::device::{DeviceInfo, DeviceRole, DeviceState, Direction};
use replay_capture_core::models::error::CaptureError;
use replay_capture_core::models::format::AudioFormat;
use replay_capture_core::traits::audio_backend::{
    AudioBackend, CaptureDataCallback, CaptureStream, DeviceNotification, PlaybackStream,
    SampleSource,
};

pub fn device(id: &str, direction: Direction, channels: u16) -> DeviceInfo {
    DeviceInfo {
        id: id.into(),
        direction,
        name: format!("Mock {id}"),
        state: DeviceState::Active,
        channels,
    }
}

pub fn inactive_device(id: &str, direction: Direction) -> DeviceInfo {
    DeviceInfo {
        state: DeviceState::Unplugged,
        ..device(id, direction, 1)
    }
}

pub fn f32_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

struct CaptureEntry {
    device_id: String,
    direction: Direction,
    callback: CaptureDataCallback,
    stopped: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    devices: Vec<DeviceInfo>,
    defaults: HashMap<Direction, String>,
    formats: HashMap<String, AudioFormat>,
    captures: Vec<CaptureEntry>,
    playbacks: Vec<Arc<dyn SampleSource>>,
    fail_capture_open: Vec<String>,
    opened_ids: Vec<String>,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<State>,
    subscribers: Mutex<Vec<Sender<DeviceNotification>>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn notify(&self, notification: DeviceNotification) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// Install a device without emitting a notification (pre-seed).
    pub fn seed_device(&self, info: DeviceInfo) {
        self.state.lock().devices.push(info);
    }

    pub fn seed_default(&self, direction: Direction, id: &str) {
        self.state.lock().defaults.insert(direction, id.into());
    }

    /// Override the stream format reported for a device (default: f32 at
    /// 48 kHz with the device's channel count).
    pub fn set_format(&self, id: &str, format: AudioFormat) {
        self.state.lock().formats.insert(id.into(), format);
    }

    pub fn add_device(&self, info: DeviceInfo) {
        self.state.lock().devices.push(info.clone());
        self.notify(DeviceNotification::Added(info));
    }

    pub fn remove_device(&self, id: &str) {
        self.state.lock().devices.retain(|d| d.id != id);
        self.notify(DeviceNotification::Removed { id: id.into() });
    }

    pub fn change_default(&self, direction: Direction, id: Option<&str>) {
        {
            let mut state = self.state.lock();
            match id {
                Some(id) => {
                    state.defaults.insert(direction, id.into());
                }
                None => {
                    state.defaults.remove(&direction);
                }
            }
        }
        self.notify(DeviceNotification::DefaultChanged {
            direction,
            role: DeviceRole::Console,
            id: id.map(String::from),
        });
    }

    pub fn send_notification(&self, notification: DeviceNotification) {
        self.notify(notification);
    }

    /// Make the next capture open for this device fail.
    pub fn fail_capture_open(&self, id: &str) {
        self.state.lock().fail_capture_open.push(id.into());
    }

    /// Deliver interleaved f32 samples to every live capture stream of one
    /// direction, as the hardware callback would.
    pub fn push_audio(&self, direction: Direction, samples: &[f32]) {
        let bytes = f32_bytes(samples);
        let callbacks: Vec<CaptureDataCallback> = {
            let state = self.state.lock();
            state
                .captures
                .iter()
                .filter(|c| c.direction == direction && !c.stopped.load(Ordering::SeqCst))
                .map(|c| Arc::clone(&c.callback))
                .collect()
        };
        for callback in callbacks {
            callback(&bytes);
        }
    }

    /// Ids passed to `open_capture`, in order, including failed opens.
    pub fn opened_ids(&self) -> Vec<String> {
        self.state.lock().opened_ids.clone()
    }

    pub fn live_capture_count(&self, direction: Direction) -> usize {
        self.state
            .lock()
            .captures
            .iter()
            .filter(|c| c.direction == direction && !c.stopped.load(Ordering::SeqCst))
            .count()
    }

    pub fn playback_count(&self) -> usize {
        self.state.lock().playbacks.len()
    }
}

impl AudioBackend for MockBackend {
    fn enumerate(&self, direction: Direction) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(self
            .state
            .lock()
            .devices
            .iter()
            .filter(|d| d.direction == direction)
            .cloned()
            .collect())
    }

    fn default_device_id(&self, direction: Direction) -> Option<String> {
        self.state.lock().defaults.get(&direction).cloned()
    }

    fn open_capture(
        &self,
        device: &DeviceInfo,
        callback: CaptureDataCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let mut state = self.state.lock();
        state.opened_ids.push(device.id.clone());

        if let Some(pos) = state.fail_capture_open.iter().position(|id| id == &device.id) {
            state.fail_capture_open.remove(pos);
            return Err(CaptureError::HardwareOpenFailure {
                id: device.id.clone(),
                direction: device.direction,
                reason: "scripted failure".into(),
            });
        }

        let format = state
            .formats
            .get(&device.id)
            .copied()
            .unwrap_or_else(|| AudioFormat::f32(48_000, device.channels));

        let stopped = Arc::new(AtomicBool::new(false));
        state.captures.push(CaptureEntry {
            device_id: device.id.clone(),
            direction: device.direction,
            callback,
            stopped: Arc::clone(&stopped),
        });

        Ok(Box::new(MockCaptureStream { format, stopped }))
    }

    fn open_playback(
        &self,
        _device: &DeviceInfo,
        source: Arc<dyn SampleSource>,
    ) -> Result<Box<dyn PlaybackStream>, CaptureError> {
        self.state.lock().playbacks.push(source);
        Ok(Box::new(MockPlaybackStream))
    }

    fn subscribe_notifications(&self, tx: Sender<DeviceNotification>) {
        self.subscribers.lock().push(tx);
    }
}

struct MockCaptureStream {
    format: AudioFormat,
    stopped: Arc<AtomicBool>,
}

impl CaptureStream for MockCaptureStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockCaptureStream {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct MockPlaybackStream;

impl PlaybackStream for MockPlaybackStream {
    fn stop(&mut self) {}
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
