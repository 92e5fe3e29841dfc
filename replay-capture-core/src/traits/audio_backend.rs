use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::models::device::{DeviceInfo, DeviceRole, DeviceState, Direction};
use crate::models::error::CaptureError;
use crate::models::format::AudioFormat;

/// Callback invoked with each captured buffer.
///
/// `bytes` is interleaved little-endian f32 in the stream's own format at
/// the device's own cadence. Fires on a backend-owned audio thread — keep
/// processing minimal.
pub type CaptureDataCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Raw device notification from the platform, before registry processing.
///
/// `DefaultChanged` carries the platform role; the registry only honors the
/// primary (`Console`) role.
#[derive(Debug, Clone)]
pub enum DeviceNotification {
    Added(DeviceInfo),
    Removed { id: String },
    StateChanged { device: DeviceInfo, state: DeviceState },
    DefaultChanged {
        direction: Direction,
        role: DeviceRole,
        id: Option<String>,
    },
}

/// An open capture stream. Dropping the handle must stop delivery.
pub trait CaptureStream: Send {
    /// The stream's delivery format, fixed at open time.
    fn format(&self) -> AudioFormat;

    /// Stop delivering buffers and release the hardware handle.
    fn stop(&mut self);
}

/// An open playback stream fed by a pull source. Dropping must stop it.
pub trait PlaybackStream: Send {
    fn stop(&mut self);
}

/// Pull-based sample producer for playback streams.
pub trait SampleSource: Send + Sync {
    fn format(&self) -> AudioFormat;

    /// Fill `out` completely with interleaved samples. Producers that have
    /// nothing to play must fill with silence rather than under-deliver.
    fn fill(&self, out: &mut [f32]);
}

/// Platform audio subsystem as seen by the core.
///
/// Implemented by `replay-capture-cpal` in production and by a scripted
/// mock in tests. Capturing from an `Output` device means loopback capture
/// of that endpoint's render stream.
pub trait AudioBackend: Send + Sync {
    /// Active endpoints for one direction.
    fn enumerate(&self, direction: Direction) -> Result<Vec<DeviceInfo>, CaptureError>;

    /// Id of the platform default endpoint for one direction, if any.
    fn default_device_id(&self, direction: Direction) -> Option<String>;

    /// Open a capture stream on the given endpoint, delivering buffers to
    /// `callback` until the returned handle is stopped or dropped.
    fn open_capture(
        &self,
        device: &DeviceInfo,
        callback: CaptureDataCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;

    /// Open a playback stream on the given endpoint pulling from `source`.
    fn open_playback(
        &self,
        device: &DeviceInfo,
        source: Arc<dyn SampleSource>,
    ) -> Result<Box<dyn PlaybackStream>, CaptureError>;

    /// Forward device notifications into `tx` until the backend is dropped.
    fn subscribe_notifications(&self, tx: Sender<DeviceNotification>);
}
