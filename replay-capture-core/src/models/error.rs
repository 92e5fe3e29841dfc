use thiserror::Error;

use super::device::Direction;

/// Errors that can occur during capture, mixing, and snapshot operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The selected or default device is not Active at start time.
    #[error("device '{id}' ({direction:?}) is not active")]
    DeviceUnavailable { id: String, direction: Direction },

    /// The platform rejected opening a capture or playback stream.
    #[error("failed to open {direction:?} stream on '{id}': {reason}")]
    HardwareOpenFailure {
        id: String,
        direction: Direction,
        reason: String,
    },

    /// The asynchronous snapshot encode failed after the buffers were
    /// already cleared; that audio window is lost.
    #[error("snapshot encode failed: {0}")]
    EncodeWriteFailure(String),

    /// Filesystem problem outside the encode itself.
    #[error("storage error: {0}")]
    StorageFailure(String),

    /// A session operation was invoked with parameters it cannot honor.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The hardware backend failed to enumerate or report devices.
    #[error("backend failure: {0}")]
    BackendFailure(String),
}
