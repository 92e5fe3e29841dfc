//! # replay-capture-core
//!
//! Platform-agnostic core of a rolling-buffer ("replay") audio recorder.
//!
//! Continuously captures up to two live endpoints — a microphone input and
//! a system-output loopback — into fixed-capacity rolling buffers, mixes
//! and resamples them into one stream, and snapshots the current window to
//! a WAV file on demand. A reactive device registry resolves which concrete
//! device each direction actually uses while hardware appears, disappears,
//! or stops being the OS default, and a supervisor restarts the capture
//! session so recording appears continuous.
//!
//! Platform backends implement the [`traits::audio_backend::AudioBackend`]
//! trait and plug in underneath; see `replay-capture-cpal`.
//!
//! ## Architecture
//!
//! ```text
//! replay-capture-core (this crate)
//! ├── traits/       ← AudioBackend, CaptureStream, PlaybackStream, SampleSource
//! ├── models/       ← AudioFormat, DeviceInfo, Selection, CaptureError, RecorderSettings
//! ├── processing/   ← CircularAudioBuffer, SourceChain, MixingPipeline, WAV encoding
//! ├── session/      ← CaptureSession (rolling capture + snapshot state machine)
//! ├── registry/     ← DeviceRegistry (serialized reducer over device events)
//! ├── supervisor    ← RecordingSupervisor (device changes → session restarts)
//! └── events        ← RecorderEvent bus for the presentation layer
//! ```

pub mod events;
pub mod models;
pub mod processing;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use events::{EventBus, RecorderEvent};
pub use models::device::{DeviceInfo, DeviceRole, DeviceState, Direction, Selection};
pub use models::error::CaptureError;
pub use models::format::AudioFormat;
pub use models::settings::RecorderSettings;
pub use processing::chain::LevelReading;
pub use processing::circular_buffer::CircularAudioBuffer;
pub use processing::mixer::{CombineMode, MixingPipeline};
pub use registry::{DeviceRegistry, RegistryChange, RegistryEvent, RegistrySnapshot};
pub use session::capture::{CaptureSession, SaveOutcome, SavedSnapshot, SessionConfig, SessionState};
pub use supervisor::RecordingSupervisor;
pub use traits::audio_backend::{
    AudioBackend, CaptureDataCallback, CaptureStream, DeviceNotification, PlaybackStream,
    SampleSource,
};
