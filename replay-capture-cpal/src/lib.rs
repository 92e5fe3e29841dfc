//! # replay-capture-cpal
//!
//! Cross-platform `cpal` backend for replay-capture-kit.
//!
//! Provides:
//! - `CpalBackend` — device enumeration, capture streams (loopback capture
//!   of render endpoints where the host supports it), and silence-fed
//!   playback streams
//! - `DeviceWatcher` — polling watcher that synthesizes device
//!   added/removed/default-changed notifications for the registry
//!
//! `cpal::Stream` is not `Send`, so every open stream lives on its own
//! dedicated thread; the handles handed back to the core are thin stop
//! switches.
//!
//! ## Usage
//! ```ignore
//! use replay_capture_core::{CaptureSession, DeviceRegistry, EventBus, SessionConfig};
//! use replay_capture_cpal::CpalBackend;
//!
//! let backend = std::sync::Arc::new(CpalBackend::new());
//! let registry = DeviceRegistry::start(backend.as_ref(), true)?;
//! ```

pub mod backend;
pub mod watcher;

pub use backend::CpalBackend;
pub use watcher::DeviceWatcher;
