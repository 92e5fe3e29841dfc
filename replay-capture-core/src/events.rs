use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::device::Direction;
use crate::models::error::CaptureError;

/// Session lifecycle and data events consumed by the presentation layer.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    RecordingStarted,
    RecordingStopped,
    /// Captured bytes landed in one direction's buffer.
    NewDataAvailable { direction: Direction },
    SnapshotSaved { path: PathBuf, duration: Duration },
    SnapshotFailed { path: PathBuf, error: CaptureError },
}

/// Synchronous multicast of `RecorderEvent`s to a fixed-order subscriber
/// list. Subscribers run on whichever thread emits — capture callbacks
/// included — so handlers must stay short and marshal elsewhere if needed.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Box<dyn Fn(&RecorderEvent) + Send + Sync>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&RecorderEvent) + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(subscriber));
    }

    /// Deliver to every subscriber in registration order. A panicking
    /// subscriber is isolated and logged; the rest still run.
    pub fn emit(&self, event: &RecorderEvent) {
        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.iter() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| subscriber(event)))
                .is_err()
            {
                log::error!("event subscriber panicked on {event:?}");
            }
        }
    }
}
