//! Reactive device registry.
//!
//! All platform notifications and user selections are marshalled onto one
//! serialized reducer thread that owns the registry state. Exactly one
//! event is applied at a time, in arrival order; the effective device per
//! direction is recomputed synchronously after each event, and subscribers
//! only observe distinct values.

pub mod state;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::models::device::{DeviceInfo, Direction, Selection};
use crate::models::error::CaptureError;
use crate::traits::audio_backend::AudioBackend;

pub use state::{RegistryChange, RegistryEvent, RegistryState};

type ChangeSubscriber = Box<dyn Fn(&RegistryChange) + Send>;

/// Read-only view of the registry's derived state, refreshed by the
/// reducer after every event.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub effective_input: Option<DeviceInfo>,
    pub effective_output: Option<DeviceInfo>,
    pub input_devices: Vec<DeviceInfo>,
    pub output_devices: Vec<DeviceInfo>,
}

struct Shared {
    snapshot: Mutex<RegistrySnapshot>,
    subscribers: Mutex<Vec<ChangeSubscriber>>,
}

/// Serialized front end over [`RegistryState`].
///
/// Producers (backend notification threads, the presentation layer) only
/// enqueue; the reducer thread is the single writer of registry state.
pub struct DeviceRegistry {
    tx: Sender<RegistryEvent>,
    shutdown_tx: Sender<()>,
    shared: Arc<Shared>,
    reducer: Option<JoinHandle<()>>,
}

impl DeviceRegistry {
    /// Seed the registry from the backend's current enumeration and
    /// defaults, start the reducer, and subscribe to the backend's device
    /// notifications.
    pub fn start(backend: &dyn AudioBackend, auto_switch: bool) -> Result<Self, CaptureError> {
        let mut devices = backend.enumerate(Direction::Input)?;
        devices.extend(backend.enumerate(Direction::Output)?);
        log::debug!("{} active audio endpoints found", devices.len());

        let default_input = backend.default_device_id(Direction::Input);
        let default_output = backend.default_device_id(Direction::Output);

        let mut state = RegistryState::new(auto_switch);
        state.seed(devices, default_input, default_output);

        let shared = Arc::new(Shared {
            snapshot: Mutex::new(Self::snapshot_of(&state)),
            subscribers: Mutex::new(Vec::new()),
        });

        let (tx, rx) = unbounded::<RegistryEvent>();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        // Backend notifications arrive as their own message type; a small
        // forwarder keeps the reducer channel the only mutation path.
        let (notify_tx, notify_rx) = unbounded();
        backend.subscribe_notifications(notify_tx);
        {
            let tx = tx.clone();
            thread::Builder::new()
                .name("device-notify".into())
                .spawn(move || {
                    for notification in notify_rx.iter() {
                        if tx.send(RegistryEvent::from(notification)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| CaptureError::BackendFailure(format!("spawn failed: {e}")))?;
        }

        let reducer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("device-registry".into())
                .spawn(move || {
                    loop {
                        let event = crossbeam_channel::select! {
                            recv(rx) -> event => match event {
                                Ok(event) => event,
                                Err(_) => break,
                            },
                            recv(shutdown_rx) -> _ => break,
                        };

                        // A fault while applying one notification must not
                        // wedge the reducer; log it and keep draining.
                        let applied = std::panic::catch_unwind(AssertUnwindSafe(|| {
                            state.apply(event)
                        }));

                        match applied {
                            Ok(changes) => {
                                *shared.snapshot.lock() = Self::snapshot_of(&state);
                                if changes.is_empty() {
                                    continue;
                                }
                                let subscribers = shared.subscribers.lock();
                                for change in &changes {
                                    for subscriber in subscribers.iter() {
                                        let delivered =
                                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                                subscriber(change)
                                            }));
                                        if delivered.is_err() {
                                            log::error!(
                                                "registry subscriber panicked on {change:?}"
                                            );
                                        }
                                    }
                                }
                            }
                            Err(_) => {
                                log::error!("device notification handler fault, event dropped");
                            }
                        }
                    }
                    log::debug!("device registry reducer stopped");
                })
                .map_err(|e| CaptureError::BackendFailure(format!("spawn failed: {e}")))?
        };

        log::info!("device registry initialized");
        Ok(Self {
            tx,
            shutdown_tx,
            shared,
            reducer: Some(reducer),
        })
    }

    /// Register a change observer. Called synchronously on the reducer
    /// thread, in registration order — keep handlers short and enqueue
    /// heavier work elsewhere.
    pub fn subscribe(&self, subscriber: impl Fn(&RegistryChange) + Send + 'static) {
        self.shared.subscribers.lock().push(Box::new(subscriber));
    }

    /// Enqueue a raw event (used by tests and by selection helpers).
    pub fn push(&self, event: RegistryEvent) {
        let _ = self.tx.send(event);
    }

    pub fn set_selection(&self, direction: Direction, selection: Selection) {
        self.push(RegistryEvent::SelectionChanged { direction, selection });
    }

    pub fn select_device(&self, direction: Direction, id: impl Into<String>) {
        self.set_selection(direction, Selection::Explicit(id.into()));
    }

    pub fn follow_default(&self, direction: Direction) {
        self.set_selection(direction, Selection::FollowDefault);
    }

    pub fn clear_selection(&self, direction: Direction) {
        self.set_selection(direction, Selection::None);
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.shared.snapshot.lock().clone()
    }

    pub fn effective_device(&self, direction: Direction) -> Option<DeviceInfo> {
        let snapshot = self.shared.snapshot.lock();
        match direction {
            Direction::Input => snapshot.effective_input.clone(),
            Direction::Output => snapshot.effective_output.clone(),
        }
    }

    fn snapshot_of(state: &RegistryState) -> RegistrySnapshot {
        RegistrySnapshot {
            effective_input: state.effective_device(Direction::Input).cloned(),
            effective_output: state.effective_device(Direction::Output).cloned(),
            input_devices: state.active_devices(Direction::Input),
            output_devices: state.active_devices(Direction::Output),
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.reducer.take() {
            let _ = handle.join();
        }
    }
}
