//! Polling device watcher.
//!
//! cpal has no hotplug notifications, so the watcher rescans the host on a
//! fixed interval and diffs against the previous scan, synthesizing the
//! added/removed/default-changed notifications the registry consumes.
//! Removal is debounced over consecutive scans because some hosts briefly
//! drop devices during renegotiation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam_channel::Sender;
use parking_lot::Mutex;

use replay_capture_core::models::device::{DeviceInfo, DeviceRole, Direction};
use replay_capture_core::traits::audio_backend::DeviceNotification;

use crate::backend::{device_id, enumerate_direction};

/// A device must be missing for this many consecutive scans before a
/// removal is reported.
const REMOVAL_THRESHOLD: u32 = 2;

struct Subscribers(Mutex<Vec<Sender<DeviceNotification>>>);

impl Subscribers {
    fn send(&self, notification: DeviceNotification) {
        // Prune subscribers whose receiving side is gone.
        self.0
            .lock()
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

/// Background scanner feeding `DeviceNotification`s to subscribers.
pub struct DeviceWatcher {
    subscribers: Arc<Subscribers>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    pub fn start(interval: Duration) -> Self {
        let subscribers = Arc::new(Subscribers(Mutex::new(Vec::new())));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let subscribers = Arc::clone(&subscribers);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("device-watcher".into())
                .spawn(move || {
                    log::debug!("device watcher started");
                    let mut scanner = Scanner::default();
                    // Baseline scan; nothing to diff against yet.
                    scanner.scan(&mut |_| {});

                    while running.load(Ordering::Relaxed) {
                        thread::sleep(interval);
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        scanner.scan(&mut |notification| subscribers.send(notification));
                    }
                    log::debug!("device watcher stopped");
                })
                .expect("failed to spawn device watcher thread")
        };

        Self {
            subscribers,
            running,
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self, tx: Sender<DeviceNotification>) {
        self.subscribers.0.lock().push(tx);
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
struct Scanner {
    known: HashMap<String, DeviceInfo>,
    defaults: HashMap<Direction, Option<String>>,
    missing_count: HashMap<String, u32>,
}

impl Scanner {
    fn scan(&mut self, emit: &mut dyn FnMut(DeviceNotification)) {
        let host = cpal::default_host();

        let mut current = HashMap::new();
        for direction in [Direction::Input, Direction::Output] {
            match enumerate_direction(&host, direction) {
                Ok(devices) => {
                    for device in devices {
                        current.insert(device.id.clone(), device);
                    }
                }
                Err(e) => {
                    log::warn!("device scan failed for {direction:?}: {e}");
                    return;
                }
            }
        }

        for (id, device) in &current {
            self.missing_count.remove(id);
            if !self.known.contains_key(id) {
                log::debug!("new device detected: {id}");
                emit(DeviceNotification::Added(device.clone()));
            }
        }

        let mut removed = Vec::new();
        for id in self.known.keys() {
            if current.contains_key(id) {
                continue;
            }
            let count = self.missing_count.entry(id.clone()).or_insert(0);
            *count += 1;
            log::debug!("device '{id}' missing from scan ({count} times)");
            if *count >= REMOVAL_THRESHOLD {
                removed.push(id.clone());
            }
        }
        for id in removed {
            log::info!("device removed: {id}");
            self.missing_count.remove(&id);
            self.known.remove(&id);
            emit(DeviceNotification::Removed { id: id.clone() });
        }

        // Keep still-missing devices in `known` until the debounce expires.
        for (id, device) in current {
            self.known.insert(id, device);
        }

        for direction in [Direction::Input, Direction::Output] {
            let device = match direction {
                Direction::Input => host.default_input_device(),
                Direction::Output => host.default_output_device(),
            };
            let id = device
                .and_then(|d| d.name().ok())
                .map(|name| device_id(direction, &name));

            let previous = self.defaults.insert(direction, id.clone());
            match previous {
                Some(previous) if previous == id => {}
                Some(_) => {
                    log::info!("default {direction:?} device changed to {id:?}");
                    emit(DeviceNotification::DefaultChanged {
                        direction,
                        role: DeviceRole::Console,
                        id,
                    });
                }
                // First scan records the baseline silently.
                None => {}
            }
        }
    }
}
