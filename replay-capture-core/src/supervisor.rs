//! Bridges the device registry's effective-device stream to the capture
//! session.
//!
//! One worker thread owns every stop/start decision, so two restart
//! attempts can never race for the same hardware device. When no usable
//! device exists the worker degrades into a bounded wait loop that
//! re-checks at a small fixed interval and reacts to shutdown within that
//! interval.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::models::device::{DeviceInfo, Direction};
use crate::models::error::CaptureError;
use crate::registry::{DeviceRegistry, RegistryChange};
use crate::session::capture::{CaptureSession, SaveOutcome};
use crate::traits::audio_backend::AudioBackend;

/// How often the wait-for-device loop re-checks start eligibility. Also
/// bounds shutdown latency while waiting.
const WAIT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartOutcome {
    Started,
    NoDevice,
    OpenFailed,
}

#[derive(Debug)]
enum Command {
    /// Effective devices changed; restart the session against them.
    DevicesChanged,
    /// User asked for recording; start (or keep waiting) even if idle.
    Start,
    /// Stop recording and leave supervision passive until the next Start.
    Stop,
    Shutdown,
}

/// Per-direction capture enables plus the devices last resolved by the
/// registry, shared between the registry subscription and the worker.
#[derive(Debug, Default)]
struct Resolved {
    input: Option<DeviceInfo>,
    output: Option<DeviceInfo>,
    mic_enabled: bool,
    sound_enabled: bool,
}

impl Resolved {
    fn usable_input(&self) -> Option<DeviceInfo> {
        if self.mic_enabled {
            self.input.clone()
        } else {
            None
        }
    }

    fn usable_output(&self) -> Option<DeviceInfo> {
        if self.sound_enabled {
            self.output.clone()
        } else {
            None
        }
    }

    fn can_start(&self) -> bool {
        self.usable_input().is_some() || self.usable_output().is_some()
    }
}

/// Supervises one [`CaptureSession`], restarting it as the registry's
/// effective devices change and waiting out windows with no usable device.
pub struct RecordingSupervisor<B: AudioBackend> {
    session: Arc<Mutex<CaptureSession<B>>>,
    resolved: Arc<Mutex<Resolved>>,
    tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl<B: AudioBackend + 'static> RecordingSupervisor<B> {
    /// Wire the supervisor to a registry and start its worker. The session
    /// stays Idle until `engage()` is called; from then on device changes
    /// drive restarts until `disengage()` or shutdown.
    pub fn start(
        session: Arc<Mutex<CaptureSession<B>>>,
        registry: &DeviceRegistry,
        mic_enabled: bool,
        sound_enabled: bool,
    ) -> Result<Self, CaptureError> {
        let snapshot = registry.snapshot();
        let resolved = Arc::new(Mutex::new(Resolved {
            input: snapshot.effective_input,
            output: snapshot.effective_output,
            mic_enabled,
            sound_enabled,
        }));

        let (tx, rx) = unbounded::<Command>();

        // Registry callbacks run on the reducer thread; they only update
        // the shared devices and enqueue, never touch hardware.
        {
            let resolved = Arc::clone(&resolved);
            let tx = tx.clone();
            registry.subscribe(move |change| {
                if let RegistryChange::EffectiveDeviceChanged { direction, device } = change {
                    {
                        let mut resolved = resolved.lock();
                        match direction {
                            Direction::Input => resolved.input = device.clone(),
                            Direction::Output => resolved.output = device.clone(),
                        }
                    }
                    let _ = tx.send(Command::DevicesChanged);
                }
            });
        }

        let worker = {
            let session = Arc::clone(&session);
            let resolved = Arc::clone(&resolved);
            thread::Builder::new()
                .name("recording-supervisor".into())
                .spawn(move || {
                    // `engaged` tracks whether recording should be live;
                    // `waiting` is the no-device retry mode within it.
                    let mut engaged = false;
                    let mut waiting = false;

                    loop {
                        let command = if waiting {
                            match rx.recv_timeout(WAIT_RETRY_INTERVAL) {
                                Ok(command) => Some(command),
                                Err(RecvTimeoutError::Timeout) => None,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        } else {
                            match rx.recv() {
                                Ok(command) => Some(command),
                                Err(_) => break,
                            }
                        };

                        match command {
                            Some(Command::Shutdown) => break,
                            Some(Command::Stop) => {
                                engaged = false;
                                waiting = false;
                                session.lock().stop();
                                log::info!("recording disengaged");
                            }
                            Some(Command::Start) => {
                                engaged = true;
                                waiting = Self::try_restart(&session, &resolved)
                                    == RestartOutcome::NoDevice;
                            }
                            Some(Command::DevicesChanged) => {
                                if !engaged {
                                    continue;
                                }
                                log::debug!("effective devices changed, restarting recording");
                                waiting = Self::try_restart(&session, &resolved)
                                    == RestartOutcome::NoDevice;
                            }
                            // Wait interval elapsed: probe again.
                            None => {
                                if engaged {
                                    waiting = Self::try_restart(&session, &resolved)
                                        == RestartOutcome::NoDevice;
                                } else {
                                    waiting = false;
                                }
                            }
                        }

                        if waiting {
                            log::trace!("no usable device, waiting...");
                        }
                    }

                    log::debug!("recording supervisor stopped");
                })
                .map_err(|e| CaptureError::BackendFailure(format!("spawn failed: {e}")))?
        };

        Ok(Self {
            session,
            resolved,
            tx,
            worker: Some(worker),
        })
    }

    /// Stop any running session, then try to start against the currently
    /// resolved devices. `NoDevice` sends the caller into the wait loop;
    /// `OpenFailed` leaves the session Idle until the next device event.
    fn try_restart(
        session: &Arc<Mutex<CaptureSession<B>>>,
        resolved: &Arc<Mutex<Resolved>>,
    ) -> RestartOutcome {
        let (input, output, can_start) = {
            let resolved = resolved.lock();
            (
                resolved.usable_input(),
                resolved.usable_output(),
                resolved.can_start(),
            )
        };

        let mut session = session.lock();
        if session.is_running() {
            session.stop();
        }

        if !can_start {
            log::info!("cannot start recording: no device available, waiting for device...");
            return RestartOutcome::NoDevice;
        }

        match session.start(input, output) {
            Ok(()) => RestartOutcome::Started,
            Err(e) => {
                // The session rolled back to Idle; await the next device
                // event instead of hammering the failing hardware.
                log::warn!("failed to start recording: {e}");
                RestartOutcome::OpenFailed
            }
        }
    }

    /// Engage recording: start now if possible, else wait for a device.
    pub fn engage(&self) {
        let _ = self.tx.send(Command::Start);
    }

    /// Disengage recording: cancel any pending wait and stop the session.
    pub fn disengage(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Shut down: cancel any pending wait, await the worker's termination,
    /// then stop the session. Ordering prevents a racing restart from
    /// re-opening a device mid-shutdown.
    pub fn stop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.session.lock().stop();
    }

    /// Snapshot the current window through the session.
    pub fn save(&self, path: &Path) -> Result<SaveOutcome, CaptureError> {
        self.session.lock().save(path)
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().is_running()
    }

    pub fn set_gain(&self, direction: Direction, gain: f32) {
        self.session.lock().set_gain(direction, gain);
    }

    pub fn set_buffer_duration(&self, duration: Duration) {
        self.session.lock().set_buffer_duration(duration);
    }

    /// Flip the combine topology. Forces a full stop/start when a session
    /// is live, since the pipeline's combine stage is fixed at build time.
    pub fn set_separate_tracks(&self, separate_tracks: bool) {
        let restart = self.session.lock().set_separate_tracks(separate_tracks);
        if restart {
            let _ = self.tx.send(Command::DevicesChanged);
        }
    }

    /// Enable or disable one direction's capture; restarts like a device
    /// change so the session picks the new source set up.
    pub fn set_capture_enabled(&self, direction: Direction, enabled: bool) {
        {
            let mut resolved = self.resolved.lock();
            match direction {
                Direction::Input => resolved.mic_enabled = enabled,
                Direction::Output => resolved.sound_enabled = enabled,
            }
        }
        let _ = self.tx.send(Command::DevicesChanged);
    }

    pub fn session(&self) -> Arc<Mutex<CaptureSession<B>>> {
        Arc::clone(&self.session)
    }
}

impl<B: AudioBackend> Drop for RecordingSupervisor<B> {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
