//! `PlaybackEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! PlaybackEngine::new()
//!     └─► start(&bus)     → device open, silence playing, status = Waiting
//!         │                 first frame → bridge built, status = Streaming
//!         └─► stop()      → device thread joined, delivery stopped, status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent: calling them in the wrong state returns
//! an error rather than panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread affinity).
//! `PlaybackDevice` is therefore created *inside* a dedicated device thread,
//! which holds it until shutdown is signalled and then drops it there. A sync
//! oneshot channel propagates open-device errors back to the `start()` caller.
//!
//! `stop()` quiesces the real-time side first: the device thread pauses and
//! drops the stream (and the `BridgeOutput` inside its callback) before the
//! delivery task is told to finish.

pub mod delivery;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::{
    audio::{Activation, DeviceSelector, OpenedDevice, OutputConfig, PlaybackDevice},
    bridge::{BridgeConfig, DiagnosticsSnapshot, PlaybackDiagnostics},
    bus::FrameBus,
    error::{FramecastError, Result},
    events::{PlaybackStatus, StatusEvent},
    message::StreamShape,
};

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Configuration for `PlaybackEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which output device to open.
    pub device: DeviceSelector,
    /// Channel/rate/buffer overrides for the output stream.
    pub output: OutputConfig,
    /// Ring sizing for the bridge built from the first frame.
    pub bridge: BridgeConfig,
    /// First wait for the first frame; later waits grow. Default: 1 s.
    pub first_wait: Duration,
    /// How often the monitor logs counter deltas. `None` disables it.
    /// Default: 5 s.
    pub diagnostics_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: DeviceSelector::Default,
            output: OutputConfig::default(),
            bridge: BridgeConfig::default(),
            first_wait: Duration::from_secs(1),
            diagnostics_interval: Some(Duration::from_secs(5)),
        }
    }
}

/// Status mutex plus its broadcast sender. Cheap to clone into tasks.
#[derive(Clone)]
pub struct StatusCell {
    status: Arc<Mutex<PlaybackStatus>>,
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            status: Arc::new(Mutex::new(PlaybackStatus::Idle)),
            tx,
        }
    }

    pub fn get(&self) -> PlaybackStatus {
        *self.status.lock()
    }

    pub fn set(&self, status: PlaybackStatus, shape: Option<StreamShape>, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.tx.send(StatusEvent {
            status,
            shape,
            detail,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles owned while the engine runs.
struct Session {
    device_thread: JoinHandle<()>,
    device_shutdown: Sender<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// The top-level engine handle.
///
/// `PlaybackEngine` is `Send + Sync`; all fields use interior mutability.
pub struct PlaybackEngine {
    config: EngineConfig,
    /// `true` between a successful `start()` and `stop()`.
    running: Arc<AtomicBool>,
    status: StatusCell,
    diagnostics: Arc<PlaybackDiagnostics>,
    session: Mutex<Option<Session>>,
}

impl PlaybackEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: StatusCell::new(),
            diagnostics: Arc::new(PlaybackDiagnostics::default()),
            session: Mutex::new(None),
        }
    }

    /// Open the output device and start waiting for frames on `bus`.
    ///
    /// Blocks until the device is confirmed open (or fails). Must be called
    /// from within a tokio runtime; the delivery and monitor loops run as
    /// tasks on it.
    ///
    /// # Errors
    /// - `FramecastError::AlreadyRunning` if already started.
    /// - Device selection or stream errors from `PlaybackDevice::open`.
    pub fn start(&self, bus: &FrameBus) -> Result<OpenedDevice> {
        if self.running.load(Ordering::SeqCst) {
            return Err(FramecastError::AlreadyRunning);
        }

        self.diagnostics.reset();

        // Subscribe before the device opens so no early frame is missed.
        let subscription = bus.subscribe();

        let selector = self.config.device.clone();
        let output = self.config.output.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<(OpenedDevice, Activation)>>();
        let (device_shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let device_thread = std::thread::Builder::new()
            .name("framecast-device".into())
            .spawn(move || {
                // Must happen on THIS thread: cpal::Stream is !Send.
                let device = match PlaybackDevice::open(&selector, &output, diagnostics) {
                    Ok((device, activation)) => {
                        let _ = open_tx.send(Ok((device.opened.clone(), activation)));
                        device
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                // Park until stop() signals or drops the sender.
                let _ = shutdown_rx.recv();
                device.stop();
                drop(device);
            })?;

        let (opened, activation) = match open_rx.recv() {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                let _ = device_thread.join();
                self.status.set(PlaybackStatus::Error, None, Some(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                // Channel closed before a message was sent: the device thread panicked.
                let _ = device_thread.join();
                self.status
                    .set(PlaybackStatus::Error, None, Some("device thread failed to start".into()));
                return Err(FramecastError::Other(anyhow::anyhow!(
                    "device thread died unexpectedly"
                )));
            }
        };

        info!(
            device = opened.name.as_str(),
            channels = opened.channels,
            sample_rate = opened.sample_rate,
            format = opened.sample_format.as_str(),
            "output device open, playing silence until the first frame"
        );

        self.running.store(true, Ordering::SeqCst);
        self.status.set(PlaybackStatus::Waiting, None, None);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(delivery::run(delivery::DeliveryContext {
            subscription,
            activation,
            device: opened.clone(),
            bridge: self.config.bridge.clone(),
            first_wait: self.config.first_wait,
            running: Arc::clone(&self.running),
            shutdown: shutdown_rx.clone(),
            status: self.status.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        }));

        if let Some(interval) = self.config.diagnostics_interval {
            tokio::spawn(monitor(Arc::clone(&self.diagnostics), interval, shutdown_rx));
        }

        *self.session.lock() = Some(Session {
            device_thread,
            device_shutdown,
            shutdown_tx,
        });

        Ok(opened)
    }

    /// Stop playback and release the device.
    ///
    /// # Errors
    /// - `FramecastError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        let Some(session) = self.session.lock().take() else {
            return Err(FramecastError::NotRunning);
        };
        self.running.store(false, Ordering::SeqCst);

        // Real-time side first.
        let _ = session.device_shutdown.send(());
        if session.device_thread.join().is_err() {
            warn!("device thread panicked during shutdown");
        }

        let _ = session.shutdown_tx.send(true);

        let snapshot = self.diagnostics.snapshot();
        info!(
            frames = snapshot.frames_enqueued,
            overruns = snapshot.overruns,
            underruns = snapshot.underruns,
            "engine stopped"
        );
        if self.status.get() != PlaybackStatus::Error {
            self.status.set(PlaybackStatus::Stopped, None, None);
        }
        Ok(())
    }

    /// Whether a device session is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> PlaybackStatus {
        self.status.get()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    /// Snapshot of playback counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if self.session.lock().is_some() {
            let _ = self.stop();
        }
    }
}

/// Periodically log counter growth; silent intervals are skipped.
async fn monitor(diagnostics: Arc<PlaybackDiagnostics>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    let mut last = diagnostics.snapshot();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let now = diagnostics.snapshot();
        let delta = now.since(&last);
        last = now;

        if delta.has_glitches() {
            warn!(
                enqueued = delta.frames_enqueued,
                overruns = delta.overruns,
                underruns = delta.underruns,
                silent_samples = delta.silent_samples,
                shape_mismatches = delta.shape_mismatches,
                bus_lagged = delta.bus_lagged,
                "playback glitches in the last interval"
            );
        } else if delta.pulls > 0 || delta.frames_enqueued > 0 {
            tracing::debug!(
                enqueued = delta.frames_enqueued,
                pulls = delta.pulls,
                "playback healthy"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_cell_broadcasts_changes() {
        let cell = StatusCell::new();
        let mut rx = cell.subscribe();
        assert_eq!(cell.get(), PlaybackStatus::Idle);

        cell.set(PlaybackStatus::Waiting, None, None);
        assert_eq!(cell.get(), PlaybackStatus::Waiting);
        let event = rx.try_recv().expect("status event");
        assert_eq!(event.status, PlaybackStatus::Waiting);
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let engine = PlaybackEngine::new(EngineConfig::default());
        assert!(matches!(engine.stop(), Err(FramecastError::NotRunning)));
        assert_eq!(engine.status(), PlaybackStatus::Idle);
        assert!(!engine.is_running());
    }
}
