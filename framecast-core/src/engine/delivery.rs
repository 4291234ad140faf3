//! Async delivery loop.
//!
//! ## Stages
//!
//! ```text
//! 1. Wait for the first frame (growing timeouts, silence keeps playing)
//! 2. Check its sample frequency against the opened device rate
//! 3. Build the bridge from the first frame's shape (rings hold at least two
//!    driver periods) and split it
//! 4. Enqueue the first frame, then activate the callback adapter
//! 5. Enqueue every later frame until shutdown or the bus closes
//! ```
//!
//! Runs as a tokio task. Everything here may log; the audio callback on the
//! other side of the rings never does.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    audio::{Activation, OpenedDevice},
    bridge::{BridgeConfig, BridgeInput, EnqueueOutcome, PlaybackBridge, PlaybackDiagnostics},
    bus::{Delivery, FirstFrame, FrameSubscription},
    error::{FramecastError, Result},
    events::PlaybackStatus,
    message::StreamShape,
};

use super::StatusCell;

/// Minimum spacing between two warnings of the same kind.
const WARN_INTERVAL: Duration = Duration::from_secs(1);

/// All context the delivery loop needs, passed as one struct so the spawn
/// site stays tidy.
pub struct DeliveryContext {
    pub subscription: FrameSubscription,
    pub activation: Activation,
    pub device: OpenedDevice,
    pub bridge: BridgeConfig,
    pub first_wait: Duration,
    pub running: Arc<AtomicBool>,
    pub shutdown: watch::Receiver<bool>,
    pub status: StatusCell,
    pub diagnostics: Arc<PlaybackDiagnostics>,
}

/// Totals for one delivery run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeliverySummary {
    pub shape: Option<StreamShape>,
    pub frames_received: u64,
}

/// Rate limiter for a repeating warning: the first occurrence is reported
/// immediately, later ones at most once per `WARN_INTERVAL` with a count.
struct WarnLimiter {
    last: Option<Instant>,
    suppressed: u64,
}

impl WarnLimiter {
    fn new() -> Self {
        Self {
            last: None,
            suppressed: 0,
        }
    }

    /// Returns the number of occurrences to report, or `None` to stay quiet.
    fn hit(&mut self) -> Option<u64> {
        self.suppressed += 1;
        let due = self.last.map_or(true, |t| t.elapsed() >= WARN_INTERVAL);
        if !due {
            return None;
        }
        self.last = Some(Instant::now());
        Some(std::mem::take(&mut self.suppressed))
    }
}

/// Run delivery until shutdown, bus close, or a fatal configuration error.
///
/// A fatal error also moves the engine status to `Error`.
pub async fn run(ctx: DeliveryContext) -> Result<DeliverySummary> {
    let status = ctx.status.clone();
    let result = deliver(ctx).await;
    if let Err(e) = &result {
        tracing::error!("delivery failed: {e}");
        status.set(PlaybackStatus::Error, None, Some(e.to_string()));
    }
    result
}

async fn deliver(mut ctx: DeliveryContext) -> Result<DeliverySummary> {
    info!(
        topic = ctx.subscription.topic(),
        device = ctx.device.name.as_str(),
        "delivery started, waiting for first frame"
    );

    let running = Arc::clone(&ctx.running);
    let first = tokio::select! {
        first = ctx
            .subscription
            .wait_for_first(ctx.first_wait, || running.load(Ordering::Relaxed)) => first,
        _ = shutdown_signal(&mut ctx.shutdown) => None,
    };
    let Some(FirstFrame { frame: first, lagged }) = first else {
        info!("delivery stopped before the first frame");
        return Ok(DeliverySummary::default());
    };
    PlaybackDiagnostics::bump(&ctx.diagnostics.bus_lagged, lagged);

    let shape = first.shape();
    if shape.sample_frequency != f64::from(ctx.device.sample_rate) {
        return Err(FramecastError::SampleRateMismatch {
            stream: shape.sample_frequency,
            device: ctx.device.sample_rate,
        });
    }

    let driver_frames = ctx.device.buffer_frames.map(|f| f as usize);
    let bridge_config = ctx.bridge.fitted(shape.frame_size, driver_frames);
    if bridge_config.ring_frames > ctx.bridge.ring_frames {
        info!(
            configured = ctx.bridge.ring_frames,
            ring_frames = bridge_config.ring_frames,
            ?driver_frames,
            "ring raised to hold two driver periods"
        );
    }
    if driver_frames.is_some_and(|f| f != shape.frame_size) {
        warn!(
            ?driver_frames,
            frame_size = shape.frame_size,
            "driver period differs from the stream frame size"
        );
    }

    let bridge = PlaybackBridge::new(
        shape,
        ctx.device.channels as usize,
        &bridge_config,
        Arc::clone(&ctx.diagnostics),
    )?;
    let (mut input, output) = bridge.split();
    log_channel_map(&input);

    info!(
        %shape,
        frame_rate = first.frame_rate(),
        ring_frames = bridge_config.ring_frames,
        "stream shape fixed, activating playback"
    );

    let mut summary = DeliverySummary {
        shape: Some(shape),
        frames_received: 1,
    };
    input.enqueue(&first);
    ctx.activation.activate(output)?;
    ctx.status.set(PlaybackStatus::Streaming, Some(shape), None);

    let mut overrun_warn = WarnLimiter::new();
    let mut mismatch_warn = WarnLimiter::new();

    loop {
        let delivery = tokio::select! {
            d = ctx.subscription.recv() => d,
            _ = shutdown_signal(&mut ctx.shutdown) => break,
        };

        match delivery {
            Delivery::Frame(frame) => {
                summary.frames_received += 1;
                match input.enqueue(&frame) {
                    EnqueueOutcome::Admitted => {}
                    EnqueueOutcome::Overrun => {
                        if let Some(n) = overrun_warn.hit() {
                            warn!(
                                dropped = n,
                                buffered = input.buffered_frames(),
                                "playback buffer full, dropping frames"
                            );
                        }
                    }
                    EnqueueOutcome::ShapeMismatch => {
                        if let Some(n) = mismatch_warn.hit() {
                            warn!(
                                discarded = n,
                                expected = %shape,
                                got = %frame.shape(),
                                "discarding frames with a different shape"
                            );
                        }
                    }
                }
            }
            Delivery::Lagged(n) => {
                PlaybackDiagnostics::bump(&ctx.diagnostics.bus_lagged, n);
                warn!(lost = n, "delivery lagged behind the bus");
            }
            Delivery::Closed => {
                info!("frame bus closed");
                break;
            }
        }
    }

    debug!(frames = summary.frames_received, "delivery finished");
    Ok(summary)
}

/// Resolves once shutdown is requested or the engine handle is gone.
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn log_channel_map(input: &BridgeInput) {
    let map = input.channel_map();
    if map.silent_channels() > 0 {
        info!(
            stream = map.stream_channels(),
            device = map.device_channels(),
            "device has more channels than the stream, extra channels stay silent"
        );
    }
    if map.dropped_channels() > 0 {
        warn!(
            stream = map.stream_channels(),
            device = map.device_channels(),
            "device has fewer channels than the stream, dropping {} channel(s)",
            map.dropped_channels()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_limiter_reports_first_then_batches() {
        let mut limiter = WarnLimiter::new();
        assert_eq!(limiter.hit(), Some(1));
        assert_eq!(limiter.hit(), None);
        assert_eq!(limiter.hit(), None);
        limiter.last = Some(Instant::now() - WARN_INTERVAL);
        assert_eq!(limiter.hit(), Some(3));
    }
}
