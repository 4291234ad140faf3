//! Counters shared between the delivery context and the real-time context.
//!
//! Every field is a relaxed atomic: the real-time side only ever does
//! `fetch_add`, and the monitor task polls `snapshot()` asynchronously. No
//! counter is a threshold; playback continues whatever the values are.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct PlaybackDiagnostics {
    /// Frames admitted into the rings.
    pub frames_enqueued: AtomicU64,
    /// Frames dropped whole because some ring lacked room.
    pub overruns: AtomicU64,
    /// Frames discarded because their shape differed from the bridge's.
    pub shape_mismatches: AtomicU64,
    /// Messages the bus dropped because the delivery loop lagged.
    pub bus_lagged: AtomicU64,
    /// `pull` calls that had to pad with silence.
    pub underruns: AtomicU64,
    /// Samples (per channel) padded with silence while streaming.
    pub silent_samples: AtomicU64,
    /// `pull` calls served.
    pub pulls: AtomicU64,
    /// Driver callbacks answered with silence before activation.
    pub prestream_callbacks: AtomicU64,
}

impl PlaybackDiagnostics {
    pub fn reset(&self) {
        self.frames_enqueued.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.shape_mismatches.store(0, Ordering::Relaxed);
        self.bus_lagged.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.silent_samples.store(0, Ordering::Relaxed);
        self.pulls.store(0, Ordering::Relaxed);
        self.prestream_callbacks.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            shape_mismatches: self.shape_mismatches.load(Ordering::Relaxed),
            bus_lagged: self.bus_lagged.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            silent_samples: self.silent_samples.load(Ordering::Relaxed),
            pulls: self.pulls.load(Ordering::Relaxed),
            prestream_callbacks: self.prestream_callbacks.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_enqueued: u64,
    pub overruns: u64,
    pub shape_mismatches: u64,
    pub bus_lagged: u64,
    pub underruns: u64,
    pub silent_samples: u64,
    pub pulls: u64,
    pub prestream_callbacks: u64,
}

impl DiagnosticsSnapshot {
    /// Counter growth since `earlier`.
    pub fn since(&self, earlier: &DiagnosticsSnapshot) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_enqueued: self.frames_enqueued.saturating_sub(earlier.frames_enqueued),
            overruns: self.overruns.saturating_sub(earlier.overruns),
            shape_mismatches: self.shape_mismatches.saturating_sub(earlier.shape_mismatches),
            bus_lagged: self.bus_lagged.saturating_sub(earlier.bus_lagged),
            underruns: self.underruns.saturating_sub(earlier.underruns),
            silent_samples: self.silent_samples.saturating_sub(earlier.silent_samples),
            pulls: self.pulls.saturating_sub(earlier.pulls),
            prestream_callbacks: self
                .prestream_callbacks
                .saturating_sub(earlier.prestream_callbacks),
        }
    }

    /// Whether any loss or padding was recorded.
    pub fn has_glitches(&self) -> bool {
        self.overruns > 0 || self.underruns > 0 || self.shape_mismatches > 0 || self.bus_lagged > 0
    }
}
