//! Engine status events.
//!
//! Broadcast by `PlaybackEngine` on every lifecycle change. Serialized with
//! lowercase status names so the CLI (and anything listening on JSON) sees
//! `"waiting"`, `"streaming"` and so on.

use serde::{Deserialize, Serialize};

use crate::message::StreamShape;

/// Current state of the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Device open and playing silence; no frame seen yet.
    Waiting,
    /// Bridge built and handed to the audio callback.
    Streaming,
    /// Device released; engine may be restarted.
    Stopped,
    /// Delivery hit a fatal configuration error.
    Error,
}

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: PlaybackStatus,
    /// Shape of the stream once known.
    pub shape: Option<StreamShape>,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}
