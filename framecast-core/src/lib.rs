//! # framecast-core
//!
//! Streams multichannel audio frames from an in-process bus to an output
//! device.
//!
//! ## Architecture
//!
//! ```text
//! FramePublisher ─► FrameBus ─► delivery task ─► PlaybackBridge (SPSC ring per channel)
//!                                                     │
//!                                            CallbackAdapter::render
//!                                                     │
//!                                            cpal output callback
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens in the delivery task.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod bridge;
pub mod buffering;
pub mod bus;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod publisher;

// Convenience re-exports for downstream crates
pub use audio::{DeviceInfo, DeviceSelector, OpenedDevice, OutputConfig};
pub use bridge::{BridgeConfig, DiagnosticsSnapshot, PlaybackBridge, PlaybackDiagnostics};
pub use bus::FrameBus;
pub use engine::{EngineConfig, PlaybackEngine};
pub use error::{FramecastError, Result};
pub use events::{PlaybackStatus, StatusEvent};
pub use message::{FrameMessage, StreamShape};
pub use publisher::{FramePublisher, FrameTiming, PublishSummary, PublisherConfig};
