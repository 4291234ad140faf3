//! Paced frame publisher.
//!
//! ## Loop (per tick)
//!
//! ```text
//! 1. Read frame_size interleaved frames from the source
//! 2. De-interleave the first `used_channels` channels, zero-padding a short read
//! 3. Publish the FrameMessage on the bus
//! 4. Stop after the first short read (the padded frame has been published)
//! ```
//!
//! Pacing is a `tokio::time::interval` with a period of exactly
//! `frame_size / sample_rate` seconds, so publication tracks the source's
//! real-time rate on average.

pub mod source;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    bus::FrameBus,
    error::{FramecastError, Result},
    message::FrameMessage,
};

pub use source::{FrameSource, ToneSource, WavFileSource};

/// Frame rate used when neither rate nor size is configured.
pub const DEFAULT_FRAME_RATE: u32 = 100;

/// Publisher parameters. `frame_rate` wins over `frame_size` when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublisherConfig {
    /// Frames per second; frame size becomes `sample_rate / frame_rate`.
    pub frame_rate: Option<u32>,
    /// Samples per channel per frame.
    pub frame_size: Option<usize>,
    /// Publish at most this many channels of the source.
    pub max_channels: Option<usize>,
}

/// Resolved frame size and pacing for a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTiming {
    pub sample_rate: u32,
    pub frame_size: usize,
    /// Nominal frames per second (may be fractional, e.g. 62.5).
    pub frame_rate: f64,
}

impl FrameTiming {
    /// Derive frame size and rate from whichever parameter was given.
    ///
    /// # Errors
    /// Returns `FramecastError::InvalidTiming` if the sample rate is zero or
    /// the derived frame size is zero.
    pub fn resolve(sample_rate: u32, frame_rate: Option<u32>, frame_size: Option<usize>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(FramecastError::InvalidTiming("source sample rate is zero".into()));
        }

        let frame_size = match (frame_rate.filter(|r| *r > 0), frame_size.filter(|s| *s > 0)) {
            (Some(rate), size) => {
                if size.is_some() {
                    warn!("frame rate already specified, ignoring frame size");
                }
                (sample_rate / rate) as usize
            }
            (None, Some(size)) => size,
            (None, None) => {
                warn!(
                    "neither frame size nor frame rate specified, using default frame rate of {}",
                    DEFAULT_FRAME_RATE
                );
                (sample_rate / DEFAULT_FRAME_RATE) as usize
            }
        };

        if frame_size == 0 {
            return Err(FramecastError::InvalidTiming(format!(
                "frame rate exceeds sample rate {sample_rate} Hz"
            )));
        }

        Ok(Self {
            sample_rate,
            frame_size,
            frame_rate: sample_rate as f64 / frame_size as f64,
        })
    }

    /// Time between two published frames.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate as f64)
    }
}

/// Totals for one publishing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishSummary {
    pub frames_published: u64,
    /// Real (non-padding) samples per channel.
    pub samples_per_channel: u64,
    /// Zero samples appended to the last frame.
    pub padded_samples: u64,
    /// True if the run stopped before the source ran out.
    pub interrupted: bool,
}

pub struct FramePublisher<S: FrameSource> {
    source: S,
    timing: FrameTiming,
    used_channels: usize,
    interleaved: Vec<f32>,
    finished: bool,
}

impl<S: FrameSource> FramePublisher<S> {
    pub fn new(source: S, config: &PublisherConfig) -> Result<Self> {
        let timing = FrameTiming::resolve(source.sample_rate(), config.frame_rate, config.frame_size)?;
        let input_channels = source.channels();
        if input_channels == 0 {
            return Err(FramecastError::InvalidTiming("source has no channels".into()));
        }

        let used_channels = match config.max_channels.filter(|m| *m > 0) {
            Some(max) if input_channels > max => {
                warn!("only transporting {} of {} input channels", max, input_channels);
                max
            }
            _ => input_channels,
        };

        info!(
            channels = used_channels,
            frame_size = timing.frame_size,
            sample_rate = timing.sample_rate,
            frame_rate = timing.frame_rate,
            "initialized frame publisher"
        );

        Ok(Self {
            interleaved: vec![0.0; timing.frame_size * input_channels],
            source,
            timing,
            used_channels,
            finished: false,
        })
    }

    pub fn timing(&self) -> FrameTiming {
        self.timing
    }

    pub fn used_channels(&self) -> usize {
        self.used_channels
    }

    /// Read and build the next frame.
    ///
    /// Returns the frame together with the number of real frames it holds.
    /// After a short read the publisher is finished and returns `None`.
    pub fn next_frame(&mut self) -> Result<Option<(FrameMessage, usize)>> {
        if self.finished {
            return Ok(None);
        }

        let frame_size = self.timing.frame_size;
        let input_channels = self.source.channels();
        let read = self.source.read_interleaved(&mut self.interleaved, frame_size)?;
        if read < frame_size {
            self.finished = true;
        }

        let channels = (0..self.used_channels)
            .map(|ch| {
                (0..frame_size)
                    .map(|i| {
                        if i < read {
                            self.interleaved[i * input_channels + ch]
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect();

        let frame = FrameMessage::new(
            self.used_channels,
            frame_size,
            self.timing.sample_rate as f64,
            channels,
        )?;
        Ok(Some((frame, read)))
    }

    /// Publish until the source is exhausted or `running` turns false.
    pub async fn run(mut self, bus: &FrameBus, running: Arc<AtomicBool>) -> Result<PublishSummary> {
        let mut ticker = tokio::time::interval(self.timing.period());
        let mut summary = PublishSummary::default();

        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                summary.interrupted = true;
                break;
            }

            let Some((frame, read)) = self.next_frame()? else {
                break;
            };
            let receivers = bus.publish(Arc::new(frame));
            summary.frames_published += 1;
            summary.samples_per_channel += read as u64;
            summary.padded_samples += (self.timing.frame_size - read) as u64;

            if summary.frames_published % 100 == 0 {
                debug!(frames = summary.frames_published, receivers, "publishing");
            }

            if self.finished {
                info!(
                    frames = summary.frames_published,
                    padded = summary.padded_samples,
                    "finished transmitting source"
                );
                break;
            }
        }

        Ok(summary)
    }
}
