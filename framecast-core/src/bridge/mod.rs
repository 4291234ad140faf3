//! The playback bridge between the frame bus and the audio callback.
//!
//! ```text
//! delivery task ── enqueue(&FrameMessage) ──► BridgeInput
//!                                               │  one SPSC ring per device channel
//!                                               ▼
//! audio callback ◄──────── pull(n) ────────── BridgeOutput
//! ```
//!
//! The bridge is built once, from the first observed frame, and is split into
//! an input half (owns every ring producer) and an output half (owns every
//! ring consumer plus preallocated scratch). The output half performs no
//! allocation, locking or I/O; one pull serves at most the ring capacity.
//!
//! ## Policy
//!
//! - **Overrun**: a frame is admitted into every ring or into none. If any
//!   ring lacks room for `frame_size` samples the whole frame is dropped and
//!   `overruns` increments; audio already buffered keeps its order.
//! - **Underrun**: `pull(n)` always yields exactly `n` samples per channel.
//!   Whatever is missing is silence, never repeated data, and `underruns`
//!   increments once for the call.
//! - **Shape mismatch**: a frame whose channel count, frame size or sample
//!   frequency differs from the construction shape is discarded and counted.
//!   Live rings are never resized.

pub mod diagnostics;
pub mod map;

use std::sync::Arc;

use crate::{
    buffering::{channel_ring, ChannelConsumer, ChannelProducer, ReadOutcome, MIN_RING_FRAMES},
    error::{FramecastError, Result},
    message::{FrameMessage, StreamShape},
};

pub use diagnostics::{DiagnosticsSnapshot, PlaybackDiagnostics};
pub use map::ChannelMap;

/// Ring sizing for a bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Ring capacity per channel, in frames. Values below 2 are raised to 2.
    /// Default: 8 (128 ms of 256-sample frames at 16 kHz).
    pub ring_frames: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { ring_frames: 8 }
    }
}

impl BridgeConfig {
    /// Ring length in frames for `frame_size`-sample frames played by a
    /// driver that takes `driver_frames` samples per callback.
    ///
    /// Never below `ring_frames`, and always enough for two driver periods
    /// (or two stream frames, whichever is larger).
    pub fn ring_frames_for(&self, frame_size: usize, driver_frames: Option<usize>) -> usize {
        let frame_size = frame_size.max(1);
        let period = driver_frames.unwrap_or(0).max(frame_size);
        (2 * period)
            .div_ceil(frame_size)
            .max(self.ring_frames)
            .max(MIN_RING_FRAMES)
    }

    /// This config with `ring_frames` raised for the given driver period.
    pub fn fitted(&self, frame_size: usize, driver_frames: Option<usize>) -> Self {
        Self {
            ring_frames: self.ring_frames_for(frame_size, driver_frames),
        }
    }
}

/// What `enqueue` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Admitted,
    /// Dropped whole: at least one ring was too full.
    Overrun,
    /// Discarded: the frame's shape differs from the bridge's.
    ShapeMismatch,
}

/// Both halves of the bridge, before they are handed to their contexts.
pub struct PlaybackBridge {
    input: BridgeInput,
    output: BridgeOutput,
}

impl PlaybackBridge {
    /// Build a bridge shaped by the first observed frame.
    ///
    /// # Errors
    /// Returns `FramecastError::AudioDevice` when `device_channels` is zero.
    pub fn new(
        shape: StreamShape,
        device_channels: usize,
        config: &BridgeConfig,
        diagnostics: Arc<PlaybackDiagnostics>,
    ) -> Result<Self> {
        if device_channels == 0 {
            return Err(FramecastError::AudioDevice(
                "device reports no output channels".into(),
            ));
        }

        let ring_frames = config.ring_frames.max(MIN_RING_FRAMES);
        let (producers, consumers): (Vec<_>, Vec<_>) = (0..device_channels)
            .map(|_| channel_ring(shape.frame_size, ring_frames))
            .unzip();
        let capacity = consumers.first().map_or(0, ChannelConsumer::capacity);

        Ok(Self {
            input: BridgeInput {
                shape,
                map: ChannelMap::new(shape.channel_count, device_channels),
                producers,
                silence: vec![0.0; shape.frame_size],
                diagnostics: Arc::clone(&diagnostics),
            },
            output: BridgeOutput {
                consumers,
                scratch: vec![vec![0.0; capacity]; device_channels],
                diagnostics,
            },
        })
    }

    pub fn enqueue(&mut self, frame: &FrameMessage) -> EnqueueOutcome {
        self.input.enqueue(frame)
    }

    pub fn pull(&mut self, n: usize) -> Pulled<'_> {
        self.output.pull(n)
    }

    pub fn input(&self) -> &BridgeInput {
        &self.input
    }

    /// Hand the input half to the delivery context and the output half to the
    /// real-time context.
    pub fn split(self) -> (BridgeInput, BridgeOutput) {
        (self.input, self.output)
    }
}

/// Delivery-side half: owns one ring producer per device channel.
pub struct BridgeInput {
    shape: StreamShape,
    map: ChannelMap,
    producers: Vec<ChannelProducer>,
    silence: Vec<f32>,
    diagnostics: Arc<PlaybackDiagnostics>,
}

impl BridgeInput {
    /// Copy one frame into the rings, all channels or none.
    pub fn enqueue(&mut self, frame: &FrameMessage) -> EnqueueOutcome {
        if !self.shape.matches(frame) {
            PlaybackDiagnostics::bump(&self.diagnostics.shape_mismatches, 1);
            return EnqueueOutcome::ShapeMismatch;
        }

        // The consumer can only free space, so room seen here stays available
        // for the writes below.
        let frame_size = self.shape.frame_size;
        if self.producers.iter().any(|p| p.vacant() < frame_size) {
            PlaybackDiagnostics::bump(&self.diagnostics.overruns, 1);
            return EnqueueOutcome::Overrun;
        }

        for (device_channel, producer) in self.producers.iter_mut().enumerate() {
            let samples = match self.map.source_for(device_channel) {
                Some(stream_channel) => &frame.channels()[stream_channel][..],
                None => &self.silence[..],
            };
            let written = producer.try_write(samples);
            debug_assert!(written, "room was checked for every ring");
        }

        PlaybackDiagnostics::bump(&self.diagnostics.frames_enqueued, 1);
        EnqueueOutcome::Admitted
    }

    pub fn shape(&self) -> StreamShape {
        self.shape
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    /// Frames currently buffered (the least-filled channel decides).
    pub fn buffered_frames(&self) -> usize {
        self.producers
            .iter()
            .map(ChannelProducer::occupied)
            .min()
            .unwrap_or(0)
            / self.shape.frame_size
    }
}

/// Real-time half: owns one ring consumer per device channel.
pub struct BridgeOutput {
    consumers: Vec<ChannelConsumer>,
    scratch: Vec<Vec<f32>>,
    diagnostics: Arc<PlaybackDiagnostics>,
}

impl BridgeOutput {
    /// Exactly `n` samples for every device channel.
    ///
    /// Never allocates: the scratch is sized to the ring capacity up front.
    /// Callers with a larger driver buffer pull it in `max_block()` pieces,
    /// as `CallbackAdapter` does.
    ///
    /// # Panics
    /// Panics if `n > max_block()`.
    pub fn pull(&mut self, n: usize) -> Pulled<'_> {
        assert!(
            n <= self.max_block(),
            "pull of {n} samples exceeds the {} sample block",
            self.max_block()
        );

        // A concurrent enqueue may have filled some rings but not yet the
        // others; reading the common minimum keeps channels sample-aligned.
        let available = self
            .consumers
            .iter()
            .map(ChannelConsumer::occupied)
            .min()
            .unwrap_or(0);
        let limit = available.min(n);

        for (consumer, buf) in self.consumers.iter_mut().zip(self.scratch.iter_mut()) {
            consumer.read_at_most(&mut buf[..n], limit);
        }

        let outcome = ReadOutcome {
            read: limit,
            padded: n - limit,
        };
        PlaybackDiagnostics::bump(&self.diagnostics.pulls, 1);
        if outcome.is_underrun() {
            PlaybackDiagnostics::bump(&self.diagnostics.underruns, 1);
            PlaybackDiagnostics::bump(&self.diagnostics.silent_samples, outcome.padded as u64);
        }

        Pulled {
            channels: &self.scratch,
            len: n,
            outcome,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.consumers.len()
    }

    /// Largest block `pull` serves without allocating.
    pub fn max_block(&self) -> usize {
        self.scratch.first().map_or(0, Vec::len)
    }
}

/// One pulled block: `len` samples for each device channel.
pub struct Pulled<'a> {
    channels: &'a [Vec<f32>],
    len: usize,
    outcome: ReadOutcome,
}

impl<'a> Pulled<'a> {
    pub fn channel(&self, index: usize) -> &'a [f32] {
        &self.channels[index][..self.len]
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn outcome(&self) -> ReadOutcome {
        self.outcome
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a [f32]> + '_ {
        (0..self.channels.len()).map(move |i| self.channel(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 16_000.0;

    fn frame(channels: Vec<Vec<f32>>) -> FrameMessage {
        let frame_size = channels[0].len();
        FrameMessage::new(channels.len(), frame_size, SR, channels).expect("valid frame")
    }

    fn ramp(start: f32, len: usize) -> Vec<f32> {
        (0..len).map(|i| start + i as f32).collect()
    }

    fn bridge(stream: usize, frame_size: usize, device: usize, ring_frames: usize) -> PlaybackBridge {
        let shape = StreamShape {
            channel_count: stream,
            frame_size,
            sample_frequency: SR,
        };
        PlaybackBridge::new(
            shape,
            device,
            &BridgeConfig { ring_frames },
            Arc::new(PlaybackDiagnostics::default()),
        )
        .expect("bridge")
    }

    #[test]
    fn pull_length_is_exact_at_every_fill_level() {
        let frame_size = 4;
        let ring_frames = 3;
        for filled in 0..=ring_frames {
            for n in [0usize, 1, 3, 4, 7, 12] {
                let mut b = bridge(2, frame_size, 2, ring_frames);
                for f in 0..filled {
                    let start = (f * frame_size) as f32;
                    let outcome =
                        b.enqueue(&frame(vec![ramp(start, frame_size), ramp(start, frame_size)]));
                    assert_eq!(outcome, EnqueueOutcome::Admitted);
                }
                let pulled = b.pull(n);
                assert_eq!(pulled.len(), n);
                for ch in pulled.iter() {
                    assert_eq!(ch.len(), n, "filled={filled} n={n}");
                }
            }
        }
    }

    #[test]
    fn empty_bridge_pulls_silence_and_counts_underrun() {
        let diagnostics = Arc::new(PlaybackDiagnostics::default());
        let shape = StreamShape {
            channel_count: 1,
            frame_size: 8,
            sample_frequency: SR,
        };
        let mut b = PlaybackBridge::new(shape, 1, &BridgeConfig::default(), Arc::clone(&diagnostics))
            .unwrap();
        let pulled = b.pull(8);
        assert!(pulled.channel(0).iter().all(|&s| s == 0.0));
        assert_eq!(pulled.outcome().padded, 8);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.underruns, 1);
        assert_eq!(snap.silent_samples, 8);
        assert_eq!(snap.pulls, 1);
    }

    #[test]
    fn partial_fill_leads_with_data_then_silence() {
        let mut b = bridge(1, 3, 1, 4);
        b.enqueue(&frame(vec![vec![0.1, 0.2, 0.3]]));
        let pulled = b.pull(5);
        assert_eq!(pulled.channel(0), &[0.1, 0.2, 0.3, 0.0, 0.0]);
        assert_eq!(pulled.outcome(), ReadOutcome { read: 3, padded: 2 });
    }

    #[test]
    fn narrow_stream_fills_extra_device_channels_with_silence() {
        let mut b = bridge(2, 4, 4, 4);
        let left = vec![0.5, 0.4, 0.3, 0.2];
        let right = vec![-0.5, -0.4, -0.3, -0.2];
        let left2 = vec![0.1, 0.1, 0.1, 0.1];
        let right2 = vec![-0.1, -0.1, -0.1, -0.1];
        b.enqueue(&frame(vec![left.clone(), right.clone()]));
        b.enqueue(&frame(vec![left2.clone(), right2.clone()]));

        for (l, r) in [(&left, &right), (&left2, &right2)] {
            let pulled = b.pull(4);
            assert_eq!(pulled.channel_count(), 4);
            assert_eq!(pulled.channel(0), l.as_slice());
            assert_eq!(pulled.channel(1), r.as_slice());
            assert_eq!(pulled.channel(2), &[0.0; 4]);
            assert_eq!(pulled.channel(3), &[0.0; 4]);
            assert!(!pulled.outcome().is_underrun());
        }
    }

    #[test]
    fn wide_stream_keeps_only_leading_channels() {
        let mut b = bridge(4, 2, 2, 4);
        b.enqueue(&frame(vec![
            vec![1.0, 1.0],
            vec![2.0, 2.0],
            vec![3.0, 3.0],
            vec![4.0, 4.0],
        ]));
        let pulled = b.pull(2);
        assert_eq!(pulled.channel_count(), 2);
        assert_eq!(pulled.channel(0), &[1.0, 1.0]);
        assert_eq!(pulled.channel(1), &[2.0, 2.0]);
        assert_eq!(b.input().channel_map().dropped_channels(), 2);
    }

    #[test]
    fn overrun_drops_whole_frame_and_preserves_order() {
        let diagnostics = Arc::new(PlaybackDiagnostics::default());
        let shape = StreamShape {
            channel_count: 2,
            frame_size: 2,
            sample_frequency: SR,
        };
        let mut b =
            PlaybackBridge::new(shape, 2, &BridgeConfig { ring_frames: 2 }, Arc::clone(&diagnostics))
                .unwrap();

        assert_eq!(
            b.enqueue(&frame(vec![vec![1.0, 2.0], vec![-1.0, -2.0]])),
            EnqueueOutcome::Admitted
        );
        assert_eq!(
            b.enqueue(&frame(vec![vec![3.0, 4.0], vec![-3.0, -4.0]])),
            EnqueueOutcome::Admitted
        );
        assert_eq!(
            b.enqueue(&frame(vec![vec![9.0, 9.0], vec![-9.0, -9.0]])),
            EnqueueOutcome::Overrun
        );
        assert_eq!(b.input().buffered_frames(), 2);

        let pulled = b.pull(6);
        assert_eq!(pulled.channel(0), &[1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
        assert_eq!(pulled.channel(1), &[-1.0, -2.0, -3.0, -4.0, 0.0, 0.0]);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.overruns, 1);
        assert_eq!(snap.frames_enqueued, 2);
    }

    #[test]
    fn shape_mismatch_is_discarded_without_touching_rings() {
        let diagnostics = Arc::new(PlaybackDiagnostics::default());
        let shape = StreamShape {
            channel_count: 2,
            frame_size: 2,
            sample_frequency: SR,
        };
        let mut b =
            PlaybackBridge::new(shape, 2, &BridgeConfig::default(), Arc::clone(&diagnostics))
                .unwrap();

        let mono = frame(vec![vec![1.0, 1.0]]);
        let longer = frame(vec![vec![1.0; 3], vec![1.0; 3]]);
        let other_rate = FrameMessage::silence(2, 2, 48_000.0).unwrap();
        for f in [&mono, &longer, &other_rate] {
            assert_eq!(b.enqueue(f), EnqueueOutcome::ShapeMismatch);
        }
        assert_eq!(b.input().buffered_frames(), 0);
        assert_eq!(diagnostics.snapshot().shape_mismatches, 3);
    }

    #[test]
    fn pull_reads_common_minimum_across_channels() {
        let mut b = bridge(2, 2, 2, 4);
        b.enqueue(&frame(vec![vec![1.0, 2.0], vec![5.0, 6.0]]));
        // Simulate an enqueue caught halfway: only channel 0 got its samples.
        let (mut input, mut output) = b.split();
        assert!(input.producers[0].try_write(&[3.0, 4.0]));

        let pulled = output.pull(4);
        assert_eq!(pulled.channel(0), &[1.0, 2.0, 0.0, 0.0]);
        assert_eq!(pulled.channel(1), &[5.0, 6.0, 0.0, 0.0]);

        assert!(input.producers[1].try_write(&[7.0, 8.0]));
        let pulled = output.pull(2);
        assert_eq!(pulled.channel(0), &[3.0, 4.0]);
        assert_eq!(pulled.channel(1), &[7.0, 8.0]);
    }

    #[test]
    fn ring_length_covers_two_driver_periods() {
        let config = BridgeConfig { ring_frames: 2 };
        assert_eq!(config.ring_frames_for(256, None), 2);
        assert_eq!(config.ring_frames_for(256, Some(256)), 2);
        assert_eq!(config.ring_frames_for(256, Some(1024)), 8);
        assert_eq!(config.ring_frames_for(256, Some(300)), 3);
        assert_eq!(config.ring_frames_for(256, Some(64)), 2);
        assert_eq!(BridgeConfig { ring_frames: 16 }.ring_frames_for(256, Some(1024)), 16);
    }

    #[test]
    fn driver_period_larger_than_frame_plays_without_loss() {
        let frame_size = 256;
        let driver_frames = 1024;
        let per_period = driver_frames / frame_size;
        let diagnostics = Arc::new(PlaybackDiagnostics::default());
        let shape = StreamShape {
            channel_count: 2,
            frame_size,
            sample_frequency: SR,
        };
        let config = BridgeConfig { ring_frames: 2 }.fitted(frame_size, Some(driver_frames));
        let b = PlaybackBridge::new(shape, 2, &config, Arc::clone(&diagnostics)).unwrap();
        let (mut input, mut output) = b.split();
        assert!(output.max_block() >= driver_frames);

        // The producer keeps exact pace: one driver period of frames per callback.
        let mut next = 0.0f32;
        for period in 0..50 {
            for _ in 0..per_period {
                let left = ramp(next, frame_size);
                let right: Vec<f32> = left.iter().map(|s| -s).collect();
                assert_eq!(input.enqueue(&frame(vec![left, right])), EnqueueOutcome::Admitted);
                next += frame_size as f32;
            }
            let pulled = output.pull(driver_frames);
            let start = (period * driver_frames) as f32;
            assert_eq!(pulled.channel(0)[0], start);
            assert_eq!(pulled.channel(0)[driver_frames - 1], start + (driver_frames - 1) as f32);
            assert_eq!(pulled.channel(1)[driver_frames - 1], -(start + (driver_frames - 1) as f32));
        }

        let snap = diagnostics.snapshot();
        assert_eq!(snap.frames_enqueued, 200);
        assert_eq!(snap.overruns, 0);
        assert_eq!(snap.underruns, 0);
        assert_eq!(snap.silent_samples, 0);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn pull_beyond_ring_capacity_is_refused() {
        let b = bridge(1, 2, 1, 2);
        let (_input, mut output) = b.split();
        assert_eq!(output.max_block(), 4);
        let _ = output.pull(5);
    }

    #[test]
    fn zero_device_channels_is_rejected() {
        let shape = StreamShape {
            channel_count: 2,
            frame_size: 4,
            sample_frequency: SR,
        };
        let err = PlaybackBridge::new(
            shape,
            0,
            &BridgeConfig::default(),
            Arc::new(PlaybackDiagnostics::default()),
        );
        assert!(matches!(err, Err(FramecastError::AudioDevice(_))));
    }
}
