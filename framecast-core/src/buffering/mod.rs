//! Lock-free SPSC ring buffer for one channel of audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>` whose `push_slice` / `pop_slice` are wait-free
//! and allocation-free, so the consumer half is safe to drive from the
//! real-time audio callback.
//!
//! A ring is created and immediately split: `channel_ring` hands out exactly
//! one `ChannelProducer` and one `ChannelConsumer`. Neither half is `Clone`,
//! and both take `&mut self`, so a second writer or reader cannot exist.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Smallest allowed ring size, in frames.
pub const MIN_RING_FRAMES: usize = 2;

/// Write half, held by the delivery context.
pub struct ChannelProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Read half, held by the real-time context.
pub struct ChannelConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Result of `ChannelConsumer::read_exact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Samples popped from the ring (they lead the output).
    pub read: usize,
    /// Trailing samples zero-filled because the ring ran dry.
    pub padded: usize,
}

impl ReadOutcome {
    pub fn is_underrun(&self) -> bool {
        self.padded > 0
    }
}

/// Create a ring holding `ring_frames * frame_size` samples.
///
/// `ring_frames` is raised to `MIN_RING_FRAMES` and `frame_size` to 1 so the
/// ring can always absorb one full delivery-to-callback jitter cycle.
pub fn channel_ring(frame_size: usize, ring_frames: usize) -> (ChannelProducer, ChannelConsumer) {
    let capacity = frame_size.max(1) * ring_frames.max(MIN_RING_FRAMES);
    let (prod, cons) = HeapRb::<f32>::new(capacity).split();
    (
        ChannelProducer { inner: prod },
        ChannelConsumer { inner: cons },
    )
}

impl ChannelProducer {
    /// Append all of `samples`, or nothing.
    ///
    /// Returns `false` without writing when fewer than `samples.len()` slots
    /// are free. That is the overrun signal.
    pub fn try_write(&mut self, samples: &[f32]) -> bool {
        if self.inner.vacant_len() < samples.len() {
            return false;
        }
        let written = self.inner.push_slice(samples);
        debug_assert_eq!(written, samples.len());
        true
    }

    /// Free slots. Only grows behind the producer's back.
    pub fn vacant(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn occupied(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}

impl ChannelConsumer {
    /// Fill `out` completely: buffered samples first, silence for the rest.
    ///
    /// Never blocks and never allocates.
    pub fn read_exact(&mut self, out: &mut [f32]) -> ReadOutcome {
        self.read_at_most(out, out.len())
    }

    /// Like `read_exact`, but pops no more than `limit` samples even if more
    /// are buffered. Used by the bridge to keep channels aligned.
    pub(crate) fn read_at_most(&mut self, out: &mut [f32], limit: usize) -> ReadOutcome {
        let want = limit.min(out.len());
        let read = self.inner.pop_slice(&mut out[..want]);
        out[read..].fill(0.0);
        ReadOutcome {
            read,
            padded: out.len() - read,
        }
    }

    /// Buffered samples. Only grows behind the consumer's back.
    pub fn occupied(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}
