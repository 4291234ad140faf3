//! The frame record carried on the bus.
//!
//! A `FrameMessage` is one time-aligned block of `frame_size` samples for each
//! of `channel_count` channels. It is validated on construction (and on
//! deserialization) and immutable afterwards, so every consumer may rely on
//! `channels().len() == channel_count()` and on every channel holding exactly
//! `frame_size()` samples.

use serde::{Deserialize, Serialize};

use crate::error::{FramecastError, Result};

/// Immutable multichannel audio frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFrameMessage", rename_all = "camelCase")]
pub struct FrameMessage {
    channel_count: usize,
    frame_size: usize,
    sample_frequency: f64,
    channels: Vec<Vec<f32>>,
}

/// Unvalidated wire shape; converted through `FrameMessage::new`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrameMessage {
    channel_count: usize,
    frame_size: usize,
    sample_frequency: f64,
    channels: Vec<Vec<f32>>,
}

impl TryFrom<RawFrameMessage> for FrameMessage {
    type Error = FramecastError;

    fn try_from(raw: RawFrameMessage) -> Result<Self> {
        FrameMessage::new(
            raw.channel_count,
            raw.frame_size,
            raw.sample_frequency,
            raw.channels,
        )
    }
}

impl FrameMessage {
    /// Build a frame, checking every shape invariant.
    ///
    /// # Errors
    /// Returns `FramecastError::InvalidFrame` when the channel list does not
    /// match `channel_count`, a channel does not hold `frame_size` samples,
    /// either count is zero, or `sample_frequency` is not a positive finite
    /// number.
    pub fn new(
        channel_count: usize,
        frame_size: usize,
        sample_frequency: f64,
        channels: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if channel_count == 0 {
            return Err(FramecastError::InvalidFrame("channel_count is zero".into()));
        }
        if frame_size == 0 {
            return Err(FramecastError::InvalidFrame("frame_size is zero".into()));
        }
        if !(sample_frequency.is_finite() && sample_frequency > 0.0) {
            return Err(FramecastError::InvalidFrame(format!(
                "sample_frequency must be positive, got {sample_frequency}"
            )));
        }
        if channels.len() != channel_count {
            return Err(FramecastError::InvalidFrame(format!(
                "expected {channel_count} channels, got {}",
                channels.len()
            )));
        }
        if let Some((idx, ch)) = channels
            .iter()
            .enumerate()
            .find(|(_, ch)| ch.len() != frame_size)
        {
            return Err(FramecastError::InvalidFrame(format!(
                "channel {idx} holds {} samples, expected {frame_size}",
                ch.len()
            )));
        }

        Ok(Self {
            channel_count,
            frame_size,
            sample_frequency,
            channels,
        })
    }

    /// A frame of silence with the given shape.
    pub fn silence(channel_count: usize, frame_size: usize, sample_frequency: f64) -> Result<Self> {
        Self::new(
            channel_count,
            frame_size,
            sample_frequency,
            vec![vec![0.0; frame_size]; channel_count],
        )
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_frequency(&self) -> f64 {
        self.sample_frequency
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Samples of one channel, or `None` if `index` is out of range.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// The shape this frame fixes when it is the first one observed.
    pub fn shape(&self) -> StreamShape {
        StreamShape {
            channel_count: self.channel_count,
            frame_size: self.frame_size,
            sample_frequency: self.sample_frequency,
        }
    }

    /// Nominal delivery rate in frames per second.
    pub fn frame_rate(&self) -> f64 {
        self.sample_frequency / self.frame_size as f64
    }
}

/// Channel count, frame size and sample frequency of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamShape {
    pub channel_count: usize,
    pub frame_size: usize,
    pub sample_frequency: f64,
}

impl StreamShape {
    /// Whether `frame` has exactly this shape.
    pub fn matches(&self, frame: &FrameMessage) -> bool {
        frame.channel_count == self.channel_count
            && frame.frame_size == self.frame_size
            && frame.sample_frequency == self.sample_frequency
    }
}

impl std::fmt::Display for StreamShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} channels, {} samples per frame @ {:.0} Hz",
            self.channel_count, self.frame_size, self.sample_frequency
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo(frame_size: usize) -> Vec<Vec<f32>> {
        vec![vec![0.25; frame_size], vec![-0.25; frame_size]]
    }

    #[test]
    fn accepts_consistent_frame() {
        let frame = FrameMessage::new(2, 4, 16_000.0, stereo(4)).expect("valid frame");
        assert_eq!(frame.channel_count(), 2);
        assert_eq!(frame.frame_size(), 4);
        assert_eq!(frame.channel(1), Some(&[-0.25f32; 4][..]));
        assert!(frame.channel(2).is_none());
        assert!((frame.frame_rate() - 4_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_channel_count_mismatch() {
        let err = FrameMessage::new(3, 4, 16_000.0, stereo(4));
        assert!(matches!(err, Err(FramecastError::InvalidFrame(_))));
    }

    #[test]
    fn rejects_short_channel() {
        let channels = vec![vec![0.0; 4], vec![0.0; 3]];
        let err = FrameMessage::new(2, 4, 16_000.0, channels);
        assert!(matches!(err, Err(FramecastError::InvalidFrame(_))));
    }

    #[test]
    fn rejects_non_positive_frequency() {
        assert!(FrameMessage::new(2, 4, 0.0, stereo(4)).is_err());
        assert!(FrameMessage::new(2, 4, f64::NAN, stereo(4)).is_err());
        assert!(FrameMessage::new(2, 4, -8_000.0, stereo(4)).is_err());
    }

    #[test]
    fn rejects_empty_shape() {
        assert!(FrameMessage::new(0, 4, 16_000.0, vec![]).is_err());
        assert!(FrameMessage::new(1, 0, 16_000.0, vec![vec![]]).is_err());
    }

    #[test]
    fn deserialization_enforces_invariants() {
        let ok = r#"{"channelCount":1,"frameSize":2,"sampleFrequency":8000.0,"channels":[[0.5,-0.5]]}"#;
        let frame: FrameMessage = serde_json::from_str(ok).expect("valid record");
        assert_eq!(frame.channel(0), Some(&[0.5f32, -0.5][..]));

        let bad = r#"{"channelCount":2,"frameSize":2,"sampleFrequency":8000.0,"channels":[[0.5,-0.5]]}"#;
        assert!(serde_json::from_str::<FrameMessage>(bad).is_err());
    }

    #[test]
    fn shape_matching_covers_all_fields() {
        let frame = FrameMessage::silence(2, 256, 16_000.0).unwrap();
        let shape = frame.shape();
        assert!(shape.matches(&frame));
        assert!(!shape.matches(&FrameMessage::silence(1, 256, 16_000.0).unwrap()));
        assert!(!shape.matches(&FrameMessage::silence(2, 128, 16_000.0).unwrap()));
        assert!(!shape.matches(&FrameMessage::silence(2, 256, 48_000.0).unwrap()));
    }
}
