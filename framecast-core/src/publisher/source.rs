//! Interleaved sample sources for the publisher.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use tracing::info;

use crate::error::{FramecastError, Result};

/// Anything that yields interleaved f32 frames at a fixed rate.
pub trait FrameSource: Send + 'static {
    fn channels(&self) -> usize;

    fn sample_rate(&self) -> u32;

    /// Read up to `frames` interleaved frames into the front of `buf`.
    ///
    /// `buf` holds at least `frames * channels()` samples. Returns the number
    /// of whole frames read; 0 means the source is exhausted.
    fn read_interleaved(&mut self, buf: &mut [f32], frames: usize) -> Result<usize>;
}

/// WAV file decoded with `hound`. Integer PCM is scaled into [-1.0, 1.0).
pub struct WavFileSource {
    path: PathBuf,
    reader: WavReader<BufReader<File>>,
    channels: usize,
    sample_rate: u32,
    int_scale: Option<f32>,
}

impl WavFileSource {
    /// # Errors
    /// Returns `FramecastError::AudioFile` if the file cannot be opened or is
    /// not a WAV file.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path).map_err(|source| FramecastError::AudioFile {
            path: path.to_path_buf(),
            source,
        })?;
        let spec = reader.spec();
        let int_scale = match spec.sample_format {
            SampleFormat::Float => None,
            SampleFormat::Int => Some(1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32),
        };

        info!(
            path = %path.display(),
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            bits = spec.bits_per_sample,
            frames = reader.duration(),
            "opened audio file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            int_scale,
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total frames in the file.
    pub fn duration_frames(&self) -> u32 {
        self.reader.duration()
    }
}

impl FrameSource for WavFileSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_interleaved(&mut self, buf: &mut [f32], frames: usize) -> Result<usize> {
        let wanted = frames * self.channels;
        let mut count = 0;
        match self.int_scale {
            None => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    buf[count] = sample?;
                    count += 1;
                }
            }
            Some(scale) => {
                for sample in self.reader.samples::<i32>().take(wanted) {
                    buf[count] = sample? as f32 * scale;
                    count += 1;
                }
            }
        }
        Ok(count / self.channels.max(1))
    }
}

/// Sine generator, one phase offset per channel.
pub struct ToneSource {
    channels: usize,
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    total_frames: usize,
    position: usize,
}

impl ToneSource {
    pub fn new(channels: usize, sample_rate: u32, frequency: f32, amplitude: f32, seconds: f32) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate,
            frequency,
            amplitude,
            total_frames: (f64::from(seconds.max(0.0)) * f64::from(sample_rate)).round() as usize,
            position: 0,
        }
    }

    /// Sample `frame` of `channel`. Channel `c` is phase-shifted by `0.1 + c/4` rad.
    pub fn sample_at(&self, channel: usize, frame: usize) -> f32 {
        let t = frame as f32 / self.sample_rate as f32;
        let phase = 0.1 + channel as f32 * 0.25;
        self.amplitude * (std::f32::consts::TAU * self.frequency * t + phase).sin()
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}

impl FrameSource for ToneSource {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_interleaved(&mut self, buf: &mut [f32], frames: usize) -> Result<usize> {
        let n = frames.min(self.total_frames - self.position);
        for f in 0..n {
            for c in 0..self.channels {
                buf[f * self.channels + c] = self.sample_at(c, self.position + f);
            }
        }
        self.position += n;
        Ok(n)
    }
}
