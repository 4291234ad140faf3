//! Audio playback via cpal backend.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory
//! - Block on a mutex or condvar
//! - Perform I/O (including logging)
//!
//! The callback closure owns a `CallbackAdapter`, which only pulls from the
//! bridge's SPSC ring consumers and writes the driver buffer.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `PlaybackDevice` therefore must be created and dropped on the same
//! thread. The engine does this on a dedicated device thread.

pub mod callback;
pub mod device;

use std::sync::Arc;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use serde::{Deserialize, Serialize};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::{
    bridge::PlaybackDiagnostics,
    error::{FramecastError, Result},
};

pub use callback::{Activation, AdapterState, CallbackAdapter};
pub use device::{DeviceInfo, DeviceSelector};

/// Overrides for the opened output stream. `None` means "device default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    /// Interleaved output channels to open.
    pub channels: Option<u16>,
    /// Stream sample rate (Hz). Must equal the incoming stream's rate.
    pub sample_rate: Option<u32>,
    /// Driver buffer size in frames. Set it to the stream's `frame_size` so
    /// each callback asks for exactly one frame.
    pub buffer_frames: Option<u32>,
}

/// What was actually opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedDevice {
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_format: String,
    /// Fixed driver period in frames, or `None` when the driver picks it.
    pub buffer_frames: Option<u32>,
}

/// Handle to an active output stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct PlaybackDevice {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    stream: Stream,
    pub opened: OpenedDevice,
}

impl PlaybackDevice {
    /// Open the selected output device and start its callback.
    ///
    /// The callback starts Uninitialized and plays silence until the returned
    /// `Activation` hands it a bridge.
    ///
    /// # Errors
    /// - `FramecastError::NoDefaultOutputDevice` / `DeviceNotFound` /
    ///   `NotAnOutputDevice` when selection fails.
    /// - `FramecastError::AudioDevice` / `AudioStream` if cpal rejects the config.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        selector: &DeviceSelector,
        config: &OutputConfig,
        diagnostics: Arc<PlaybackDiagnostics>,
    ) -> Result<(Self, Activation)> {
        let host = cpal::default_host();

        let device = match selector {
            DeviceSelector::Default => host
                .default_output_device()
                .ok_or(FramecastError::NoDefaultOutputDevice)?,
            _ => {
                let infos = device::list_output_devices();
                let chosen = selector.select(&infos)?;
                host.output_devices()
                    .map_err(|e| FramecastError::AudioDevice(e.to_string()))?
                    .nth(chosen.index)
                    .ok_or_else(|| FramecastError::DeviceNotFound {
                        selector: selector.to_string(),
                    })?
            }
        };

        let name = device.name().unwrap_or_default();
        let supported = device
            .default_output_config()
            .map_err(|e| FramecastError::AudioDevice(e.to_string()))?;

        let channels = config.channels.unwrap_or_else(|| supported.channels());
        let sample_rate = config.sample_rate.unwrap_or(supported.sample_rate().0);
        let buffer_size = match config.buffer_frames {
            Some(frames) => BufferSize::Fixed(frames),
            None => BufferSize::Default,
        };

        info!(
            device = name.as_str(),
            channels,
            sample_rate,
            ?buffer_size,
            format = ?supported.sample_format(),
            "opening output device"
        );

        let stream_config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size,
        };

        let (adapter, activation) = CallbackAdapter::new(channels as usize, diagnostics);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, adapter),
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, adapter),
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, adapter),
            fmt => {
                return Err(FramecastError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| FramecastError::AudioStream(e.to_string()))?;

        Ok((
            Self {
                stream,
                opened: OpenedDevice {
                    name,
                    channels,
                    sample_rate,
                    sample_format: format!("{:?}", supported.sample_format()),
                    buffer_frames: config.buffer_frames,
                },
            },
            activation,
        ))
    }

    /// Pause the callback. Dropping the device afterwards releases the stream
    /// together with the adapter and the bridge output it owns.
    #[cfg(feature = "audio-cpal")]
    pub fn stop(&self) {
        if let Err(e) = self.stream.pause() {
            warn!("failed to pause output stream: {e}");
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut adapter: CallbackAdapter,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                adapter.render_with(data, <T as cpal::Sample>::from_sample::<f32>);
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| FramecastError::AudioStream(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl PlaybackDevice {
    pub fn open(
        _selector: &DeviceSelector,
        _config: &OutputConfig,
        _diagnostics: Arc<PlaybackDiagnostics>,
    ) -> Result<(Self, Activation)> {
        Err(FramecastError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(&self) {}
}
