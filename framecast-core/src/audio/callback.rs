//! Real-time entry point driven by the audio driver.
//!
//! `CallbackAdapter` lives inside the driver's output callback closure and is
//! the only path from the driver to the bridge. It starts **Uninitialized**,
//! answering every callback with silence, and becomes **Streaming** once the
//! delivery side hands it a `BridgeOutput` through the paired `Activation`.
//!
//! `Activation::activate` consumes the handle, so the transition happens at
//! most once, and there is no way back to Uninitialized.
//!
//! The handoff slot is a bounded crossbeam channel of capacity 1; polling it
//! with `try_recv` is lock-free and allocation-free, which keeps the
//! Uninitialized branch within the real-time contract.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::{
    bridge::{BridgeOutput, PlaybackDiagnostics},
    error::{FramecastError, Result},
};

/// Adapter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Streaming,
}

pub struct CallbackAdapter {
    /// Handoff slot. Kept for the adapter's whole life so nothing is freed on
    /// the real-time thread at the transition.
    slot: Receiver<BridgeOutput>,
    /// `None` while Uninitialized. Never goes back to `None`.
    output: Option<BridgeOutput>,
    device_channels: usize,
    diagnostics: Arc<PlaybackDiagnostics>,
}

/// Single-use handle that moves the adapter into Streaming.
pub struct Activation {
    tx: Sender<BridgeOutput>,
    device_channels: usize,
}

impl CallbackAdapter {
    /// Create an Uninitialized adapter for a device with `device_channels`
    /// interleaved output channels, plus its activation handle.
    pub fn new(device_channels: usize, diagnostics: Arc<PlaybackDiagnostics>) -> (Self, Activation) {
        let (tx, rx) = bounded(1);
        (
            Self {
                slot: rx,
                output: None,
                device_channels,
                diagnostics,
            },
            Activation {
                tx,
                device_channels,
            },
        )
    }

    pub fn state(&self) -> AdapterState {
        if self.output.is_some() {
            AdapterState::Streaming
        } else {
            AdapterState::Uninitialized
        }
    }

    pub fn device_channels(&self) -> usize {
        self.device_channels
    }

    /// Fill an interleaved f32 driver buffer.
    pub fn render(&mut self, data: &mut [f32]) {
        self.render_with(data, |s| s);
    }

    /// Fill an interleaved driver buffer of any sample type, converting each
    /// f32 sample with `convert`.
    ///
    /// Every slot of `data` is written. Trailing samples that do not make up
    /// a whole frame are set to silence.
    pub fn render_with<T, F>(&mut self, data: &mut [T], convert: F)
    where
        T: Copy,
        F: Fn(f32) -> T,
    {
        let channels = self.device_channels.max(1);

        if self.output.is_none() {
            self.output = self.slot.try_recv().ok();
        }

        let Some(output) = self.output.as_mut() else {
            PlaybackDiagnostics::bump(&self.diagnostics.prestream_callbacks, 1);
            data.fill(convert(0.0));
            return;
        };

        let frames = data.len() / channels;
        let block = output.max_block().max(1);
        let mut done = 0;
        while done < frames {
            let n = block.min(frames - done);
            let pulled = output.pull(n);
            let dst = &mut data[done * channels..(done + n) * channels];
            for (frame_idx, slot) in dst.chunks_exact_mut(channels).enumerate() {
                for (ch, sample) in slot.iter_mut().enumerate() {
                    *sample = if ch < pulled.channel_count() {
                        convert(pulled.channel(ch)[frame_idx])
                    } else {
                        convert(0.0)
                    };
                }
            }
            done += n;
        }

        data[frames * channels..].fill(convert(0.0));
    }
}

impl Activation {
    /// Device channel count the bridge must be built with.
    pub fn device_channels(&self) -> usize {
        self.device_channels
    }

    /// Hand the bridge output to the adapter. It starts streaming on its
    /// next callback.
    ///
    /// # Errors
    /// - `FramecastError::AudioDevice` if `output` is not shaped for this device.
    /// - `FramecastError::AdapterClosed` if the adapter was already dropped.
    pub fn activate(self, output: BridgeOutput) -> Result<()> {
        if output.channel_count() != self.device_channels {
            return Err(FramecastError::AudioDevice(format!(
                "bridge has {} channels, device has {}",
                output.channel_count(),
                self.device_channels
            )));
        }
        self.tx
            .try_send(output)
            .map_err(|_| FramecastError::AdapterClosed)
    }
}
