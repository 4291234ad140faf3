//! Stream-channel → device-channel mapping.
//!
//! Stream channel `i` always lands on device channel `i`. When the stream is
//! narrower than the device, the extra device channels carry silence; when it
//! is wider, the trailing stream channels are dropped. This is the same
//! truncation the publisher applies with `max_channels`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    stream_channels: usize,
    device_channels: usize,
}

impl ChannelMap {
    pub fn new(stream_channels: usize, device_channels: usize) -> Self {
        Self {
            stream_channels,
            device_channels,
        }
    }

    pub fn stream_channels(&self) -> usize {
        self.stream_channels
    }

    pub fn device_channels(&self) -> usize {
        self.device_channels
    }

    /// Stream channel feeding `device_channel`, or `None` for a silent channel.
    pub fn source_for(&self, device_channel: usize) -> Option<usize> {
        (device_channel < self.stream_channels.min(self.device_channels)).then_some(device_channel)
    }

    /// Device channels that receive silence only.
    pub fn silent_channels(&self) -> usize {
        self.device_channels.saturating_sub(self.stream_channels)
    }

    /// Stream channels that are never played.
    pub fn dropped_channels(&self) -> usize {
        self.stream_channels.saturating_sub(self.device_channels)
    }
}
