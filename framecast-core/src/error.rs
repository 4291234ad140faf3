use thiserror::Error;

/// All errors produced by framecast-core.
#[derive(Debug, Error)]
pub enum FramecastError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("no output device matching {selector}")]
    DeviceNotFound { selector: String },

    #[error("device #{index} has no output channels")]
    NotAnOutputDevice { index: usize },

    #[error("stream sample rate {stream} Hz does not match device rate {device} Hz")]
    SampleRateMismatch { stream: f64, device: u32 },

    #[error("invalid frame message: {0}")]
    InvalidFrame(String),

    #[error("invalid frame timing: {0}")]
    InvalidTiming(String),

    #[error("cannot open audio file {path}: {source}")]
    AudioFile {
        path: std::path::PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("audio file read error: {0}")]
    AudioRead(#[from] hound::Error),

    #[error("playback device closed before the stream was activated")]
    AdapterClosed,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FramecastError>;
