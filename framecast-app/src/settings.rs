//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use framecast_core::{
    bus::{DEFAULT_QUEUE_DEPTH, DEFAULT_TOPIC},
    BridgeConfig, DeviceSelector, EngineConfig, OutputConfig, PublisherConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Device index, name substring, or `None` for the system default.
    pub output_device: Option<String>,
    pub output_channels: Option<u16>,
    pub output_sample_rate: Option<u32>,
    pub buffer_frames: Option<u32>,
    pub ring_frames: usize,
    pub topic: String,
    pub queue_depth: usize,
    pub frame_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub max_channels: Option<usize>,
    pub first_wait_ms: u64,
    /// 0 disables the periodic diagnostics log.
    pub diagnostics_interval_secs: u64,
    pub log_filter: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            output_device: None,
            output_channels: None,
            output_sample_rate: None,
            buffer_frames: None,
            ring_frames: BridgeConfig::default().ring_frames,
            topic: DEFAULT_TOPIC.into(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            frame_rate: None,
            frame_size: None,
            max_channels: None,
            first_wait_ms: 1_000,
            diagnostics_interval_secs: 5,
            log_filter: "framecast=info".into(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.output_device = self
            .output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.output_channels = self.output_channels.filter(|c| *c > 0);
        self.output_sample_rate = self.output_sample_rate.filter(|r| *r > 0);
        self.buffer_frames = self.buffer_frames.filter(|b| *b > 0);
        self.ring_frames = self.ring_frames.clamp(2, 1_024);
        self.topic = normalize_topic(&self.topic);
        self.queue_depth = self.queue_depth.clamp(1, 1_024);
        self.frame_rate = self.frame_rate.filter(|r| *r > 0);
        self.frame_size = self.frame_size.filter(|s| *s > 0);
        self.max_channels = self.max_channels.filter(|m| *m > 0);
        self.first_wait_ms = self.first_wait_ms.clamp(10, 10_000);
        self.diagnostics_interval_secs = self.diagnostics_interval_secs.min(3_600);
        if self.log_filter.trim().is_empty() {
            self.log_filter = "framecast=info".into();
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            device: self
                .output_device
                .as_deref()
                .map(DeviceSelector::parse)
                .unwrap_or_default(),
            output: OutputConfig {
                channels: self.output_channels,
                sample_rate: self.output_sample_rate,
                buffer_frames: self.buffer_frames,
            },
            bridge: BridgeConfig {
                ring_frames: self.ring_frames,
            },
            first_wait: Duration::from_millis(self.first_wait_ms),
            diagnostics_interval: (self.diagnostics_interval_secs > 0)
                .then(|| Duration::from_secs(self.diagnostics_interval_secs)),
        }
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            frame_rate: self.frame_rate,
            frame_size: self.frame_size,
            max_channels: self.max_channels,
        }
    }
}

pub fn normalize_topic(raw: &str) -> String {
    let topic = raw.trim().trim_end_matches('/');
    if topic.is_empty() {
        DEFAULT_TOPIC.into()
    } else if topic.starts_with('/') {
        topic.into()
    } else {
        format!("/{topic}")
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Framecast")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("framecast")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
