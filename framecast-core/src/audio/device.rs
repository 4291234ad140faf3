//! Audio output device enumeration and selection.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{FramecastError, Result};

/// Metadata about an audio output device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Position in the host's output device list.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Widest channel layout any supported config offers.
    pub max_output_channels: u16,
    /// Sample rate of the device's default output config (Hz).
    pub default_sample_rate: u32,
    /// Whether this is the system default output device.
    pub is_default: bool,
}

/// How the operator picked a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceSelector {
    /// The host's default output device.
    #[default]
    Default,
    /// Position in the output device list.
    Index(usize),
    /// Case-insensitive substring of the device name.
    Name(String),
}

impl DeviceSelector {
    /// Parse operator input: a number selects by index, empty or `default`
    /// selects the default device, anything else matches by name.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("default") {
            return Self::Default;
        }
        match trimmed.parse::<usize>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(trimmed.to_ascii_lowercase()),
        }
    }

    /// Pick the device this selector refers to from `devices`.
    ///
    /// Name matching takes the first output device whose lowercased name
    /// contains the selector. `Default` takes the flagged default device, or
    /// the first one whose name contains "default" when the host flags none.
    ///
    /// # Errors
    /// - `FramecastError::NotAnOutputDevice` if an indexed device has no outputs.
    /// - `FramecastError::DeviceNotFound` if nothing matches.
    pub fn select<'a>(&self, devices: &'a [DeviceInfo]) -> Result<&'a DeviceInfo> {
        let found = match self {
            Self::Index(index) => {
                let device = devices.iter().find(|d| d.index == *index);
                if let Some(d) = device {
                    if d.max_output_channels < 1 {
                        return Err(FramecastError::NotAnOutputDevice { index: *index });
                    }
                }
                device
            }
            Self::Name(needle) => {
                let needle = needle.to_ascii_lowercase();
                devices
                    .iter()
                    .filter(|d| d.max_output_channels > 0)
                    .find(|d| d.name.to_ascii_lowercase().contains(&needle))
            }
            Self::Default => devices
                .iter()
                .find(|d| d.is_default)
                .or_else(|| {
                    devices
                        .iter()
                        .filter(|d| d.max_output_channels > 0)
                        .find(|d| d.name.to_ascii_lowercase().contains("default"))
                }),
        };
        found.ok_or_else(|| FramecastError::DeviceNotFound {
            selector: self.to_string(),
        })
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("default device"),
            Self::Index(i) => write!(f, "device #{i}"),
            Self::Name(n) => write!(f, "name containing '{n}'"),
        }
    }
}

/// Render the device list as a fixed-width table for the log.
pub fn format_device_table(devices: &[DeviceInfo]) -> String {
    let rule = format!("\t*{}*{}*{}*{}*", "-".repeat(5), "-".repeat(62), "-".repeat(9), "-".repeat(12));
    let mut out = String::from("Available playback devices\n");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "\t| {:>3} | {:<60} | {:^7} | {:^10} |",
        "#", "Name", "Outputs", "Samplerate"
    );
    let _ = writeln!(out, "{rule}");
    for d in devices.iter().filter(|d| d.max_output_channels > 0) {
        let name: String = d.name.chars().take(60).collect();
        let _ = writeln!(
            out,
            "\t| {:>3} | {:<60} | {:^7} | {:^10} |{}",
            d.index,
            name,
            d.max_output_channels,
            d.default_sample_rate,
            if d.is_default { " !" } else { "" }
        );
    }
    let _ = writeln!(out, "{rule}");
    out.push_str("\t  ! marks the system default output device");
    out
}

/// List all available audio output devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Output Device {}", index + 1));
                let max_output_channels = device
                    .supported_output_configs()
                    .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                    .unwrap_or(0);
                let default_sample_rate = device
                    .default_output_config()
                    .map(|c| c.sample_rate().0)
                    .unwrap_or(0);
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo {
                    index,
                    name,
                    max_output_channels,
                    default_sample_rate,
                    is_default,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                index: 0,
                name: "HDMI Capture".into(),
                max_output_channels: 0,
                default_sample_rate: 48_000,
                is_default: false,
            },
            DeviceInfo {
                index: 1,
                name: "USB Audio CODEC".into(),
                max_output_channels: 2,
                default_sample_rate: 44_100,
                is_default: false,
            },
            DeviceInfo {
                index: 2,
                name: "Built-in Speakers".into(),
                max_output_channels: 2,
                default_sample_rate: 48_000,
                is_default: true,
            },
        ]
    }

    #[test]
    fn parses_selectors() {
        assert_eq!(DeviceSelector::parse(""), DeviceSelector::Default);
        assert_eq!(DeviceSelector::parse("Default"), DeviceSelector::Default);
        assert_eq!(DeviceSelector::parse(" 3 "), DeviceSelector::Index(3));
        assert_eq!(
            DeviceSelector::parse("USB Audio"),
            DeviceSelector::Name("usb audio".into())
        );
    }

    #[test]
    fn selects_by_case_insensitive_substring() {
        let list = devices();
        let found = DeviceSelector::parse("codec").select(&list).unwrap();
        assert_eq!(found.index, 1);
    }

    #[test]
    fn name_match_skips_devices_without_outputs() {
        let list = devices();
        let err = DeviceSelector::parse("hdmi").select(&list);
        assert!(matches!(err, Err(FramecastError::DeviceNotFound { .. })));
    }

    #[test]
    fn index_must_be_an_output_device() {
        let list = devices();
        assert!(matches!(
            DeviceSelector::Index(0).select(&list),
            Err(FramecastError::NotAnOutputDevice { index: 0 })
        ));
        assert_eq!(DeviceSelector::Index(2).select(&list).unwrap().index, 2);
        assert!(DeviceSelector::Index(9).select(&list).is_err());
    }

    #[test]
    fn default_selector_prefers_flagged_device() {
        let list = devices();
        assert_eq!(DeviceSelector::Default.select(&list).unwrap().index, 2);
    }

    #[test]
    fn table_lists_only_output_devices() {
        let table = format_device_table(&devices());
        assert!(table.contains("USB Audio CODEC"));
        assert!(table.contains("Built-in Speakers"));
        assert!(!table.contains("HDMI Capture"));
        assert!(table.contains(" !"));
    }
}
