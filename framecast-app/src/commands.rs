//! Command handlers for the `framecast` binary.

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{Context, Result};
use framecast_core::{
    audio::device::{format_device_table, list_output_devices},
    publisher::{FrameSource, ToneSource, WavFileSource},
    FrameBus, FramePublisher, FrameTiming, OutputConfig, PlaybackEngine, PlaybackStatus,
    PublishSummary, PublisherConfig,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::settings::{save_settings, AppSettings};
use crate::{FramingArgs, PlayArgs};

/// Extra time after the last frame for the device to drain the rings.
const DRAIN_MARGIN: Duration = Duration::from_millis(250);

/// Tone sample rate when no output rate is configured.
const DEFAULT_TONE_RATE: u32 = 48_000;

/// Print every output device as a table.
pub fn devices() -> Result<()> {
    let devices = list_output_devices();
    if devices.is_empty() {
        warn!("no output devices found");
    }
    println!("{}", format_device_table(&devices));
    Ok(())
}

/// Print a WAV file's layout and the timing it would be published with.
pub fn inspect(file: &Path, settings: &AppSettings, framing: &FramingArgs) -> Result<()> {
    let source = WavFileSource::open(file)?;
    let config = apply_framing(settings.publisher_config(), framing);
    let timing = FrameTiming::resolve(source.sample_rate(), config.frame_rate, config.frame_size)?;
    let channels = config
        .max_channels
        .map_or(source.channels(), |m| m.min(source.channels()));

    let report = serde_json::json!({
        "file": source.path().display().to_string(),
        "channels": source.channels(),
        "publishedChannels": channels,
        "sampleRate": source.sample_rate(),
        "durationFrames": source.duration_frames(),
        "timing": timing,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Start the engine, publish the chosen source, wait for playback to drain
/// and print the final counters.
pub async fn play(args: PlayArgs, settings: AppSettings, settings_path: &Path) -> Result<()> {
    let settings = apply_play_overrides(settings, &args);
    if args.save {
        save_settings(settings_path, &settings)
            .with_context(|| format!("failed to save settings to {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }

    // The stream rate and frame size are known before the device opens, so
    // the device runs at that rate and asks for one frame per callback.
    let file_source = args.file.as_deref().map(WavFileSource::open).transpose()?;
    let mut engine_config = settings.engine_config();
    let stream_rate = match &file_source {
        Some(source) => source.sample_rate(),
        None => engine_config.output.sample_rate.unwrap_or(DEFAULT_TONE_RATE),
    };
    let config = settings.publisher_config();
    let timing = FrameTiming::resolve(stream_rate, config.frame_rate, config.frame_size)?;
    fit_output(&mut engine_config.output, &timing);

    let bus = FrameBus::new(&settings.topic, settings.queue_depth);
    let engine = PlaybackEngine::new(engine_config);
    let mut status_rx = engine.subscribe_status();
    let opened = engine.start(&bus).context("failed to start playback engine")?;
    info!(
        device = opened.name.as_str(),
        sample_rate = opened.sample_rate,
        frame_size = timing.frame_size,
        "playback device ready"
    );

    let running = Arc::new(AtomicBool::new(true));

    let publishing = async {
        match file_source {
            Some(source) => publish(source, &config, &bus, Arc::clone(&running)).await,
            None => {
                let source = ToneSource::new(
                    args.tone_channels,
                    stream_rate,
                    args.tone.unwrap_or(440.0),
                    0.25,
                    args.seconds,
                );
                publish(source, &config, &bus, Arc::clone(&running)).await
            }
        }
    };

    let outcome = tokio::select! {
        result = publishing => Some(result),
        err = wait_for_error(&mut status_rx) => {
            running.store(false, Ordering::SeqCst);
            Some(Err(anyhow::anyhow!(err)))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            running.store(false, Ordering::SeqCst);
            None
        }
    };

    let result = match outcome {
        Some(Ok((summary, timing))) => {
            info!(
                frames = summary.frames_published,
                samples = summary.samples_per_channel,
                "publisher done, draining playback buffer"
            );
            tokio::time::sleep(drain_time(settings.ring_frames, &timing)).await;
            Ok(())
        }
        Some(Err(e)) => Err(e),
        None => Ok(()),
    };

    engine.stop()?;
    let snapshot = engine.diagnostics_snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    if snapshot.has_glitches() {
        warn!("playback finished with dropped or padded audio");
    }
    result
}

async fn publish<S: FrameSource>(
    source: S,
    config: &PublisherConfig,
    bus: &FrameBus,
    running: Arc<AtomicBool>,
) -> Result<(PublishSummary, FrameTiming)> {
    let publisher = FramePublisher::new(source, config)?;
    let timing = publisher.timing();
    let summary = publisher.run(bus, running).await?;
    Ok((summary, timing))
}

/// Resolves with the detail of the first `Error` status.
async fn wait_for_error(rx: &mut broadcast::Receiver<framecast_core::StatusEvent>) -> String {
    loop {
        match rx.recv().await {
            Ok(event) if event.status == PlaybackStatus::Error => {
                return event.detail.unwrap_or_else(|| "playback failed".into());
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

fn apply_framing(mut config: PublisherConfig, framing: &FramingArgs) -> PublisherConfig {
    if framing.frame_rate.is_some() {
        config.frame_rate = framing.frame_rate;
        config.frame_size = None;
    }
    if framing.frame_size.is_some() {
        config.frame_size = framing.frame_size;
        if framing.frame_rate.is_none() {
            config.frame_rate = None;
        }
    }
    if framing.max_channels.is_some() {
        config.max_channels = framing.max_channels;
    }
    config
}

/// Settings with this run's command line overrides applied.
pub fn apply_play_overrides(mut settings: AppSettings, args: &PlayArgs) -> AppSettings {
    if let Some(device) = &args.device {
        settings.output_device = Some(device.clone());
    }
    if let Some(ring_frames) = args.ring_frames {
        settings.ring_frames = ring_frames;
    }
    if let Some(rate) = args.sample_rate {
        settings.output_sample_rate = Some(rate);
    }
    if let Some(channels) = args.channels {
        settings.output_channels = Some(channels);
    }
    let framing = apply_framing(settings.publisher_config(), &args.framing);
    settings.frame_rate = framing.frame_rate;
    settings.frame_size = framing.frame_size;
    settings.max_channels = framing.max_channels;
    settings.normalize();
    settings
}

/// Open the device at the stream's rate with a one-frame driver buffer,
/// unless the operator chose otherwise.
fn fit_output(output: &mut OutputConfig, timing: &FrameTiming) {
    output.sample_rate = output.sample_rate.or(Some(timing.sample_rate));
    output.buffer_frames = output.buffer_frames.or(Some(timing.frame_size as u32));
}

/// How long a full ring takes to play out, plus a margin.
fn drain_time(ring_frames: usize, timing: &FrameTiming) -> Duration {
    timing.period() * ring_frames as u32 + DRAIN_MARGIN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play_args() -> PlayArgs {
        PlayArgs {
            file: None,
            tone: Some(440.0),
            seconds: 1.0,
            tone_channels: 2,
            device: None,
            ring_frames: None,
            sample_rate: None,
            channels: None,
            framing: FramingArgs::default(),
            save: false,
        }
    }

    #[test]
    fn command_line_overrides_settings() {
        let settings = AppSettings {
            output_device: Some("usb".into()),
            frame_rate: Some(100),
            ..Default::default()
        };
        let mut args = play_args();
        args.device = Some("2".into());
        args.ring_frames = Some(1);
        args.framing.frame_size = Some(256);

        let merged = apply_play_overrides(settings, &args);
        assert_eq!(merged.output_device.as_deref(), Some("2"));
        assert_eq!(merged.ring_frames, 2, "clamped by normalize");
        assert_eq!(merged.frame_size, Some(256));
        assert_eq!(merged.frame_rate, None, "explicit frame size replaces stored rate");
    }

    #[test]
    fn no_overrides_keeps_settings() {
        let settings = AppSettings {
            frame_rate: Some(50),
            max_channels: Some(1),
            ..Default::default()
        };
        let merged = apply_play_overrides(settings.clone(), &play_args());
        assert_eq!(merged, settings);
    }

    #[test]
    fn output_follows_stream_timing_by_default() {
        let timing = FrameTiming::resolve(16_000, None, Some(256)).unwrap();
        let mut output = OutputConfig::default();
        fit_output(&mut output, &timing);
        assert_eq!(output.sample_rate, Some(16_000));
        assert_eq!(output.buffer_frames, Some(256));
    }

    #[test]
    fn explicit_output_settings_are_kept() {
        let timing = FrameTiming::resolve(48_000, Some(100), None).unwrap();
        let mut output = OutputConfig {
            sample_rate: Some(44_100),
            buffer_frames: Some(1024),
            ..Default::default()
        };
        fit_output(&mut output, &timing);
        assert_eq!(output.sample_rate, Some(44_100));
        assert_eq!(output.buffer_frames, Some(1024));
    }

    #[test]
    fn drain_time_covers_the_ring() {
        let timing = FrameTiming::resolve(16_000, None, Some(256)).unwrap();
        assert_eq!(
            drain_time(8, &timing),
            Duration::from_millis(8 * 16) + DRAIN_MARGIN
        );
    }
}
