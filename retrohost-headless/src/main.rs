mod capture;
mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use retrohost_core::{CommandRevision, Frontend, HostConfig};
use tracing_subscriber::EnvFilter;

use capture::AudioCapture;
use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => HostConfig::default(),
    };
    if cli.legacy_commands {
        config = config.with_command_revision(CommandRevision::Legacy);
    }

    let mut frontend = Frontend::new(config);
    frontend
        .load_core(&cli.core)
        .with_context(|| format!("load core {}", cli.core.display()))?;
    frontend.init_core().context("initialize core")?;
    frontend
        .load_game(cli.rom.as_deref())
        .context("load game")?;

    for &button in &cli.hold {
        frontend.set_joypad(0, button, true);
    }

    let reader = frontend.audio_reader();
    let mut audio = AudioCapture::default();
    let mut ran = 0u32;
    while ran < cli.frames {
        frontend.run_frame();
        ran += 1;
        if cli.audio_out.is_some() {
            audio.drain(reader.available(), |out| reader.read(out));
        }
        if frontend.shutdown_requested() {
            tracing::info!(frame = ran, "core asked to shut down");
            break;
        }
    }

    let stats = frontend.stats();
    tracing::info!(
        frames = ran,
        video_frames = stats.video_frames,
        duplicate_frames = stats.duplicate_frames,
        dropped_video_frames = stats.dropped_video_frames,
        audio_frames = stats.audio_frames_accepted,
        dropped_audio_frames = stats.audio_frames_dropped,
        unsupported_commands = stats.unsupported_commands,
        "run finished"
    );

    if let Some(path) = &cli.frame_out {
        match frontend.with_frame(|frame| capture::write_png(path, frame)) {
            Some(result) => result?,
            None => tracing::warn!("core produced no video; nothing written"),
        }
    }
    if let Some(path) = &cli.audio_out {
        audio.write_wav(path, frontend.sample_rate())?;
        tracing::info!(frames = audio.frames(), path = %path.display(), "audio written");
    }

    frontend.unload();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,retrohost::plugin=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();
}

fn load_config(path: &Path) -> Result<HostConfig> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
}
