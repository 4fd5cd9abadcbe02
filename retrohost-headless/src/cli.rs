use std::path::PathBuf;

use clap::Parser;
use retrohost_core::abi::JoypadButton;

#[derive(Debug, Parser, Clone)]
#[command(name = "retrohost-headless")]
#[command(about = "Run a libretro core without a window and capture what it produces")]
pub struct Cli {
    /// Core shared library.
    pub core: PathBuf,

    /// Game content. Omit to start a core that runs without content.
    pub rom: Option<PathBuf>,

    /// Number of frames to run.
    #[arg(long, default_value_t = 600)]
    pub frames: u32,

    /// Write the last frame as PNG.
    #[arg(long)]
    pub frame_out: Option<PathBuf>,

    /// Write all produced audio as a stereo float WAV.
    #[arg(long)]
    pub audio_out: Option<PathBuf>,

    /// Host configuration (JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use the legacy environment command numbering.
    #[arg(long)]
    pub legacy_commands: bool,

    /// Joypad buttons held on port 0 for the whole run, e.g. `start,a`.
    #[arg(long, value_delimiter = ',', value_parser = parse_button)]
    pub hold: Vec<JoypadButton>,
}

fn parse_button(name: &str) -> Result<JoypadButton, String> {
    let button = match name.to_ascii_lowercase().as_str() {
        "b" => JoypadButton::B,
        "y" => JoypadButton::Y,
        "select" => JoypadButton::Select,
        "start" => JoypadButton::Start,
        "up" => JoypadButton::Up,
        "down" => JoypadButton::Down,
        "left" => JoypadButton::Left,
        "right" => JoypadButton::Right,
        "a" => JoypadButton::A,
        "x" => JoypadButton::X,
        "l" | "l1" => JoypadButton::L1,
        "r" | "r1" => JoypadButton::R1,
        "l2" => JoypadButton::L2,
        "r2" => JoypadButton::R2,
        "l3" => JoypadButton::L3,
        "r3" => JoypadButton::R3,
        other => return Err(format!("unknown joypad button `{other}`")),
    };
    Ok(button)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_invocation() {
        let cli = Cli::try_parse_from([
            "retrohost-headless",
            "core.so",
            "game.rom",
            "--frames",
            "10",
            "--hold",
            "start,A",
            "--legacy-commands",
        ])
        .unwrap();
        assert_eq!(cli.frames, 10);
        assert_eq!(cli.rom, Some(PathBuf::from("game.rom")));
        assert_eq!(cli.hold, vec![JoypadButton::Start, JoypadButton::A]);
        assert!(cli.legacy_commands);
    }

    #[test]
    fn rom_is_optional() {
        let cli = Cli::try_parse_from(["retrohost-headless", "core.so"]).unwrap();
        assert!(cli.rom.is_none());
        assert_eq!(cli.frames, 600);
    }

    #[test]
    fn rejects_unknown_button() {
        assert!(Cli::try_parse_from(["retrohost-headless", "core.so", "--hold", "turbo"]).is_err());
    }
}
