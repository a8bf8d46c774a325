use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fxruntime::device::Format;

#[derive(Parser, Debug)]
#[command(
    name = "fxhost",
    author,
    version,
    about = "Runs an effect against a headless Direct3D 9 style device"
)]
pub struct Cli {
    /// Runtime configuration (TOML); defaults to the user config file when present.
    #[arg(long, value_name = "FILE", env = "FXHOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Effect manifest to load, overriding `effect.path` from the config.
    #[arg(long, value_name = "FILE")]
    pub effect: Option<PathBuf>,

    /// Host trace (JSON) replayed frame by frame.
    #[arg(long, value_name = "FILE")]
    pub trace: Option<PathBuf>,

    /// Number of frames to present.
    #[arg(long, default_value_t = 60)]
    pub frames: u32,

    /// Back buffer size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "640x360")]
    pub size: (u32, u32),

    /// Back buffer format: `x8r8g8b8`, `a8r8g8b8`, `x8b8g8r8` or `a8b8g8r8`.
    #[arg(long, value_name = "FORMAT", value_parser = parse_format, default_value = "x8r8g8b8")]
    pub format: Format,

    /// Multisample count of the back buffer (0 disables).
    #[arg(long, default_value_t = 0)]
    pub samples: u32,

    /// Simulated time between frames (`16ms`, `1s`, ...).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "16ms")]
    pub frame_time: Duration,

    /// Colour (0xRRGGBB) the host clears its back buffer to every frame.
    #[arg(long, value_name = "HEX", value_parser = parse_color, default_value = "0x404040")]
    pub clear_color: u32,

    /// Seed for `random` and `pingpong` uniforms.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the final back buffer to this file (`.png` or `.bmp`).
    #[arg(long, value_name = "PATH")]
    pub screenshot: Option<PathBuf>,

    /// Print the statistics report after the last frame.
    #[arg(long)]
    pub statistics: bool,

    /// Raise the log level to `trace` unless `RUST_LOG` is set.
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{value}'; expected WIDTHxHEIGHT"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{value}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{value}'"))?;
    if width == 0 || height == 0 {
        return Err("back buffer size must be non-zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_format(value: &str) -> Result<Format, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "x8r8g8b8" => Ok(Format::X8R8G8B8),
        "a8r8g8b8" => Ok(Format::A8R8G8B8),
        "x8b8g8r8" => Ok(Format::X8B8G8R8),
        "a8b8g8r8" => Ok(Format::A8B8G8R8),
        other => Err(format!("unsupported back buffer format '{other}'")),
    }
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value.trim())
        .map_err(|err| format!("invalid duration '{value}': {err}"))
}

pub fn parse_color(value: &str) -> Result<u32, String> {
    let trimmed = value.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix('#'))
        .unwrap_or(trimmed);
    let color = u32::from_str_radix(hex, 16).map_err(|_| format!("invalid colour '{value}'"))?;
    if color > 0x00FF_FFFF {
        return Err(format!("colour '{value}' exceeds 0xRRGGBB"));
    }
    Ok(color)
}
