use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Virtual key code of the print-screen key, the default screenshot binding.
pub const DEFAULT_SCREENSHOT_KEY: u8 = 0x2C;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    pub version: u32,
    #[serde(default)]
    pub effect: EffectConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
    #[serde(default)]
    pub depth: DepthConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub techniques: TechniqueConfig,
    #[serde(default)]
    pub uniforms: UniformConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            version: 1,
            effect: EffectConfig::default(),
            screenshot: ScreenshotConfig::default(),
            depth: DepthConfig::default(),
            overlay: OverlayConfig::default(),
            techniques: TechniqueConfig::default(),
            uniforms: UniformConfig::default(),
        }
    }
}

/// Where the effect source lives.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EffectConfig {
    /// Primary effect file.
    #[serde(default = "default_effect_path")]
    pub path: PathBuf,
    /// File name tried next to `path` when the primary file is missing.
    #[serde(default = "default_effect_fallback")]
    pub fallback: Option<String>,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            path: default_effect_path(),
            fallback: default_effect_fallback(),
        }
    }
}

fn default_effect_path() -> PathBuf {
    PathBuf::from("ReShade.fx")
}

fn default_effect_fallback() -> Option<String> {
    Some("ReShade.fx".to_string())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreenshotConfig {
    #[serde(default = "default_screenshot_key")]
    pub key: u8,
    #[serde(default)]
    pub format: ScreenshotFormat,
    #[serde(default)]
    pub location: Option<PathBuf>,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_SCREENSHOT_KEY,
            format: ScreenshotFormat::default(),
            location: None,
        }
    }
}

fn default_screenshot_key() -> u8 {
    DEFAULT_SCREENSHOT_KEY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Bmp,
}

impl ScreenshotFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Bmp => "bmp",
        }
    }
}

/// Tuning for the depth source heuristic.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Frames between two scoring passes.
    #[serde(default = "default_cooldown_frames")]
    pub cooldown_frames: u32,
    /// Frames with network traffic inside one cooldown window that force the
    /// replacement to be dropped instead of scored.
    #[serde(default = "default_traffic_threshold")]
    pub traffic_threshold: u32,
    /// Relative size deviation from the back buffer a candidate may have.
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: f32,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_frames: default_cooldown_frames(),
            traffic_threshold: default_traffic_threshold(),
            size_tolerance: default_size_tolerance(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cooldown_frames() -> u32 {
    30
}

fn default_traffic_threshold() -> u32 {
    10
}

fn default_size_tolerance() -> f32 {
    0.05
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverlayConfig {
    #[serde(default)]
    pub show_statistics: bool,
    #[serde(default)]
    pub show_fps: bool,
    #[serde(default)]
    pub show_clock: bool,
    #[serde(default)]
    pub show_toggle_message: bool,
    /// How long the status line stays visible after a clean compile.
    #[serde(
        default = "default_status_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub status_timeout: Duration,
    /// How long the status line stays visible when diagnostics are present.
    #[serde(
        default = "default_error_status_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub error_status_timeout: Duration,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            show_statistics: false,
            show_fps: false,
            show_clock: false,
            show_toggle_message: false,
            status_timeout: default_status_timeout(),
            error_status_timeout: default_error_status_timeout(),
        }
    }
}

fn default_status_timeout() -> Duration {
    Duration::from_secs(4)
}

fn default_error_status_timeout() -> Duration {
    Duration::from_secs(8)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TechniqueConfig {
    /// Minimum interval between two updates of a technique's measured duration.
    #[serde(
        default = "default_duration_refresh",
        deserialize_with = "deserialize_duration"
    )]
    pub duration_refresh: Duration,
}

impl Default for TechniqueConfig {
    fn default() -> Self {
        Self {
            duration_refresh: default_duration_refresh(),
        }
    }
}

fn default_duration_refresh() -> Duration {
    Duration::from_millis(250)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UniformConfig {
    /// Seed for `random` and `pingpong` sources; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl RuntimeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RuntimeConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Effect directory, used as include root and for relative texture sources.
    pub fn effect_dir(&self) -> &Path {
        self.effect.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.effect.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("effect.path may not be empty".into()));
        }

        if let Some(fallback) = &self.effect.fallback {
            if fallback.trim().is_empty() || fallback.contains(['/', '\\']) {
                return Err(ConfigError::Invalid(format!(
                    "effect.fallback '{fallback}' must be a bare file name"
                )));
            }
        }

        if self.screenshot.key == 0 {
            return Err(ConfigError::Invalid(
                "screenshot.key must be a virtual key code between 1 and 255".into(),
            ));
        }

        if self.depth.cooldown_frames == 0 {
            return Err(ConfigError::Invalid(
                "depth.cooldown_frames must be greater than zero".into(),
            ));
        }

        if self.depth.traffic_threshold >= self.depth.cooldown_frames {
            return Err(ConfigError::Invalid(format!(
                "depth.traffic_threshold ({}) must be below depth.cooldown_frames ({})",
                self.depth.traffic_threshold, self.depth.cooldown_frames
            )));
        }

        if !(0.0..1.0).contains(&self.depth.size_tolerance) {
            return Err(ConfigError::Invalid(
                "depth.size_tolerance must be within [0, 1)".into(),
            ));
        }

        if self.overlay.error_status_timeout < self.overlay.status_timeout {
            return Err(ConfigError::Invalid(
                "overlay.error_status_timeout must not be shorter than overlay.status_timeout"
                    .into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[effect]
path = "/games/demo/ReShade.fx"
fallback = "Sweet.fx"

[screenshot]
key = 0x7B
format = "bmp"

[depth]
cooldown_frames = 60
traffic_threshold = 20
size_tolerance = 0.1

[overlay]
show_fps = true
status_timeout = "2s"
error_status_timeout = 10

[techniques]
duration_refresh = "500ms"

[uniforms]
seed = 7
"#;

    #[test]
    fn parses_sample_config() {
        let config = RuntimeConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.effect.path, PathBuf::from("/games/demo/ReShade.fx"));
        assert_eq!(config.effect.fallback.as_deref(), Some("Sweet.fx"));
        assert_eq!(config.effect_dir(), Path::new("/games/demo"));
        assert_eq!(config.screenshot.key, 0x7B);
        assert_eq!(config.screenshot.format, ScreenshotFormat::Bmp);
        assert_eq!(config.depth.cooldown_frames, 60);
        assert!(config.overlay.show_fps);
        assert_eq!(config.overlay.status_timeout, Duration::from_secs(2));
        assert_eq!(config.overlay.error_status_timeout, Duration::from_secs(10));
        assert_eq!(config.techniques.duration_refresh, Duration::from_millis(500));
        assert_eq!(config.uniforms.seed, Some(7));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.effect.path, PathBuf::from("ReShade.fx"));
        assert_eq!(config.screenshot.key, DEFAULT_SCREENSHOT_KEY);
        assert_eq!(config.depth.cooldown_frames, 30);
        assert_eq!(config.depth.traffic_threshold, 10);
        assert!((config.depth.size_tolerance - 0.05).abs() < f32::EPSILON);
        assert_eq!(config.overlay.status_timeout, Duration::from_secs(4));
        assert_eq!(config.techniques.duration_refresh, Duration::from_millis(250));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = RuntimeConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_threshold_above_window() {
        let err = RuntimeConfig::from_toml_str(
            r#"
version = 1

[depth]
cooldown_frames = 10
traffic_threshold = 10
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_duration() {
        let err = RuntimeConfig::from_toml_str(
            r#"
version = 1

[overlay]
status_timeout = -1
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn screenshot_format_parses_extensions() {
        assert_eq!(ScreenshotFormat::parse(".PNG"), Some(ScreenshotFormat::Png));
        assert_eq!(ScreenshotFormat::parse("bmp"), Some(ScreenshotFormat::Bmp));
        assert_eq!(ScreenshotFormat::parse("jpg"), None);
    }
}
