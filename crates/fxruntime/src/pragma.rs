//! Interpretation of `#pragma` directives collected by the preprocessor.

use std::path::PathBuf;

use fxconfig::{RuntimeConfig, ScreenshotFormat};

/// Per-compile settings an effect may override through pragmas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectSettings {
    pub show_statistics: bool,
    pub show_fps: bool,
    pub show_clock: bool,
    pub show_toggle_message: bool,
    pub screenshot_key: u8,
    pub screenshot_format: ScreenshotFormat,
    pub screenshot_location: Option<PathBuf>,
    pub skip_optimization: bool,
}

impl EffectSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            show_statistics: config.overlay.show_statistics,
            show_fps: config.overlay.show_fps,
            show_clock: config.overlay.show_clock,
            show_toggle_message: config.overlay.show_toggle_message,
            screenshot_key: config.screenshot.key,
            screenshot_format: config.screenshot.format,
            screenshot_location: config.screenshot.location.clone(),
            skip_optimization: false,
        }
    }
}

/// What applying a set of pragmas produced besides settings changes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PragmaOutcome {
    pub message: Option<String>,
    pub warnings: Vec<String>,
}

/// Splits off the first whitespace-delimited word.
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(end) => (&input[..end], input[end..].trim()),
        None => (input, ""),
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Applies `pragmas` in order. `message` is only honoured for the first
/// compile of a session.
pub fn apply_pragmas(
    settings: &mut EffectSettings,
    pragmas: &[String],
    first_compile: bool,
) -> PragmaOutcome {
    let mut outcome = PragmaOutcome::default();
    for pragma in pragmas {
        let (head, rest) = split_word(pragma);
        match head.to_ascii_lowercase().as_str() {
            "message" => {
                if first_compile {
                    outcome.message = Some(unquote(rest).to_string());
                }
            }
            "reshade" => apply_command(settings, rest, &mut outcome),
            _ => {}
        }
    }
    outcome
}

fn apply_command(settings: &mut EffectSettings, command: &str, outcome: &mut PragmaOutcome) {
    let (name, argument) = split_word(command);
    match name.to_ascii_lowercase().as_str() {
        "showstatistics" => settings.show_statistics = true,
        "showfps" => settings.show_fps = true,
        "showclock" => settings.show_clock = true,
        "showtogglemessage" => settings.show_toggle_message = true,
        "skipoptimization" | "nooptimization" => settings.skip_optimization = true,
        "screenshot_key" => match parse_key(argument) {
            Some(key) => settings.screenshot_key = key,
            None => outcome
                .warnings
                .push(format!("invalid screenshot key '{argument}'")),
        },
        "screenshot_format" => match ScreenshotFormat::parse(unquote(argument)) {
            Some(format) => settings.screenshot_format = format,
            None => outcome
                .warnings
                .push(format!("unsupported screenshot format '{argument}'")),
        },
        "screenshot_location" => {
            let path = PathBuf::from(unquote(argument));
            if path.is_dir() {
                settings.screenshot_location = Some(path);
            } else {
                outcome.warnings.push(format!(
                    "screenshot location '{}' does not exist",
                    path.display()
                ));
            }
        }
        _ => {
            tracing::debug!(pragma = name, "ignoring unknown reshade pragma");
        }
    }
}

fn parse_key(argument: &str) -> Option<u8> {
    let argument = unquote(argument);
    let value = match argument.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => argument.parse::<u32>().ok()?,
    };
    u8::try_from(value).ok().filter(|key| *key != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings() -> EffectSettings {
        EffectSettings::from_config(&RuntimeConfig::default())
    }

    fn pragmas(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn overlay_flags_are_switched_on() {
        let mut settings = settings();
        apply_pragmas(
            &mut settings,
            &pragmas(&["reshade showfps", "reshade showclock", "reshade nooptimization"]),
            false,
        );
        assert!(settings.show_fps);
        assert!(settings.show_clock);
        assert!(!settings.show_statistics);
        assert!(settings.skip_optimization);
    }

    #[test]
    fn pragma_names_ignore_case() {
        let mut settings = settings();
        let outcome = apply_pragmas(
            &mut settings,
            &pragmas(&["ReShade ShowFPS", "reshade SHOWTOGGLEMESSAGE", "MESSAGE \"Hi\""]),
            true,
        );
        assert!(settings.show_fps);
        assert!(settings.show_toggle_message);
        assert_eq!(outcome.message.as_deref(), Some("Hi"));
    }

    #[test]
    fn message_only_on_first_compile() {
        let mut settings = settings();
        let lines = pragmas(&["message \"Welcome\""]);
        let first = apply_pragmas(&mut settings, &lines, true);
        assert_eq!(first.message.as_deref(), Some("Welcome"));
        let later = apply_pragmas(&mut settings, &lines, false);
        assert_eq!(later.message, None);
    }

    #[test]
    fn screenshot_settings_are_validated() {
        let dir = tempdir().unwrap();
        let mut settings = settings();
        let location = format!("reshade screenshot_location \"{}\"", dir.path().display());
        let outcome = apply_pragmas(
            &mut settings,
            &pragmas(&[
                "reshade screenshot_key 0x7B",
                "reshade screenshot_format bmp",
                &location,
                "reshade screenshot_location \"/definitely/not/here\"",
                "reshade screenshot_key 300",
            ]),
            false,
        );
        assert_eq!(settings.screenshot_key, 0x7B);
        assert_eq!(settings.screenshot_format, ScreenshotFormat::Bmp);
        assert_eq!(settings.screenshot_location.as_deref(), Some(dir.path()));
        assert_eq!(outcome.warnings.len(), 2);
    }
}
