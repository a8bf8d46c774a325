//! Writes runtime screenshots to disk.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fxconfig::ScreenshotFormat;
use fxruntime::Screenshot;
use image::{ImageFormat, RgbaImage};

/// Picks the image format from the file extension, falling back to `preferred`.
pub fn format_for(path: &Path, preferred: ScreenshotFormat) -> ScreenshotFormat {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(ScreenshotFormat::parse)
        .unwrap_or(preferred)
}

pub fn save(screenshot: &Screenshot, path: &Path, format: ScreenshotFormat) -> Result<()> {
    let image = RgbaImage::from_raw(screenshot.width, screenshot.height, screenshot.rgba.clone())
        .ok_or_else(|| anyhow!("screenshot buffer does not match {}x{}", screenshot.width, screenshot.height))?;
    let image_format = match format {
        ScreenshotFormat::Png => ImageFormat::Png,
        ScreenshotFormat::Bmp => ImageFormat::Bmp,
    };
    image
        .save_with_format(path, image_format)
        .with_context(|| format!("failed to write screenshot to {}", path.display()))?;
    tracing::info!(path = %path.display(), width = screenshot.width, height = screenshot.height, "saved screenshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extension_selects_format() {
        assert_eq!(format_for(Path::new("a.bmp"), ScreenshotFormat::Png), ScreenshotFormat::Bmp);
        assert_eq!(format_for(Path::new("a.jpg"), ScreenshotFormat::Png), ScreenshotFormat::Png);
        assert_eq!(format_for(Path::new("a"), ScreenshotFormat::Bmp), ScreenshotFormat::Bmp);
    }

    #[test]
    fn png_round_trips_pixels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shot.png");
        let screenshot = Screenshot {
            width: 2,
            height: 1,
            rgba: vec![10, 20, 30, 255, 40, 50, 60, 255],
        };
        save(&screenshot, &path, ScreenshotFormat::Png).unwrap();
        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(1, 0).0, [40, 50, 60, 255]);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let dir = tempdir().unwrap();
        let screenshot = Screenshot {
            width: 4,
            height: 4,
            rgba: vec![0; 4],
        };
        assert!(save(&screenshot, &dir.path().join("x.png"), ScreenshotFormat::Png).is_err());
    }
}
