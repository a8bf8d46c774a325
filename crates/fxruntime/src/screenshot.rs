//! Read-back of the presented image as tightly packed RGBA8 rows.

use thiserror::Error;

use crate::device::{DeviceError, Format, GraphicsDevice, SurfaceId};

#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error("runtime is not initialised")]
    NotInitialized,
    #[error("screenshots of {0:?} back buffers are not supported")]
    UnsupportedFormat(Format),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub width: u32,
    pub height: u32,
    /// `width * height * 4` bytes, top row first.
    pub rgba: Vec<u8>,
}

/// Reads `surface` and converts it to RGBA8 with opaque alpha. The format is
/// checked before any read-back is attempted.
pub fn capture(
    device: &mut dyn GraphicsDevice,
    surface: SurfaceId,
) -> Result<Screenshot, ScreenshotError> {
    let desc = device
        .surface_desc(surface)
        .ok_or(DeviceError::UnknownResource)?;
    let swap_red_blue = match desc.format {
        Format::A8R8G8B8 | Format::X8R8G8B8 => true,
        Format::A8B8G8R8 | Format::X8B8G8R8 => false,
        other => return Err(ScreenshotError::UnsupportedFormat(other)),
    };

    let readback = device.read_surface(surface)?;
    let row_bytes = readback.width as usize * 4;
    let mut rgba = Vec::with_capacity(row_bytes * readback.height as usize);
    for row in readback
        .data
        .chunks(readback.pitch.max(row_bytes))
        .take(readback.height as usize)
    {
        for pixel in row[..row_bytes.min(row.len())].chunks_exact(4) {
            if swap_red_blue {
                rgba.extend_from_slice(&[pixel[2], pixel[1], pixel[0], 255]);
            } else {
                rgba.extend_from_slice(&[pixel[0], pixel[1], pixel[2], 255]);
            }
        }
    }
    Ok(Screenshot {
        width: readback.width,
        height: readback.height,
        rgba,
    })
}
