use crate::device::{Format, TextureId};

use super::annotation::Annotations;

/// Pixel formats an effect can declare for its textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgba8,
    R32F,
    Rgba16,
    Rgba16F,
    Rgba32F,
    Dxt1,
    Dxt3,
    Dxt5,
    Latc1,
    Latc2,
}

impl PixelFormat {
    /// Device format backing the texture. The 8-bit layouts all live in the
    /// device's 32-bit BGRA format and are swizzled on upload.
    pub fn device_format(self) -> Format {
        match self {
            PixelFormat::R8 | PixelFormat::Rg8 | PixelFormat::Rgba8 => Format::A8R8G8B8,
            PixelFormat::R32F => Format::R32F,
            PixelFormat::Rgba16 => Format::A16B16G16R16,
            PixelFormat::Rgba16F => Format::A16B16G16R16F,
            PixelFormat::Rgba32F => Format::A32B32G32R32F,
            PixelFormat::Dxt1 => Format::Dxt1,
            PixelFormat::Dxt3 => Format::Dxt3,
            PixelFormat::Dxt5 => Format::Dxt5,
            PixelFormat::Latc1 => Format::Ati1,
            PixelFormat::Latc2 => Format::Ati2,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            PixelFormat::Dxt1
                | PixelFormat::Dxt3
                | PixelFormat::Dxt5
                | PixelFormat::Latc1
                | PixelFormat::Latc2
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        let format = match value.to_ascii_lowercase().as_str() {
            "r8" => PixelFormat::R8,
            "rg8" | "r8g8" => PixelFormat::Rg8,
            "rgba8" | "r8g8b8a8" => PixelFormat::Rgba8,
            "r32f" => PixelFormat::R32F,
            "rgba16" => PixelFormat::Rgba16,
            "rgba16f" => PixelFormat::Rgba16F,
            "rgba32f" => PixelFormat::Rgba32F,
            "dxt1" => PixelFormat::Dxt1,
            "dxt3" => PixelFormat::Dxt3,
            "dxt5" => PixelFormat::Dxt5,
            "latc1" => PixelFormat::Latc1,
            "latc2" => PixelFormat::Latc2,
            _ => return None,
        };
        Some(format)
    }
}

/// Where a texture's contents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureOrigin {
    /// Owned texture, optionally filled from an image file.
    Image,
    /// Mirrors the selected depth source.
    DepthBuffer,
    /// Mirrors the back buffer.
    ColorBuffer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub format: PixelFormat,
    pub origin: TextureOrigin,
    /// Backing resource; borrowed for buffer mirrors, owned for images.
    pub handle: Option<TextureId>,
    pub annotations: Annotations,
    /// Bytes uploaded into the texture.
    pub storage_size: usize,
}

impl Texture {
    /// Rebinds a mirror texture to new backing. Image textures keep their
    /// owned resource.
    pub fn change_source(&mut self, handle: Option<TextureId>) -> bool {
        if self.origin == TextureOrigin::Image {
            return false;
        }
        self.handle = handle;
        true
    }
}
