//! Image decoding, resizing, block compression and layout conversion for
//! textures with a `source` annotation.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView};
use thiserror::Error;

use crate::effect::{PixelFormat, Texture};

#[derive(Debug, Error)]
pub enum TextureLoadError {
    #[error("failed to load {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("texture '{name}' uses format {format:?}, which cannot be loaded from an image")]
    UnsupportedFormat { name: String, format: PixelFormat },
}

/// Loads `path` and returns data laid out for [`convert_for_upload`] or, for
/// block compressed formats, the compressed blocks.
pub fn load_texture_source(path: &Path, texture: &Texture) -> Result<Vec<u8>, TextureLoadError> {
    if !matches!(
        texture.format,
        PixelFormat::R8 | PixelFormat::Rg8 | PixelFormat::Rgba8 | PixelFormat::Dxt1 | PixelFormat::Dxt5
    ) {
        return Err(TextureLoadError::UnsupportedFormat {
            name: texture.name.clone(),
            format: texture.format,
        });
    }
    let image = image::open(path).map_err(|source| TextureLoadError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let image = fit(image, texture.width, texture.height, &texture.name);
    Ok(encode(&image, texture.format))
}

fn fit(image: DynamicImage, width: u32, height: u32, name: &str) -> DynamicImage {
    let (source_width, source_height) = image.dimensions();
    if (source_width, source_height) == (width, height) {
        return image;
    }
    tracing::info!(
        texture = name,
        from = %format!("{source_width}x{source_height}"),
        to = %format!("{width}x{height}"),
        "resizing image data"
    );
    DynamicImage::ImageRgba8(imageops::resize(
        &image.to_rgba8(),
        width,
        height,
        FilterType::Triangle,
    ))
}

/// Packs decoded pixels for `format`: one luminance byte for R8, luminance
/// and alpha for RG8, RGBA for RGBA8 and compressed blocks for DXT.
pub fn encode(image: &DynamicImage, format: PixelFormat) -> Vec<u8> {
    let (width, height) = image.dimensions();
    match format {
        PixelFormat::R8 => image.to_luma8().into_raw(),
        PixelFormat::Rg8 => image.to_luma_alpha8().into_raw(),
        PixelFormat::Dxt1 => compress_bc1(&image.to_rgba8().into_raw(), width, height),
        PixelFormat::Dxt5 => compress_bc3(&image.to_rgba8().into_raw(), width, height),
        _ => image.to_rgba8().into_raw(),
    }
}

/// Expands packed 8-bit data into the device's 32-bit BGRA layout. Other
/// formats pass through unchanged.
pub fn convert_for_upload(format: PixelFormat, data: &[u8]) -> Vec<u8> {
    match format {
        PixelFormat::R8 => data.iter().flat_map(|r| [0, 0, *r, 0]).collect(),
        PixelFormat::Rg8 => data
            .chunks_exact(2)
            .flat_map(|px| [0, px[1], px[0], 0])
            .collect(),
        PixelFormat::Rgba8 => data
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0], px[3]])
            .collect(),
        _ => data.to_vec(),
    }
}

/// Byte size of the compressed image for a block format.
pub fn compressed_size(width: u32, height: u32, block_bytes: usize) -> usize {
    (width.div_ceil(4) * height.div_ceil(4)) as usize * block_bytes
}

/// Gathers the 4x4 block at (`bx`, `by`), clamping at the image edge.
fn block_pixels(rgba: &[u8], width: u32, height: u32, bx: u32, by: u32) -> [[u8; 4]; 16] {
    let mut block = [[0u8; 4]; 16];
    for (i, pixel) in block.iter_mut().enumerate() {
        let x = (bx * 4 + i as u32 % 4).min(width.saturating_sub(1));
        let y = (by * 4 + i as u32 / 4).min(height.saturating_sub(1));
        let offset = ((y * width + x) * 4) as usize;
        if let Some(source) = rgba.get(offset..offset + 4) {
            pixel.copy_from_slice(source);
        }
    }
    block
}

fn to_565(color: [u8; 4]) -> u16 {
    (u16::from(color[0] >> 3) << 11) | (u16::from(color[1] >> 2) << 5) | u16::from(color[2] >> 3)
}

fn from_565(value: u16) -> [i32; 3] {
    let r = i32::from((value >> 11) & 0x1F);
    let g = i32::from((value >> 5) & 0x3F);
    let b = i32::from(value & 0x1F);
    [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
}

fn luminance(color: &[u8; 4]) -> u32 {
    u32::from(color[0]) * 299 + u32::from(color[1]) * 587 + u32::from(color[2]) * 114
}

/// Four-colour BC1 block for `pixels`; endpoints are the darkest and
/// brightest pixels.
fn color_block(pixels: &[[u8; 4]; 16]) -> [u8; 8] {
    let mut low = pixels[0];
    let mut high = pixels[0];
    for pixel in pixels {
        if luminance(pixel) < luminance(&low) {
            low = *pixel;
        }
        if luminance(pixel) > luminance(&high) {
            high = *pixel;
        }
    }
    let mut c0 = to_565(high);
    let mut c1 = to_565(low);
    if c0 < c1 {
        std::mem::swap(&mut c0, &mut c1);
    }

    let mut indices = 0u32;
    if c0 != c1 {
        let e0 = from_565(c0);
        let e1 = from_565(c1);
        let palette = [
            e0,
            e1,
            [0, 1, 2].map(|i| (2 * e0[i] + e1[i]) / 3),
            [0, 1, 2].map(|i| (e0[i] + 2 * e1[i]) / 3),
        ];
        for (i, pixel) in pixels.iter().enumerate() {
            let best = (0..4)
                .min_by_key(|&p| {
                    (0..3)
                        .map(|c| (palette[p][c] - i32::from(pixel[c])).pow(2))
                        .sum::<i32>()
                })
                .unwrap_or(0);
            indices |= (best as u32) << (i * 2);
        }
    }

    let mut out = [0u8; 8];
    out[0..2].copy_from_slice(&c0.to_le_bytes());
    out[2..4].copy_from_slice(&c1.to_le_bytes());
    out[4..8].copy_from_slice(&indices.to_le_bytes());
    out
}

/// Eight-value interpolated alpha block of BC3.
fn alpha_block(pixels: &[[u8; 4]; 16]) -> [u8; 8] {
    let a0 = pixels.iter().map(|p| p[3]).max().unwrap_or(255);
    let a1 = pixels.iter().map(|p| p[3]).min().unwrap_or(255);
    let mut bits = 0u64;
    if a0 != a1 {
        let (h, l) = (u32::from(a0), u32::from(a1));
        let mut palette = [0u32; 8];
        palette[0] = h;
        palette[1] = l;
        for (step, slot) in palette.iter_mut().enumerate().skip(2) {
            let weight = step as u32 - 1;
            *slot = ((7 - weight) * h + weight * l) / 7;
        }
        for (i, pixel) in pixels.iter().enumerate() {
            let alpha = u32::from(pixel[3]);
            let best = (0..8)
                .min_by_key(|&p| palette[p].abs_diff(alpha))
                .unwrap_or(0);
            bits |= (best as u64) << (i * 3);
        }
    }
    let mut out = [0u8; 8];
    out[0] = a0;
    out[1] = a1;
    out[2..8].copy_from_slice(&bits.to_le_bytes()[..6]);
    out
}

/// Compresses a whole RGBA8 image into BC1 (DXT1) blocks.
pub fn compress_bc1(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(compressed_size(width, height, 8));
    for by in 0..height.div_ceil(4) {
        for bx in 0..width.div_ceil(4) {
            let pixels = block_pixels(rgba, width, height, bx, by);
            out.extend_from_slice(&color_block(&pixels));
        }
    }
    out
}

/// Compresses a whole RGBA8 image into BC3 (DXT5) blocks.
pub fn compress_bc3(rgba: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(compressed_size(width, height, 16));
    for by in 0..height.div_ceil(4) {
        for bx in 0..width.div_ceil(4) {
            let pixels = block_pixels(rgba, width, height, bx, by);
            out.extend_from_slice(&alpha_block(&pixels));
            out.extend_from_slice(&color_block(&pixels));
        }
    }
    out
}
