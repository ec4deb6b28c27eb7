//! Image decoding and resampling.
//!
//! Decoding is behind the [`ImageDecoder`] trait so the resource layer can be
//! driven by an in-memory decoder in tests. [`FileImageDecoder`] is the real
//! one, built on the `image` crate; [`MemoryImageDecoder`] handles images
//! embedded in scene files.

use std::{
    io::{BufRead, Cursor, Seek},
    path::Path,
};

use anyhow::{Context, bail};
use image::{
    ImageBuffer, ImageFormat, ImageReader, Luma, LumaA, Pixel, Primitive, Rgb, Rgba,
    imageops::{self, FilterType},
};

use crate::device::{ColorSpace, ElementType};

/// Raw pixels of a decoded image, rows bottom to top.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub element: ElementType,
    /// High dynamic range source; such images are always `f32`.
    pub hdr: bool,
    pub pixels: Vec<u8>,
}

pub trait ImageDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedImage>;
}

/// Decodes image files from disk.
///
/// Radiance HDR and OpenEXR files decode to `f32` RGB(A); everything else to
/// 8-bit with the source's channel count. Rows are flipped so the first row in
/// memory is the bottom of the picture.
#[derive(Copy, Clone, Debug, Default)]
pub struct FileImageDecoder;

impl ImageDecoder for FileImageDecoder {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedImage> {
        let reader = ImageReader::open(path)
            .with_context(|| format!("Could not open image {}", path.display()))?
            .with_guessed_format()?;
        decode_reader(reader).with_context(|| format!("Could not decode image {}", path.display()))
    }
}

/// Decodes an encoded image held in memory, such as one stored inside a scene
/// file. The path passed to [`ImageDecoder::decode`] is only used for messages.
#[derive(Copy, Clone, Debug)]
pub struct MemoryImageDecoder<'a>(pub &'a [u8]);

impl ImageDecoder for MemoryImageDecoder<'_> {
    fn decode(&self, path: &Path) -> anyhow::Result<DecodedImage> {
        let reader = ImageReader::new(Cursor::new(self.0)).with_guessed_format()?;
        decode_reader(reader)
            .with_context(|| format!("Could not decode embedded image {}", path.display()))
    }
}

fn decode_reader<R: BufRead + Seek>(reader: ImageReader<R>) -> anyhow::Result<DecodedImage> {
    let hdr = matches!(
        reader.format(),
        Some(ImageFormat::Hdr | ImageFormat::OpenExr)
    );
    let img = reader.decode()?.flipv();
    let (width, height) = (img.width(), img.height());
    let color = img.color();

    let (channels, element, pixels) = if hdr {
        if color.has_alpha() {
            (4, ElementType::F32, bytemuck::cast_slice(&img.to_rgba32f().into_raw()).to_vec())
        } else {
            (3, ElementType::F32, bytemuck::cast_slice(&img.to_rgb32f().into_raw()).to_vec())
        }
    } else {
        match color.channel_count() {
            1 => (1, ElementType::U8, img.to_luma8().into_raw()),
            2 => (2, ElementType::U8, img.to_luma_alpha8().into_raw()),
            3 => (3, ElementType::U8, img.to_rgb8().into_raw()),
            _ => (4, ElementType::U8, img.to_rgba8().into_raw()),
        }
    };
    Ok(DecodedImage {
        width,
        height,
        channels,
        element,
        hdr,
        pixels,
    })
}

/// Output size for an image of `width` x `height`.
///
/// A `target_width` rescales keeping the aspect ratio; the result is then
/// clamped to `max_dimension` on each axis, again keeping the aspect ratio.
pub fn fit_dimensions(
    width: u32,
    height: u32,
    target_width: Option<u32>,
    max_dimension: u32,
) -> (u32, u32) {
    let (mut w, mut h) = match target_width {
        Some(target) if target > 0 && width > 0 => {
            (target, (height as f32 / width as f32 * target as f32) as u32)
        }
        _ => (width, height),
    };
    if w > max_dimension {
        h = (h as f32 / w as f32 * max_dimension as f32) as u32;
        w = max_dimension;
    }
    if h > max_dimension {
        w = (w as f32 / h as f32 * max_dimension as f32) as u32;
        h = max_dimension;
    }
    (w.max(1), h.max(1))
}

/// Resamples `image` to `width` x `height`, returning bytes in the source layout.
///
/// 8-bit sRGB images are filtered in linear space. With four channels the
/// colour is premultiplied by alpha around the filter so transparent texels do
/// not bleed into their neighbours. Linear 8-bit, 16-bit and float images are
/// filtered as stored.
pub fn resample(
    image: &DecodedImage,
    width: u32,
    height: u32,
    color_space: ColorSpace,
) -> anyhow::Result<Vec<u8>> {
    let (w, h, c) = (image.width, image.height, image.channels);
    match image.element {
        ElementType::F32 => {
            let data: Vec<f32> = bytemuck::pod_collect_to_vec(&image.pixels);
            let out = resize_interleaved(c, w, h, data, width, height)?;
            Ok(bytemuck::cast_slice(&out).to_vec())
        }
        ElementType::U8 if color_space.is_srgb() => {
            let alpha = (c == 4).then_some(3usize);
            let linear = srgb_to_premultiplied_linear(&image.pixels, c as usize, alpha);
            let out = resize_interleaved(c, w, h, linear, width, height)?;
            Ok(premultiplied_linear_to_srgb(&out, c as usize, alpha))
        }
        ElementType::U8 => resize_interleaved(c, w, h, image.pixels.clone(), width, height),
        ElementType::U16 => {
            let data: Vec<u16> = bytemuck::pod_collect_to_vec(&image.pixels);
            let out = resize_interleaved(c, w, h, data, width, height)?;
            Ok(bytemuck::cast_slice(&out).to_vec())
        }
        ElementType::U32 => bail!("Resampling 32-bit integer images is not supported"),
    }
}

fn resize_interleaved<T: Primitive + 'static>(
    channels: u32,
    width: u32,
    height: u32,
    data: Vec<T>,
    new_width: u32,
    new_height: u32,
) -> anyhow::Result<Vec<T>>
where
    Rgb<T>: Pixel<Subpixel = T>,
    Rgba<T>: Pixel<Subpixel = T>,
{
    match channels {
        1 => resize_buffer::<Luma<T>>(width, height, data, new_width, new_height),
        2 => resize_buffer::<LumaA<T>>(width, height, data, new_width, new_height),
        3 => resize_buffer::<Rgb<T>>(width, height, data, new_width, new_height),
        4 => resize_buffer::<Rgba<T>>(width, height, data, new_width, new_height),
        n => bail!("Cannot resample an image with {} channels", n),
    }
}

fn resize_buffer<P>(
    width: u32,
    height: u32,
    data: Vec<P::Subpixel>,
    new_width: u32,
    new_height: u32,
) -> anyhow::Result<Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let buffer = ImageBuffer::<P, Vec<P::Subpixel>>::from_raw(width, height, data)
        .context("Pixel data does not match the image dimensions")?;
    Ok(imageops::resize(&buffer, new_width, new_height, FilterType::CatmullRom).into_raw())
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb_to_premultiplied_linear(data: &[u8], channels: usize, alpha: Option<usize>) -> Vec<f32> {
    let mut out = Vec::with_capacity(data.len());
    for texel in data.chunks_exact(channels) {
        let a = alpha.map_or(1.0, |i| texel[i] as f32 / 255.0);
        for (i, v) in texel.iter().enumerate() {
            let v = *v as f32 / 255.0;
            out.push(if Some(i) == alpha { v } else { srgb_to_linear(v) * a });
        }
    }
    out
}

fn premultiplied_linear_to_srgb(data: &[f32], channels: usize, alpha: Option<usize>) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for texel in data.chunks_exact(channels) {
        let a = alpha.map_or(1.0, |i| texel[i].clamp(0.0, 1.0));
        for (i, v) in texel.iter().enumerate() {
            let v = if Some(i) == alpha {
                v.clamp(0.0, 1.0)
            } else if a > 0.0 {
                linear_to_srgb((v / a).clamp(0.0, 1.0))
            } else {
                0.0
            };
            out.push((v * 255.0).round() as u8);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, texel: &[u8]) -> DecodedImage {
        DecodedImage {
            width,
            height,
            channels: texel.len() as u32,
            element: ElementType::U8,
            hdr: false,
            pixels: texel
                .iter()
                .copied()
                .cycle()
                .take((width * height) as usize * texel.len())
                .collect(),
        }
    }

    #[test]
    fn target_width_keeps_aspect() {
        assert_eq!(fit_dimensions(1024, 512, Some(256), 8192), (256, 128));
        assert_eq!(fit_dimensions(300, 200, Some(100), 8192), (100, 66));
        assert_eq!(fit_dimensions(64, 64, None, 8192), (64, 64));
    }

    #[test]
    fn clamps_to_device_limit() {
        assert_eq!(fit_dimensions(4096, 1024, None, 2048), (2048, 512));
        assert_eq!(fit_dimensions(1024, 4096, None, 2048), (512, 2048));
        assert_eq!(fit_dimensions(4096, 1024, Some(8192), 2048), (2048, 512));
    }

    #[test]
    fn solid_colour_survives_srgb_resample() {
        let image = solid(8, 8, &[200, 100, 50, 255]);
        let out = resample(&image, 4, 4, ColorSpace::Srgb).unwrap();
        assert_eq!(out.len(), 4 * 4 * 4);
        for texel in out.chunks_exact(4) {
            for (got, want) in texel.iter().zip([200u8, 100, 50, 255]) {
                assert!((*got as i32 - want as i32).abs() <= 1, "{texel:?}");
            }
        }
    }

    #[test]
    fn transparent_texels_keep_zero_colour() {
        let image = solid(4, 4, &[255, 255, 255, 0]);
        let out = resample(&image, 2, 2, ColorSpace::Srgb).unwrap();
        assert!(out.chunks_exact(4).all(|t| t == [0, 0, 0, 0]));
    }

    #[test]
    fn embedded_png_decodes_bottom_row_first() {
        let mut picture = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 255, 255]));
        picture.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        let mut bytes = Vec::new();
        picture
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let decoded = MemoryImageDecoder(&bytes)
            .decode(Path::new("scene.glb#image0"))
            .unwrap();
        assert_eq!((decoded.width, decoded.height, decoded.channels), (2, 2, 4));
        assert!(!decoded.hdr);
        // top-left texel ends up in the last row
        assert_eq!(&decoded.pixels[8..12], &[255, 0, 0, 255]);
        assert_eq!(&decoded.pixels[0..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(MemoryImageDecoder(b"not an image").decode(Path::new("x")).is_err());
    }

    #[test]
    fn float_images_resample_as_float() {
        let texels = vec![0.5f32; 4 * 4 * 3];
        let image = DecodedImage {
            width: 4,
            height: 4,
            channels: 3,
            element: ElementType::F32,
            hdr: true,
            pixels: bytemuck::cast_slice(&texels).to_vec(),
        };
        let out = resample(&image, 2, 2, ColorSpace::Linear).unwrap();
        let out: Vec<f32> = bytemuck::pod_collect_to_vec(&out);
        assert_eq!(out.len(), 2 * 2 * 3);
        assert!(out.iter().all(|v| (v - 0.5).abs() < 1e-4));
    }
}
