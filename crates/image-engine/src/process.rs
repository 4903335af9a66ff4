//! Image processing: decode → orient → resize → adjust → encode
//!
//! Everything here is synchronous and CPU bound. The engine runs it on the
//! blocking pool.

use crate::error::{EngineError, Result};
use crate::params::{Fit, OutputFormat, Transform};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};
use std::io::Cursor;

const FILL_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Pixel budget for any working buffer when `max_image_size` is unset
pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 8192 * 8192;

/// Largest source area that will be decoded at all
pub const MAX_SOURCE_PIXELS: u64 = 100_000_000;

/// An encoded derivative
pub struct Rendered {
    pub data: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

/// Run a transform over raw source bytes.
///
/// `max_image_size` bounds the largest buffer the resize step allocates, in
/// pixels. Both budgets are checked against the header dimensions before
/// anything is decoded.
pub fn render(source: &[u8], transform: &Transform, max_image_size: Option<u64>) -> Result<Rendered> {
    let reader = open_reader(source)?;
    let source_format = reader.format();
    let (src_w, src_h) = reader
        .into_dimensions()
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let source_pixels = src_w as u64 * src_h as u64;
    if source_pixels > MAX_SOURCE_PIXELS {
        return Err(EngineError::ImageTooLarge {
            pixels: source_pixels,
            max_pixels: MAX_SOURCE_PIXELS,
        });
    }

    let oriented = match transform.orientation {
        90 | 270 => (src_h, src_w),
        _ => (src_w, src_h),
    };
    let target = target_dimensions(oriented, transform);

    if let Some(target) = target {
        let max_pixels = max_image_size.unwrap_or(DEFAULT_MAX_IMAGE_SIZE);
        let pixels = working_pixels(oriented, target, transform.fit).unwrap_or(u64::MAX);
        if pixels > max_pixels {
            return Err(EngineError::ImageTooLarge { pixels, max_pixels });
        }
    }

    let mut img = open_reader(source)?
        .decode()
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    img = match transform.orientation {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    };

    if let Some((width, height)) = target {
        img = resize(img, width, height, transform.fit);
    }

    if let Some(brightness) = transform.brightness {
        img = img.brighten(brightness);
    }
    if let Some(contrast) = transform.contrast {
        img = img.adjust_contrast(contrast as f32);
    }
    if let Some(blur) = transform.blur.filter(|b| *b > 0.0) {
        img = img.blur(blur / 2.0);
    }
    if transform.greyscale {
        img = img.grayscale();
    }

    let format = transform
        .format
        .unwrap_or_else(|| OutputFormat::from_source(source_format));
    let data = encode(&img, format, transform.quality)?;

    Ok(Rendered {
        data,
        format,
        width: img.width(),
        height: img.height(),
    })
}

fn open_reader(source: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
    Ok(ImageReader::new(Cursor::new(source)).with_guessed_format()?)
}

/// Resolve the requested box. A missing side follows the source aspect ratio.
fn target_dimensions((src_w, src_h): (u32, u32), transform: &Transform) -> Option<(u32, u32)> {
    let (src_w, src_h) = (src_w.max(1) as f64, src_h.max(1) as f64);

    match transform.target_size() {
        (None, None) => None,
        (Some(w), Some(h)) => Some((w, h)),
        (Some(w), None) => Some((w, ((w as f64 * src_h / src_w).round() as u32).max(1))),
        (None, Some(h)) => Some((((h as f64 * src_w / src_h).round() as u32).max(1), h)),
    }
}

/// Area of the largest buffer `resize` allocates. `None` on overflow.
fn working_pixels((src_w, src_h): (u32, u32), (width, height): (u32, u32), fit: Fit) -> Option<u64> {
    let (w, h) = match fit {
        // Scaled to cover the box before the crop
        Fit::Crop => {
            let scale = f64::max(
                width as f64 / src_w.max(1) as f64,
                height as f64 / src_h.max(1) as f64,
            );
            (
                (src_w as f64 * scale).ceil() as u64,
                (src_h as f64 * scale).ceil() as u64,
            )
        }
        _ => (width as u64, height as u64),
    };
    w.checked_mul(h)
}

fn resize(img: DynamicImage, width: u32, height: u32, fit: Fit) -> DynamicImage {
    match fit {
        Fit::Contain => img.resize(width, height, FilterType::Lanczos3),
        Fit::Max => {
            if width >= img.width() && height >= img.height() {
                img
            } else {
                let (w, h) = (width.min(img.width()), height.min(img.height()));
                img.resize(w, h, FilterType::Lanczos3)
            }
        }
        Fit::Stretch => img.resize_exact(width, height, FilterType::Lanczos3),
        Fit::Crop => img.resize_to_fill(width, height, FilterType::Lanczos3),
        Fit::Fill => {
            let inner = img.resize(width, height, FilterType::Lanczos3).to_rgba8();
            let mut canvas = RgbaImage::from_pixel(width, height, FILL_BACKGROUND);
            let x = width.saturating_sub(inner.width()) / 2;
            let y = height.saturating_sub(inner.height()) / 2;
            imageops::overlay(&mut canvas, &inner, x as i64, y as i64);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}

fn encode(img: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();

    match format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|e| EngineError::Encode(e.to_string()))?;
        }
        OutputFormat::Png | OutputFormat::Gif | OutputFormat::WebP => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut buf), format.image_format())
                .map_err(|e| EngineError::Encode(e.to_string()))?;
        }
    }

    Ok(buf)
}
