use std::io::Cursor;

use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::error::{EncodingError, ImageFormatHint};
use image::imageops::FilterType;
use image::ImageReader;
use image::{ExtendedColorType, DynamicImage, GenericImageView, ImageEncoder, ImageError, ImageFormat, ImageResult};

use crate::images::{ImageProxyError, OutputFormat, TransformRequest};

/// WebP requests at or above this quality are encoded losslessly.
pub const LOSSLESS_WEBP_QUALITY: u8 = 95;

// 1 is slowest/smallest, 10 fastest.
const AVIF_SPEED: u8 = 6;

#[derive(Debug)]
pub struct TransformedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Decode, bound, cover-resize and re-encode a source image.
pub fn convert_image(
    data: &[u8],
    declared_content_type: &str,
    request: &TransformRequest,
    max_pixels: u64,
) -> Result<TransformedImage, ImageProxyError> {
    // Header-only probe: oversized images are refused before any pixel buffer exists.
    let (width, height) = with_format_fallback(data, declared_content_type, |reader| reader.into_dimensions())
        .map_err(ImageProxyError::TransformFailed)?;

    let pixels = width as u64 * height as u64;
    if pixels > max_pixels {
        return Err(ImageProxyError::ImageTooLarge {
            width,
            height,
            pixels,
            max: max_pixels,
        });
    }

    let img = with_format_fallback(data, declared_content_type, |reader| reader.decode())
        .map_err(ImageProxyError::TransformFailed)?;

    let img = cover(img, request.width(), request.height());
    let (out_width, out_height) = img.dimensions();

    let bytes = encode_image(&img, request.format(), request.quality()).map_err(ImageProxyError::TransformFailed)?;

    log::debug!(
        "Transformed {}x{} -> {}x{} {} q{} ({} bytes)",
        width,
        height,
        out_width,
        out_height,
        request.format().as_str(),
        request.quality(),
        bytes.len()
    );

    Ok(TransformedImage {
        bytes,
        content_type: request.format().content_type(),
        width: out_width,
        height: out_height,
    })
}

/// Runs `op` on a reader for the sniffed format, retrying once with the
/// format named by the origin's content type when that differs.
fn with_format_fallback<'a, T>(
    data: &'a [u8],
    declared_content_type: &str,
    op: impl Fn(ImageReader<Cursor<&'a [u8]>>) -> ImageResult<T>,
) -> ImageResult<T> {
    let sniffed = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    let sniffed_format = sniffed.format();

    let err = match op(sniffed) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    let mime = declared_content_type.split(';').next().unwrap_or("").trim();
    match ImageFormat::from_mime_type(mime) {
        Some(declared) if Some(declared) != sniffed_format => {
            log::warn!(
                "Decoding as {:?} failed ({}), retrying as declared {:?}",
                sniffed_format,
                err,
                declared
            );
            let mut reader = ImageReader::new(Cursor::new(data));
            reader.set_format(declared);
            op(reader)
        }
        _ => Err(err),
    }
}

/// Cover fit: fill the requested box exactly, cropping from the center, without
/// ever enlarging. When the box is larger than the source, the crop keeps the
/// box's aspect ratio at the source's native resolution instead.
pub fn cover(img: DynamicImage, width: Option<u32>, height: Option<u32>) -> DynamicImage {
    let (src_width, src_height) = img.dimensions();

    match (width, height) {
        (None, None) => img,
        (Some(w), None) => {
            if w >= src_width {
                img
            } else {
                img.resize(w, u32::MAX, FilterType::Lanczos3)
            }
        }
        (None, Some(h)) => {
            if h >= src_height {
                img
            } else {
                img.resize(u32::MAX, h, FilterType::Lanczos3)
            }
        }
        (Some(w), Some(h)) => {
            let scale = f64::max(w as f64 / src_width as f64, h as f64 / src_height as f64);
            if scale < 1.0 {
                img.resize_to_fill(w, h, FilterType::Lanczos3)
            } else {
                let crop_width = ((w as f64 / scale).round() as u32).clamp(1, src_width);
                let crop_height = ((h as f64 / scale).round() as u32).clamp(1, src_height);
                img.crop_imm(
                    (src_width - crop_width) / 2,
                    (src_height - crop_height) / 2,
                    crop_width,
                    crop_height,
                )
            }
        }
    }
}

fn encode_image(img: &DynamicImage, format: OutputFormat, quality: u8) -> ImageResult<Vec<u8>> {
    let (width, height) = img.dimensions();
    let mut output = Vec::new();

    match format {
        OutputFormat::Webp => {
            let rgba = img.to_rgba8();
            let encoder = webp::Encoder::from_rgba(rgba.as_raw(), width, height);
            let lossless = quality >= LOSSLESS_WEBP_QUALITY;
            let memory = encoder.encode_simple(lossless, quality as f32).map_err(|e| {
                ImageError::Encoding(EncodingError::new(
                    ImageFormatHint::Exact(ImageFormat::WebP),
                    format!("{:?}", e),
                ))
            })?;
            output.extend_from_slice(&memory);
        }
        OutputFormat::Avif => {
            let rgba = img.to_rgba8();
            AvifEncoder::new_with_speed_quality(&mut output, AVIF_SPEED, quality).write_image(
                rgba.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut output, quality).write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
        }
        OutputFormat::Png => {
            // Lossless: quality does not apply, compression effort is maxed instead.
            let rgba = img.to_rgba8();
            PngEncoder::new_with_quality(&mut output, CompressionType::Best, PngFilter::Adaptive).write_image(
                rgba.as_raw(),
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
    }

    Ok(output)
}
