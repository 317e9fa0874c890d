//! Sheet image handling: decoding, region cropping and the marked overlay.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::segmenter::{Region, GRID_SIZE};
use crate::error::ProcessError;

/// Fraction of a region's size added as margin on every side before cropping.
const CROP_PADDING: f64 = 0.05;
/// Boundary stroke width of the marked overlay, in pixels.
const OVERLAY_STROKE: u32 = 5;
const OVERLAY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const JPEG_QUALITY: u8 = 90;

/// A rectangle in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ProcessError> {
    image::load_from_memory(bytes).map_err(|e| ProcessError::Decode(e.to_string()))
}

/// Encodes as baseline JPEG. Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, ProcessError> {
    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|e| ProcessError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

fn scale(value: f64, extent: u32) -> i64 {
    (value / GRID_SIZE * f64::from(extent)).round() as i64
}

/// Converts a grid region into pixels without padding, for drawing.
fn region_outline(region: &Region, width: u32, height: u32) -> (i64, i64, i64, i64) {
    (
        scale(region.x, width),
        scale(region.y, height),
        scale(region.width, width),
        scale(region.height, height),
    )
}

/// Converts a grid region into the pixel rectangle to crop: 5 % padding on
/// each side, clamped to the image. Returns `None` when nothing of the
/// region remains inside the image.
pub fn crop_rect(region: &Region, width: u32, height: u32) -> Option<PixelRect> {
    let (x, y, w, h) = region_outline(region, width, height);
    let pad_w = (w as f64 * CROP_PADDING).round() as i64;
    let pad_h = (h as f64 * CROP_PADDING).round() as i64;

    let left = (x - pad_w).max(0);
    let top = (y - pad_h).max(0);
    let right = (x + w + pad_w).min(i64::from(width));
    let bottom = (y + h + pad_h).min(i64::from(height));

    if left >= right || top >= bottom {
        return None;
    }

    Some(PixelRect {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// Crops `region` out of the sheet and encodes it as JPEG.
pub fn crop_region(
    img: &DynamicImage,
    region: &Region,
    index: usize,
) -> Result<Vec<u8>, ProcessError> {
    let (width, height) = img.dimensions();
    let rect = crop_rect(region, width, height).ok_or(ProcessError::EmptyRegion { index })?;
    let cropped = img.crop_imm(rect.x, rect.y, rect.width, rect.height);
    encode_jpeg(&cropped)
}

/// Draws every region's outline onto a copy of the sheet and encodes it as
/// JPEG.
pub fn mark_regions(img: &DynamicImage, regions: &[Region]) -> Result<Vec<u8>, ProcessError> {
    let mut canvas = img.to_rgb8();
    let (width, height) = canvas.dimensions();

    for region in regions {
        let (x, y, w, h) = region_outline(region, width, height);
        for inset in 0..OVERLAY_STROKE as i64 {
            let (rw, rh) = (w - 2 * inset, h - 2 * inset);
            if rw <= 0 || rh <= 0 {
                break;
            }
            let rect = Rect::at((x + inset) as i32, (y + inset) as i32).of_size(rw as u32, rh as u32);
            draw_hollow_rect_mut(&mut canvas, rect, OVERLAY_COLOR);
        }
    }

    encode_jpeg(&DynamicImage::ImageRgb8(canvas))
}

/// Produces the marked overlay stored next to an upload.
pub trait Annotator: Send + Sync {
    fn annotate(&self, img: &DynamicImage, regions: &[Region]) -> Result<Vec<u8>, ProcessError>;
}

/// Red region outlines via [`mark_regions`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RegionOutlines;

impl Annotator for RegionOutlines {
    fn annotate(&self, img: &DynamicImage, regions: &[Region]) -> Result<Vec<u8>, ProcessError> {
        mark_regions(img, regions)
    }
}
