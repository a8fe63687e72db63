//! Raster transform engine: rotate, flip, then crop.
//!
//! The geometry mirrors what a 2D canvas does when a cropper commits:
//!
//! 1. allocate a surface the size of the rotated image's bounding box
//! 2. move the origin to the surface centre
//! 3. rotate, then flip along the requested axes
//! 4. move back by the *source* half-dimensions and draw the source
//! 5. copy the crop rectangle out into a surface of exactly that size
//!
//! Right angles are pure pixel permutations and go through `imageops`
//! so they are lossless. Any other angle is inverse-mapped with bilinear
//! sampling; surface pixels no source pixel covers stay transparent.
//!
//! The working surface is a local value created and dropped inside one
//! call; nothing here keeps state between transforms.

use crate::error::PipelineError;
use crate::raster::{right_angle_turns, CropRegion, RasterImage, TransformParams};
use image::{imageops, Rgba, RgbaImage};
use std::sync::Arc;
use tracing::debug;

/// Float error tolerated before rounding a surface size up.
const SNAP_EPSILON: f64 = 1e-6;

/// Bounding box of a `width` × `height` rectangle rotated by `rotation_degrees`.
///
/// ```
/// # use folio_imgup::pipeline::transform::bounding_size;
/// let (w, h) = bounding_size(100.0, 50.0, 90.0);
/// assert!((w - 50.0).abs() < 1e-9 && (h - 100.0).abs() < 1e-9);
/// ```
pub fn bounding_size(width: f64, height: f64, rotation_degrees: f64) -> (f64, f64) {
    let theta = rotation_degrees.to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    (cos * width + sin * height, sin * width + cos * height)
}

/// Integer surface size for a rotated raster: the bounding box rounded up.
///
/// Right angles give the source or transposed dimensions exactly, matching
/// the surface the pixel path builds.
pub fn surface_size(width: u32, height: u32, rotation_degrees: f64) -> (u32, u32) {
    if let Some(turns) = right_angle_turns(rotation_degrees) {
        return if turns % 2 == 0 {
            (width, height)
        } else {
            (height, width)
        };
    }
    let (bw, bh) = bounding_size(width as f64, height as f64, rotation_degrees);
    (round_up_px(bw), round_up_px(bh))
}

fn round_up_px(v: f64) -> u32 {
    (v - SNAP_EPSILON).ceil().max(0.0) as u32
}

/// Rotate, flip and crop `source` synchronously.
///
/// The output is exactly `crop.width` × `crop.height`.
///
/// # Errors
/// [`PipelineError::Geometry`] when the params are invalid, the source or
/// crop is empty, or the crop does not lie inside the rotated surface.
pub fn apply_transform(
    source: &RasterImage,
    params: &TransformParams,
    crop: CropRegion,
) -> Result<RasterImage, PipelineError> {
    params.validate()?;
    if source.is_empty() {
        return Err(PipelineError::Geometry(format!(
            "source raster is empty ({}x{})",
            source.width(),
            source.height()
        )));
    }
    if crop.is_empty() {
        return Err(PipelineError::Geometry(format!(
            "crop {}x{} has no area",
            crop.width, crop.height
        )));
    }

    let (sw, sh) = surface_size(source.width(), source.height(), params.rotation_degrees);
    if !crop.fits_within(sw, sh) {
        return Err(PipelineError::Geometry(format!(
            "crop {{x: {}, y: {}, width: {}, height: {}}} exceeds the rotated {}x{} surface",
            crop.x, crop.y, crop.width, crop.height, sw, sh
        )));
    }

    let surface = match params.quarter_turns() {
        Some(turns) => right_angle_surface(source.as_image(), turns, params),
        None => rotated_surface(source.as_image(), params, (sw, sh)),
    };

    debug!(
        "Transform {}x{} rot={}° flip=({}, {}) → surface {}x{} → crop {}x{}",
        source.width(),
        source.height(),
        params.rotation_degrees,
        params.flip_horizontal,
        params.flip_vertical,
        surface.width(),
        surface.height(),
        crop.width,
        crop.height
    );

    let out = imageops::crop_imm(&surface, crop.x, crop.y, crop.width, crop.height).to_image();
    Ok(RasterImage::from(out))
}

/// Async wrapper around [`apply_transform`] that runs on the blocking pool.
pub async fn transform(
    source: Arc<RasterImage>,
    params: TransformParams,
    crop: CropRegion,
) -> Result<RasterImage, PipelineError> {
    tokio::task::spawn_blocking(move || apply_transform(&source, &params, crop))
        .await
        .map_err(|e| PipelineError::Internal(format!("Transform task panicked: {}", e)))?
}

/// Exact surface for multiples of 90°: flip about the source centre, then turn.
fn right_angle_surface(src: &RgbaImage, turns: u8, params: &TransformParams) -> RgbaImage {
    let mut img = match (params.flip_horizontal, params.flip_vertical) {
        (false, false) => src.clone(),
        (true, false) => imageops::flip_horizontal(src),
        (false, true) => imageops::flip_vertical(src),
        (true, true) => imageops::rotate180(src),
    };
    img = match turns {
        1 => imageops::rotate90(&img),
        2 => imageops::rotate180(&img),
        3 => imageops::rotate270(&img),
        _ => img,
    };
    img
}

/// Inverse-mapped surface for arbitrary angles.
fn rotated_surface(src: &RgbaImage, params: &TransformParams, size: (u32, u32)) -> RgbaImage {
    let (w, h) = (src.width() as f64, src.height() as f64);
    let (bw, bh) = bounding_size(w, h, params.rotation_degrees);
    let theta = params.rotation_degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    let fx = if params.flip_horizontal { -1.0 } else { 1.0 };
    let fy = if params.flip_vertical { -1.0 } else { 1.0 };

    let mut out = RgbaImage::new(size.0, size.1);
    for (px, py, pixel) in out.enumerate_pixels_mut() {
        // Pixel centre relative to the bounding-box centre.
        let qx = px as f64 + 0.5 - bw / 2.0;
        let qy = py as f64 + 0.5 - bh / 2.0;

        // Undo the rotation, then the flip, then the half-size translation.
        let ux = (cos * qx + sin * qy) * fx;
        let uy = (-sin * qx + cos * qy) * fy;
        let sx = ux + w / 2.0;
        let sy = uy + h / 2.0;

        if sx < 0.0 || sy < 0.0 || sx >= w || sy >= h {
            continue;
        }
        *pixel = sample_bilinear(src, sx - 0.5, sy - 0.5);
    }
    out
}

/// Bilinear sample at continuous pixel coordinates, clamped to the edges.
fn sample_bilinear(src: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let max_x = (src.width() - 1) as f64;
    let max_y = (src.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(src.width() - 1);
    let y1 = (y0 + 1).min(src.height() - 1);
    let tx = x - x0 as f64;
    let ty = y - y0 as f64;

    let p00 = src.get_pixel(x0, y0).0;
    let p10 = src.get_pixel(x1, y0).0;
    let p01 = src.get_pixel(x0, y1).0;
    let p11 = src.get_pixel(x1, y1).0;

    let mut rgba = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f64 * (1.0 - tx) + p10[c] as f64 * tx;
        let bottom = p01[c] as f64 * (1.0 - tx) + p11[c] as f64 * tx;
        rgba[c] = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(rgba)
}
