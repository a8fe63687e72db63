//! Core value types shared by every pipeline stage.
//!
//! [`RasterImage`] is the decoded pixel surface handed from stage to stage by
//! value. Each stage takes ownership (or a borrow) of its input and produces a
//! fresh raster, so no surface is ever shared or mutated behind another
//! stage's back.

use crate::error::PipelineError;
use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// A decoded RGBA8 pixel surface with known dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pixels: RgbaImage,
}

impl RasterImage {
    /// A fully transparent raster.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
        }
    }

    /// A raster filled with a single colour.
    pub fn from_pixel(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            pixels: RgbaImage::from_pixel(width, height, Rgba(rgba)),
        }
    }

    /// Wrap a raw row-major RGBA buffer.
    pub fn from_rgba(width: u32, height: u32, buf: Vec<u8>) -> Result<Self, PipelineError> {
        let expected = width as usize * height as usize * 4;
        let len = buf.len();
        RgbaImage::from_raw(width, height, buf)
            .map(|pixels| Self { pixels })
            .ok_or_else(|| {
                PipelineError::Internal(format!(
                    "RGBA buffer for {width}x{height} must be {expected} bytes, got {len}"
                ))
            })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// `true` when either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Raw RGBA bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// Colour of one pixel. Panics when out of bounds, like `image` does.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }
}

impl From<RgbaImage> for RasterImage {
    fn from(pixels: RgbaImage) -> Self {
        Self { pixels }
    }
}

impl From<DynamicImage> for RasterImage {
    fn from(img: DynamicImage) -> Self {
        Self {
            pixels: img.into_rgba8(),
        }
    }
}

/// Integer crop rectangle, relative to the rotated bounding surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole surface of the given size.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies entirely inside a `width` × `height` surface.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= width as u64 && bottom <= height as u64
    }

    /// The centred crop a cropper shows for `aspect` (width / height) at `zoom`.
    ///
    /// Starts from the largest aspect-correct rectangle inside `bounding`,
    /// shrinks it by `zoom`, and centres it. The result always fits.
    pub fn for_zoom(bounding: (u32, u32), aspect: f64, zoom: f64) -> Result<Self, PipelineError> {
        let (bw, bh) = bounding;
        if bw == 0 || bh == 0 {
            return Err(PipelineError::Geometry(format!(
                "cannot crop an empty {bw}x{bh} surface"
            )));
        }
        if !aspect.is_finite() || aspect <= 0.0 {
            return Err(PipelineError::Geometry(format!(
                "aspect ratio must be positive, got {aspect}"
            )));
        }
        if !zoom.is_finite() || zoom < 1.0 {
            return Err(PipelineError::Geometry(format!("zoom must be ≥ 1, got {zoom}")));
        }

        let (bw_f, bh_f) = (bw as f64, bh as f64);
        let (w, h) = if bw_f / bh_f > aspect {
            (bh_f * aspect, bh_f)
        } else {
            (bw_f, bw_f / aspect)
        };

        let width = ((w / zoom).round() as u32).clamp(1, bw);
        let height = ((h / zoom).round() as u32).clamp(1, bh);

        Ok(Self::new((bw - width) / 2, (bh - height) / 2, width, height))
    }
}

/// User-controlled transform applied before cropping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformParams {
    /// Clockwise rotation in degrees, `[0, 360)`.
    pub rotation_degrees: f64,
    /// Cropper zoom factor, `≥ 1`. Only affects which crop the UI proposes.
    pub zoom: f64,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            rotation_degrees: 0.0,
            zoom: 1.0,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

impl TransformParams {
    /// Params with the given rotation, folded into `[0, 360)`.
    pub fn rotated(degrees: f64) -> Self {
        Self {
            rotation_degrees: normalized_rotation(degrees),
            ..Self::default()
        }
    }

    pub fn with_flip(mut self, horizontal: bool, vertical: bool) -> Self {
        self.flip_horizontal = horizontal;
        self.flip_vertical = vertical;
        self
    }

    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let r = self.rotation_degrees;
        if !r.is_finite() || !(0.0..360.0).contains(&r) {
            return Err(PipelineError::Geometry(format!(
                "rotation must be in [0, 360), got {r}"
            )));
        }
        if !self.zoom.is_finite() || self.zoom < 1.0 {
            return Err(PipelineError::Geometry(format!(
                "zoom must be ≥ 1, got {}",
                self.zoom
            )));
        }
        Ok(())
    }

    /// Number of clockwise quarter turns when the rotation is a right angle.
    pub fn quarter_turns(&self) -> Option<u8> {
        right_angle_turns(self.rotation_degrees)
    }
}

/// Clockwise quarter turns for `degrees`, if it is a right angle up to float
/// noise. Geometry and pixel paths both key off this one test.
pub fn right_angle_turns(degrees: f64) -> Option<u8> {
    let turns = degrees / 90.0;
    let rounded = turns.round();
    if (turns - rounded).abs() < 1e-9 {
        Some((rounded as i64).rem_euclid(4) as u8)
    } else {
        None
    }
}

/// Fold any finite angle into `[0, 360)`.
pub fn normalized_rotation(degrees: f64) -> f64 {
    let r = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}
