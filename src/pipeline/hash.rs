//! Perceptual hash codec (blurhash).
//!
//! A blurhash is a short base83 string holding a small grid of DCT colour
//! coefficients. It is stored next to the uploaded URL and decoded into a
//! tiny placeholder raster while the real image loads.
//!
//! Structure of a hash:
//!
//! ```text
//! [size flag][max AC][DC: 4 chars][AC: 2 chars × (x·y − 1)]
//!  1 char     1 char
//! ```
//!
//! so a hash declaring `x × y` components is exactly `4 + 2·x·y` characters.
//! [`PerceptualHash::parse`] checks that structure without decoding, and
//! decoding refuses anything that fails it.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::encode::encode_webp;
use crate::raster::RasterImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const BASE83: &[u8; 83] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz#$%*+,-.:;=?@[]^_{|}~";

/// Size flag of a 9×9 hash; anything above it is not a blurhash.
const MAX_SIZE_FLAG: u32 = 80;

/// AC magnitude below which every coefficient is treated as zero: one step
/// of the quantised maximum.
const AC_FLOOR: f64 = 1.0 / 166.0;

/// A zero AC coefficient (all three channels at the midpoint 9 of 0..=18).
const NEUTRAL_AC: &str = "fQ";

/// Long edge the raster is reduced to before hashing when no config is given.
pub const DEFAULT_SAMPLE_SIZE: u32 = 64;

/// A structurally valid blurhash string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PerceptualHash(String);

impl PerceptualHash {
    /// Validate `s` as a blurhash without decoding it.
    pub fn parse(s: &str) -> Result<Self, PipelineError> {
        validate(s)?;
        Ok(Self(s.to_string()))
    }

    /// Cheap syntactic check.
    pub fn is_valid(s: &str) -> bool {
        validate(s).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Declared `(x, y)` component counts.
    pub fn components(&self) -> (u32, u32) {
        // Validated on construction, so the flag is always a base83 digit.
        let flag = base83_value(self.0.as_bytes()[0]).unwrap_or(0);
        (flag % 9 + 1, flag / 9 + 1)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PerceptualHash {
    type Error = PipelineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate(&s)?;
        Ok(Self(s))
    }
}

impl From<PerceptualHash> for String {
    fn from(h: PerceptualHash) -> Self {
        h.0
    }
}

fn base83_value(c: u8) -> Option<u32> {
    BASE83.iter().position(|&b| b == c).map(|i| i as u32)
}

fn validate(s: &str) -> Result<(), PipelineError> {
    let bytes = s.as_bytes();
    if bytes.len() < 6 {
        return Err(PipelineError::InvalidHash(format!(
            "must be at least 6 characters, got {}",
            bytes.len()
        )));
    }
    if let Some(pos) = bytes.iter().position(|&b| base83_value(b).is_none()) {
        return Err(PipelineError::InvalidHash(format!(
            "character at position {pos} is outside the base83 alphabet"
        )));
    }
    let flag = base83_value(bytes[0]).unwrap_or(0);
    if flag > MAX_SIZE_FLAG {
        return Err(PipelineError::InvalidHash(format!(
            "size flag {flag} declares more than 9x9 components"
        )));
    }
    let (x, y) = (flag % 9 + 1, flag / 9 + 1);
    let expected = 4 + 2 * (x * y) as usize;
    if bytes.len() != expected {
        return Err(PipelineError::InvalidHash(format!(
            "declares {x}x{y} components so must be {expected} characters, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

/// Encode `raster` with the default sampling size.
///
/// Deterministic: the same raster and component counts always give the same
/// string.
pub fn encode_hash(
    raster: &RasterImage,
    components_x: u32,
    components_y: u32,
) -> Result<PerceptualHash, PipelineError> {
    encode_hash_sampled(raster, components_x, components_y, DEFAULT_SAMPLE_SIZE)
}

/// Encode `raster`, downscaling it first so its long edge is at most
/// `sample_size`.
pub fn encode_hash_sampled(
    raster: &RasterImage,
    components_x: u32,
    components_y: u32,
    sample_size: u32,
) -> Result<PerceptualHash, PipelineError> {
    for n in [components_x, components_y] {
        if !(1..=9).contains(&n) {
            return Err(PipelineError::InvalidHash(format!(
                "component counts must be 1–9, got {components_x}x{components_y}"
            )));
        }
    }
    if raster.is_empty() {
        return Err(PipelineError::Encode(format!(
            "cannot hash an empty {}x{} raster",
            raster.width(),
            raster.height()
        )));
    }

    let (w, h) = raster.dimensions();
    let long_edge = w.max(h);
    let sample;
    let img = if long_edge > sample_size.max(1) {
        let scale = sample_size.max(1) as f64 / long_edge as f64;
        let sw = ((w as f64 * scale).round() as u32).max(1);
        let sh = ((h as f64 * scale).round() as u32).max(1);
        sample = imageops::resize(raster.as_image(), sw, sh, FilterType::Triangle);
        &sample
    } else {
        raster.as_image()
    };

    let hash = blurhash::encode(
        components_x,
        components_y,
        img.width(),
        img.height(),
        img.as_raw(),
    )
    .map_err(|e| PipelineError::Encode(format!("blurhash: {e}")))?;

    // blurhash normalises AC terms by their own maximum, so a flat image turns
    // its float noise into full-scale AC. Below one quantisation step the
    // AC block is dropped.
    let hash = if components_x * components_y > 1
        && max_ac_magnitude(img, components_x, components_y) < AC_FLOOR
    {
        flatten_ac(&hash, components_x * components_y)
    } else {
        hash
    };

    debug!(
        "Hashed {}x{} (sampled {}x{}) → {}",
        w,
        h,
        img.width(),
        img.height(),
        hash
    );
    PerceptualHash::parse(&hash)
}

fn srgb_to_linear(v: u8) -> f64 {
    let v = v as f64 / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// Largest absolute AC coefficient over all channels, in linear light.
fn max_ac_magnitude(img: &RgbaImage, components_x: u32, components_y: u32) -> f64 {
    let (w, h) = img.dimensions();
    let linear: Vec<[f64; 3]> = img
        .pixels()
        .map(|p| [srgb_to_linear(p[0]), srgb_to_linear(p[1]), srgb_to_linear(p[2])])
        .collect();
    let scale = 2.0 / (w as f64 * h as f64);

    let mut max = 0.0f64;
    for j in 0..components_y {
        for i in 0..components_x {
            if i == 0 && j == 0 {
                continue;
            }
            let mut sum = [0.0f64; 3];
            for y in 0..h {
                let by = (PI * j as f64 * y as f64 / h as f64).cos();
                for x in 0..w {
                    let basis = (PI * i as f64 * x as f64 / w as f64).cos() * by;
                    let px = &linear[(y * w + x) as usize];
                    for c in 0..3 {
                        sum[c] += basis * px[c];
                    }
                }
            }
            for v in sum {
                max = max.max((v * scale).abs());
            }
        }
    }
    max
}

/// Keep the size flag and DC of `hash`; zero the maximum and every AC term.
fn flatten_ac(hash: &str, components: u32) -> String {
    let mut out = String::with_capacity(hash.len());
    out.push_str(&hash[..1]);
    out.push('0');
    out.push_str(&hash[2..6]);
    for _ in 1..components {
        out.push_str(NEUTRAL_AC);
    }
    out
}

/// Hash on the blocking pool using the config's component counts.
pub async fn hash_raster(
    raster: Arc<RasterImage>,
    config: &PipelineConfig,
) -> Result<PerceptualHash, PipelineError> {
    let (cx, cy, sample) = (
        config.hash_components_x,
        config.hash_components_y,
        config.hash_sample_size,
    );
    tokio::task::spawn_blocking(move || encode_hash_sampled(&raster, cx, cy, sample))
        .await
        .map_err(|e| PipelineError::Internal(format!("Hash task panicked: {}", e)))?
}

/// Decode `hash` into a `width` × `height` placeholder.
///
/// The output resolution is unrelated to the original image; it is a
/// low-fidelity stand-in, not a reconstruction.
///
/// # Errors
/// [`PipelineError::InvalidHash`] for a malformed hash or a zero-size output.
/// No raster is produced in either case.
pub fn decode_hash(
    hash: &str,
    width: u32,
    height: u32,
    punch: f32,
) -> Result<RasterImage, PipelineError> {
    validate(hash)?;
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidHash(format!(
            "placeholder size must be non-zero, got {width}x{height}"
        )));
    }
    let pixels = blurhash::decode(hash, width, height, punch)
        .map_err(|e| PipelineError::InvalidHash(e.to_string()))?;
    RasterImage::from_rgba(width, height, pixels)
}

/// Decode using the placeholder size and punch from `config`.
pub fn decode_placeholder(
    hash: &PerceptualHash,
    config: &PipelineConfig,
) -> Result<RasterImage, PipelineError> {
    decode_hash(
        hash.as_str(),
        config.placeholder_width,
        config.placeholder_height,
        config.placeholder_punch,
    )
}

/// Decode `hash` and return the placeholder as a `data:image/webp;base64,` URL.
pub fn decode_to_data_url(hash: &str, width: u32, height: u32) -> Result<String, PipelineError> {
    let placeholder = decode_hash(hash, width, height, 1.0)?;
    let (bytes, mime) = encode_webp(&placeholder)?;
    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}
