//! Payload encoding: `RasterImage` → WebP bytes wrapped in a `SourceFile`.
//!
//! This is the only stage that fixes the MIME type and byte size sent to the
//! authorization service. Output is always lossless WebP: the storage bucket
//! is configured for `image/webp` only, and lossless keeps a re-edited image
//! from accumulating compression artefacts.

use crate::error::PipelineError;
use crate::pipeline::input::SourceFile;
use crate::raster::RasterImage;
use image::codecs::webp::WebPEncoder;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// MIME type of every payload this crate produces.
pub const OUTPUT_MIME: &str = "image/webp";

/// File extension matching [`OUTPUT_MIME`].
pub const OUTPUT_EXTENSION: &str = "webp";

static EXTENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[A-Za-z0-9]{1,5}$").unwrap());
static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Serialise a raster to lossless WebP.
///
/// Returns the bytes and their MIME type.
pub fn encode_webp(raster: &RasterImage) -> Result<(Vec<u8>, &'static str), PipelineError> {
    if raster.is_empty() {
        return Err(PipelineError::Encode(format!(
            "cannot encode a zero-area {}x{} raster",
            raster.width(),
            raster.height()
        )));
    }
    let mut buf = Vec::new();
    raster
        .as_image()
        .write_with_encoder(WebPEncoder::new_lossless(&mut buf))
        .map_err(|e| PipelineError::Encode(e.to_string()))?;

    debug!(
        "Encoded {}x{} → {} bytes {}",
        raster.width(),
        raster.height(),
        buf.len(),
        OUTPUT_MIME
    );
    Ok((buf, OUTPUT_MIME))
}

/// Encode `raster` and wrap it as a file named after `display_name`.
///
/// The name keeps its stem but takes the `.webp` extension, so
/// `Holiday Photo.JPG` becomes `Holiday-Photo.webp`.
pub fn encode_payload(raster: &RasterImage, display_name: &str) -> Result<SourceFile, PipelineError> {
    let (bytes, mime) = encode_webp(raster)?;
    Ok(SourceFile::new(output_file_name(display_name), mime, bytes))
}

/// [`encode_payload`] on the blocking pool.
pub async fn encode(raster: Arc<RasterImage>, display_name: String) -> Result<SourceFile, PipelineError> {
    tokio::task::spawn_blocking(move || encode_payload(&raster, &display_name))
        .await
        .map_err(|e| PipelineError::Internal(format!("Encode task panicked: {}", e)))?
}

/// Derive the uploaded file name from a user-supplied display name.
pub fn output_file_name(display_name: &str) -> String {
    let base = display_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(display_name)
        .trim();
    let stem = EXTENSION.replace(base, "");
    let stem = UNSAFE_CHARS.replace_all(stem.trim(), "-");
    let stem = stem.trim_matches(|c| c == '-' || c == '.');
    let stem = if stem.is_empty() { "image" } else { stem };
    format!("{stem}.{OUTPUT_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    #[test]
    fn encode_small_image() {
        let raster = RasterImage::from_pixel(10, 10, [255, 0, 0, 255]);
        let file = encode_payload(&raster, "red.png").expect("encode should succeed");
        assert_eq!(file.mime_type(), "image/webp");
        assert_eq!(file.name(), "red.webp");
        assert!(file.size() > 0);
        assert_eq!(image::guess_format(file.bytes()).unwrap(), ImageFormat::WebP);
    }

    #[test]
    fn lossless_round_trip() {
        let raster = RasterImage::from_pixel(3, 2, [1, 2, 3, 255]);
        let (bytes, _) = encode_webp(&raster).unwrap();
        let back = image::load_from_memory(&bytes).unwrap().into_rgba8();
        assert_eq!(back.get_pixel(2, 1).0, [1, 2, 3, 255]);
    }

    #[test]
    fn zero_area_is_encode_error() {
        let err = encode_payload(&RasterImage::new(0, 4), "x.png").unwrap_err();
        assert!(matches!(err, PipelineError::Encode(_)));
    }

    #[test]
    fn file_names() {
        assert_eq!(output_file_name("Holiday Photo.JPG"), "Holiday-Photo.webp");
        assert_eq!(output_file_name("C:\\Users\\me\\cover.jpeg"), "cover.webp");
        assert_eq!(output_file_name("dir/sub/shot.webp"), "shot.webp");
        assert_eq!(output_file_name("archive.tar.gz"), "archive.tar.webp");
        assert_eq!(output_file_name(""), "image.webp");
        assert_eq!(output_file_name("???.png"), "image.webp");
    }

    #[tokio::test]
    async fn async_encode_wraps_name() {
        let raster = Arc::new(RasterImage::from_pixel(4, 4, [0, 0, 0, 255]));
        let file = encode(raster, "thumb.png".into()).await.unwrap();
        assert_eq!(file.name(), "thumb.webp");
    }
}
