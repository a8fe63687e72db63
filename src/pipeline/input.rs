//! Source files and the image loader.
//!
//! A [`SourceFile`] is the immutable file the user picked: bytes, display
//! name, size and declared MIME type. [`load_raster`] decodes it into a
//! [`RasterImage`]. Decoding is CPU-bound, so it runs on the blocking pool;
//! the future resolves only once the pixel dimensions are final, so callers
//! never see a half-decoded raster.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::raster::RasterImage;
use image::{ImageReader, Limits};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// MIME type used when the content is not a recognised image.
pub const UNKNOWN_MIME: &str = "application/octet-stream";

/// An immutable user-selected (or pipeline-produced) file.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceFile {
    name: String,
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish()
    }
}

impl SourceFile {
    /// A file with an explicitly declared MIME type.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: Arc::from(bytes.into()),
        }
    }

    /// A file whose MIME type is sniffed from its magic bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let mime = sniff_mime(&bytes);
        Self::new(name, mime, bytes)
    }

    /// Read a file from disk. The display name is the file-name component.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| PipelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        debug!("Read {} ({} bytes)", path.display(), bytes.len());
        Ok(Self::from_bytes(name, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reject the file before any work when it exceeds `max_bytes`.
    pub fn ensure_within(&self, max_bytes: u64) -> Result<(), PipelineError> {
        if self.size() > max_bytes {
            return Err(PipelineError::FileTooLarge {
                size: self.size(),
                max: max_bytes,
            });
        }
        Ok(())
    }
}

/// Guess a MIME type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| UNKNOWN_MIME.to_string())
}

/// Decode a source file into a raster.
///
/// # Errors
/// [`PipelineError::Decode`] when the bytes are not an image this build can
/// read, are corrupt, or exceed `config.max_decode_dimension`.
pub async fn load_raster(
    source: &SourceFile,
    config: &PipelineConfig,
) -> Result<RasterImage, PipelineError> {
    let name = source.name.clone();
    let bytes = Arc::clone(&source.bytes);
    let max_dim = config.max_decode_dimension;

    let raster = tokio::task::spawn_blocking(move || decode_blocking(&name, &bytes, max_dim))
        .await
        .map_err(|e| PipelineError::Internal(format!("Decode task panicked: {}", e)))??;

    info!(
        "Loaded '{}' → {}x{} px",
        source.name,
        raster.width(),
        raster.height()
    );
    Ok(raster)
}

/// Blocking implementation of [`load_raster`].
pub(crate) fn decode_blocking(
    name: &str,
    bytes: &[u8],
    max_dimension: u32,
) -> Result<RasterImage, PipelineError> {
    let decode_err = |detail: String| PipelineError::Decode {
        name: name.to_string(),
        detail,
    };

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?;

    if reader.format().is_none() {
        let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(decode_err(format!(
            "unrecognised image format (first bytes: {magic:02x?})"
        )));
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(max_dimension);
    limits.max_image_height = Some(max_dimension);
    reader.limits(limits);

    let img = reader.decode().map_err(|e| decode_err(e.to_string()))?;
    Ok(RasterImage::from(img))
}
