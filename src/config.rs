//! Configuration types for the image pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct lets the
//! CLI, an embedding service and the tests share one source of defaults.

use crate::backend::UploadBackend;
use crate::error::PipelineError;
use crate::progress::PipelineObserver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Environment variable consulted when no endpoint is configured.
pub const ENDPOINT_ENV: &str = "IMGUP_ENDPOINT";

/// Default upload ceiling: 4 MiB.
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 4 * 1024 * 1024;

/// Configuration for loading, transforming, hashing and uploading one image.
///
/// # Example
/// ```rust
/// use folio_imgup::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .endpoint("https://api.example.com/image")
///     .max_input_bytes(2 * 1024 * 1024)
///     .hash_components(4, 3)
///     .build()
///     .unwrap();
/// assert_eq!(config.hash_components_y, 3);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Base URL of the upload-authorization service. Phase 1 posts to
    /// `{endpoint}/upload`. Falls back to `$IMGUP_ENDPOINT` when `None`.
    pub endpoint: Option<String>,

    /// Largest source file accepted, in bytes. Default: 4 MiB.
    ///
    /// Checked before any decode or network call.
    pub max_input_bytes: u64,

    /// Largest width or height the decoder will allocate. Default: 16384.
    ///
    /// A few kilobytes of compressed data can describe a gigapixel image;
    /// this cap keeps a hostile file from exhausting memory.
    pub max_decode_dimension: u32,

    /// Blurhash components along X. Range 1–9. Default: 4.
    pub hash_components_x: u32,

    /// Blurhash components along Y. Range 1–9. Default: 4.
    pub hash_components_y: u32,

    /// Long-edge size the raster is downscaled to before hashing. Default: 64.
    pub hash_sample_size: u32,

    /// Placeholder width produced when decoding a hash. Default: 32.
    pub placeholder_width: u32,

    /// Placeholder height produced when decoding a hash. Default: 32.
    pub placeholder_height: u32,

    /// Contrast multiplier applied to AC components on decode. Default: 1.0.
    pub placeholder_punch: f32,

    /// Per-request timeout for both upload phases, in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Access control requested for the stored object.
    pub acl: Option<Acl>,

    /// Content disposition requested for the stored object.
    pub content_disposition: Option<ContentDisposition>,

    /// Caller correlation id forwarded as the file's `customId`.
    pub custom_id: Option<String>,

    /// Receives stage and failure notifications.
    pub observer: Option<Arc<dyn PipelineObserver>>,

    /// Pre-constructed upload transport. Takes precedence over `endpoint`.
    pub backend: Option<Arc<dyn UploadBackend>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_decode_dimension: 16_384,
            hash_components_x: 4,
            hash_components_y: 4,
            hash_sample_size: 64,
            placeholder_width: 32,
            placeholder_height: 32,
            placeholder_punch: 1.0,
            request_timeout_secs: 60,
            acl: None,
            content_disposition: None,
            custom_id: None,
            observer: None,
            backend: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("endpoint", &self.endpoint)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("max_decode_dimension", &self.max_decode_dimension)
            .field("hash_components_x", &self.hash_components_x)
            .field("hash_components_y", &self.hash_components_y)
            .field("hash_sample_size", &self.hash_sample_size)
            .field("placeholder_width", &self.placeholder_width)
            .field("placeholder_height", &self.placeholder_height)
            .field("placeholder_punch", &self.placeholder_punch)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("acl", &self.acl)
            .field("content_disposition", &self.content_disposition)
            .field("custom_id", &self.custom_id)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .field("backend", &self.backend.as_ref().map(|_| "<dyn UploadBackend>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The configured endpoint, or `$IMGUP_ENDPOINT`.
    pub fn resolve_endpoint(&self) -> Result<String, PipelineError> {
        if let Some(ref endpoint) = self.endpoint {
            return Ok(endpoint.clone());
        }
        match std::env::var(ENDPOINT_ENV) {
            Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => Err(PipelineError::InvalidConfig(format!(
                "no upload endpoint configured; pass one or set {ENDPOINT_ENV}"
            ))),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.config.endpoint = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn max_input_bytes(mut self, bytes: u64) -> Self {
        self.config.max_input_bytes = bytes;
        self
    }

    pub fn max_decode_dimension(mut self, px: u32) -> Self {
        self.config.max_decode_dimension = px.max(1);
        self
    }

    pub fn hash_components(mut self, x: u32, y: u32) -> Self {
        self.config.hash_components_x = x;
        self.config.hash_components_y = y;
        self
    }

    pub fn hash_sample_size(mut self, px: u32) -> Self {
        self.config.hash_sample_size = px.max(8);
        self
    }

    pub fn placeholder_size(mut self, width: u32, height: u32) -> Self {
        self.config.placeholder_width = width;
        self.config.placeholder_height = height;
        self
    }

    pub fn placeholder_punch(mut self, punch: f32) -> Self {
        self.config.placeholder_punch = punch;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn acl(mut self, acl: Acl) -> Self {
        self.config.acl = Some(acl);
        self
    }

    pub fn content_disposition(mut self, cd: ContentDisposition) -> Self {
        self.config.content_disposition = Some(cd);
        self
    }

    pub fn custom_id(mut self, id: impl Into<String>) -> Self {
        self.config.custom_id = Some(id.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn UploadBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if let Some(ref endpoint) = c.endpoint {
            reqwest::Url::parse(endpoint).map_err(|e| {
                PipelineError::InvalidConfig(format!("endpoint '{endpoint}' is not a URL: {e}"))
            })?;
        }
        if c.max_input_bytes == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_input_bytes must be ≥ 1".into(),
            ));
        }
        for (axis, n) in [("x", c.hash_components_x), ("y", c.hash_components_y)] {
            if !(1..=9).contains(&n) {
                return Err(PipelineError::InvalidConfig(format!(
                    "blurhash components along {axis} must be 1–9, got {n}"
                )));
            }
        }
        if c.placeholder_width == 0 || c.placeholder_height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "placeholder size must be non-zero, got {}x{}",
                c.placeholder_width, c.placeholder_height
            )));
        }
        if !c.placeholder_punch.is_finite() || c.placeholder_punch <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "placeholder punch must be positive, got {}",
                c.placeholder_punch
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Access control for the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acl {
    PublicRead,
    Private,
}

/// How the storage service should serve the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentDisposition {
    Inline,
    Attachment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_input_bytes, 4 * 1024 * 1024);
        assert_eq!((c.hash_components_x, c.hash_components_y), (4, 4));
        assert_eq!((c.placeholder_width, c.placeholder_height), (32, 32));
        assert!(c.endpoint.is_none());
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let c = PipelineConfig::builder()
            .endpoint("https://api.example.com/image/")
            .build()
            .unwrap();
        assert_eq!(c.endpoint.as_deref(), Some("https://api.example.com/image"));
        assert_eq!(c.resolve_endpoint().unwrap(), "https://api.example.com/image");
    }

    #[test]
    fn builder_rejects_out_of_range_components() {
        let err = PipelineConfig::builder().hash_components(10, 4).build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
        let err = PipelineConfig::builder().hash_components(4, 0).build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_bad_endpoint() {
        let err = PipelineConfig::builder().endpoint("not a url").build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_zero_limits() {
        assert!(PipelineConfig::builder().max_input_bytes(0).build().is_err());
        assert!(PipelineConfig::builder().placeholder_size(0, 32).build().is_err());
    }

    #[test]
    fn acl_serialises_like_the_service_expects() {
        assert_eq!(serde_json::to_string(&Acl::PublicRead).unwrap(), "\"public-read\"");
        assert_eq!(
            serde_json::to_string(&ContentDisposition::Inline).unwrap(),
            "\"inline\""
        );
    }

    #[test]
    fn debug_hides_trait_objects() {
        let s = format!("{:?}", PipelineConfig::default());
        assert!(s.contains("PipelineConfig"));
        assert!(s.contains("max_input_bytes"));
    }
}
