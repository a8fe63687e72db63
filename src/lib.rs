//! # folio-imgup
//!
//! Client-side image pipeline for a portfolio content dashboard: crop,
//! rotate and flip a picked image, compute a blurhash placeholder, re-encode
//! it to lossless WebP and push it to object storage through a two-phase
//! signed upload.
//!
//! ## Pipeline Overview
//!
//! ```text
//! SourceFile
//!  │
//!  ├─ 1. Load       size check, decode to RGBA (spawn_blocking)
//!  ├─ 2. Transform  rotate, flip, crop on the rotated bounding surface
//!  ├─ 3. Encode     lossless WebP payload, renamed *.webp
//!  ├─ 4. Hash       4×4 blurhash (failure is reported, never fatal)
//!  └─ 5. Upload     authorize ──► signed descriptor ──► multipart submit
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use folio_imgup::{process, PipelineConfig, ProcessRequest, SourceFile, TransformParams};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .endpoint("https://api.example.com/image")
//!         .build()?;
//!     let source = SourceFile::from_path("cover.jpg").await?;
//!     let request = ProcessRequest::default().with_params(TransformParams::rotated(90.0));
//!     let output = process(&source, &request, &config, &CancellationToken::new()).await?;
//!     println!("{:?} {:?}", output.file_url, output.hash);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `imgup` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! folio-imgup = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod raster;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{BackendResponse, HttpBackend, SubmitForm, TransportError, UploadBackend};
pub use config::{Acl, ContentDisposition, PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, UserNotice};
pub use lifecycle::{PreviewInfo, PreviewRegistry};
pub use output::{PipelineOutput, PipelineStats, SourceMetadata};
pub use pipeline::hash::{decode_hash, decode_to_data_url, encode_hash, PerceptualHash};
pub use pipeline::input::{load_raster, SourceFile};
pub use pipeline::transform::{apply_transform, bounding_size};
pub use pipeline::upload::{upload, UploadDescriptor};
pub use process::{inspect, process, process_sync, ProcessRequest};
pub use progress::{NoopObserver, PipelineObserver, Stage};
pub use raster::{CropRegion, RasterImage, TransformParams};
pub use session::{EditSession, PreviewOutcome, Uploader};
