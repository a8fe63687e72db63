//! Result types returned by the pipeline entry points.

use crate::error::PipelineError;
use crate::pipeline::hash::PerceptualHash;
use crate::pipeline::input::SourceFile;
use serde::{Deserialize, Serialize};

/// Everything a successful run produced.
#[derive(Debug)]
pub struct PipelineOutput {
    /// Public URL of the stored object. `None` when the upload was skipped.
    pub file_url: Option<String>,

    /// Blurhash of the final raster, stored next to `file_url`.
    pub hash: Option<PerceptualHash>,

    /// Why `hash` is missing. Hash failure never blocks the upload.
    pub hash_error: Option<PipelineError>,

    /// The encoded payload that was (or would have been) uploaded.
    pub payload: SourceFile,

    /// Pixel size of the payload.
    pub width: u32,
    pub height: u32,

    pub stats: PipelineStats,
}

/// Per-stage timings and sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub source_bytes: u64,
    pub payload_bytes: u64,
    pub load_ms: u64,
    pub transform_ms: u64,
    pub encode_ms: u64,
    pub hash_ms: u64,
    /// Both upload phases together. Zero when the upload was skipped.
    pub upload_ms: u64,
    pub total_ms: u64,
}

/// What [`crate::inspect`] reports about a file without uploading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub name: String,
    pub bytes: u64,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub hash: Option<String>,
}
