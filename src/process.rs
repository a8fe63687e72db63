//! One-shot entry points: source file in, public URL and blurhash out.
//!
//! [`process`] runs every stage back to back for callers that already know
//! the crop and rotation they want (the CLI, batch imports). Interactive
//! editing with repeated previews goes through [`crate::session`] instead;
//! both share the encode → hash → upload tail implemented here.

use crate::backend::{resolve_backend, UploadBackend};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, UserNotice};
use crate::output::{PipelineOutput, PipelineStats, SourceMetadata};
use crate::pipeline::{encode, hash, input, transform, upload};
use crate::progress::{report_failure, Stage};
use crate::raster::{CropRegion, RasterImage, TransformParams};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to do with a source file.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub params: TransformParams,
    /// Crop in post-rotation coordinates. `None` keeps the whole rotated
    /// surface.
    pub crop: Option<CropRegion>,
    /// Name the payload is derived from. Defaults to the source file name.
    pub display_name: Option<String>,
    /// Run both upload phases. When `false` the run stops after hashing.
    pub upload: bool,
}

impl Default for ProcessRequest {
    fn default() -> Self {
        Self {
            params: TransformParams::default(),
            crop: None,
            display_name: None,
            upload: true,
        }
    }
}

impl ProcessRequest {
    pub fn with_params(mut self, params: TransformParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_crop(mut self, crop: CropRegion) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn without_upload(mut self) -> Self {
        self.upload = false;
        self
    }
}

/// Load, transform, encode, hash and upload one image.
///
/// # Errors
/// Fails fast on the first fatal stage error. A blurhash failure is not
/// fatal: it is returned in [`PipelineOutput::hash_error`] and reported via
/// [`crate::PipelineObserver::on_hash_failure`].
///
/// An oversized source is rejected before it is decoded, so no request ever
/// reaches the authorization endpoint.
pub async fn process(
    source: &input::SourceFile,
    request: &ProcessRequest,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<PipelineOutput, PipelineError> {
    let total_start = Instant::now();
    info!("Processing '{}' ({} bytes)", source.name(), source.size());

    let backend = if request.upload {
        Some(resolve_backend(config)?)
    } else {
        None
    };

    let mut stats = PipelineStats {
        source_bytes: source.size(),
        ..PipelineStats::default()
    };

    // ── Step 1: Load ─────────────────────────────────────────────────────
    let (raster, load_ms) = run_stage(config, cancel, Stage::Load, async {
        source.ensure_within(config.max_input_bytes)?;
        input::load_raster(source, config).await
    })
    .await?;
    stats.load_ms = load_ms;

    // ── Step 2: Transform ────────────────────────────────────────────────
    let crop = match request.crop {
        Some(crop) => crop,
        None => {
            let (w, h) =
                transform::surface_size(raster.width(), raster.height(), request.params.rotation_degrees);
            CropRegion::full(w, h)
        }
    };
    let (raster, transform_ms) = run_stage(
        config,
        cancel,
        Stage::Transform,
        transform::transform(Arc::new(raster), request.params, crop),
    )
    .await?;
    stats.transform_ms = transform_ms;

    // ── Steps 3-5: Encode, hash, upload ──────────────────────────────────
    let display_name = request
        .display_name
        .clone()
        .unwrap_or_else(|| source.name().to_string());
    finish(
        Arc::new(raster),
        &display_name,
        config,
        backend.as_deref(),
        cancel,
        stats,
        total_start,
    )
    .await
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally; the run cannot be
/// cancelled.
pub fn process_sync(
    source: &input::SourceFile,
    request: &ProcessRequest,
    config: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process(source, request, config, &CancellationToken::new()))
}

/// Read a file and report its size, type, dimensions and blurhash.
///
/// Makes no network calls.
pub async fn inspect(path: impl AsRef<Path>) -> Result<SourceMetadata, PipelineError> {
    let config = PipelineConfig::default();
    let source = input::SourceFile::from_path(path).await?;
    let raster = Arc::new(input::load_raster(&source, &config).await?);
    let hash = match hash::hash_raster(Arc::clone(&raster), &config).await {
        Ok(h) => Some(h.to_string()),
        Err(e) => {
            warn!("Could not hash '{}': {}", source.name(), e);
            None
        }
    };
    Ok(SourceMetadata {
        name: source.name().to_string(),
        bytes: source.size(),
        mime_type: source.mime_type().to_string(),
        width: raster.width(),
        height: raster.height(),
        hash,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Run one fatal stage with cancellation check, timing and observer events.
pub(crate) async fn run_stage<T, F>(
    config: &PipelineConfig,
    cancel: &CancellationToken,
    stage: Stage,
    fut: F,
) -> Result<(T, u64), PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let observer = config.observer.as_ref();
    if let Some(obs) = observer {
        obs.on_stage_start(stage);
    }
    let start = Instant::now();
    match fut.await {
        Ok(value) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            debug!("{} stage took {}ms", stage, elapsed_ms);
            if let Some(obs) = observer {
                obs.on_stage_complete(stage, elapsed_ms);
            }
            Ok((value, elapsed_ms))
        }
        Err(e) => {
            if !e.is_cancelled() {
                warn!("{} stage failed: {}", stage, e);
            }
            report_failure(observer, stage, &e);
            Err(e)
        }
    }
}

/// Encode → hash → upload for a final raster.
pub(crate) async fn finish(
    raster: Arc<RasterImage>,
    display_name: &str,
    config: &PipelineConfig,
    backend: Option<&dyn UploadBackend>,
    cancel: &CancellationToken,
    mut stats: PipelineStats,
    total_start: Instant,
) -> Result<PipelineOutput, PipelineError> {
    let (width, height) = raster.dimensions();

    let (payload, encode_ms) = run_stage(
        config,
        cancel,
        Stage::Encode,
        encode::encode(Arc::clone(&raster), display_name.to_string()),
    )
    .await?;
    stats.encode_ms = encode_ms;
    stats.payload_bytes = payload.size();

    // Hash failure is reported but never blocks the upload.
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let observer = config.observer.as_ref();
    if let Some(obs) = observer {
        obs.on_stage_start(Stage::Hash);
    }
    let hash_start = Instant::now();
    let (hash, hash_error) = match hash::hash_raster(raster, config).await {
        Ok(h) => {
            stats.hash_ms = hash_start.elapsed().as_millis() as u64;
            if let Some(obs) = observer {
                obs.on_stage_complete(Stage::Hash, stats.hash_ms);
            }
            (Some(h), None)
        }
        Err(e) => {
            warn!("Blurhash generation failed, continuing without it: {}", e);
            if let Some(obs) = observer {
                obs.on_hash_failure(&UserNotice::HASH_FAILED);
            }
            (None, Some(e))
        }
    };

    let file_url = match backend {
        Some(backend) => {
            let upload_start = Instant::now();
            let (descriptor, _) = run_stage(config, cancel, Stage::Authorize, async {
                upload::check_local(&payload, config)?;
                upload::authorize(backend, &payload, config, cancel).await
            })
            .await?;
            run_stage(
                config,
                cancel,
                Stage::Submit,
                upload::submit(backend, &descriptor, &payload, cancel),
            )
            .await?;
            stats.upload_ms = upload_start.elapsed().as_millis() as u64;
            if let Some(obs) = observer {
                obs.on_upload_complete(payload.name(), &descriptor.public_file_url);
            }
            Some(descriptor.public_file_url)
        }
        None => None,
    };

    stats.total_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Done: {} ({}x{}, {} bytes) in {}ms",
        file_url.as_deref().unwrap_or(payload.name()),
        width,
        height,
        payload.size(),
        stats.total_ms
    );

    Ok(PipelineOutput {
        file_url,
        hash,
        hash_error,
        payload,
        width,
        height,
        stats,
    })
}
