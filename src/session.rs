//! Interactive edit sessions.
//!
//! An [`EditSession`] is one selected image on its way to storage:
//!
//! ```text
//! open ──► preview* ──► confirm ──► PipelineOutput
//!   │         │            │
//!   │         │            └─ encode, hash, upload, release previews
//!   │         └─ transform tagged with a generation; stale results dropped
//!   └─ size check, decode
//! ```
//!
//! Newer preview requests supersede older ones. Nothing is locked: each
//! request bumps a generation counter and a result is only installed if its
//! generation is still the latest when it completes.
//!
//! [`Uploader`] holds at most one session and tears the previous one down
//! before opening the next.

use crate::backend::{resolve_backend, UploadBackend};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::lifecycle::{PreviewInfo, PreviewRegistry};
use crate::output::{PipelineOutput, PipelineStats};
use crate::pipeline::encode::encode_webp;
use crate::pipeline::input::{load_raster, SourceFile};
use crate::pipeline::transform;
use crate::process::{finish, run_stage};
use crate::progress::Stage;
use crate::raster::{CropRegion, RasterImage, TransformParams};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of installing a preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// The transform was the latest request and is now the current raster.
    Applied(PreviewInfo),
    /// A newer request was made while this one ran; its result was dropped.
    Superseded,
}

/// A transform started by [`EditSession::request_preview`].
///
/// Completing it does not borrow the session, so several may be awaited at
/// once. Hand the completed value back to [`EditSession::install`].
#[derive(Debug)]
pub struct PendingPreview {
    generation: u64,
    latest: Arc<AtomicU64>,
    params: TransformParams,
    crop: CropRegion,
    task: JoinHandle<Result<RasterImage, PipelineError>>,
}

impl PendingPreview {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A newer request exists.
    pub fn is_superseded(&self) -> bool {
        self.latest.load(Ordering::SeqCst) != self.generation
    }

    /// Wait for the transform.
    ///
    /// Errors from a request that was superseded in the meantime are
    /// dropped along with its result.
    pub async fn complete(self) -> Result<CompletedPreview, PipelineError> {
        let result = self
            .task
            .await
            .map_err(|e| PipelineError::Internal(format!("Preview task panicked: {}", e)))?;
        let stale = self.latest.load(Ordering::SeqCst) != self.generation;
        let raster = match result {
            Ok(raster) if !stale => Some(raster),
            Ok(_) => None,
            Err(_) if stale => None,
            Err(e) => return Err(e),
        };
        Ok(CompletedPreview {
            generation: self.generation,
            params: self.params,
            crop: self.crop,
            raster,
        })
    }
}

/// A finished transform waiting to be installed.
#[derive(Debug)]
pub struct CompletedPreview {
    generation: u64,
    params: TransformParams,
    crop: CropRegion,
    raster: Option<RasterImage>,
}

/// One image being edited.
#[derive(Debug)]
pub struct EditSession {
    source: SourceFile,
    config: PipelineConfig,
    original: Arc<RasterImage>,
    current: Arc<RasterImage>,
    applied: Option<(TransformParams, CropRegion)>,
    previews: PreviewRegistry,
    latest: Arc<AtomicU64>,
    load_ms: u64,
    transform_ms: u64,
}

impl EditSession {
    /// Check the size limit and decode `source`.
    pub async fn open(source: SourceFile, config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::open_with_registry(source, config, PreviewRegistry::new()).await
    }

    /// [`Self::open`] with previews written through `previews`.
    pub async fn open_with_registry(
        source: SourceFile,
        config: PipelineConfig,
        previews: PreviewRegistry,
    ) -> Result<Self, PipelineError> {
        let (raster, load_ms) =
            run_stage(&config, &CancellationToken::new(), Stage::Load, async {
                source.ensure_within(config.max_input_bytes)?;
                load_raster(&source, &config).await
            })
            .await?;
        info!(
            "Opened edit session for '{}' ({}x{})",
            source.name(),
            raster.width(),
            raster.height()
        );
        let original = Arc::new(raster);
        Ok(Self {
            source,
            config,
            current: Arc::clone(&original),
            original,
            applied: None,
            previews,
            latest: Arc::new(AtomicU64::new(0)),
            load_ms,
            transform_ms: 0,
        })
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    /// Dimensions of the decoded source.
    pub fn original_dimensions(&self) -> (u32, u32) {
        self.original.dimensions()
    }

    /// The raster [`Self::confirm`] would upload right now.
    pub fn current(&self) -> &RasterImage {
        &self.current
    }

    /// Params and crop of the last installed preview.
    pub fn applied(&self) -> Option<(TransformParams, CropRegion)> {
        self.applied
    }

    pub fn current_preview(&self) -> Option<&PreviewInfo> {
        self.previews.current()
    }

    pub fn live_previews(&self) -> u64 {
        self.previews.live_count()
    }

    /// Start a transform of the original raster. Supersedes every earlier
    /// request. Must be called from within a tokio runtime.
    pub fn request_preview(&self, params: TransformParams, crop: CropRegion) -> PendingPreview {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Preview request #{} ({:?}, {:?})", generation, params, crop);
        let task = tokio::spawn(transform::transform(Arc::clone(&self.original), params, crop));
        PendingPreview {
            generation,
            latest: Arc::clone(&self.latest),
            params,
            crop,
            task,
        }
    }

    /// Make a completed preview current, unless a newer request exists.
    pub async fn install(&mut self, done: CompletedPreview) -> Result<PreviewOutcome, PipelineError> {
        let raster = match done.raster {
            Some(raster) if done.generation == self.latest.load(Ordering::SeqCst) => raster,
            _ => {
                debug!("Preview #{} superseded, discarding", done.generation);
                return Ok(PreviewOutcome::Superseded);
            }
        };

        let raster = Arc::new(raster);
        let for_encode = Arc::clone(&raster);
        let encoded = tokio::task::spawn_blocking(move || encode_webp(&for_encode))
            .await
            .map_err(|e| PipelineError::Internal(format!("Preview encode panicked: {}", e)))??;

        // The encode awaited; a newer request may have arrived meanwhile.
        if done.generation != self.latest.load(Ordering::SeqCst) {
            return Ok(PreviewOutcome::Superseded);
        }

        let info = self
            .previews
            .install(&encoded.0, raster.width(), raster.height())?;
        self.current = raster;
        self.applied = Some((done.params, done.crop));
        Ok(PreviewOutcome::Applied(info))
    }

    /// Request, complete and install one preview.
    pub async fn preview(
        &mut self,
        params: TransformParams,
        crop: CropRegion,
    ) -> Result<PreviewOutcome, PipelineError> {
        let start = Instant::now();
        let pending = self.request_preview(params, crop);
        let done = pending.complete().await?;
        let outcome = self.install(done).await?;
        if matches!(outcome, PreviewOutcome::Applied(_)) {
            self.transform_ms = start.elapsed().as_millis() as u64;
        }
        Ok(outcome)
    }

    /// Encode, hash and upload the current raster, then end the session.
    ///
    /// Previews are released whatever the outcome.
    pub async fn confirm(
        mut self,
        display_name: &str,
        backend: &dyn UploadBackend,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        // Invalidate anything still in flight.
        self.latest.fetch_add(1, Ordering::SeqCst);
        let stats = PipelineStats {
            source_bytes: self.source.size(),
            load_ms: self.load_ms,
            transform_ms: self.transform_ms,
            ..PipelineStats::default()
        };
        let result = finish(
            Arc::clone(&self.current),
            display_name,
            &self.config,
            Some(backend),
            cancel,
            stats,
            Instant::now(),
        )
        .await;
        self.previews.release_all();
        result
    }

    /// End the session without uploading.
    pub fn cancel(mut self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
        self.previews.release_all();
        info!("Edit session for '{}' cancelled", self.source.name());
    }
}

/// Owns at most one edit session at a time.
#[derive(Debug)]
pub struct Uploader {
    config: PipelineConfig,
    session: Option<EditSession>,
}

impl Uploader {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Start editing `source`. Any session already open is torn down first,
    /// even if opening the new one fails.
    pub async fn select(&mut self, source: SourceFile) -> Result<&mut EditSession, PipelineError> {
        self.close();
        let session = EditSession::open(source, self.config.clone()).await?;
        Ok(self.session.insert(session))
    }

    pub fn session(&mut self) -> Option<&mut EditSession> {
        self.session.as_mut()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Discard the open session, if any.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel();
        }
    }

    /// Upload the open session's current raster using the configured backend.
    pub async fn confirm(
        &mut self,
        display_name: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let session = self
            .session
            .take()
            .ok_or_else(|| PipelineError::InvalidInput("no image selected".into()))?;
        let backend = match resolve_backend(&self.config) {
            Ok(backend) => backend,
            Err(e) => {
                session.cancel();
                return Err(e);
            }
        };
        session.confirm(display_name, backend.as_ref(), cancel).await
    }
}
