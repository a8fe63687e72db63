//! Observer trait for stage and failure events.
//!
//! The pipeline itself is pure computation plus I/O; everything a user sees
//! (spinners, toasts, log lines) hangs off a [`PipelineObserver`] injected via
//! [`crate::config::PipelineConfigBuilder::observer`]. All methods default to
//! no-ops so implementations only override what they display.
//!
//! # Example
//!
//! ```rust
//! use folio_imgup::{PipelineConfig, PipelineObserver, Stage, UserNotice};
//! use std::sync::Arc;
//!
//! struct Toasts;
//!
//! impl PipelineObserver for Toasts {
//!     fn on_failure(&self, stage: Stage, notice: &UserNotice) {
//!         eprintln!("[{stage}] {}: {}", notice.title, notice.description);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .observer(Arc::new(Toasts))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::{PipelineError, UserNotice};
use std::fmt;
use std::sync::Arc;

/// One step of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Load,
    Transform,
    Encode,
    Hash,
    Authorize,
    Submit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Load => "load",
            Stage::Transform => "transform",
            Stage::Encode => "encode",
            Stage::Hash => "hash",
            Stage::Authorize => "authorize",
            Stage::Submit => "submit",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as each stage starts, finishes or fails.
pub trait PipelineObserver: Send + Sync {
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// `elapsed_ms` is wall-clock time spent inside the stage.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// A terminal failure. Never called for cancellation.
    fn on_failure(&self, stage: Stage, notice: &UserNotice) {
        let _ = (stage, notice);
    }

    /// Hash generation failed; the upload carries on without a hash.
    fn on_hash_failure(&self, notice: &UserNotice) {
        let _ = notice;
    }

    /// The upload finished and the object is reachable at `file_url`.
    fn on_upload_complete(&self, file_name: &str, file_url: &str) {
        let _ = (file_name, file_url);
    }
}

/// Observer used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ObserverHandle = Arc<dyn PipelineObserver>;

/// Report `err` to `observer` unless it is a cancellation.
pub(crate) fn report_failure(observer: Option<&ObserverHandle>, stage: Stage, err: &PipelineError) {
    if let (Some(obs), Some(notice)) = (observer, err.notice()) {
        obs.on_failure(stage, &notice);
    }
}
