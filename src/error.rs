//! Error types for the folio-imgup library.
//!
//! Every stage fails fast and upward with a [`PipelineError`]. The variants
//! are grouped by the stage that produces them so callers can map a failure
//! back to the action the user attempted:
//!
//! * decode / geometry / encode: "could not process image"
//! * a malformed stored hash: "could not show placeholder"; a hash that fails
//!   to generate mid-pipeline is reported as [`UserNotice::HASH_FAILED`]
//! * upload auth / upload submit: "upload failed"
//! * [`PipelineError::Cancelled`] is not a failure at all; callers show nothing
//!
//! [`PipelineError::notice`] turns an error into the short, human-readable
//! notice a dashboard shows. It never contains response bodies or other
//! internal representations.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the folio-imgup library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source file exceeds the configured upload limit.
    ///
    /// Raised locally, before the authorization endpoint is ever contacted.
    #[error("File is too large: {size} bytes (maximum is {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    /// The source file metadata is unusable (empty name, zero size, …).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reading a source file from disk failed.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The binary content could not be interpreted as an image.
    #[error("Could not decode image '{name}': {detail}")]
    Decode { name: String, detail: String },

    /// Crop or transform parameters do not fit the rotated image.
    #[error("Invalid geometry: {0}")]
    Geometry(String),

    /// The raster could not be serialised to the output format.
    #[error("Could not encode image: {0}")]
    Encode(String),

    /// A perceptual hash string is malformed, or cannot be produced.
    #[error("Invalid blurhash: {0}")]
    InvalidHash(String),

    // ── Upload errors ─────────────────────────────────────────────────────
    /// Phase 1 (authorize) failed or returned an unusable descriptor.
    #[error("Upload authorization failed{}: {detail}", status_suffix(.status))]
    UploadAuth { status: Option<u16>, detail: String },

    /// Phase 2 (submit to object storage) failed.
    #[error("Upload to storage failed{}: {detail}", status_suffix(.status))]
    UploadSubmit { status: Option<u16>, detail: String },

    /// The cancellation token fired before the operation finished.
    #[error("Operation cancelled")]
    Cancelled,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

/// A short message suitable for a toast or a CLI error line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub title: &'static str,
    pub description: &'static str,
}

impl UserNotice {
    /// Reported when hashing fails during a pipeline run, whatever the
    /// underlying error; the upload itself carries on.
    pub const HASH_FAILED: UserNotice = UserNotice {
        title: "Blurhash generation failed",
        description: "Please try uploading the image again.",
    };
}

impl PipelineError {
    /// `true` for the cancelled outcome, which callers must not report.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// The user-facing notice for this error, or `None` when cancelled.
    pub fn notice(&self) -> Option<UserNotice> {
        let notice = match self {
            PipelineError::Cancelled => return None,
            PipelineError::FileTooLarge { .. } => UserNotice {
                title: "File too large",
                description: "Choose a smaller image and try again.",
            },
            PipelineError::InvalidHash(_) => UserNotice {
                title: "Could not show placeholder",
                description: "The stored blurhash is not valid.",
            },
            PipelineError::UploadAuth { .. } | PipelineError::UploadSubmit { .. } => UserNotice {
                title: "Upload failed",
                description: "We couldn't upload your image. Please try again.",
            },
            PipelineError::Decode { .. }
            | PipelineError::Geometry(_)
            | PipelineError::Encode(_)
            | PipelineError::InvalidInput(_)
            | PipelineError::Io { .. } => UserNotice {
                title: "Could not process image",
                description: "The image could not be read or edited. Try another file.",
            },
            PipelineError::InvalidConfig(_) | PipelineError::Internal(_) => UserNotice {
                title: "Something went wrong",
                description: "Please try again.",
            },
        };
        Some(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_too_large_display() {
        let e = PipelineError::FileTooLarge { size: 10, max: 4 };
        let msg = e.to_string();
        assert!(msg.contains("10 bytes"), "got: {msg}");
        assert!(msg.contains("4 bytes"), "got: {msg}");
    }

    #[test]
    fn upload_auth_display_with_status() {
        let e = PipelineError::UploadAuth {
            status: Some(500),
            detail: "server exploded".into(),
        };
        assert!(e.to_string().contains("HTTP 500"));
        assert!(e.to_string().contains("server exploded"));
    }

    #[test]
    fn upload_submit_display_without_status() {
        let e = PipelineError::UploadSubmit {
            status: None,
            detail: "connection reset".into(),
        };
        assert!(!e.to_string().contains("HTTP"));
    }

    #[test]
    fn cancelled_has_no_notice() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert_eq!(PipelineError::Cancelled.notice(), None);
    }

    #[test]
    fn notices_name_the_failed_action() {
        let upload = PipelineError::UploadSubmit {
            status: Some(403),
            detail: "<Error><Code>AccessDenied</Code></Error>".into(),
        };
        let notice = upload.notice().unwrap();
        assert_eq!(notice.title, "Upload failed");
        assert!(!notice.description.contains("AccessDenied"));

        let geometry = PipelineError::Geometry("crop outside".into());
        assert_eq!(geometry.notice().unwrap().title, "Could not process image");
    }

    #[test]
    fn malformed_stored_hash_is_a_display_problem() {
        let e = PipelineError::InvalidHash("too short".into());
        let notice = e.notice().unwrap();
        assert_eq!(notice.title, "Could not show placeholder");
        assert_ne!(notice, UserNotice::HASH_FAILED);
    }
}
