//! Two-phase signed upload.
//!
//! ```text
//!  SourceFile ──► local checks ──► authorize ──► UploadDescriptor ──► submit ──► file_url
//!                 (size, name,     POST           (signed url +        multipart
//!                  type)           {endpoint}/     form fields)        POST url
//!                                  upload
//! ```
//!
//! Both phases race the caller's [`CancellationToken`]. Once the token fires
//! no new request is started and the whole upload resolves as
//! [`PipelineError::Cancelled`]; there is no partial success. Neither phase is
//! retried.

use crate::backend::{BackendResponse, SubmitForm, UploadBackend};
use crate::config::{Acl, ContentDisposition, PipelineConfig};
use crate::error::PipelineError;
use crate::pipeline::input::SourceFile;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// ── Wire types ───────────────────────────────────────────────────────────

/// Phase 1 request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizeRequest {
    pub files: Vec<FileMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<Acl>,
    #[serde(rename = "contentDisposition", skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<ContentDisposition>,
}

/// One entry of [`AuthorizeRequest::files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(rename = "customId", skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
}

impl AuthorizeRequest {
    /// The request describing `file`, with the ACL options from `config`.
    pub fn for_file(file: &SourceFile, config: &PipelineConfig) -> Self {
        Self {
            files: vec![FileMetadata {
                name: file.name().to_string(),
                size: file.size(),
                mime_type: file.mime_type().to_string(),
                custom_id: config.custom_id.clone(),
            }],
            acl: config.acl,
            content_disposition: config.content_disposition,
        }
    }
}

/// What the authorization service hands back: where to post, and with what.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadDescriptor {
    #[serde(rename = "key", deserialize_with = "lenient_string")]
    pub storage_key: String,
    #[serde(deserialize_with = "lenient_string")]
    pub file_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub file_type: String,
    #[serde(rename = "file_url", deserialize_with = "lenient_string")]
    pub public_file_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub content_disposition: String,
    #[serde(deserialize_with = "lenient_string")]
    pub polling_jwt: String,
    #[serde(deserialize_with = "lenient_string")]
    pub polling_url: String,
    #[serde(rename = "custom_id", default, deserialize_with = "lenient_optional_string")]
    pub correlation_id: Option<String>,
    #[serde(rename = "url", deserialize_with = "lenient_string")]
    pub target_url: String,
    /// Form fields in the order the service listed them.
    #[serde(rename = "fields", deserialize_with = "ordered_fields")]
    pub form_fields: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct AuthorizeResponse {
    file: UploadDescriptor,
}

impl UploadDescriptor {
    /// Parse a phase 1 response body (`{"file": {...}}`).
    pub fn from_response_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<AuthorizeResponse>(body).map(|r| r.file)
    }
}

/// Strings, numbers and booleans all become strings. Anything else is a
/// shape error.
struct LenientString(String);

impl<'de> Deserialize<'de> for LenientString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(LenientString(s)),
            serde_json::Value::Number(n) => Ok(LenientString(n.to_string())),
            serde_json::Value::Bool(b) => Ok(LenientString(b.to_string())),
            other => Err(de::Error::custom(format!(
                "expected a string, number or boolean, found {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    LenientString::deserialize(deserializer).map(|s| s.0)
}

fn lenient_optional_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<LenientString>::deserialize(deserializer).map(|o| o.map(|s| s.0))
}

fn ordered_fields<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<(String, String)>, D::Error> {
    struct FieldsVisitor;

    impl<'de> Visitor<'de> for FieldsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object of form fields")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, LenientString>()? {
                fields.push((key, value.0));
            }
            Ok(fields)
        }
    }

    deserializer.deserialize_map(FieldsVisitor)
}

// ── Orchestration ────────────────────────────────────────────────────────

/// Checks that need no network: size limit and usable metadata.
pub fn check_local(file: &SourceFile, config: &PipelineConfig) -> Result<(), PipelineError> {
    file.ensure_within(config.max_input_bytes)?;
    if file.name().trim().is_empty() {
        return Err(PipelineError::InvalidInput("file name is empty".into()));
    }
    if file.size() == 0 {
        return Err(PipelineError::InvalidInput(format!("'{}' is empty", file.name())));
    }
    if file.mime_type().trim().is_empty() {
        return Err(PipelineError::InvalidInput(format!(
            "'{}' has no content type",
            file.name()
        )));
    }
    Ok(())
}

async fn race<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Phase 1: obtain an [`UploadDescriptor`] for `file`.
pub async fn authorize(
    backend: &dyn UploadBackend,
    file: &SourceFile,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<UploadDescriptor, PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let request = AuthorizeRequest::for_file(file, config);
    let response = race(cancel, backend.authorize(&request))
        .await?
        .map_err(|e| PipelineError::UploadAuth {
            status: None,
            detail: e.to_string(),
        })?;
    parse_descriptor(&response)
}

fn parse_descriptor(response: &BackendResponse) -> Result<UploadDescriptor, PipelineError> {
    if !response.is_success() {
        return Err(PipelineError::UploadAuth {
            status: Some(response.status),
            detail: response.body_snippet(),
        });
    }
    let descriptor = UploadDescriptor::from_response_body(&response.body).map_err(|e| {
        PipelineError::UploadAuth {
            status: Some(response.status),
            detail: format!("malformed upload descriptor: {e}"),
        }
    })?;
    if descriptor.target_url.trim().is_empty() {
        return Err(PipelineError::UploadAuth {
            status: Some(response.status),
            detail: "upload descriptor has an empty url".into(),
        });
    }
    debug!(
        "Descriptor: key={} target={} ({} form fields)",
        descriptor.storage_key,
        descriptor.target_url,
        descriptor.form_fields.len()
    );
    Ok(descriptor)
}

/// Phase 2: post the payload to the descriptor's signed target.
pub async fn submit(
    backend: &dyn UploadBackend,
    descriptor: &UploadDescriptor,
    file: &SourceFile,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let form = SubmitForm {
        fields: descriptor.form_fields.clone(),
        file: file.clone(),
    };
    let response = race(cancel, backend.submit(&descriptor.target_url, form))
        .await?
        .map_err(|e| PipelineError::UploadSubmit {
            status: None,
            detail: e.to_string(),
        })?;
    if !response.is_success() {
        return Err(PipelineError::UploadSubmit {
            status: Some(response.status),
            detail: response.body_snippet(),
        });
    }
    Ok(())
}

/// Run both phases and return the public URL of the stored file.
///
/// # Errors
/// * [`PipelineError::FileTooLarge`] / [`PipelineError::InvalidInput`] before
///   any request is made.
/// * [`PipelineError::UploadAuth`] when phase 1 fails or its descriptor is
///   unusable; phase 2 is not attempted.
/// * [`PipelineError::UploadSubmit`] when phase 2 fails.
/// * [`PipelineError::Cancelled`] when `cancel` fires at any point.
pub async fn upload(
    backend: &dyn UploadBackend,
    file: &SourceFile,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<String, PipelineError> {
    check_local(file, config)?;

    info!("Authorizing upload of '{}' ({} bytes)", file.name(), file.size());
    let descriptor = authorize(backend, file, config, cancel).await?;

    info!("Submitting '{}' to storage", descriptor.file_name);
    submit(backend, &descriptor, file, cancel).await?;

    info!("Uploaded → {}", descriptor.public_file_url);
    Ok(descriptor.public_file_url)
}
