//! Transport seam for the two upload phases.
//!
//! [`UploadBackend`] is the narrow contract the orchestrator talks to: send
//! the authorize request, send the multipart submit, get back a status code
//! and a body. It knows nothing about descriptors, validation or
//! cancellation; those live in [`crate::pipeline::upload`].
//!
//! [`HttpBackend`] is the production implementation on top of `reqwest`.
//! Tests and embedders inject their own through
//! [`crate::config::PipelineConfigBuilder::backend`].

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::input::SourceFile;
use crate::pipeline::upload::AuthorizeRequest;
use futures::future::{BoxFuture, FutureExt};
use reqwest::multipart::{Form, Part};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Form field the binary payload is submitted under.
pub const FILE_FIELD: &str = "file";

/// The request never produced an HTTP response (DNS, TLS, timeout, …).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Status and raw body of a backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl BackendResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Any 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First 200 characters of the body, for error messages.
    pub fn body_snippet(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        match text.char_indices().nth(200) {
            Some((idx, _)) => format!("{}\u{2026}", &text[..idx]),
            None => text.to_string(),
        }
    }
}

/// Multipart body for phase 2: every descriptor field, then the payload.
#[derive(Debug, Clone)]
pub struct SubmitForm {
    /// Descriptor fields in the order the authorization service sent them.
    pub fields: Vec<(String, String)>,
    pub file: SourceFile,
}

/// The two calls the upload orchestrator needs from the outside world.
pub trait UploadBackend: Send + Sync {
    /// Phase 1: ask the authorization service for a signed target.
    fn authorize<'a>(
        &'a self,
        request: &'a AuthorizeRequest,
    ) -> BoxFuture<'a, Result<BackendResponse, TransportError>>;

    /// Phase 2: post the multipart form to the signed target URL.
    fn submit<'a>(
        &'a self,
        target_url: &'a str,
        form: SubmitForm,
    ) -> BoxFuture<'a, Result<BackendResponse, TransportError>>;
}

/// `reqwest`-based backend talking to `{endpoint}/upload` and the storage URL.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, PipelineError> {
        let endpoint: String = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// URL phase 1 posts to.
    pub fn authorize_url(&self) -> String {
        format!("{}/upload", self.endpoint)
    }

    async fn read(response: reqwest::Response) -> Result<BackendResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(BackendResponse::new(status, body.to_vec()))
    }
}

impl UploadBackend for HttpBackend {
    fn authorize<'a>(
        &'a self,
        request: &'a AuthorizeRequest,
    ) -> BoxFuture<'a, Result<BackendResponse, TransportError>> {
        async move {
            let url = self.authorize_url();
            debug!("POST {}", url);
            let response = self
                .client
                .post(&url)
                .json(request)
                .send()
                .await
                .map_err(|e| TransportError(describe(&e)))?;
            Self::read(response).await
        }
        .boxed()
    }

    fn submit<'a>(
        &'a self,
        target_url: &'a str,
        form: SubmitForm,
    ) -> BoxFuture<'a, Result<BackendResponse, TransportError>> {
        async move {
            let mut multipart = Form::new();
            for (key, value) in form.fields {
                multipart = multipart.text(key, value);
            }
            let part = Part::bytes(form.file.bytes().to_vec())
                .file_name(form.file.name().to_string())
                .mime_str(form.file.mime_type())
                .map_err(|e| TransportError(format!("invalid mime '{}': {e}", form.file.mime_type())))?;
            multipart = multipart.part(FILE_FIELD, part);

            debug!("POST {} (multipart, {} bytes)", target_url, form.file.size());
            let response = self
                .client
                .post(target_url)
                .multipart(multipart)
                .send()
                .await
                .map_err(|e| TransportError(describe(&e)))?;
            Self::read(response).await
        }
        .boxed()
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("could not connect: {e}")
    } else {
        e.to_string()
    }
}

/// Resolve the transport, from most-specific to least-specific:
///
/// 1. a pre-built backend in `config.backend`
/// 2. an [`HttpBackend`] for `config.endpoint`
/// 3. an [`HttpBackend`] for `$IMGUP_ENDPOINT`
pub fn resolve_backend(config: &PipelineConfig) -> Result<Arc<dyn UploadBackend>, PipelineError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    let endpoint = config.resolve_endpoint()?;
    Ok(Arc::new(HttpBackend::new(endpoint, config.request_timeout_secs)?))
}
