//! Config-driven HTTP archive backend.
//!
//! # Responsibilities
//! - Expand the endpoint template with the target URL
//! - Submit with a per-request timeout and retry transient failures
//! - Read the archived URL from the configured response header
//! - Map HTTP statuses and transport errors onto `FailureKind`
//!
//! # Design Decisions
//! - Retries happen inside one `archive` call, so the breaker and traffic
//!   monitor see a single attempt
//! - Without the result header, the final response URL is the archived URL

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::backend::{ArchiveBackend, ArchiveReceipt, BackendError, FailureKind};
use crate::config::{BackendConfig, RetryConfig, SubmitMethod};
use crate::dispatch::item::WorkItem;
use crate::resilience::retries::with_retries;

/// Placeholder replaced by the percent-encoded target URL.
pub const URL_PLACEHOLDER: &str = "{url}";

/// Archive backend speaking plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: BackendConfig,
    retries: RetryConfig,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig, retries: RetryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("archive-dispatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            retries,
            client,
        })
    }

    /// Submission URL for `target`.
    pub fn endpoint_for(&self, target: &str) -> Result<Url, BackendError> {
        expand_template(&self.config.endpoint_template, target)
    }

    async fn submit(&self, endpoint: &Url, attempt: u32) -> Result<ArchiveReceipt, BackendError> {
        tracing::debug!(backend_id = %self.config.id, endpoint = %endpoint, attempt, "Submitting archive request");

        let request = match self.config.method {
            SubmitMethod::Get => self.client.get(endpoint.clone()),
            SubmitMethod::Post => self.client.post(endpoint.clone()),
        };
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(self.name(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let mut error = classify_status(self.name(), status);
            if let Some(retry_after) = retry_after {
                error = error.with_retry_after(retry_after);
            }
            return Err(error);
        }

        let archived_url = response
            .headers()
            .get(self.config.result_header.as_str())
            .and_then(|v| v.to_str().ok())
            .and_then(|location| endpoint.join(location.trim()).ok())
            .unwrap_or_else(|| response.url().clone());

        Ok(ArchiveReceipt {
            archived_url: archived_url.to_string(),
            message: Some(format!("Archived with {}", self.name())),
        })
    }
}

#[async_trait]
impl ArchiveBackend for HttpBackend {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(&self.config.id)
    }

    async fn is_available(&self) -> bool {
        self.config.enabled
    }

    async fn archive(&self, item: &WorkItem) -> Result<ArchiveReceipt, BackendError> {
        let target = item
            .target_url()
            .ok_or_else(|| BackendError::new(FailureKind::InvalidUrl, "No valid URL found"))?;
        if !is_http_url(target) {
            return Err(BackendError::new(
                FailureKind::InvalidUrl,
                format!("Unsupported URL: {target}"),
            ));
        }

        let endpoint = self.endpoint_for(target)?;
        with_retries(
            &self.retries,
            |e: &BackendError| e.kind.is_transient(),
            |attempt| self.submit(&endpoint, attempt),
        )
        .await
    }
}

fn is_http_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

/// Substitute the percent-encoded `target` into `template`.
pub fn expand_template(template: &str, target: &str) -> Result<Url, BackendError> {
    let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    let expanded = template.replace(URL_PLACEHOLDER, &encoded);
    Url::parse(&expanded).map_err(|e| {
        BackendError::new(
            FailureKind::InvalidUrl,
            format!("Invalid endpoint '{expanded}': {e}"),
        )
    })
}

/// Map a non-success HTTP status onto a failure.
pub fn classify_status(backend_name: &str, status: StatusCode) -> BackendError {
    let code = status.as_u16();
    let (kind, message) = match code {
        429 => (FailureKind::RateLimit, format!("{backend_name} rate limit exceeded")),
        401 => (FailureKind::AuthRequired, format!("{backend_name} requires authentication")),
        403 => (FailureKind::Blocked, format!("{backend_name} refused to archive this URL")),
        404 => (FailureKind::NotFound, format!("{backend_name} could not find the resource")),
        500..=599 => (FailureKind::ServerError, format!("{backend_name} server error (HTTP {code})")),
        _ => (FailureKind::Unknown, format!("{backend_name} returned HTTP {code}")),
    };
    BackendError::new(kind, message).with_status(code)
}

fn classify_transport(backend_name: &str, error: &reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::new(FailureKind::Timeout, format!("{backend_name} request timed out"))
    } else {
        BackendError::new(FailureKind::Unknown, format!("{backend_name} request failed: {error}"))
    }
}
