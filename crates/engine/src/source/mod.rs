//! External data sources.
//!
//! Two HTTP boundaries feed the engine:
//! - [`RateSource`] returns one day's full currency table.
//! - [`DocumentSource`] lists declaration GUIDs for a date chunk and
//!   fetches single declaration payloads.
//!
//! Both are traits so syncers can be driven by in-process fakes in tests.
//! The HTTP implementations use `ureq` (sync) inside
//! `tokio::task::spawn_blocking`.

pub mod documents;
pub mod rates;

use async_trait::async_trait;
use customs_sync_storage::RateRow;
use time::Date;

use crate::error::SourceError;
use crate::period::Period;

pub use documents::HttpDocumentSource;
pub use rates::HttpRateSource;

// ──────────────────────────────────────────────
// Traits
// ──────────────────────────────────────────────

/// One day's rate table from the central-bank API.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Every currency for `date`, or only `currency` when given.
    ///
    /// "No data" (holiday, unsupported date, non-200) is `Ok(vec![])`.
    async fn fetch_day(
        &self,
        date: Date,
        currency: Option<&str>,
    ) -> Result<Vec<RateRow>, SourceError>;
}

/// A declaration as delivered by the document source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationDocument {
    pub guid: String,
    pub mrn: Option<String>,
    pub status: Option<String>,
    pub date: Option<Date>,
    /// The raw response body, kept verbatim.
    pub payload: String,
}

/// The customs-declaration API.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// GUIDs of declarations dated within `period`.
    async fn list_guids(&self, period: &Period) -> Result<Vec<String>, SourceError>;

    async fn fetch_document(&self, guid: &str) -> Result<DeclarationDocument, SourceError>;
}

// ──────────────────────────────────────────────
// Shared HTTP plumbing
// ──────────────────────────────────────────────

/// Body of a GET, or the non-success status that replaced it.
#[derive(Debug)]
pub(crate) enum HttpReply {
    Body(String),
    Status(u16),
}

/// GET `url` on the blocking pool.
pub(crate) async fn http_get(
    url: String,
    auth_token: Option<String>,
) -> Result<HttpReply, SourceError> {
    let target = url.clone();
    tokio::task::spawn_blocking(move || {
        let agent = ureq::Agent::new_with_defaults();
        let mut request = agent.get(&url);
        if let Some(ref token) = auth_token {
            request = request.header("Authorization", &format!("Bearer {}", token));
        }

        match request.call() {
            Ok(response) => {
                let body = response
                    .into_body()
                    .read_to_string()
                    .map_err(|e| SourceError::Decode {
                        url: url.clone(),
                        message: format!("failed to read body: {}", e),
                    })?;
                Ok(HttpReply::Body(body))
            }
            Err(ureq::Error::StatusCode(code)) => Ok(HttpReply::Status(code)),
            Err(e) => Err(SourceError::Http {
                url,
                message: e.to_string(),
            }),
        }
    })
    .await
    .map_err(|e| {
        tracing::error!(url = %target, error = %e, "http task failed");
        SourceError::Join(e.to_string())
    })?
}

pub(crate) fn trim_base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}
