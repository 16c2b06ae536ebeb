//! Customs-declaration API.
//!
//! - `GET {base}/declarations?dateFrom=YYYY-MM-DD&dateTo=YYYY-MM-DD` returns
//!   a JSON array of GUIDs, or `{"guids": [...]}`.
//! - `GET {base}/declarations/{guid}` returns `{guid, mrn, status, date,
//!   ccd_xml}`. The body is kept verbatim as the declaration payload.
//!
//! Unlike the rate source, a non-200 here is a failure of the chunk or GUID.

use async_trait::async_trait;
use serde::Deserialize;

use super::{http_get, trim_base, DeclarationDocument, DocumentSource, HttpReply};
use crate::error::SourceError;
use crate::period::{format_day, parse_day, Period};

pub struct HttpDocumentSource {
    base_url: String,
    auth_token: Option<String>,
}

impl HttpDocumentSource {
    /// An empty `auth_token` sends no `Authorization` header.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, SourceError> {
        if base_url.trim().is_empty() {
            return Err(SourceError::Config(
                "documents.base_url is not set".to_string(),
            ));
        }
        let auth_token = auth_token.filter(|t| !t.is_empty());
        Ok(Self {
            base_url: trim_base(base_url).to_string(),
            auth_token,
        })
    }

    pub fn list_url(&self, period: &Period) -> String {
        format!(
            "{}/declarations?dateFrom={}&dateTo={}",
            self.base_url,
            format_day(period.start),
            format_day(period.end)
        )
    }

    pub fn document_url(&self, guid: &str) -> String {
        format!("{}/declarations/{}", self.base_url, guid)
    }

    async fn get_ok(&self, url: String) -> Result<String, SourceError> {
        match http_get(url.clone(), self.auth_token.clone()).await? {
            HttpReply::Body(body) => Ok(body),
            HttpReply::Status(status) => Err(SourceError::Http {
                url,
                message: format!("status {status}"),
            }),
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn list_guids(&self, period: &Period) -> Result<Vec<String>, SourceError> {
        let url = self.list_url(period);
        let body = self.get_ok(url.clone()).await?;
        parse_guid_list(&url, &body)
    }

    async fn fetch_document(&self, guid: &str) -> Result<DeclarationDocument, SourceError> {
        if guid.is_empty() || !guid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(SourceError::Config(format!("refusing malformed guid '{guid}'")));
        }
        let url = self.document_url(guid);
        let body = self.get_ok(url.clone()).await?;
        parse_document(&url, guid, body)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireGuidList {
    Bare(Vec<String>),
    Wrapped { guids: Vec<String> },
}

pub fn parse_guid_list(url: &str, body: &str) -> Result<Vec<String>, SourceError> {
    let list: WireGuidList = serde_json::from_str(body).map_err(|e| SourceError::Decode {
        url: url.to_string(),
        message: format!("invalid guid list: {e}"),
    })?;
    let guids = match list {
        WireGuidList::Bare(g) | WireGuidList::Wrapped { guids: g } => g,
    };
    Ok(guids
        .into_iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect())
}

#[derive(Deserialize)]
struct WireDocument {
    guid: Option<String>,
    mrn: Option<String>,
    status: Option<String>,
    date: Option<String>,
}

/// Read the document metadata; the body itself becomes the payload.
///
/// A bare markup body (older records) is accepted with no metadata.
pub fn parse_document(
    url: &str,
    requested_guid: &str,
    body: String,
) -> Result<DeclarationDocument, SourceError> {
    if body.trim_start().starts_with('<') {
        return Ok(DeclarationDocument {
            guid: requested_guid.to_string(),
            mrn: None,
            status: None,
            date: None,
            payload: body,
        });
    }

    let wire: WireDocument = serde_json::from_str(&body).map_err(|e| SourceError::Decode {
        url: url.to_string(),
        message: format!("invalid declaration: {e}"),
    })?;

    let non_empty = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    // Dates may carry a time part; only the calendar day is kept.
    let date = wire
        .date
        .as_deref()
        .and_then(|d| d.get(..10))
        .and_then(|d| parse_day(d).ok());

    Ok(DeclarationDocument {
        guid: non_empty(wire.guid).unwrap_or_else(|| requested_guid.to_string()),
        mrn: non_empty(wire.mrn),
        status: non_empty(wire.status),
        date,
        payload: body,
    })
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn missing_base_url_is_a_config_error() {
        assert!(matches!(
            HttpDocumentSource::new("  ", None),
            Err(SourceError::Config(_))
        ));
    }

    #[test]
    fn token_is_only_what_the_caller_passes() {
        std::env::set_var("CUSTOMS_SYNC_DOCUMENTS_TOKEN", "from-env");
        let none = HttpDocumentSource::new("http://customs.test", None).unwrap();
        let empty = HttpDocumentSource::new("http://customs.test", Some(String::new())).unwrap();
        let given = HttpDocumentSource::new("http://customs.test", Some("t".into())).unwrap();
        std::env::remove_var("CUSTOMS_SYNC_DOCUMENTS_TOKEN");

        assert_eq!(none.auth_token, None);
        assert_eq!(empty.auth_token, None);
        assert_eq!(given.auth_token.as_deref(), Some("t"));
    }

    #[test]
    fn urls_carry_wire_dates() {
        let source = HttpDocumentSource::new("http://customs.test/api/", Some("t".into())).unwrap();
        let period = Period::new(date!(2023 - 01 - 01), date!(2023 - 01 - 07));
        assert_eq!(
            source.list_url(&period),
            "http://customs.test/api/declarations?dateFrom=2023-01-01&dateTo=2023-01-07"
        );
        assert_eq!(
            source.document_url("a1-b2"),
            "http://customs.test/api/declarations/a1-b2"
        );
    }

    #[test]
    fn guid_lists_come_bare_or_wrapped() {
        assert_eq!(
            parse_guid_list("u", r#"["a", " b ", ""]"#).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            parse_guid_list("u", r#"{"guids": ["c"]}"#).unwrap(),
            vec!["c".to_string()]
        );
        assert!(parse_guid_list("u", r#"{"items": []}"#).is_err());
    }

    #[test]
    fn document_metadata_is_read_and_body_kept_verbatim() {
        let body = r#"{"guid":"g-1","mrn":"23UA100000000001","status":"R","date":"2023-01-05T10:00:00","ccd_xml":"<ccd/>"}"#;
        let doc = parse_document("u", "g-1", body.to_string()).unwrap();
        assert_eq!(doc.mrn.as_deref(), Some("23UA100000000001"));
        assert_eq!(doc.status.as_deref(), Some("R"));
        assert_eq!(doc.date, Some(date!(2023 - 01 - 05)));
        assert_eq!(doc.payload, body);
    }

    #[test]
    fn bare_markup_documents_have_no_metadata() {
        let doc = parse_document("u", "g-2", "  <ccd></ccd>".to_string()).unwrap();
        assert_eq!(doc.guid, "g-2");
        assert_eq!(doc.mrn, None);
        assert_eq!(doc.date, None);
    }

    #[tokio::test]
    async fn malformed_guid_is_refused_before_any_request() {
        let source = HttpDocumentSource::new("http://127.0.0.1:9", None).unwrap();
        let err = source.fetch_document("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, SourceError::Config(_)));
    }
}
