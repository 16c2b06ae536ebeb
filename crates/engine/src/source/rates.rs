//! National-bank exchange-rate API.
//!
//! `GET {base}?date=YYYYMMDD&json[&valcode=XXX]` returns a JSON array of
//! `{cc, txt, rate, ...}` objects. An empty array or a non-200 status means
//! the bank published nothing for that day.

use std::str::FromStr;

use async_trait::async_trait;
use customs_sync_storage::RateRow;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::Date;

use super::{http_get, trim_base, HttpReply, RateSource};
use crate::error::SourceError;
use crate::period::compact_day;

pub const DEFAULT_RATES_URL: &str =
    "https://bank.gov.ua/NBUStatService/v1/statdirectory/exchange";

pub struct HttpRateSource {
    base_url: String,
}

impl HttpRateSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn day_url(&self, date: Date, currency: Option<&str>) -> String {
        let mut url = format!("{}?date={}&json", trim_base(&self.base_url), compact_day(date));
        if let Some(code) = currency {
            url.push_str("&valcode=");
            url.push_str(&code.to_ascii_uppercase());
        }
        url
    }
}

impl Default for HttpRateSource {
    fn default() -> Self {
        Self::new(DEFAULT_RATES_URL)
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch_day(
        &self,
        date: Date,
        currency: Option<&str>,
    ) -> Result<Vec<RateRow>, SourceError> {
        let url = self.day_url(date, currency);
        match http_get(url.clone(), None).await? {
            HttpReply::Body(body) => parse_rate_table(&url, &body),
            HttpReply::Status(status) => {
                tracing::debug!(%url, status, "rate source returned no data");
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Deserialize)]
struct WireRate {
    cc: String,
    #[serde(default)]
    txt: String,
    rate: serde_json::Number,
}

/// Decode a rate-table body.
///
/// Rates are read from the JSON number's text so no precision is lost to
/// floating point. Entries without a currency code are dropped.
pub fn parse_rate_table(url: &str, body: &str) -> Result<Vec<RateRow>, SourceError> {
    let decode = |message: String| SourceError::Decode {
        url: url.to_string(),
        message,
    };

    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let wire: Vec<WireRate> =
        serde_json::from_str(body).map_err(|e| decode(format!("invalid rate table: {e}")))?;

    let mut rows = Vec::with_capacity(wire.len());
    for entry in wire {
        let code = entry.cc.trim().to_ascii_uppercase();
        if code.is_empty() {
            continue;
        }
        let text = entry.rate.to_string();
        let rate = Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|e| decode(format!("invalid rate '{text}' for {code}: {e}")))?;
        rows.push(RateRow {
            currency_code: code,
            currency_name: entry.txt.trim().to_string(),
            rate,
        });
    }
    Ok(rows)
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
