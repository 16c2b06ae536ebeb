//! Declaration summary extraction.
//!
//! A declaration payload is either a JSON envelope whose `ccd_xml` field
//! holds the declaration markup, or (older records) the bare markup itself.
//! Fields are pulled out with narrow, non-greedy patterns scoped to each
//! record's opening and closing tags. This is not a markup parser: anything
//! the patterns do not recognize simply yields `None`.
//!
//! Extraction is pure and total. Any input, however garbled, produces a
//! summary; the worst case is an all-empty one.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

/// Client group code of the customs representative.
pub const REPRESENTATIVE_GROUP: &str = "14";
/// Client group code of the carrier.
pub const CARRIER_GROUP: &str = "50";
/// Placeholder the source writes for "no value".
pub const SENTINEL: &str = "---";
/// At most this many distinct HS codes are kept per declaration.
pub const MAX_HS_CODES: usize = 50;

/// Envelope field holding the declaration markup.
const ENVELOPE_FIELD: &str = "ccd_xml";

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("invalid extraction pattern")
}

static CLIENT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)<ccd_client\b[^>]*>(.*?)</ccd_client>"));
static CLIENT_GROUP: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)<ccd_cl_gr\b[^>]*>(.*?)</ccd_cl_gr>"));
static CLIENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)<ccd_cl_name\b[^>]*>(.*?)</ccd_cl_name>"));
static BANK: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?s)<ccd_bank\b[^>]*>(.*?)</ccd_bank>"));
static BANK_NAME: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)<ccd_bank_name\b[^>]*>(.*?)</ccd_bank_name>"));
static CUSTOMS_VALUE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)<ccd_cust_value\b[^>]*>(.*?)</ccd_cust_value>"));
static GOODS: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)<ccd_goods\b[^>]*>(.*?)</ccd_goods>"));
static GOODS_CODE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)<ccd_goods_code\b[^>]*>(.*?)</ccd_goods_code>"));

/// The three party names of a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeclarationParties {
    pub representative_name: Option<String>,
    pub carrier_name: Option<String>,
    pub bank_name: Option<String>,
}

/// Everything derived from a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedSummary {
    pub parties: DeclarationParties,
    pub customs_value: Option<Decimal>,
    pub hs_codes: Vec<String>,
    pub goods_count: i64,
}

/// Locate the declaration markup inside a payload.
///
/// `{`/`[` means a JSON envelope, `<` bare markup; anything else, or an
/// envelope that fails to parse or lacks the markup field, has no markup.
pub fn markup_of(payload: &str) -> Option<String> {
    let trimmed = payload.trim_start();
    match trimmed.chars().next()? {
        '<' => Some(trimmed.to_string()),
        '{' | '[' => {
            let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
            let markup = match &value {
                serde_json::Value::Object(map) => map.get(ENVELOPE_FIELD)?.as_str(),
                serde_json::Value::Array(items) => items
                    .iter()
                    .find_map(|item| item.get(ENVELOPE_FIELD)?.as_str()),
                _ => None,
            }?;
            Some(markup.to_string())
        }
        _ => None,
    }
}

pub fn extract_parties(payload: &str) -> DeclarationParties {
    match markup_of(payload) {
        Some(markup) => parties_from_markup(&markup),
        None => DeclarationParties::default(),
    }
}

pub fn extract_summary(payload: &str) -> ExtractedSummary {
    let Some(markup) = markup_of(payload) else {
        return ExtractedSummary::default();
    };

    ExtractedSummary {
        parties: parties_from_markup(&markup),
        customs_value: first_field(&CUSTOMS_VALUE, &markup).and_then(|v| parse_amount(&v)),
        hs_codes: hs_codes(&markup),
        goods_count: GOODS.find_iter(&markup).count() as i64,
    }
}

fn parties_from_markup(markup: &str) -> DeclarationParties {
    DeclarationParties {
        representative_name: client_name(markup, REPRESENTATIVE_GROUP),
        carrier_name: client_name(markup, CARRIER_GROUP),
        bank_name: BANK
            .captures(markup)
            .and_then(|record| first_field(&BANK_NAME, record.get(1)?.as_str())),
    }
}

/// Name of the first client record in `group`. A matching record whose name
/// is empty or the sentinel yields `None` without looking further.
fn client_name(markup: &str, group: &str) -> Option<String> {
    CLIENT
        .captures_iter(markup)
        .filter_map(|record| record.get(1))
        .find(|body| first_field(&CLIENT_GROUP, body.as_str()).as_deref() == Some(group))
        .and_then(|body| first_field(&CLIENT_NAME, body.as_str()))
}

fn first_field(re: &Regex, scope: &str) -> Option<String> {
    re.captures(scope)
        .and_then(|c| c.get(1))
        .and_then(|m| clean(m.as_str()))
}

fn hs_codes(markup: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    GOODS_CODE
        .captures_iter(markup)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|code| !code.is_empty() && seen.insert(code.clone()))
        .take(MAX_HS_CODES)
        .collect()
}

/// Amounts may use a comma decimal separator and digit-group spaces.
fn parse_amount(raw: &str) -> Option<Decimal> {
    let normalized: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    Decimal::from_str(&normalized).ok()
}

/// Trim, unwrap CDATA, decode the basic entities; empty and sentinel are `None`.
fn clean(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    if let Some(inner) = value
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
    {
        value = inner.trim();
    }
    let decoded = decode_entities(value);
    let decoded = decoded.trim();
    if decoded.is_empty() || decoded == SENTINEL {
        None
    } else {
        Some(decoded.to_string())
    }
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    // `&amp;` last so "&amp;lt;" decodes to "&lt;", not "<".
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
