//! In-process fakes for the engine's external sources.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use customs_sync_engine::period::Period;
use customs_sync_engine::{
    DeclarationDocument, DocumentSource, ManualClock, RateSource, SourceError, SyncJobs,
};
use customs_sync_storage::{JobStatus, MemoryStore, RateRow, SyncStore};
use rust_decimal::Decimal;
use time::macros::datetime;
use time::{Date, OffsetDateTime};

pub const NOW: OffsetDateTime = datetime!(2025-03-10 09:00:00 UTC);

pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(NOW))
}

pub fn rate(code: &str, value: &str) -> RateRow {
    RateRow {
        currency_code: code.to_string(),
        currency_name: format!("{code} name"),
        rate: Decimal::from_str(value).unwrap(),
    }
}

// ──────────────────────────────────────────────
// Rates
// ──────────────────────────────────────────────

/// Serves a fixed table per day. Unknown days have no data; days in
/// `failing` return a transport error and days in `malformed` a decode error.
#[derive(Default)]
pub struct FakeRateSource {
    pub tables: Mutex<BTreeMap<Date, Vec<RateRow>>>,
    pub failing: Mutex<HashSet<Date>>,
    pub malformed: Mutex<HashSet<Date>>,
    pub calls: Mutex<Vec<Date>>,
}

impl FakeRateSource {
    pub fn with_days(days: impl IntoIterator<Item = (Date, Vec<RateRow>)>) -> Arc<Self> {
        let source = Self::default();
        source.tables.lock().unwrap().extend(days);
        Arc::new(source)
    }

    pub fn set(&self, day: Date, rows: Vec<RateRow>) {
        self.tables.lock().unwrap().insert(day, rows);
    }

    pub fn fail_on(&self, day: Date) {
        self.failing.lock().unwrap().insert(day);
    }

    pub fn malformed_on(&self, day: Date) {
        self.malformed.lock().unwrap().insert(day);
    }

    pub fn calls(&self) -> Vec<Date> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RateSource for FakeRateSource {
    async fn fetch_day(
        &self,
        date: Date,
        currency: Option<&str>,
    ) -> Result<Vec<RateRow>, SourceError> {
        self.calls.lock().unwrap().push(date);
        if self.failing.lock().unwrap().contains(&date) {
            return Err(SourceError::Http {
                url: format!("fake://rates/{date}"),
                message: "connection reset".to_string(),
            });
        }
        if self.malformed.lock().unwrap().contains(&date) {
            return Err(SourceError::Decode {
                url: format!("fake://rates/{date}"),
                message: "expected value at line 1 column 1".to_string(),
            });
        }
        let rows = self
            .tables
            .lock()
            .unwrap()
            .get(&date)
            .cloned()
            .unwrap_or_default();
        Ok(match currency {
            Some(code) => rows.into_iter().filter(|r| r.currency_code == code).collect(),
            None => rows,
        })
    }
}

// ──────────────────────────────────────────────
// Documents
// ──────────────────────────────────────────────

pub fn envelope(guid: &str, representative: &str) -> String {
    serde_json::json!({
        "guid": guid,
        "mrn": format!("MRN-{guid}"),
        "status": "R",
        "date": "2023-01-02",
        "ccd_xml": format!(
            "<ccd><ccd_client><ccd_cl_gr>14</ccd_cl_gr><ccd_cl_name>{representative}</ccd_cl_name></ccd_client>\
             <ccd_goods><ccd_goods_code>8471</ccd_goods_code></ccd_goods></ccd>"
        ),
    })
    .to_string()
}

/// GUIDs per chunk start date, payloads per GUID.
///
/// `list_failures[start]` is how many times listing that chunk fails before
/// succeeding. `cancel_on` cancels the job through `SyncJobs` while that
/// GUID is being fetched, the way a concurrent HTTP cancel would;
/// `cancel_on_listing` does the same while the chunk starting on that date
/// is being listed.
#[derive(Default)]
pub struct FakeDocumentSource {
    pub guids: Mutex<HashMap<Date, Vec<String>>>,
    pub documents: Mutex<HashMap<String, String>>,
    pub list_failures: Mutex<HashMap<Date, u32>>,
    pub listed: Mutex<Vec<Period>>,
    pub fetched: Mutex<Vec<String>>,
    pub cancel_on: Mutex<Option<(String, Arc<SyncJobs>, i64)>>,
    pub cancel_on_listing: Mutex<Option<(Date, Arc<SyncJobs>, i64)>>,
}

impl FakeDocumentSource {
    pub fn chunk(&self, start: Date, guids: &[&str]) {
        self.guids
            .lock()
            .unwrap()
            .insert(start, guids.iter().map(|g| g.to_string()).collect());
        for g in guids {
            self.documents
                .lock()
                .unwrap()
                .insert(g.to_string(), envelope(g, &format!("Broker {g}")));
        }
    }

    pub fn fail_listing(&self, start: Date, times: u32) {
        self.list_failures.lock().unwrap().insert(start, times);
    }

    pub fn drop_document(&self, guid: &str) {
        self.documents.lock().unwrap().remove(guid);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn listed_starts(&self) -> Vec<Date> {
        self.listed.lock().unwrap().iter().map(|p| p.start).collect()
    }
}

#[async_trait]
impl DocumentSource for FakeDocumentSource {
    async fn list_guids(&self, period: &Period) -> Result<Vec<String>, SourceError> {
        self.listed.lock().unwrap().push(*period);

        let cancel = self.cancel_on_listing.lock().unwrap().clone();
        if let Some((start, jobs, job_id)) = cancel {
            if start == period.start {
                jobs.cancel(job_id).await.unwrap();
            }
        }
        {
            let mut failures = self.list_failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&period.start) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SourceError::Http {
                        url: format!("fake://declarations?dateFrom={}", period.start),
                        message: "status 503".to_string(),
                    });
                }
            }
        }
        Ok(self
            .guids
            .lock()
            .unwrap()
            .get(&period.start)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_document(&self, guid: &str) -> Result<DeclarationDocument, SourceError> {
        self.fetched.lock().unwrap().push(guid.to_string());

        let cancel = self.cancel_on.lock().unwrap().clone();
        if let Some((target, jobs, job_id)) = cancel {
            if target == guid {
                jobs.cancel(job_id).await.unwrap();
            }
        }

        let payload = self.documents.lock().unwrap().get(guid).cloned();
        match payload {
            Some(payload) => Ok(DeclarationDocument {
                guid: guid.to_string(),
                mrn: Some(format!("MRN-{guid}")),
                status: Some("R".to_string()),
                date: None,
                payload,
            }),
            None => Err(SourceError::Http {
                url: format!("fake://declarations/{guid}"),
                message: "status 404".to_string(),
            }),
        }
    }
}

pub async fn job_status(store: &dyn SyncStore, job_id: i64) -> JobStatus {
    store.get_sync_job(job_id).await.unwrap().status
}
