//! Wiring from a [`Config`] to the store and engine components shared by
//! the subcommands and the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use customs_sync_engine::{
    Clock, DeclarationSyncer, ExchangeRateSyncer, HttpDocumentSource, HttpRateSource, RateAudit,
    StatsCache, SummaryBackfill, SyncJobs, SystemClock,
};
use customs_sync_sqlite::SqliteStore;
use customs_sync_storage::{DeclarationStats, MemoryStore, StorageError, SyncStore};

use crate::config::{Config, ConfigError, MEMORY_DATABASE};
use crate::error::CliError;

/// Lock TTL for a full summary backfill run.
const BACKFILL_LOCK_TTL: Duration = Duration::from_secs(3600);

/// How long cached per-company stats are served without a sync.
const STATS_MAX_AGE: Duration = Duration::from_secs(300);

pub struct Services {
    pub store: Arc<dyn SyncStore>,
    pub rates: ExchangeRateSyncer,
    pub backfill: SummaryBackfill,
    pub audit: RateAudit,
    pub jobs: SyncJobs,
    /// `None` until `documents.base_url` is configured.
    pub declarations: Option<DeclarationSyncer>,
    pub stats: Arc<StatsCache<i64, DeclarationStats>>,
}

impl Services {
    pub async fn open(config: &Config) -> Result<Self, CliError> {
        let store = open_store(&config.database_url).await?;
        Ok(Self::with_store(config, store, Arc::new(SystemClock)))
    }

    pub fn with_store(config: &Config, store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>) -> Self {
        let rate_source = Arc::new(HttpRateSource::new(config.rates.base_url.clone()));
        let stats = Arc::new(StatsCache::new(clock.clone(), Some(STATS_MAX_AGE)));

        let declarations = match config.documents.base_url.as_deref() {
            Some(base_url) => {
                match HttpDocumentSource::new(base_url, config.documents.auth_token.clone()) {
                    Ok(source) => Some(
                        DeclarationSyncer::new(
                            store.clone(),
                            Arc::new(source),
                            clock.clone(),
                            config.jobs(),
                        )
                        .with_stats_cache(stats.clone()),
                    ),
                    Err(e) => {
                        tracing::warn!(error = %e, "declaration sync disabled");
                        None
                    }
                }
            }
            None => None,
        };

        Self {
            rates: ExchangeRateSyncer::new(
                store.clone(),
                rate_source.clone(),
                clock.clone(),
                config.rate_sync(),
            ),
            backfill: SummaryBackfill::new(store.clone(), clock.clone(), BACKFILL_LOCK_TTL)
                .with_stats_cache(stats.clone()),
            audit: RateAudit::new(store.clone(), rate_source, clock.clone()),
            jobs: SyncJobs::new(store.clone(), clock),
            declarations,
            stats,
            store,
        }
    }

    pub fn declarations(&self) -> Result<&DeclarationSyncer, ConfigError> {
        self.declarations.as_ref().ok_or(ConfigError::Missing(
            "declaration sync needs documents.base_url (or CUSTOMS_SYNC_DOCUMENTS_URL)",
        ))
    }

    /// Company stats, served from the cache while fresh.
    pub async fn company_stats(&self, company_id: i64) -> Result<DeclarationStats, StorageError> {
        if let Some(stats) = self.stats.get(&company_id) {
            return Ok(stats);
        }
        let stats = self.store.declaration_stats(company_id).await?;
        self.stats.insert(company_id, stats.clone());
        Ok(stats)
    }
}

/// `memory` opens a fresh in-memory store; anything else is a SQLite URL.
pub async fn open_store(database_url: &str) -> Result<Arc<dyn SyncStore>, StorageError> {
    if database_url.trim() == MEMORY_DATABASE {
        tracing::info!("using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(database_url).await?;
    tracing::info!(url = database_url, "opened sqlite store");
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use customs_sync_storage::NewDeclaration;
    use time::OffsetDateTime;

    async fn seeded() -> (Services, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .save_declaration(
                &NewDeclaration {
                    company_id: 1,
                    customs_id: "guid-1".into(),
                    mrn: None,
                    status: Some("R".into()),
                    date: None,
                    xml_data: r#"{"ccd_xml":"<ccd><ccd_bank><ccd_bank_name>Bank</ccd_bank_name></ccd_bank></ccd>"}"#
                        .into(),
                },
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();
        let services = Services::with_store(&Config::default(), store.clone(), Arc::new(SystemClock));
        (services, store)
    }

    #[tokio::test]
    async fn stats_are_served_from_the_cache() {
        let (services, store) = seeded().await;
        let first = services.company_stats(1).await.unwrap();
        assert_eq!(first.total, 1);

        store
            .save_declaration(
                &NewDeclaration {
                    company_id: 1,
                    customs_id: "guid-2".into(),
                    mrn: None,
                    status: None,
                    date: None,
                    xml_data: String::new(),
                },
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();
        assert_eq!(services.company_stats(1).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn summary_backfill_refreshes_cached_stats() {
        let (services, _store) = seeded().await;
        assert_eq!(services.company_stats(1).await.unwrap().with_summary, 0);

        let page = services.backfill.page(100, None).await.unwrap();
        assert_eq!(page.updated, 1);
        assert_eq!(services.company_stats(1).await.unwrap().with_summary, 1);
    }
}
