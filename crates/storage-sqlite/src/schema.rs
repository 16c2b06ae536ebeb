//! Bootstrap DDL. Tables are created if missing; there is no migration
//! tooling. Timestamps are unix milliseconds (UTC), days are `YYYY-MM-DD`
//! text, decimals are canonical decimal text.

pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS operation_locks (
    scope_key   TEXT PRIMARY KEY NOT NULL,
    operation   TEXT NOT NULL,
    company_id  INTEGER,
    user_id     INTEGER,
    expires_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS operation_logs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    operation   TEXT NOT NULL,
    status      TEXT NOT NULL,
    company_id  INTEGER,
    user_id     INTEGER,
    meta        TEXT NOT NULL DEFAULT '{}',
    details     TEXT,
    started_at  INTEGER NOT NULL,
    finished_at INTEGER,
    duration_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_operation_logs_operation ON operation_logs (operation, id);

CREATE TABLE IF NOT EXISTS exchange_rates (
    date          TEXT NOT NULL,
    currency_code TEXT NOT NULL,
    currency_name TEXT NOT NULL,
    rate          TEXT NOT NULL,
    updated_at    INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_exchange_rates_date_code ON exchange_rates (date, currency_code);

CREATE TABLE IF NOT EXISTS declarations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id  INTEGER NOT NULL,
    customs_id  TEXT NOT NULL,
    mrn         TEXT,
    status      TEXT,
    date        TEXT,
    xml_data    TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_declarations_company_guid ON declarations (company_id, customs_id);

CREATE TABLE IF NOT EXISTS declaration_summaries (
    declaration_id      INTEGER PRIMARY KEY NOT NULL REFERENCES declarations (id),
    representative_name TEXT,
    carrier_name        TEXT,
    bank_name           TEXT,
    customs_value       TEXT,
    hs_codes            TEXT NOT NULL DEFAULT '[]',
    goods_count         INTEGER NOT NULL DEFAULT 0,
    updated_at          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_jobs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id       INTEGER NOT NULL,
    status           TEXT NOT NULL,
    date_from        TEXT NOT NULL,
    date_to          TEXT NOT NULL,
    total_chunks     INTEGER NOT NULL DEFAULT 0,
    completed_chunks INTEGER NOT NULL DEFAULT 0,
    failed_chunks    INTEGER NOT NULL DEFAULT 0,
    total_guids      INTEGER NOT NULL DEFAULT 0,
    completed        INTEGER NOT NULL DEFAULT 0,
    error_message    TEXT,
    cancelled_at     INTEGER,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL,
    finished_at      INTEGER
);
CREATE INDEX IF NOT EXISTS idx_sync_jobs_company ON sync_jobs (company_id, status);

CREATE TABLE IF NOT EXISTS sync_job_errors (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_job_id    INTEGER NOT NULL REFERENCES sync_jobs (id),
    chunk_number   INTEGER NOT NULL,
    date_from      TEXT NOT NULL,
    date_to        TEXT NOT NULL,
    error_message  TEXT NOT NULL,
    error_code     TEXT NOT NULL,
    retry_attempts INTEGER NOT NULL,
    is_retried     INTEGER NOT NULL DEFAULT 0,
    created_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sync_job_errors_job ON sync_job_errors (sync_job_id, chunk_number);
"#;
