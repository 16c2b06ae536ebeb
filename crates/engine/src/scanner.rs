//! Keyset pagination over a table ordered by a strictly increasing key.
//!
//! A run can be interrupted at any page boundary and resumed by passing the
//! last page's cursor back in. Repeating a page (same or older cursor) is
//! harmless as long as row processing is idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use customs_sync_storage::{DeclarationRecord, StorageError, SyncStore};

/// Largest page a caller may request.
pub const MAX_BATCH_SIZE: usize = 500;

/// A table that can be read in key order after a cursor.
#[async_trait]
pub trait KeysetSource: Send + Sync {
    type Row: Send;

    /// Up to `limit` rows with key `> cursor` (all keys when `None`),
    /// ascending by key.
    async fn page_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Self::Row>, StorageError>;

    fn key(row: &Self::Row) -> i64;
}

/// One page of a scan.
#[derive(Debug)]
pub struct Page<R> {
    pub rows: Vec<R>,
    /// Key of the last row, or the incoming cursor for an empty page.
    pub next_cursor: Option<i64>,
    /// The page came back short: nothing is left past `next_cursor`.
    pub done: bool,
}

pub struct CursorScanner<S> {
    source: S,
    batch_size: usize,
}

impl<S: KeysetSource> CursorScanner<S> {
    /// `batch_size` is clamped to `1..=MAX_BATCH_SIZE`.
    pub fn new(source: S, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: clamp_batch_size(batch_size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn scan(&self, cursor: Option<i64>) -> Result<Page<S::Row>, StorageError> {
        let rows = self.source.page_after(cursor, self.batch_size).await?;
        let next_cursor = rows.last().map(S::key).or(cursor);
        let done = rows.len() < self.batch_size;
        Ok(Page {
            rows,
            next_cursor,
            done,
        })
    }
}

pub fn clamp_batch_size(batch_size: usize) -> usize {
    batch_size.clamp(1, MAX_BATCH_SIZE)
}

/// Declarations in id order.
pub struct DeclarationRows {
    store: Arc<dyn SyncStore>,
}

impl DeclarationRows {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl KeysetSource for DeclarationRows {
    type Row = DeclarationRecord;

    async fn page_after(
        &self,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Vec<DeclarationRecord>, StorageError> {
        self.store.list_declarations_after(cursor, limit).await
    }

    fn key(row: &DeclarationRecord) -> i64 {
        row.id
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Ids(Vec<i64>);

    #[async_trait]
    impl KeysetSource for Ids {
        type Row = i64;

        async fn page_after(
            &self,
            cursor: Option<i64>,
            limit: usize,
        ) -> Result<Vec<i64>, StorageError> {
            Ok(self
                .0
                .iter()
                .copied()
                .filter(|id| cursor.map_or(true, |c| *id > c))
                .take(limit)
                .collect())
        }

        fn key(row: &i64) -> i64 {
            *row
        }
    }

    async fn drain(scanner: &CursorScanner<Ids>) -> (Vec<i64>, usize) {
        let mut seen = Vec::new();
        let mut calls = 0;
        let mut cursor = None;
        loop {
            let page = scanner.scan(cursor).await.unwrap();
            calls += 1;
            seen.extend(page.rows);
            cursor = page.next_cursor;
            if page.done {
                break;
            }
        }
        (seen, calls)
    }

    #[tokio::test]
    async fn visits_every_row_once_in_ceil_n_over_b_calls() {
        // Gaps in the key sequence must not matter.
        let ids: Vec<i64> = (1..=23).map(|i| i * 3).collect();
        let scanner = CursorScanner::new(Ids(ids.clone()), 5);
        let (seen, calls) = drain(&scanner).await;
        assert_eq!(seen, ids);
        assert_eq!(calls, 5);
    }

    #[tokio::test]
    async fn exact_multiple_needs_one_trailing_empty_page() {
        let scanner = CursorScanner::new(Ids((1..=10).collect()), 5);
        let (seen, calls) = drain(&scanner).await;
        assert_eq!(seen.len(), 10);
        assert_eq!(calls, 3);

        let tail = scanner.scan(Some(10)).await.unwrap();
        assert!(tail.rows.is_empty());
        assert!(tail.done);
        assert_eq!(tail.next_cursor, Some(10));
    }

    #[tokio::test]
    async fn older_cursor_replays_rows() {
        let scanner = CursorScanner::new(Ids((1..=6).collect()), 2);
        let first = scanner.scan(Some(2)).await.unwrap();
        let again = scanner.scan(Some(2)).await.unwrap();
        assert_eq!(first.rows, again.rows);
        assert_eq!(first.rows, vec![3, 4]);
        assert!(!first.done);
    }

    #[tokio::test]
    async fn empty_table_is_done_immediately() {
        let scanner = CursorScanner::new(Ids(Vec::new()), 100);
        let page = scanner.scan(None).await.unwrap();
        assert!(page.done);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn batch_size_is_clamped() {
        assert_eq!(clamp_batch_size(0), 1);
        assert_eq!(clamp_batch_size(250), 250);
        assert_eq!(clamp_batch_size(10_000), MAX_BATCH_SIZE);
    }
}
