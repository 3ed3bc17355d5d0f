//! Append-only observation history.
//!
//! [`HistoryStore`] is injected wherever history is needed (trend
//! classification, the scan pipeline, the read API) as an
//! `Arc<dyn HistoryStore>`. Three backends exist:
//! - [`CsvHistoryStore`]: the canonical tabular file
//! - [`PgHistoryStore`]: PostgreSQL, for deployments with a database
//! - [`MemoryHistoryStore`]: in-process, used by tests
//!
//! Rows are never updated or deleted. A query returns matching rows in
//! append order and skips rows that cannot be decoded.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::{Observation, RouteKey};

mod csv_file;
mod pg;
mod row;

pub use csv_file::{CsvHistoryStore, HISTORY_COLUMNS};
pub use pg::PgHistoryStore;
pub use row::{HistoryRow, RowError};

// ---

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("History store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("History store CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("History store database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Existing file was written with a different column layout. Appending
    /// would mix layouts, so it needs an explicit migration.
    #[error("History store schema mismatch: expected columns [{expected}], found [{found}]")]
    SchemaMismatch { expected: String, found: String },

    #[error("History store error: {0}")]
    Other(String),
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Durably persist one observation after all previously appended ones.
    async fn append(&self, observation: &Observation) -> Result<(), StoreError>;

    /// All stored observations for `key`, in append order.
    async fn query(&self, key: &RouteKey) -> Result<Vec<Observation>, StoreError>;
}

/// In-memory history, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    rows: RwLock<Vec<Observation>>,
}

impl MemoryHistoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, observation: &Observation) -> Result<(), StoreError> {
        self.rows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observation.clone());
        Ok(())
    }

    async fn query(&self, key: &RouteKey) -> Result<Vec<Observation>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        Ok(rows.iter().filter(|o| o.matches(key)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn obs(origin: &str, day: u32, price: f64) -> Observation {
        // ---
        Observation {
            observed_at: Utc::now(),
            origin: origin.into(),
            destination: "DPS".into(),
            departure_date: NaiveDate::from_ymd_opt(2026, 7, day).unwrap(),
            departure_time: "10:00:00".into(),
            arrival_time: "09:00:00".into(),
            duration_minutes: 900,
            stop_count: 0,
            route: vec![origin.into(), "DPS".into()],
            carrier_code: "TK".into(),
            flight_number: "TK1860".into(),
            cabin_class: None,
            seats_available: None,
            price_total: price,
            price_base: price,
            price_tax: 0.0,
        }
    }

    #[test]
    fn test_memory_store_filters_by_key_in_append_order() {
        // ---
        let store = MemoryHistoryStore::new();
        tokio_test::block_on(async {
            store.append(&obs("MAD", 8, 900.0)).await.unwrap();
            store.append(&obs("BCN", 8, 700.0)).await.unwrap();
            store.append(&obs("MAD", 9, 800.0)).await.unwrap();
            store.append(&obs("MAD", 8, 910.0)).await.unwrap();
        });

        let key = RouteKey::new("MAD", "DPS", NaiveDate::from_ymd_opt(2026, 7, 8).unwrap());
        let found = tokio_test::block_on(store.query(&key)).unwrap();
        let prices: Vec<f64> = found.iter().map(|o| o.price_total).collect();
        assert_eq!(prices, vec![900.0, 910.0]);
        assert_eq!(store.len(), 4);
    }
}
