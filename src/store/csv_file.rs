//! CSV file backend for the history store.
//!
//! The header is written once, when the file is created. Each append
//! serializes one whole record into memory and hands it to the OS in a
//! single append-mode write followed by a sync, so a concurrent reader
//! sees either the old file or the old file plus the complete row. A
//! reader that catches a row mid-write ignores the unterminated tail.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::row::HistoryRow;
use super::{HistoryStore, StoreError};
use crate::models::{Observation, RouteKey};

// ---

/// Column layout of the history file, in order.
pub const HISTORY_COLUMNS: [&str; 17] = [
    "observed_at",
    "origin",
    "destination",
    "departure_date",
    "departure_time",
    "arrival_time",
    "duration_minutes",
    "stop_count",
    "stopover_airports",
    "full_route",
    "carrier_code",
    "flight_number",
    "cabin_class",
    "seats_available",
    "price_total",
    "price_base",
    "price_tax",
];

#[derive(Debug)]
pub struct CsvHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvHistoryStore {
    // ---
    /// Open (without creating) the history file at `path`.
    ///
    /// An existing file with a foreign header is still opened so that it can
    /// be read; appends to it fail with [`StoreError::SchemaMismatch`].
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        // ---
        let store = CsvHistoryStore {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        if let Err(e) = store.check_layout().await {
            tracing::warn!(path = %store.path.display(), "History file is read-only for this version: {}", e);
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Confirm the file's header matches [`HISTORY_COLUMNS`] exactly.
    /// Returns `Ok(false)` when the file is missing or empty.
    pub async fn check_layout(&self) -> Result<bool, StoreError> {
        // ---
        let Some(bytes) = self.read_complete_lines().await? else {
            return Ok(false);
        };
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes.as_slice());
        let header = reader.headers()?;
        if header.is_empty() {
            return Ok(false);
        }
        if header.iter().eq(HISTORY_COLUMNS.iter().copied()) {
            Ok(true)
        } else {
            Err(StoreError::SchemaMismatch {
                expected: HISTORY_COLUMNS.join(","),
                found: header.iter().collect::<Vec<_>>().join(","),
            })
        }
    }

    /// File content up to and including its last newline; `None` if the
    /// file does not exist.
    async fn read_complete_lines(&self) -> Result<Option<Vec<u8>>, StoreError> {
        // ---
        let mut bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
        if complete < bytes.len() {
            tracing::debug!(
                path = %self.path.display(),
                partial_bytes = bytes.len() - complete,
                "Ignoring unterminated trailing row"
            );
            bytes.truncate(complete);
        }
        Ok(Some(bytes))
    }
}

async fn ends_mid_row(file: &mut tokio::fs::File) -> Result<bool, StoreError> {
    // ---
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(std::io::SeekFrom::Start(len - 1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

#[async_trait]
impl HistoryStore for CsvHistoryStore {
    async fn append(&self, observation: &Observation) -> Result<(), StoreError> {
        // ---
        let _guard = self.write_lock.lock().await;

        let needs_header = !self.check_layout().await?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(Vec::new());
        writer.serialize(HistoryRow::from(observation))?;
        let record = writer
            .into_inner()
            .map_err(|e| StoreError::Other(format!("buffering history row: {}", e.error())))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        // Terminate a row left unfinished by an interrupted writer so it
        // stays a single undecodable line.
        let mut record = record;
        if ends_mid_row(&mut file).await? {
            tracing::warn!(path = %self.path.display(), "Closing unterminated trailing row");
            record.insert(0, b'\n');
        }
        file.write_all(&record).await?;
        file.flush().await?;
        file.sync_data().await?;

        tracing::debug!(
            path = %self.path.display(),
            key = %observation.key(),
            price = observation.price_total,
            "Appended observation"
        );
        Ok(())
    }

    async fn query(&self, key: &RouteKey) -> Result<Vec<Observation>, StoreError> {
        // ---
        let Some(bytes) = self.read_complete_lines().await? else {
            return Ok(Vec::new());
        };

        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes.as_slice());
        let mut found = Vec::new();
        let mut skipped = 0usize;

        for (i, result) in reader.deserialize::<HistoryRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(path = %self.path.display(), row = i + 1, "Skipping unreadable history row: {}", e);
                    continue;
                }
            };
            if row.origin != key.origin || row.destination != key.destination || row.departure_date != key.departure_date {
                continue;
            }
            match Observation::try_from(row) {
                Ok(obs) => found.push(obs),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(path = %self.path.display(), row = i + 1, "Skipping invalid history row: {}", e);
                }
            }
        }

        tracing::debug!(%key, rows = found.len(), skipped, "History query");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn obs(price: f64, minute: u32) -> Observation {
        // ---
        Observation {
            observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap(),
            origin: "MAD".into(),
            destination: "DPS".into(),
            departure_date: NaiveDate::from_ymd_opt(2026, 7, 8).unwrap(),
            departure_time: "10:00:00".into(),
            arrival_time: "14:35:00".into(),
            duration_minutes: 1295,
            stop_count: 1,
            route: vec!["MAD".into(), "DOH".into(), "DPS".into()],
            carrier_code: "QR".into(),
            flight_number: "QR148".into(),
            cabin_class: Some("ECONOMY".into()),
            seats_available: None,
            price_total: price,
            price_base: 600.0,
            price_tax: price - 600.0,
        }
    }

    fn key() -> RouteKey {
        RouteKey::new("MAD", "DPS", NaiveDate::from_ymd_opt(2026, 7, 8).unwrap())
    }

    #[tokio::test]
    async fn test_append_then_query() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::open(dir.path().join("history.csv")).await.unwrap();

        store.append(&obs(900.0, 0)).await.unwrap();
        store.append(&obs(910.0, 1)).await.unwrap();

        let rows = store.query(&key()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], obs(900.0, 0));
        assert_eq!(rows[1].price_total, 910.0);

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.lines().next().unwrap(), HISTORY_COLUMNS.join(","));
        assert_eq!(text.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::open(dir.path().join("none.csv")).await.unwrap();
        assert!(store.query(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_and_partial_rows_are_skipped() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::open(dir.path().join("history.csv")).await.unwrap();
        store.append(&obs(900.0, 0)).await.unwrap();

        let mut text = std::fs::read_to_string(store.path()).unwrap();
        text.push_str("2026-03-01T09:05:00Z,MAD,DPS,2026-07-08,10:00:00,14:35:00,1295,1,DOH,MAD,DOH,DPS,QR,QR148,ECONOMY,,abc,600,0\n");
        text.push_str("2026-03-01 09:06:00,MAD,DPS,2026-07-08,10:00:00,14:35:00,1295,1,DOH,\"MAD,DOH,DPS\",QR,QR148,ECONOMY,N/A,920,600,320\n");
        text.push_str("2026-03-01T09:07:00Z,MAD,DPS,2026-07-08,10:0");
        std::fs::write(store.path(), text).unwrap();

        let rows = store.query(&key()).await.unwrap();
        let prices: Vec<f64> = rows.iter().map(|o| o.price_total).collect();
        assert_eq!(prices, vec![900.0, 920.0]);
        assert_eq!(rows[1].seats_available, None);
    }

    #[tokio::test]
    async fn test_append_after_interrupted_write() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::open(dir.path().join("history.csv")).await.unwrap();
        store.append(&obs(900.0, 0)).await.unwrap();

        let mut text = std::fs::read_to_string(store.path()).unwrap();
        text.push_str("2026-03-01T09:07:00Z,MAD,DPS,2026-07-08,10:0");
        std::fs::write(store.path(), text).unwrap();

        store.append(&obs(905.0, 8)).await.unwrap();
        let prices: Vec<f64> = store.query(&key()).await.unwrap().iter().map(|o| o.price_total).collect();
        assert_eq!(prices, vec![900.0, 905.0]);
    }

    #[tokio::test]
    async fn test_reordered_header_reads_but_refuses_append() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.csv");

        let mut columns: Vec<&str> = HISTORY_COLUMNS.to_vec();
        let moved: Vec<&str> = columns.drain(8..10).collect();
        columns.extend(moved);
        let mut text = columns.join(",");
        text.push('\n');
        text.push_str("2026-03-01T09:00:00Z,MAD,DPS,2026-07-08,10:00:00,14:35:00,1295,1,QR,QR148,ECONOMY,4,880,600,280,DOH,\"MAD,DOH,DPS\"\n");
        std::fs::write(&path, text).unwrap();

        let store = CsvHistoryStore::open(&path).await.unwrap();
        let rows = store.query(&key()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].route, vec!["MAD", "DOH", "DPS"]);
        assert_eq!(rows[0].seats_available, Some(4));

        let err = store.append(&obs(900.0, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
    }
}
