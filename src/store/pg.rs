//! PostgreSQL backend for the history store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use super::row::HistoryRow;
use super::{HistoryStore, StoreError};
use crate::models::{Observation, RouteKey};
use crate::schema;

// ---

#[derive(Debug, Clone)]
pub struct PgHistoryStore {
    pool: PgPool,
}

/// Row as stored in `flight_observations`; Postgres has no unsigned types.
#[derive(Debug, FromRow)]
struct ObservationRecord {
    observed_at: DateTime<Utc>,
    origin: String,
    destination: String,
    departure_date: NaiveDate,
    departure_time: String,
    arrival_time: String,
    duration_minutes: i32,
    stop_count: i32,
    stopover_airports: String,
    full_route: String,
    carrier_code: String,
    flight_number: String,
    cabin_class: Option<String>,
    seats_available: Option<i32>,
    price_total: f64,
    price_base: f64,
    price_tax: f64,
}

impl TryFrom<ObservationRecord> for HistoryRow {
    type Error = String;

    fn try_from(r: ObservationRecord) -> Result<Self, Self::Error> {
        // ---
        let unsigned = |name: &str, v: i32| u32::try_from(v).map_err(|_| format!("negative {name}: {v}"));
        Ok(HistoryRow {
            observed_at: r.observed_at,
            origin: r.origin,
            destination: r.destination,
            departure_date: r.departure_date,
            departure_time: r.departure_time,
            arrival_time: r.arrival_time,
            duration_minutes: unsigned("duration_minutes", r.duration_minutes)?,
            stop_count: unsigned("stop_count", r.stop_count)?,
            stopover_airports: r.stopover_airports,
            full_route: r.full_route,
            carrier_code: r.carrier_code,
            flight_number: r.flight_number,
            cabin_class: r.cabin_class,
            seats_available: r.seats_available.and_then(|s| u32::try_from(s).ok()),
            price_total: r.price_total,
            price_base: r.price_base,
            price_tax: r.price_tax,
        })
    }
}

impl PgHistoryStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        PgHistoryStore { pool }
    }

    /// Connect, then create the schema if needed.
    pub async fn connect(db_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        // ---
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to history database: {}", e))?;

        tracing::info!("Successfully connected to history database");

        schema::create_schema(&pool).await?;
        Ok(PgHistoryStore { pool })
    }
}

fn clamp_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn append(&self, observation: &Observation) -> Result<(), StoreError> {
        // ---
        let row = HistoryRow::from(observation);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO flight_observations (
                schema_version, observed_at, origin, destination, departure_date,
                departure_time, arrival_time, duration_minutes, stop_count,
                stopover_airports, full_route, carrier_code, flight_number,
                cabin_class, seats_available, price_total, price_base, price_tax
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(schema::SCHEMA_VERSION)
        .bind(row.observed_at)
        .bind(&row.origin)
        .bind(&row.destination)
        .bind(row.departure_date)
        .bind(&row.departure_time)
        .bind(&row.arrival_time)
        .bind(clamp_i32(row.duration_minutes))
        .bind(clamp_i32(row.stop_count))
        .bind(&row.stopover_airports)
        .bind(&row.full_route)
        .bind(&row.carrier_code)
        .bind(&row.flight_number)
        .bind(&row.cabin_class)
        .bind(row.seats_available.map(clamp_i32))
        .bind(row.price_total)
        .bind(row.price_base)
        .bind(row.price_tax)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, key: &RouteKey) -> Result<Vec<Observation>, StoreError> {
        // ---
        let rows = sqlx::query(
            r#"
            SELECT observed_at, origin, destination, departure_date,
                   departure_time, arrival_time, duration_minutes, stop_count,
                   stopover_airports, full_route, carrier_code, flight_number,
                   cabin_class, seats_available, price_total, price_base, price_tax
            FROM flight_observations
            WHERE origin = $1 AND destination = $2 AND departure_date = $3
            ORDER BY id
            "#,
        )
        .bind(&key.origin)
        .bind(&key.destination)
        .bind(key.departure_date)
        .fetch_all(&self.pool)
        .await?;

        let mut found = Vec::with_capacity(rows.len());
        for row in &rows {
            let decoded = ObservationRecord::from_row(row)
                .map_err(|e| e.to_string())
                .and_then(HistoryRow::try_from)
                .and_then(|r| Observation::try_from(r).map_err(|e| e.to_string()));
            match decoded {
                Ok(obs) => found.push(obs),
                Err(e) => tracing::warn!(%key, "Skipping invalid history row: {}", e),
            }
        }
        Ok(found)
    }
}
