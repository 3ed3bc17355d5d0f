//! Database schema management for the PostgreSQL history backend.
//!
//! Ensures the observation table and its lookup index exist. Applied once
//! when the store connects.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Layout version written with every row, so a future column change can be
/// migrated explicitly instead of being inferred from position.
pub const SCHEMA_VERSION: i16 = 1;

/// Create the schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Append-only: `id` gives the append order used by queries
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flight_observations (
            id                BIGSERIAL PRIMARY KEY,
            schema_version    SMALLINT         NOT NULL,
            observed_at       TIMESTAMPTZ      NOT NULL,
            origin            TEXT             NOT NULL,
            destination       TEXT             NOT NULL,
            departure_date    DATE             NOT NULL,
            departure_time    TEXT             NOT NULL,
            arrival_time      TEXT             NOT NULL,
            duration_minutes  INTEGER          NOT NULL,
            stop_count        INTEGER          NOT NULL,
            stopover_airports TEXT             NOT NULL,
            full_route        TEXT             NOT NULL,
            carrier_code      TEXT             NOT NULL,
            flight_number     TEXT             NOT NULL,
            cabin_class       TEXT,
            seats_available   INTEGER,
            price_total       DOUBLE PRECISION NOT NULL,
            price_base        DOUBLE PRECISION NOT NULL,
            price_tax         DOUBLE PRECISION NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_flight_observations_key
            ON flight_observations (origin, destination, departure_date, id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::debug!(schema_version = SCHEMA_VERSION, "History schema ready");
    Ok(())
}
