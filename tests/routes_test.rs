use std::sync::Arc;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::Value;
use tower::util::ServiceExt;

use flightwatch::routes::{self, AppState};
use flightwatch::scorer::Scorer;
use flightwatch::store::{HistoryStore, MemoryHistoryStore};
use flightwatch::Observation;

// ---

fn observation(price: f64, minute: u32) -> Observation {
    // ---
    Observation {
        observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap(),
        origin: "MAD".into(),
        destination: "DPS".into(),
        departure_date: NaiveDate::from_ymd_opt(2026, 7, 8).unwrap(),
        departure_time: "10:00:00".into(),
        arrival_time: "14:00:00".into(),
        duration_minutes: 14 * 60,
        stop_count: 0,
        route: vec!["MAD".into(), "DPS".into()],
        carrier_code: "EK".into(),
        flight_number: "EK142".into(),
        cabin_class: Some("ECONOMY".into()),
        seats_available: Some(6),
        price_total: price,
        price_base: price - 100.0,
        price_tax: 100.0,
    }
}

async fn app_with(rows: &[Observation]) -> Result<axum::Router> {
    let store = Arc::new(MemoryHistoryStore::new());
    for row in rows {
        store.append(row).await?;
    }
    Ok(routes::router(AppState {
        store,
        scorer: Scorer::default(),
    }))
}

async fn get_json(app: axum::Router, uri: &str) -> Result<(StatusCode, Value)> {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, body))
}

#[tokio::test]
async fn health_is_ok() -> Result<()> {
    // ---
    let (status, body) = get_json(app_with(&[]).await?, "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn observations_are_scored_and_ordered() -> Result<()> {
    // ---
    let app = app_with(&[observation(700.0, 0), observation(760.0, 1)]).await?;
    let (status, body) = get_json(
        app,
        "/observations?origin=mad&destination=DPS&departure_date=2026-07-08",
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().expect("array body");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["price_total"], 700.0);
    assert_eq!(rows[0]["score"]["composite"], 86.0);
    assert_eq!(rows[1]["price_total"], 760.0);
    Ok(())
}

#[tokio::test]
async fn limit_keeps_most_recent() -> Result<()> {
    // ---
    let app = app_with(&[observation(700.0, 0), observation(760.0, 1), observation(720.0, 2)]).await?;
    let (_, body) = get_json(
        app,
        "/observations?origin=MAD&destination=DPS&departure_date=2026-07-08&limit=1",
    )
    .await?;
    let rows = body.as_array().expect("array body");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["price_total"], 720.0);
    Ok(())
}

#[tokio::test]
async fn missing_key_parameters_are_rejected() -> Result<()> {
    // ---
    let (status, _) = get_json(app_with(&[]).await?, "/observations?origin=MAD").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}
