use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::AppState;
use crate::models::{Observation, RouteKey};
use crate::scorer::Score;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/observations", get(handler))
}

/// Query parameters identifying one trip.
#[derive(Debug, Deserialize)]
pub struct ObservationsQuery {
    origin: String,
    destination: String,
    departure_date: NaiveDate,
    limit: Option<usize>,
}

/// One stored observation with its desirability score.
#[derive(Debug, Serialize)]
struct ScoredObservation {
    #[serde(flatten)]
    observation: Observation,
    score: Score,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

async fn handler(
    Query(params): Query<ObservationsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let key = RouteKey::new(
        params.origin.trim().to_uppercase(),
        params.destination.trim().to_uppercase(),
        params.departure_date,
    );
    info!(%key, "GET /observations");

    let history = match state.store.query(&key).await {
        Ok(history) => history,
        Err(e) => {
            error!(%key, "History query failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "Failed to read history",
                }),
            )
                .into_response();
        }
    };

    // Most recent observations when limited, still in append order
    let skip = params
        .limit
        .map_or(0, |limit| history.len().saturating_sub(limit));
    let scored: Vec<ScoredObservation> = history
        .into_iter()
        .skip(skip)
        .map(|observation| ScoredObservation {
            score: state.scorer.score(&observation),
            observation,
        })
        .collect();

    debug!(%key, rows = scored.len(), "GET /observations - Returning OK");
    (StatusCode::OK, Json(scored)).into_response()
}
