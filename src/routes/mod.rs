//! HTTP gateway for the read-only history API.
//!
//! Each sibling module exports a subrouter; this module merges them and
//! attaches the shared [`AppState`] so `main.rs` only sees one router.

use std::sync::Arc;

use axum::Router;

use crate::scorer::Scorer;
use crate::store::HistoryStore;

mod health;
mod observations;

// ---

/// State shared by all routes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HistoryStore>,
    pub scorer: Scorer,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(observations::router())
        .merge(health::router())
        .with_state(state)
}
