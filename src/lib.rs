//! Flight price history tracking and alerting.
//!
//! A scan searches each configured route/date, normalizes the chosen offer
//! into an [`Observation`], classifies its price against the stored history
//! for the same trip, scores it, appends it to the history store and runs
//! the alert rules. Alerts from one scan go out as a single notification.
//!
//! Module layout:
//! - `models`, `normalizer`: provider payload → observation
//! - `store`, `schema`: append-only history (CSV file or PostgreSQL)
//! - `trend`, `scorer`, `alerts`: the decision logic
//! - `provider`, `notify`: external collaborators
//! - `scan`: the pipeline tying them together
//! - `routes`: read-only HTTP API over the history
//! - `config`: environment configuration

pub mod alerts;
pub mod config;
pub mod models;
pub mod normalizer;
pub mod notify;
pub mod provider;
pub mod routes;
pub mod scan;
pub mod schema;
pub mod scorer;
pub mod store;
pub mod trend;

pub use config::Config;
pub use models::{Observation, RawOffer, RouteKey};
