//! Flat, column-per-field form of an [`Observation`], shared by the CSV
//! and PostgreSQL backends.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{round_cents, Observation};

// ---

const ROUTE_SEPARATOR: char = ',';
const TAX_TOLERANCE: f64 = 0.01;

/// One stored history row. Field order is the on-disk column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    #[serde(deserialize_with = "de_observed_at")]
    pub observed_at: DateTime<Utc>,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub departure_time: String,
    pub arrival_time: String,
    pub duration_minutes: u32,
    pub stop_count: u32,
    pub stopover_airports: String,
    pub full_route: String,
    pub carrier_code: String,
    pub flight_number: String,
    #[serde(default)]
    pub cabin_class: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub seats_available: Option<u32>,
    pub price_total: f64,
    pub price_base: f64,
    pub price_tax: f64,
}

/// A stored row that decodes but violates observation invariants.
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("missing origin or destination")]
    MissingEndpoint,

    #[error("invalid prices total={total} base={base}")]
    InvalidPrice { total: f64, base: f64 },
}

impl From<&Observation> for HistoryRow {
    fn from(o: &Observation) -> Self {
        // ---
        HistoryRow {
            observed_at: o.observed_at,
            origin: o.origin.clone(),
            destination: o.destination.clone(),
            departure_date: o.departure_date,
            departure_time: o.departure_time.clone(),
            arrival_time: o.arrival_time.clone(),
            duration_minutes: o.duration_minutes,
            stop_count: o.stop_count,
            stopover_airports: o.stopovers().join(","),
            full_route: o.route.join(","),
            carrier_code: o.carrier_code.clone(),
            flight_number: o.flight_number.clone(),
            cabin_class: o.cabin_class.clone(),
            seats_available: o.seats_available,
            price_total: o.price_total,
            price_base: o.price_base,
            price_tax: o.price_tax,
        }
    }
}

impl TryFrom<HistoryRow> for Observation {
    type Error = RowError;

    /// Historical rows are repaired where the redundant columns disagree:
    /// the route is rebuilt from origin, stopovers and destination, and
    /// `stop_count`/`price_tax` are recomputed from it.
    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        // ---
        if row.origin.is_empty() || row.destination.is_empty() {
            return Err(RowError::MissingEndpoint);
        }
        let valid_price = |v: f64| v.is_finite() && v >= 0.0;
        if !valid_price(row.price_total) || !valid_price(row.price_base) || row.price_base > row.price_total {
            return Err(RowError::InvalidPrice {
                total: row.price_total,
                base: row.price_base,
            });
        }

        let mut route = split_airports(&row.full_route);
        let consistent = route.len() >= 2
            && route.first() == Some(&row.origin)
            && route.last() == Some(&row.destination);
        if !consistent {
            let mut rebuilt = vec![row.origin.clone()];
            rebuilt.extend(split_airports(&row.stopover_airports));
            rebuilt.push(row.destination.clone());
            tracing::warn!(
                origin = %row.origin,
                destination = %row.destination,
                stored = %row.full_route,
                repaired = %rebuilt.join(","),
                "Repaired inconsistent stored route"
            );
            route = rebuilt;
        }

        let stop_count = (route.len() - 2) as u32;
        if stop_count != row.stop_count {
            tracing::debug!(stored = row.stop_count, stop_count, "Recomputed stop count");
        }

        let expected_tax = round_cents(row.price_total - row.price_base);
        let price_tax = if (row.price_tax - expected_tax).abs() > TAX_TOLERANCE {
            tracing::debug!(stored = row.price_tax, expected_tax, "Recomputed tax");
            expected_tax
        } else {
            row.price_tax
        };

        Ok(Observation {
            observed_at: row.observed_at,
            origin: row.origin,
            destination: row.destination,
            departure_date: row.departure_date,
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            duration_minutes: row.duration_minutes,
            stop_count,
            route,
            carrier_code: row.carrier_code,
            flight_number: row.flight_number,
            cabin_class: row.cabin_class.filter(|c| !c.is_empty()),
            seats_available: row.seats_available,
            price_total: row.price_total,
            price_base: row.price_base,
            price_tax,
        })
    }
}

fn split_airports(text: &str) -> Vec<String> {
    text.split(ROUTE_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Accepts RFC 3339 and the older `YYYY-MM-DD HH:MM:SS` (taken as UTC).
fn de_observed_at<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    let text = String::deserialize(deserializer)?;
    parse_observed_at(&text).ok_or_else(|| serde::de::Error::custom(format!("invalid observed_at '{text}'")))
}

pub(crate) fn parse_observed_at(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn row() -> HistoryRow {
        // ---
        HistoryRow {
            observed_at: parse_observed_at("2026-01-10 07:00:00").unwrap(),
            origin: "MAD".into(),
            destination: "DPS".into(),
            departure_date: NaiveDate::from_ymd_opt(2026, 7, 8).unwrap(),
            departure_time: "10:00:00".into(),
            arrival_time: "14:35:00".into(),
            duration_minutes: 1295,
            stop_count: 1,
            stopover_airports: "DOH".into(),
            full_route: "MAD,DOH,DPS".into(),
            carrier_code: "QR".into(),
            flight_number: "QR148".into(),
            cabin_class: Some("ECONOMY".into()),
            seats_available: Some(9),
            price_total: 905.0,
            price_base: 640.0,
            price_tax: 265.0,
        }
    }

    #[test]
    fn test_row_to_observation() {
        // ---
        let obs = Observation::try_from(row()).unwrap();
        assert_eq!(obs.route, vec!["MAD", "DOH", "DPS"]);
        assert_eq!(obs.stop_count, 1);
        assert_eq!(HistoryRow::from(&obs), row());
    }

    #[test]
    fn test_broken_route_is_rebuilt() {
        // ---
        let mut broken = row();
        broken.full_route = "DOH".into();
        broken.stop_count = 7;
        let obs = Observation::try_from(broken).unwrap();
        assert_eq!(obs.route, vec!["MAD", "DOH", "DPS"]);
        assert_eq!(obs.stop_count, 1);

        let mut direct = row();
        direct.full_route = String::new();
        direct.stopover_airports = String::new();
        let obs = Observation::try_from(direct).unwrap();
        assert_eq!(obs.route, vec!["MAD", "DPS"]);
        assert_eq!(obs.stop_count, 0);
    }

    #[test]
    fn test_inconsistent_tax_is_recomputed() {
        // ---
        let mut r = row();
        r.price_tax = 1.0;
        assert_eq!(Observation::try_from(r).unwrap().price_tax, 265.0);
    }

    #[test]
    fn test_invalid_prices_rejected() {
        // ---
        let mut r = row();
        r.price_base = 1000.0;
        assert!(matches!(Observation::try_from(r), Err(RowError::InvalidPrice { .. })));
    }

    #[test]
    fn test_parse_observed_at_formats() {
        // ---
        assert!(parse_observed_at("2026-10-19T09:00:00Z").is_some());
        assert!(parse_observed_at("2026-10-19T09:00:00.123+02:00").is_some());
        assert!(parse_observed_at("2026-10-19 09:00:00").is_some());
        assert!(parse_observed_at("yesterday").is_none());
    }
}
