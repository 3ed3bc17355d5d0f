//! Data models for the flight price pipeline.
//!
//! `RawOffer` and its nested types mirror the flight-search provider's
//! payload; `Observation` is the normalized record that flows through
//! trend classification, scoring, alerting and the history store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Raw flight offer from the search provider.
///
/// Every collection defaults to empty so that a structurally incomplete
/// payload still deserializes; the normalizer decides what is fatal.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOffer {
    // ---
    #[serde(default)]
    pub itineraries: Vec<RawItinerary>,
    pub price: Option<RawPrice>,
    #[serde(default)]
    pub validating_airline_codes: Vec<String>,
    #[serde(default)]
    pub traveler_pricings: Vec<RawTravelerPricing>,
    pub number_of_bookable_seats: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItinerary {
    /// ISO-8601 style duration such as `PT21H35M`.
    pub duration: Option<String>,
    #[serde(default)]
    pub segments: Vec<RawSegment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSegment {
    pub departure: RawEndpoint,
    pub arrival: RawEndpoint,
    pub carrier_code: String,
    pub number: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEndpoint {
    pub iata_code: String,
    /// Local timestamp, e.g. `2026-07-08T10:00:00`.
    pub at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPrice {
    pub total: RawAmount,
    pub base: RawAmount,
    pub currency: Option<String>,
}

/// Monetary amount; the provider sends decimal strings, fixtures often
/// use plain numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    // ---
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawAmount::Number(n) => Some(*n),
            RawAmount::Text(s) => s.trim().parse::<f64>().ok(),
        }
        .filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTravelerPricing {
    #[serde(default)]
    pub fare_details_by_segment: Vec<RawFareDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFareDetail {
    pub cabin: Option<String>,
}

/// Groups observations of the same trip across time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
}

impl RouteKey {
    // ---
    pub fn new(origin: impl Into<String>, destination: impl Into<String>, departure_date: NaiveDate) -> Self {
        RouteKey {
            origin: origin.into(),
            destination: destination.into(),
            departure_date,
        }
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{} {}", self.origin, self.destination, self.departure_date)
    }
}

/// One normalized flight offer as seen at one point in time.
///
/// Invariants: `route` starts with `origin`, ends with `destination` and
/// `stop_count == route.len() - 2`; `price_tax == price_total - price_base`
/// up to cent rounding. Observations are never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    // ---
    pub observed_at: DateTime<Utc>,
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub departure_time: String,
    pub arrival_time: String,
    pub duration_minutes: u32,
    pub stop_count: u32,
    pub route: Vec<String>,
    pub carrier_code: String,
    pub flight_number: String,
    pub cabin_class: Option<String>,
    pub seats_available: Option<u32>,
    pub price_total: f64,
    pub price_base: f64,
    pub price_tax: f64,
}

impl Observation {
    // ---
    pub fn key(&self) -> RouteKey {
        RouteKey::new(&self.origin, &self.destination, self.departure_date)
    }

    pub fn matches(&self, key: &RouteKey) -> bool {
        self.origin == key.origin
            && self.destination == key.destination
            && self.departure_date == key.departure_date
    }

    pub fn duration_hours(&self) -> f64 {
        f64::from(self.duration_minutes) / 60.0
    }

    /// Interior airports of the route (empty for a direct flight).
    pub fn stopovers(&self) -> &[String] {
        if self.route.len() > 2 {
            &self.route[1..self.route.len() - 1]
        } else {
            &[]
        }
    }
}

/// Round a currency amount to cents.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn sample(route: &[&str]) -> Observation {
        // ---
        Observation {
            observed_at: Utc::now(),
            origin: route[0].to_string(),
            destination: route[route.len() - 1].to_string(),
            departure_date: NaiveDate::from_ymd_opt(2026, 7, 8).unwrap(),
            departure_time: "10:00:00".to_string(),
            arrival_time: "08:35:00".to_string(),
            duration_minutes: 1295,
            stop_count: (route.len() - 2) as u32,
            route: route.iter().map(|s| s.to_string()).collect(),
            carrier_code: "QR".to_string(),
            flight_number: "QR148".to_string(),
            cabin_class: Some("ECONOMY".to_string()),
            seats_available: Some(4),
            price_total: 900.0,
            price_base: 600.0,
            price_tax: 300.0,
        }
    }

    #[test]
    fn test_stopovers() {
        // ---
        assert!(sample(&["MAD", "DPS"]).stopovers().is_empty());
        assert_eq!(sample(&["MAD", "DOH", "DPS"]).stopovers(), &["DOH".to_string()]);
    }

    #[test]
    fn test_key_matches() {
        // ---
        let obs = sample(&["MAD", "DOH", "DPS"]);
        let key = RouteKey::new("MAD", "DPS", NaiveDate::from_ymd_opt(2026, 7, 8).unwrap());
        assert!(obs.matches(&key));
        assert_eq!(obs.key(), key);

        let other = RouteKey::new("BCN", "DPS", key.departure_date);
        assert!(!obs.matches(&other));
    }

    #[test]
    fn test_raw_amount_parsing() {
        // ---
        assert_eq!(RawAmount::Text(" 546.70".into()).as_f64(), Some(546.70));
        assert_eq!(RawAmount::Number(12.5).as_f64(), Some(12.5));
        assert_eq!(RawAmount::Text("N/A".into()).as_f64(), None);
    }

    #[test]
    fn test_duration_hours() {
        // ---
        assert!((sample(&["MAD", "DPS"]).duration_hours() - 21.5833).abs() < 0.001);
    }
}
