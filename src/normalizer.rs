//! Record normalizer: raw provider offer -> canonical [`Observation`].
//!
//! The transformation is pure. Missing itinerary or price data is a typed
//! failure ([`NormalizeError`]); missing cabin, seat, carrier or duration
//! data is not fatal and is reported as a [`Fallback`] so callers can log
//! and count it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::models::{round_cents, Observation, RawOffer, RawSegment};

// ---

/// Why an offer could not be turned into an observation.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    /// Payload did not match the offer shape at all.
    #[error("Malformed offer: payload does not deserialize: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Malformed offer: no itinerary segments")]
    MissingItinerary,

    #[error("Malformed offer: no price")]
    MissingPrice,

    #[error("Malformed offer: invalid price (total={total:?}, base={base:?})")]
    InvalidPrice { total: Option<f64>, base: Option<f64> },

    #[error("Malformed offer: invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// A lenient default applied while normalizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fallback {
    /// Duration token missing or without an hour/minute marker; 0 minutes.
    Duration,
    /// Bookable seat count missing or not a number.
    Seats,
    /// Cabin class missing.
    Cabin,
    /// No validating airline; first segment carrier used.
    Carrier,
}

impl std::fmt::Display for Fallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Fallback::Duration => "duration",
            Fallback::Seats => "seats",
            Fallback::Cabin => "cabin",
            Fallback::Carrier => "carrier",
        };
        f.write_str(name)
    }
}

/// Normalizer output: the observation plus the fallbacks used to build it.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub observation: Observation,
    pub fallbacks: Vec<Fallback>,
}

/// Normalize an offer still in JSON form.
pub fn normalize_value(
    value: &serde_json::Value,
    observed_at: DateTime<Utc>,
) -> Result<Normalized, NormalizeError> {
    // ---
    let offer: RawOffer = serde_json::from_value(value.clone())?;
    normalize(&offer, observed_at)
}

/// Convert a raw offer into an [`Observation`]. Only the first itinerary
/// (the outbound leg) is considered.
pub fn normalize(offer: &RawOffer, observed_at: DateTime<Utc>) -> Result<Normalized, NormalizeError> {
    // ---
    let itinerary = offer
        .itineraries
        .first()
        .filter(|it| !it.segments.is_empty())
        .ok_or(NormalizeError::MissingItinerary)?;
    let segments = &itinerary.segments;
    let first = &segments[0];
    let last = &segments[segments.len() - 1];

    let price = offer.price.as_ref().ok_or(NormalizeError::MissingPrice)?;
    let (total, base) = (price.total.as_f64(), price.base.as_f64());
    let (price_total, price_base) = match (total, base) {
        (Some(t), Some(b)) if t >= 0.0 && b >= 0.0 && b <= t => (t, b),
        _ => return Err(NormalizeError::InvalidPrice { total, base }),
    };

    let (departure_date, departure_time) = split_timestamp(&first.departure.at)?;
    let (_, arrival_time) = split_timestamp(&last.arrival.at)?;

    let mut fallbacks = Vec::new();

    let duration_minutes = match itinerary.duration.as_deref().and_then(parse_duration_minutes) {
        Some(minutes) => minutes,
        None => {
            fallbacks.push(Fallback::Duration);
            0
        }
    };

    let route = extract_route(segments);
    let stop_count = (route.len() - 2) as u32;

    let carrier_code = match offer.validating_airline_codes.first() {
        Some(code) => code.clone(),
        None => {
            fallbacks.push(Fallback::Carrier);
            first.carrier_code.clone()
        }
    };

    let cabin_class = offer
        .traveler_pricings
        .first()
        .and_then(|tp| tp.fare_details_by_segment.first())
        .and_then(|fd| fd.cabin.clone())
        .filter(|c| !c.trim().is_empty());
    if cabin_class.is_none() {
        fallbacks.push(Fallback::Cabin);
    }

    let seats_available = offer.number_of_bookable_seats.as_ref().and_then(seat_count);
    if seats_available.is_none() {
        fallbacks.push(Fallback::Seats);
    }

    let observation = Observation {
        observed_at,
        origin: route[0].clone(),
        destination: route[route.len() - 1].clone(),
        departure_date,
        departure_time,
        arrival_time,
        duration_minutes,
        stop_count,
        route,
        carrier_code,
        flight_number: format!("{}{}", first.carrier_code, first.number),
        cabin_class,
        seats_available,
        price_total,
        price_base,
        price_tax: round_cents(price_total - price_base),
    };

    Ok(Normalized {
        observation,
        fallbacks,
    })
}

/// Parse an `<n>H<m>M` duration token (e.g. `PT21H35M`) into minutes.
///
/// Either component may be absent. Returns `None` when the token carries
/// neither an hour nor a minute marker, or when the total overflows.
pub fn parse_duration_minutes(token: &str) -> Option<u32> {
    // ---
    let mut hours: Option<u32> = None;
    let mut minutes: Option<u32> = None;
    let mut digits = String::new();

    for ch in token.trim().chars() {
        match ch.to_ascii_uppercase() {
            d if d.is_ascii_digit() => digits.push(d),
            'H' if !digits.is_empty() => {
                hours = digits.parse().ok();
                digits.clear();
            }
            'M' if !digits.is_empty() => {
                minutes = digits.parse().ok();
                digits.clear();
            }
            _ => digits.clear(),
        }
    }

    if hours.is_none() && minutes.is_none() {
        return None;
    }
    hours
        .unwrap_or(0)
        .checked_mul(60)?
        .checked_add(minutes.unwrap_or(0))
}

/// Departure airport of every segment in flight order, then the final
/// arrival airport.
pub fn extract_route(segments: &[RawSegment]) -> Vec<String> {
    // ---
    let mut route: Vec<String> = segments
        .iter()
        .map(|s| s.departure.iata_code.clone())
        .collect();
    if let Some(last) = segments.last() {
        route.push(last.arrival.iata_code.clone());
    }
    route
}

/// Split `2026-07-08T10:00:00` into its date and time-of-day text.
fn split_timestamp(at: &str) -> Result<(NaiveDate, String), NormalizeError> {
    // ---
    let parsed = NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(at, "%Y-%m-%dT%H:%M"))
        .map_err(|_| NormalizeError::InvalidTimestamp(at.to_string()))?;
    let time = at
        .split_once('T')
        .map(|(_, t)| t.to_string())
        .unwrap_or_else(|| parsed.time().format("%H:%M:%S").to_string());
    Ok((parsed.date(), time))
}

fn seat_count(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
