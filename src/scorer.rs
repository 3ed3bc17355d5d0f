//! Desirability scoring.
//!
//! A deterministic, stateless 0-100 score built from four independently
//! clamped sub-scores:
//! - price: `100 - (price_total - baseline_price) / price_per_point`
//! - duration: `100 - (duration_hours - baseline_hours) * hours_penalty`
//! - time of day: 100 inside the civil-hours window, 50 outside
//! - availability: `seats_available * 20`
//!
//! combined as `0.4*price + 0.3*duration + 0.2*time + 0.1*availability`
//! and rounded to one decimal. Anything that cannot be evaluated scores
//! the neutral [`NEUTRAL_SCORE`]; scoring never fails.

use serde::Serialize;

use crate::models::Observation;

// ---

pub const NEUTRAL_SCORE: f64 = 50.0;

const PRICE_WEIGHT: f64 = 0.4;
const DURATION_WEIGHT: f64 = 0.3;
const TIME_OF_DAY_WEIGHT: f64 = 0.2;
const AVAILABILITY_WEIGHT: f64 = 0.1;

const POINTS_PER_SEAT: f64 = 20.0;
const OUTSIDE_CIVIL_HOURS: f64 = 50.0;

/// Calibration constants for the price, duration and time-of-day terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreCalibration {
    /// Price that scores exactly 100 (`P0`).
    pub baseline_price: f64,
    /// Currency units per lost point (`K`).
    pub price_per_point: f64,
    /// Trip length in hours that scores exactly 100 (`D0`).
    pub baseline_hours: f64,
    /// Points lost per extra hour (`S`).
    pub hours_penalty: f64,
    /// First civil departure hour, inclusive.
    pub civil_start_hour: u32,
    /// Last civil departure hour, exclusive. May be below `civil_start_hour`
    /// for a window that wraps midnight.
    pub civil_end_hour: u32,
}

impl Default for ScoreCalibration {
    fn default() -> Self {
        ScoreCalibration {
            baseline_price: 500.0,
            price_per_point: 10.0,
            baseline_hours: 10.0,
            hours_penalty: 5.0,
            civil_start_hour: 8,
            civil_end_hour: 22,
        }
    }
}

/// Composite score and its components, all within `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub composite: f64,
    pub price: f64,
    pub duration: f64,
    pub time_of_day: f64,
    pub availability: f64,
    /// Number of sub-scores that used the neutral default.
    #[serde(skip)]
    pub neutral_fallbacks: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    calibration: ScoreCalibration,
}

impl Scorer {
    // ---
    pub fn new(calibration: ScoreCalibration) -> Self {
        Scorer { calibration }
    }

    pub fn calibration(&self) -> &ScoreCalibration {
        &self.calibration
    }

    pub fn score(&self, observation: &Observation) -> Score {
        // ---
        let mut neutral_fallbacks = 0u8;
        let mut neutral = |sub: Option<f64>| match sub {
            Some(v) if v.is_finite() => v.clamp(0.0, 100.0),
            _ => {
                neutral_fallbacks += 1;
                NEUTRAL_SCORE
            }
        };

        let price = neutral(self.price_term(observation.price_total));
        let duration = neutral(self.duration_term(observation.duration_minutes));
        let time_of_day = neutral(self.time_of_day_term(&observation.departure_time));
        let availability = neutral(
            observation
                .seats_available
                .map(|seats| f64::from(seats) * POINTS_PER_SEAT),
        );

        let composite = PRICE_WEIGHT * price
            + DURATION_WEIGHT * duration
            + TIME_OF_DAY_WEIGHT * time_of_day
            + AVAILABILITY_WEIGHT * availability;
        let composite = ((composite * 10.0).round() / 10.0).clamp(0.0, 100.0);

        if neutral_fallbacks > 0 {
            tracing::debug!(
                flight = %observation.flight_number,
                neutral_fallbacks,
                "Scored with neutral defaults"
            );
        }

        Score {
            composite,
            price,
            duration,
            time_of_day,
            availability,
            neutral_fallbacks,
        }
    }

    fn price_term(&self, price_total: f64) -> Option<f64> {
        let cal = &self.calibration;
        if !(cal.price_per_point > 0.0) || !price_total.is_finite() || !cal.baseline_price.is_finite() {
            return None;
        }
        Some(100.0 - (price_total - cal.baseline_price) / cal.price_per_point)
    }

    /// A zero-minute trip means the duration was unknown.
    fn duration_term(&self, duration_minutes: u32) -> Option<f64> {
        if duration_minutes == 0 {
            return None;
        }
        let cal = &self.calibration;
        if !(cal.hours_penalty > 0.0) || !cal.baseline_hours.is_finite() {
            return None;
        }
        let hours = f64::from(duration_minutes) / 60.0;
        Some(100.0 - (hours - cal.baseline_hours) * cal.hours_penalty)
    }

    fn time_of_day_term(&self, departure_time: &str) -> Option<f64> {
        let hour = departure_hour(departure_time)?;
        let (start, end) = (self.calibration.civil_start_hour, self.calibration.civil_end_hour);
        let civil = if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        };
        Some(if civil { 100.0 } else { OUTSIDE_CIVIL_HOURS })
    }
}

/// Hour of a `HH:MM[:SS]` time, or `None` if it is not one.
pub fn departure_hour(time: &str) -> Option<u32> {
    // ---
    let (hour, rest) = time.trim().split_once(':')?;
    let minute = rest.split(':').next()?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    (hour < 24 && minute < 60).then_some(hour)
}
