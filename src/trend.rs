//! Trend classification of a new price against the history of its key.

use serde::{Deserialize, Serialize};

use crate::models::Observation;
use crate::store::{HistoryStore, StoreError};

// ---

/// Default dead band around the prior mean, in currency units.
pub const DEFAULT_TREND_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendState {
    /// No prior observations for the key.
    New,
    Drop,
    Rise,
    Stable,
}

impl std::fmt::Display for TrendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TrendState::New => "NEW",
            TrendState::Drop => "DROP",
            TrendState::Rise => "RISE",
            TrendState::Stable => "STABLE",
        };
        f.write_str(label)
    }
}

/// Result of classifying one price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub state: TrendState,
    /// Mean of prior prices, `None` when there were none.
    pub mean_prior: Option<f64>,
    /// `price - mean_prior`, 0 for [`TrendState::New`].
    pub delta: f64,
    pub prior_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct TrendClassifier {
    threshold: f64,
}

impl Default for TrendClassifier {
    fn default() -> Self {
        TrendClassifier::new(DEFAULT_TREND_THRESHOLD)
    }
}

impl TrendClassifier {
    // ---
    /// Negative or non-finite thresholds are treated as 0.
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_finite() { threshold.max(0.0) } else { 0.0 };
        TrendClassifier { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify `price` against the prices of `prior` observations.
    pub fn classify(&self, price: f64, prior: &[Observation]) -> Trend {
        // ---
        let prices: Vec<f64> = prior.iter().map(|o| o.price_total).collect();
        self.classify_prices(price, &prices)
    }

    pub fn classify_prices(&self, price: f64, prior_prices: &[f64]) -> Trend {
        // ---
        let Some(mean_prior) = order_independent_mean(prior_prices) else {
            return Trend {
                state: TrendState::New,
                mean_prior: None,
                delta: 0.0,
                prior_count: 0,
            };
        };

        let delta = price - mean_prior;
        let state = if delta < -self.threshold {
            TrendState::Drop
        } else if delta > self.threshold {
            TrendState::Rise
        } else {
            TrendState::Stable
        };

        Trend {
            state,
            mean_prior: Some(mean_prior),
            delta,
            prior_count: prior_prices.len(),
        }
    }

    /// Query the prior observations for `observation`'s key and classify it.
    ///
    /// Must be called before `observation` is appended so that it never
    /// counts as its own history.
    pub async fn classify_from_store(
        &self,
        store: &dyn HistoryStore,
        observation: &Observation,
    ) -> Result<Trend, StoreError> {
        // ---
        let prior = store.query(&observation.key()).await?;
        Ok(self.classify(observation.price_total, &prior))
    }
}

/// Mean over prices sorted before summation, so the result does not
/// depend on the order the store returned them in.
fn order_independent_mean(prices: &[f64]) -> Option<f64> {
    // ---
    if prices.is_empty() {
        return None;
    }
    let mut sorted = prices.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(sorted.iter().sum::<f64>() / sorted.len() as f64)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_no_history_is_new() {
        // ---
        let trend = TrendClassifier::default().classify_prices(850.0, &[]);
        assert_eq!(trend.state, TrendState::New);
        assert_eq!(trend.delta, 0.0);
        assert_eq!(trend.mean_prior, None);
    }

    #[test]
    fn test_drop_rise_stable() {
        // ---
        let classifier = TrendClassifier::default();
        let prior = [900.0, 910.0, 905.0];

        let drop = classifier.classify_prices(850.0, &prior);
        assert_eq!(drop.state, TrendState::Drop);
        assert_eq!(drop.mean_prior, Some(905.0));
        assert_eq!(drop.delta, -55.0);

        assert_eq!(classifier.classify_prices(990.0, &prior).state, TrendState::Rise);
        assert_eq!(classifier.classify_prices(903.0, &prior).state, TrendState::Stable);
    }

    #[test]
    fn test_threshold_boundaries_are_stable() {
        // ---
        let classifier = TrendClassifier::new(5.0);
        let prior = [100.0];
        assert_eq!(classifier.classify_prices(95.0, &prior).state, TrendState::Stable);
        assert_eq!(classifier.classify_prices(105.0, &prior).state, TrendState::Stable);
        assert_eq!(classifier.classify_prices(94.99, &prior).state, TrendState::Drop);
        assert_eq!(classifier.classify_prices(105.01, &prior).state, TrendState::Rise);
    }

    #[test]
    fn test_order_independent() {
        // ---
        let classifier = TrendClassifier::default();
        let a = [0.1, 1e9, 0.2, 0.3, 777.77];
        let b = [777.77, 0.3, 1e9, 0.1, 0.2];
        let ta = classifier.classify_prices(1000.0, &a);
        let tb = classifier.classify_prices(1000.0, &b);
        assert_eq!(ta.mean_prior.unwrap().to_bits(), tb.mean_prior.unwrap().to_bits());
        assert_eq!(ta.state, tb.state);
    }

    #[test]
    fn test_negative_threshold_clamped() {
        // ---
        assert_eq!(TrendClassifier::new(-3.0).threshold(), 0.0);
        assert_eq!(TrendClassifier::new(f64::NAN).threshold(), 0.0);
    }
}
