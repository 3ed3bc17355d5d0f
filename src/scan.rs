//! Scan pipeline: search → normalize → classify → score → persist → alert.
//!
//! Targets are processed one at a time. A failure on one target (provider
//! error, no acceptable offer, store error) is logged and the scan moves
//! on; the only state shared between targets is the history store and the
//! alert engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::alerts::{AlertBatch, AlertEngine, AlertEntry};
use crate::models::Observation;
use crate::normalizer::{self, Fallback, Normalized};
use crate::notify::Notifier;
use crate::provider::{OfferSource, ScanTarget};
use crate::scorer::Scorer;
use crate::store::HistoryStore;
use crate::trend::TrendClassifier;

// ---

/// Which offers are worth recording at all.
#[derive(Debug, Clone, Copy)]
pub struct OfferFilter {
    pub max_duration_hours: f64,
    pub max_price: f64,
}

impl Default for OfferFilter {
    fn default() -> Self {
        OfferFilter {
            max_duration_hours: 20.0,
            max_price: 1100.0,
        }
    }
}

impl OfferFilter {
    pub fn accepts(&self, observation: &Observation) -> bool {
        observation.duration_hours() <= self.max_duration_hours && observation.price_total <= self.max_price
    }
}

/// Every `(origin, departure)` pair for `days` consecutive days starting at
/// `start`, each with a return `stay_days` later.
pub fn plan_targets(
    origins: &[String],
    destination: &str,
    start: NaiveDate,
    days: u32,
    stay_days: u32,
) -> Vec<ScanTarget> {
    // ---
    let mut targets = Vec::new();
    for origin in origins {
        for i in 0..days {
            let Some(departure_date) = start.checked_add_days(Days::new(u64::from(i))) else {
                continue;
            };
            let Some(return_date) = departure_date.checked_add_days(Days::new(u64::from(stay_days))) else {
                continue;
            };
            targets.push(ScanTarget {
                origin: origin.clone(),
                destination: destination.to_string(),
                departure_date,
                return_date,
            });
        }
    }
    targets
}

/// Link to a search results page: `{base}/{origin}/{dest}/{yymmdd}/{yymmdd}/`.
pub fn deep_link(base: &str, target: &ScanTarget) -> String {
    format!(
        "{}/{}/{}/{}/{}/",
        base.trim_end_matches('/'),
        target.origin.to_lowercase(),
        target.destination.to_lowercase(),
        target.departure_date.format("%y%m%d"),
        target.return_date.format("%y%m%d"),
    )
}

/// What one scan did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub scan_id: Uuid,
    pub targets: usize,
    pub observations: usize,
    /// Targets whose search or persistence failed.
    pub failed_targets: usize,
    /// Targets where no offer passed the filter.
    pub empty_targets: usize,
    pub malformed_offers: usize,
    pub fallbacks: HashMap<String, usize>,
    pub score_fallbacks: usize,
    pub alerts: usize,
    pub notified: bool,
}

pub struct Scanner {
    source: Arc<dyn OfferSource>,
    store: Arc<dyn HistoryStore>,
    notifier: Option<Arc<dyn Notifier>>,
    classifier: TrendClassifier,
    scorer: Scorer,
    engine: AlertEngine,
    filter: OfferFilter,
    link_base: Option<String>,
    state_path: Option<PathBuf>,
}

impl Scanner {
    // ---
    pub fn new(
        source: Arc<dyn OfferSource>,
        store: Arc<dyn HistoryStore>,
        classifier: TrendClassifier,
        scorer: Scorer,
        engine: AlertEngine,
    ) -> Self {
        Scanner {
            source,
            store,
            notifier: None,
            classifier,
            scorer,
            engine,
            filter: OfferFilter::default(),
            link_base: None,
            state_path: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_filter(mut self, filter: OfferFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_link_base(mut self, base: impl Into<String>) -> Self {
        self.link_base = Some(base.into());
        self
    }

    /// Persist alert rule state to `path` after every scan.
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    /// Load persisted alert state, if a state path is configured.
    pub async fn restore_state(&mut self) {
        if let Some(path) = &self.state_path {
            self.engine.load_state(path).await;
        }
    }

    /// Scan every target, then send at most one notification.
    pub async fn run(&mut self, targets: &[ScanTarget]) -> ScanSummary {
        let scan_id = Uuid::new_v4();
        self.run_scan(scan_id, targets)
            .instrument(tracing::info_span!("scan", %scan_id))
            .await
    }

    async fn run_scan(&mut self, scan_id: Uuid, targets: &[ScanTarget]) -> ScanSummary {
        // ---
        tracing::info!(targets = targets.len(), "Scan started");

        let mut summary = ScanSummary {
            scan_id,
            targets: targets.len(),
            ..ScanSummary::default()
        };
        let mut batch = AlertBatch::new(scan_id);

        for target in targets {
            if let Some(entry) = self.scan_target(target, &mut summary).await {
                if batch.push(entry) {
                    summary.alerts += 1;
                }
            }
        }

        if batch.is_empty() {
            tracing::info!("No alerts this scan");
        } else if let Some(notifier) = &self.notifier {
            match notifier.send(&batch).await {
                Ok(()) => summary.notified = true,
                Err(e) => tracing::warn!("Notification failed, continuing: {}", e),
            }
        } else {
            tracing::info!(alerts = batch.len(), "Notifications disabled; alerts not sent");
        }

        if let Some(path) = &self.state_path {
            if let Err(e) = self.engine.save_state(path).await {
                tracing::warn!(path = %path.display(), "Failed to save alert state: {}", e);
            }
        }

        tracing::info!(
            observations = summary.observations,
            failed = summary.failed_targets,
            alerts = summary.alerts,
            "Scan finished"
        );
        summary
    }

    /// Process one target. Returns an alert entry candidate, which may have
    /// no fired rules.
    async fn scan_target(&mut self, target: &ScanTarget, summary: &mut ScanSummary) -> Option<AlertEntry> {
        // ---
        let offers = match self.source.search(target).await {
            Ok(offers) => offers,
            Err(e) => {
                summary.failed_targets += 1;
                tracing::warn!(%target, "Search failed, skipping target: {}", e);
                return None;
            }
        };

        let observed_at = Utc::now();
        let mut chosen: Option<Normalized> = None;
        for (i, offer) in offers.iter().enumerate() {
            match normalizer::normalize_value(offer, observed_at) {
                Ok(normalized) if self.filter.accepts(&normalized.observation) => {
                    chosen = Some(normalized);
                    break;
                }
                Ok(normalized) => {
                    tracing::debug!(
                        %target,
                        offer = i,
                        price = normalized.observation.price_total,
                        hours = normalized.observation.duration_hours(),
                        "Offer outside filter"
                    );
                }
                Err(e) => {
                    summary.malformed_offers += 1;
                    tracing::warn!(%target, offer = i, "Skipping offer: {}", e);
                }
            }
        }

        let Some(Normalized { observation, fallbacks }) = chosen else {
            summary.empty_targets += 1;
            tracing::info!(%target, offers = offers.len(), "No acceptable offer");
            return None;
        };
        record_fallbacks(&observation, &fallbacks, summary);

        let trend = match self.classifier.classify_from_store(self.store.as_ref(), &observation).await {
            Ok(trend) => trend,
            Err(e) => {
                summary.failed_targets += 1;
                tracing::warn!(%target, "History query failed, skipping target: {}", e);
                return None;
            }
        };
        let score = self.scorer.score(&observation);
        if score.neutral_fallbacks > 0 {
            summary.score_fallbacks += usize::from(score.neutral_fallbacks);
        }

        // Only recorded observations reach the alert rules
        if let Err(e) = self.store.append(&observation).await {
            summary.failed_targets += 1;
            tracing::error!(%target, "Failed to store observation, skipping target: {}", e);
            return None;
        }
        summary.observations += 1;

        tracing::info!(
            key = %observation.key(),
            price = observation.price_total,
            carrier = %observation.carrier_code,
            minutes = observation.duration_minutes,
            trend = %trend.state,
            score = score.composite,
            "Observed"
        );

        let fired = self.engine.evaluate(&observation, &trend, &score);
        Some(AlertEntry {
            deep_link: self.link_base.as_deref().map(|base| deep_link(base, target)),
            observation,
            trend,
            score,
            fired,
        })
    }
}

fn record_fallbacks(observation: &Observation, fallbacks: &[Fallback], summary: &mut ScanSummary) {
    // ---
    for fallback in fallbacks {
        tracing::warn!(key = %observation.key(), %fallback, "Offer field missing, using default");
        *summary.fallbacks.entry(fallback.to_string()).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_plan_targets() {
        // ---
        let origins = vec!["MAD".to_string(), "BCN".to_string()];
        let start = NaiveDate::from_ymd_opt(2026, 7, 8).unwrap();
        let targets = plan_targets(&origins, "DPS", start, 5, 10);

        assert_eq!(targets.len(), 10);
        assert_eq!(targets[0].departure_date, start);
        assert_eq!(targets[0].return_date, NaiveDate::from_ymd_opt(2026, 7, 18).unwrap());
        assert_eq!(targets[4].departure_date, NaiveDate::from_ymd_opt(2026, 7, 12).unwrap());
        assert_eq!(targets[5].origin, "BCN");
    }

    #[test]
    fn test_deep_link() {
        // ---
        let target = ScanTarget {
            origin: "MAD".into(),
            destination: "DPS".into(),
            departure_date: NaiveDate::from_ymd_opt(2026, 7, 8).unwrap(),
            return_date: NaiveDate::from_ymd_opt(2026, 7, 18).unwrap(),
        };
        assert_eq!(
            deep_link("https://www.skyscanner.net/transport/flights/", &target),
            "https://www.skyscanner.net/transport/flights/mad/dps/260708/260718/"
        );
    }
}
