//! Alert decision engine.
//!
//! Every [`AlertRule`] runs a two-state machine per route key:
//! `Armed -> Fired` when its condition becomes true (an alert is emitted),
//! staying `Fired` while the condition holds (no repeat alert), and back to
//! `Armed` as soon as the condition is false. State survives restarts via
//! [`AlertEngine::save_state`] / [`AlertEngine::load_state`].
//!
//! Observations that fire at least one rule within a scan are collected
//! into a single [`AlertBatch`].

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Observation, RouteKey};
use crate::scorer::Score;
use crate::trend::{Trend, TrendState};

// ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    /// `price_total < ceiling`.
    PriceBelow(f64),
    /// `duration_hours <= ceiling`; unknown (zero) durations never match.
    DurationAtMost(f64),
    /// `score >= floor`.
    ScoreAtLeast(f64),
    /// Trend state is one of the listed states.
    TrendIn(Vec<TrendState>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub condition: RuleCondition,
}

impl AlertRule {
    // ---
    pub fn new(name: impl Into<String>, condition: RuleCondition) -> Self {
        AlertRule {
            name: name.into(),
            condition,
        }
    }

    pub fn price_below(ceiling: f64) -> Self {
        Self::new("price_ceiling", RuleCondition::PriceBelow(ceiling))
    }

    pub fn duration_at_most(hours: f64) -> Self {
        Self::new("duration_ceiling", RuleCondition::DurationAtMost(hours))
    }

    pub fn score_at_least(floor: f64) -> Self {
        Self::new("score_floor", RuleCondition::ScoreAtLeast(floor))
    }

    /// New key or price drop against the historical mean.
    pub fn trend_new_or_drop() -> Self {
        Self::new("trend", RuleCondition::TrendIn(vec![TrendState::New, TrendState::Drop]))
    }

    pub fn matches(&self, observation: &Observation, trend: &Trend, score: &Score) -> bool {
        // ---
        match &self.condition {
            RuleCondition::PriceBelow(ceiling) => observation.price_total < *ceiling,
            RuleCondition::DurationAtMost(hours) => {
                observation.duration_minutes > 0 && observation.duration_hours() <= *hours
            }
            RuleCondition::ScoreAtLeast(floor) => score.composite >= *floor,
            RuleCondition::TrendIn(states) => states.contains(&trend.state),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleState {
    #[default]
    Armed,
    Fired,
}

/// Persisted form of one (rule, key) state.
#[derive(Debug, Serialize, Deserialize)]
struct StateEntry {
    rule: String,
    origin: String,
    destination: String,
    departure_date: NaiveDate,
    state: RuleState,
}

type StateKey = (String, RouteKey);

#[derive(Debug, Default)]
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    states: HashMap<StateKey, RuleState>,
}

impl AlertEngine {
    // ---
    pub fn new(rules: Vec<AlertRule>) -> Self {
        AlertEngine {
            rules,
            states: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn state(&self, rule: &str, key: &RouteKey) -> RuleState {
        self.states
            .get(&(rule.to_string(), key.clone()))
            .copied()
            .unwrap_or_default()
    }

    /// Run every rule against one observation and return the names of the
    /// rules that fired (transitioned `Armed -> Fired`) on it.
    pub fn evaluate(&mut self, observation: &Observation, trend: &Trend, score: &Score) -> Vec<String> {
        // ---
        let key = observation.key();
        let mut fired = Vec::new();

        for rule in &self.rules {
            let holds = rule.matches(observation, trend, score);
            let state = self.states.entry((rule.name.clone(), key.clone())).or_default();

            match (holds, *state) {
                (true, RuleState::Armed) => {
                    *state = RuleState::Fired;
                    fired.push(rule.name.clone());
                    tracing::info!(rule = %rule.name, %key, price = observation.price_total, "Alert rule fired");
                }
                (true, RuleState::Fired) => {
                    tracing::debug!(rule = %rule.name, %key, "Alert suppressed (already fired)");
                }
                (false, previous) => {
                    if previous == RuleState::Fired {
                        tracing::debug!(rule = %rule.name, %key, "Alert rule re-armed");
                    }
                    *state = RuleState::Armed;
                }
            }
        }

        fired
    }

    /// Restore rule states saved by [`save_state`](Self::save_state).
    /// A missing or unreadable file leaves every rule armed.
    pub async fn load_state(&mut self, path: &Path) {
        // ---
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Cannot read alert state, starting armed: {}", e);
                return;
            }
        };
        let entries: Vec<StateEntry> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Corrupt alert state, starting armed: {}", e);
                return;
            }
        };

        self.states = entries
            .into_iter()
            .map(|e| {
                let key = RouteKey::new(e.origin, e.destination, e.departure_date);
                ((e.rule, key), e.state)
            })
            .collect();
        tracing::debug!(path = %path.display(), entries = self.states.len(), "Loaded alert state");
    }

    /// Persist rule states (temp file + rename).
    pub async fn save_state(&self, path: &Path) -> anyhow::Result<()> {
        // ---
        let mut entries: Vec<StateEntry> = self
            .states
            .iter()
            .map(|((rule, key), state)| StateEntry {
                rule: rule.clone(),
                origin: key.origin.clone(),
                destination: key.destination.clone(),
                departure_date: key.departure_date,
                state: *state,
            })
            .collect();
        entries.sort_by(|a, b| {
            (&a.rule, &a.origin, &a.destination, a.departure_date)
                .cmp(&(&b.rule, &b.origin, &b.destination, b.departure_date))
        });

        let json = serde_json::to_vec_pretty(&entries)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// One highlighted observation in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEntry {
    pub observation: Observation,
    pub trend: Trend,
    pub score: Score,
    /// Names of every rule that fired for this observation.
    pub fired: Vec<String>,
    pub deep_link: Option<String>,
}

impl AlertEntry {
    pub fn fired_rule(&self, name: &str) -> bool {
        self.fired.iter().any(|f| f == name)
    }
}

/// All alerts of one scan, delivered as a single notification.
#[derive(Debug, Clone, Serialize)]
pub struct AlertBatch {
    pub scan_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<AlertEntry>,
}

impl AlertBatch {
    // ---
    pub fn new(scan_id: Uuid) -> Self {
        AlertBatch {
            scan_id,
            created_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Adds the entry unless it fired nothing. Returns whether it was added.
    pub fn push(&mut self, entry: AlertEntry) -> bool {
        if entry.fired.is_empty() {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::trend::TrendClassifier;

    fn observation(price: f64) -> Observation {
        // ---
        Observation {
            observed_at: Utc::now(),
            origin: "MAD".into(),
            destination: "DPS".into(),
            departure_date: NaiveDate::from_ymd_opt(2026, 7, 8).unwrap(),
            departure_time: "10:00:00".into(),
            arrival_time: "08:00:00".into(),
            duration_minutes: 16 * 60,
            stop_count: 0,
            route: vec!["MAD".into(), "DPS".into()],
            carrier_code: "SQ".into(),
            flight_number: "SQ387".into(),
            cabin_class: None,
            seats_available: Some(3),
            price_total: price,
            price_base: price,
            price_tax: 0.0,
        }
    }

    fn stable() -> Trend {
        TrendClassifier::default().classify_prices(100.0, &[100.0])
    }

    fn score(composite: f64) -> Score {
        Score {
            composite,
            price: composite,
            duration: composite,
            time_of_day: composite,
            availability: composite,
            neutral_fallbacks: 0,
        }
    }

    #[test]
    fn test_price_rule_fires_on_crossing_only() {
        // ---
        let mut engine = AlertEngine::new(vec![AlertRule::price_below(750.0)]);
        let fired: Vec<bool> = [780.0, 720.0, 740.0, 760.0, 700.0]
            .iter()
            .map(|p| !engine.evaluate(&observation(*p), &stable(), &score(50.0)).is_empty())
            .collect();
        assert_eq!(fired, vec![false, true, false, false, true]);
    }

    #[test]
    fn test_same_observation_twice_is_suppressed() {
        // ---
        let mut engine = AlertEngine::new(vec![AlertRule::price_below(750.0)]);
        let obs = observation(700.0);
        assert_eq!(engine.evaluate(&obs, &stable(), &score(50.0)), vec!["price_ceiling"]);
        assert!(engine.evaluate(&obs, &stable(), &score(50.0)).is_empty());
        assert_eq!(engine.state("price_ceiling", &obs.key()), RuleState::Fired);
    }

    #[test]
    fn test_states_are_per_key() {
        // ---
        let mut engine = AlertEngine::new(vec![AlertRule::price_below(750.0)]);
        let a = observation(700.0);
        let mut b = observation(700.0);
        b.departure_date = NaiveDate::from_ymd_opt(2026, 7, 9).unwrap();

        assert!(!engine.evaluate(&a, &stable(), &score(50.0)).is_empty());
        assert!(!engine.evaluate(&b, &stable(), &score(50.0)).is_empty());
    }

    #[test]
    fn test_multiple_rules_reported_together() {
        // ---
        let mut engine = AlertEngine::new(vec![
            AlertRule::trend_new_or_drop(),
            AlertRule::price_below(750.0),
            AlertRule::duration_at_most(12.0),
            AlertRule::score_at_least(60.0),
        ]);
        let new = TrendClassifier::default().classify_prices(700.0, &[]);
        let fired = engine.evaluate(&observation(700.0), &new, &score(75.0));
        assert_eq!(fired, vec!["trend", "price_ceiling", "score_floor"]);
    }

    #[test]
    fn test_unknown_duration_never_matches() {
        // ---
        let rule = AlertRule::duration_at_most(24.0);
        let mut obs = observation(700.0);
        obs.duration_minutes = 0;
        assert!(!rule.matches(&obs, &stable(), &score(50.0)));
    }

    #[tokio::test]
    async fn test_state_round_trips_through_file() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert_state.json");

        let mut engine = AlertEngine::new(vec![AlertRule::price_below(750.0)]);
        engine.evaluate(&observation(700.0), &stable(), &score(50.0));
        engine.save_state(&path).await.unwrap();

        let mut restored = AlertEngine::new(vec![AlertRule::price_below(750.0)]);
        restored.load_state(&path).await;
        assert!(restored.evaluate(&observation(710.0), &stable(), &score(50.0)).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_armed() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert_state.json");
        std::fs::write(&path, b"{not json").unwrap();

        let mut engine = AlertEngine::new(vec![AlertRule::price_below(750.0)]);
        engine.load_state(&path).await;
        assert!(!engine.evaluate(&observation(700.0), &stable(), &score(50.0)).is_empty());
    }

    #[test]
    fn test_batch_ignores_entries_without_fired_rules() {
        // ---
        let mut batch = AlertBatch::new(Uuid::new_v4());
        let entry = AlertEntry {
            observation: observation(700.0),
            trend: stable(),
            score: score(50.0),
            fired: vec![],
            deep_link: None,
        };
        assert!(!batch.push(entry.clone()));
        assert!(batch.push(AlertEntry {
            fired: vec!["price_ceiling".into()],
            ..entry
        }));
        assert_eq!(batch.len(), 1);
    }
}
