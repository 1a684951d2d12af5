//! Talent tracker adapter — executive departures, key-opinion-leader moves,
//! competitor poaches, and exodus detection over a rolling 90-day window.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use cortex_common::normalize::normalize_name;
use cortex_common::{EntityDescriptor, EntityType, IdentifierKey, Signal, TriggerMap};

use crate::adapter::{FailureCounter, SignalFeed, SourceAdapter};

/// Departures within this window of the newest one count toward an exodus.
const EXODUS_WINDOW_DAYS: i64 = 90;
/// Departure count at which a company is in exodus.
const EXODUS_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeniorityTier {
    Chief,
    Evp,
    Svp,
    Vp,
    Director,
    Other,
}

impl SeniorityTier {
    pub fn base_urgency(&self) -> f64 {
        match self {
            SeniorityTier::Chief => 80.0,
            SeniorityTier::Evp => 70.0,
            SeniorityTier::Svp => 60.0,
            SeniorityTier::Vp => 50.0,
            SeniorityTier::Director => 35.0,
            SeniorityTier::Other => 20.0,
        }
    }
}

/// Talent urgency: seniority tier base × exodus multiplier × signal-type
/// multiplier, clamped to [0,100].
///
/// - exodus multiplier: `1 + 0.15 × (departures − 1)`, capped at 2.0
/// - type multiplier: talent_exodus 1.25, c_suite_departure 1.0,
///   kol_move 0.9, competitor_poach 0.8
pub fn talent_urgency(tier: SeniorityTier, departures_in_window: usize, signal_type: &str) -> f64 {
    let exodus = (1.0 + 0.15 * departures_in_window.saturating_sub(1) as f64).min(2.0);
    let type_multiplier = match signal_type {
        "talent_exodus" => 1.25,
        "c_suite_departure" => 1.0,
        "kol_move" => 0.9,
        "competitor_poach" => 0.8,
        _ => 0.8,
    };
    (tier.base_urgency() * exodus * type_multiplier).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepartureRecord {
    pub id: String,
    pub person: String,
    pub company: String,
    pub title: String,
    pub seniority: SeniorityTier,
    /// `c_suite_departure`, `kol_move`, or `competitor_poach`.
    pub signal_kind: String,
    pub departed_at: DateTime<Utc>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
}

pub struct TalentTrackerAdapter {
    feed: Arc<dyn SignalFeed<DepartureRecord>>,
    cadence: Duration,
    failures: FailureCounter,
}

impl TalentTrackerAdapter {
    pub fn new(feed: Arc<dyn SignalFeed<DepartureRecord>>, cadence: Duration) -> Self {
        Self {
            feed,
            cadence,
            failures: FailureCounter::default(),
        }
    }

    fn departure_signal(&self, record: &DepartureRecord, departures_in_window: usize) -> Signal {
        let urgency = talent_urgency(record.seniority, departures_in_window, &record.signal_kind);

        let triggers = TriggerMap {
            urgency,
            // A senior seat going empty is an operating problem in itself.
            operational_disruption: record.seniority.base_urgency(),
            competitive_threat: if record.signal_kind == "competitor_poach" {
                70.0
            } else {
                0.0
            },
            ..Default::default()
        };

        let mut identifiers = BTreeMap::new();
        if let Some(url) = record.linkedin_url.as_deref() {
            identifiers.insert(IdentifierKey::LinkedinUrl, url.to_string());
        }

        let mut data = serde_json::Map::new();
        data.insert(
            "person".into(),
            serde_json::Value::String(record.person.clone()),
        );
        data.insert(
            "title".into(),
            serde_json::Value::String(record.title.clone()),
        );
        data.insert(
            "departure_count".into(),
            serde_json::json!(departures_in_window),
        );
        if let Some(dest) = record.destination.as_deref() {
            data.insert("destination".into(), serde_json::Value::String(dest.into()));
        }

        Signal {
            id: format!("talent-{}", record.id),
            signal_type: record.signal_kind.clone(),
            source: "talent_tracker".into(),
            entity: EntityDescriptor {
                entity_type: EntityType::Company,
                name: record.company.clone(),
                identifiers,
            },
            triggers: triggers.clamped(),
            data,
            observed_at: record.departed_at,
        }
    }

    fn exodus_signal(
        &self,
        company: &str,
        departures: &[&DepartureRecord],
        newest: DateTime<Utc>,
    ) -> Signal {
        let top_tier = departures
            .iter()
            .map(|d| d.seniority)
            .max_by(|a, b| a.base_urgency().total_cmp(&b.base_urgency()))
            .unwrap_or(SeniorityTier::Other);
        let urgency = talent_urgency(top_tier, departures.len(), "talent_exodus");

        let mut data = serde_json::Map::new();
        data.insert("departure_count".into(), serde_json::json!(departures.len()));
        data.insert(
            "window_days".into(),
            serde_json::json!(EXODUS_WINDOW_DAYS),
        );
        data.insert(
            "departed".into(),
            serde_json::json!(departures.iter().map(|d| d.person.clone()).collect::<Vec<_>>()),
        );

        Signal {
            // Keyed on company + window end so repeat polls reuse the id and
            // downstream dedupe holds.
            id: format!(
                "exodus-{}-{}",
                normalize_name(company).replace(' ', "-"),
                newest.format("%Y%m%d")
            ),
            signal_type: "talent_exodus".into(),
            source: "talent_tracker".into(),
            entity: EntityDescriptor {
                entity_type: EntityType::Company,
                name: company.to_string(),
                identifiers: BTreeMap::new(),
            },
            triggers: TriggerMap {
                urgency,
                operational_disruption: 80.0,
                ..Default::default()
            }
            .clamped(),
            data,
            observed_at: newest,
        }
    }
}

#[async_trait]
impl SourceAdapter for TalentTrackerAdapter {
    fn name(&self) -> &str {
        "talent_tracker"
    }

    fn industry(&self) -> &str {
        "talent"
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn poll(&self) -> anyhow::Result<Vec<Signal>> {
        let records = match self.feed.fetch().await {
            Ok(records) => records,
            Err(e) => {
                self.failures.record();
                warn!(error = %e, "Talent feed unavailable, yielding empty batch");
                return Ok(Vec::new());
            }
        };

        // Group by company (normalized) for the rolling-window count.
        let mut by_company: HashMap<String, Vec<&DepartureRecord>> = HashMap::new();
        for record in &records {
            by_company
                .entry(normalize_name(&record.company))
                .or_default()
                .push(record);
        }

        let mut signals = Vec::new();
        for group in by_company.values_mut() {
            group.sort_by_key(|d| d.departed_at);
            let newest = match group.last() {
                Some(d) => d.departed_at,
                None => continue,
            };
            let window_start = newest - ChronoDuration::days(EXODUS_WINDOW_DAYS);
            let in_window: Vec<&DepartureRecord> = group
                .iter()
                .copied()
                .filter(|d| d.departed_at >= window_start)
                .collect();

            for record in group.iter() {
                signals.push(self.departure_signal(record, in_window.len()));
            }

            if in_window.len() >= EXODUS_THRESHOLD {
                let company = &in_window[0].company;
                info!(
                    company = company.as_str(),
                    departures = in_window.len(),
                    "Exodus threshold crossed"
                );
                signals.push(self.exodus_signal(company, &in_window, newest));
            }
        }

        Ok(signals)
    }

    fn upstream_failures(&self) -> u64 {
        self.failures.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixtureFeed(Vec<DepartureRecord>);

    #[async_trait]
    impl SignalFeed<DepartureRecord> for FixtureFeed {
        async fn fetch(&self) -> anyhow::Result<Vec<DepartureRecord>> {
            Ok(self.0.clone())
        }
    }

    fn departure(id: &str, company: &str, days_ago: i64) -> DepartureRecord {
        DepartureRecord {
            id: id.into(),
            person: format!("Exec {id}"),
            company: company.into(),
            title: "Chief Revenue Officer".into(),
            seniority: SeniorityTier::Chief,
            signal_kind: "c_suite_departure".into(),
            departed_at: Utc::now() - ChronoDuration::days(days_ago),
            destination: None,
            linkedin_url: None,
        }
    }

    #[test]
    fn urgency_scales_with_tier_window_and_kind() {
        // Single chief departure: 80 * 1.0 * 1.0
        assert!((talent_urgency(SeniorityTier::Chief, 1, "c_suite_departure") - 80.0).abs() < 1e-9);
        // Five departures: multiplier 1.6, clamped at 100.
        assert_eq!(talent_urgency(SeniorityTier::Chief, 5, "c_suite_departure"), 100.0);
        // Exodus multiplier caps at 2.0.
        assert_eq!(
            talent_urgency(SeniorityTier::Other, 50, "competitor_poach"),
            20.0 * 2.0 * 0.8
        );
        // KOL move is discounted.
        assert!((talent_urgency(SeniorityTier::Vp, 1, "kol_move") - 45.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn five_departures_in_window_emit_an_exodus_signal() {
        let records: Vec<DepartureRecord> = (0..5)
            .map(|i| departure(&format!("d{i}"), "Acme Corp", i * 10))
            .collect();
        let adapter = TalentTrackerAdapter::new(
            Arc::new(FixtureFeed(records)),
            Duration::from_secs(3600),
        );

        let signals = adapter.poll().await.unwrap();
        let exodus: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.signal_type == "talent_exodus")
            .collect();
        assert_eq!(exodus.len(), 1);
        assert_eq!(exodus[0].data_f64("departure_count"), Some(5.0));
        assert_eq!(exodus[0].entity.name, "Acme Corp");
        // Departure signals themselves carry the window count.
        let departures: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.signal_type == "c_suite_departure")
            .collect();
        assert_eq!(departures.len(), 5);
        assert!(departures.iter().all(|s| s.data_f64("departure_count") == Some(5.0)));
    }

    #[tokio::test]
    async fn departures_outside_the_rolling_window_do_not_count() {
        // Four recent + one 120 days old: no exodus.
        let mut records: Vec<DepartureRecord> = (0..4)
            .map(|i| departure(&format!("d{i}"), "Acme Corp", i * 5))
            .collect();
        records.push(departure("old", "Acme Corp", 120));
        let adapter = TalentTrackerAdapter::new(
            Arc::new(FixtureFeed(records)),
            Duration::from_secs(3600),
        );

        let signals = adapter.poll().await.unwrap();
        assert!(signals.iter().all(|s| s.signal_type != "talent_exodus"));
    }

    #[tokio::test]
    async fn exodus_id_is_stable_across_polls() {
        let records: Vec<DepartureRecord> = (0..5)
            .map(|i| departure(&format!("d{i}"), "Acme Corp", i))
            .collect();
        let adapter = TalentTrackerAdapter::new(
            Arc::new(FixtureFeed(records)),
            Duration::from_secs(3600),
        );

        let first = adapter.poll().await.unwrap();
        let second = adapter.poll().await.unwrap();
        let id_of = |signals: &[Signal]| {
            signals
                .iter()
                .find(|s| s.signal_type == "talent_exodus")
                .map(|s| s.id.clone())
                .unwrap()
        };
        assert_eq!(id_of(&first), id_of(&second));
    }
}
