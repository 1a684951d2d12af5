//! Regulatory calendar adapter — PDUFA dates, trial completions, advisory
//! committee meetings, patent cliffs. The deadline is the regulatory date.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use cortex_common::{EntityDescriptor, EntityType, IdentifierKey, Signal, TriggerMap};

use crate::adapter::{FailureCounter, SignalFeed, SourceAdapter};
use crate::court_docket::docket_urgency;

const EVENT_TYPES: [&str; 4] = [
    "pdufa_date",
    "clinical_trial_completion",
    "advisory_committee",
    "patent_expiration",
];

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarEntry {
    pub entry_id: String,
    pub company: String,
    pub event_type: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub drug: Option<String>,
    /// Analyst estimate of the franchise at stake, dollars.
    #[serde(default)]
    pub market_value: Option<f64>,
    #[serde(default)]
    pub sec_cik: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

pub struct RegulatoryCalendarAdapter {
    feed: Arc<dyn SignalFeed<CalendarEntry>>,
    cadence: Duration,
    failures: FailureCounter,
}

impl RegulatoryCalendarAdapter {
    pub fn new(feed: Arc<dyn SignalFeed<CalendarEntry>>, cadence: Duration) -> Self {
        Self {
            feed,
            cadence,
            failures: FailureCounter::default(),
        }
    }

    fn entry_to_signal(&self, entry: CalendarEntry, now: DateTime<Utc>) -> Option<Signal> {
        if !EVENT_TYPES.contains(&entry.event_type.as_str()) {
            debug!(event_type = entry.event_type.as_str(), "Skipping unknown calendar event");
            return None;
        }

        let days = (entry.date - now).num_seconds() as f64 / 86_400.0;
        let value = entry.market_value.unwrap_or(0.0);

        // Same inverse-√days shape as the docket formula, with the franchise
        // value in place of the judgment amount.
        let triggers = TriggerMap {
            urgency: docket_urgency(days, value),
            regulatory_risk: match entry.event_type.as_str() {
                "pdufa_date" | "advisory_committee" => 70.0,
                "patent_expiration" => 55.0,
                _ => 45.0,
            },
            strategic: 50.0,
            ..Default::default()
        };

        let mut identifiers = BTreeMap::new();
        if let Some(cik) = entry.sec_cik.as_deref() {
            identifiers.insert(IdentifierKey::SecCik, cik.to_string());
        }

        // The monitor recognizes `pdufa_date` by name; other regulatory
        // events carry the generic `deadline` field.
        let deadline_field = if entry.event_type == "pdufa_date" {
            "pdufa_date"
        } else {
            "deadline"
        };
        let mut data = serde_json::Map::new();
        data.insert(
            deadline_field.to_string(),
            serde_json::Value::String(entry.date.to_rfc3339()),
        );
        if let Some(drug) = entry.drug {
            data.insert("drug".into(), serde_json::Value::String(drug));
        }
        if value > 0.0 {
            data.insert("market_value".into(), serde_json::json!(value));
        }

        Some(Signal {
            id: format!("reg-{}", entry.entry_id),
            signal_type: entry.event_type,
            source: "regulatory_calendar".into(),
            entity: EntityDescriptor {
                entity_type: EntityType::Company,
                name: entry.company,
                identifiers,
            },
            triggers: triggers.clamped(),
            data,
            observed_at: entry.published_at.unwrap_or(now),
        })
    }
}

#[async_trait]
impl SourceAdapter for RegulatoryCalendarAdapter {
    fn name(&self) -> &str {
        "regulatory_calendar"
    }

    fn industry(&self) -> &str {
        "pharma"
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn poll(&self) -> anyhow::Result<Vec<Signal>> {
        let entries = match self.feed.fetch().await {
            Ok(entries) => entries,
            Err(e) => {
                self.failures.record();
                warn!(error = %e, "Regulatory calendar feed unavailable, yielding empty batch");
                return Ok(Vec::new());
            }
        };

        let now = Utc::now();
        Ok(entries
            .into_iter()
            .filter_map(|e| self.entry_to_signal(e, now))
            .collect())
    }

    fn upstream_failures(&self) -> u64 {
        self.failures.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    struct FixtureFeed(Vec<CalendarEntry>);

    #[async_trait]
    impl SignalFeed<CalendarEntry> for FixtureFeed {
        async fn fetch(&self) -> anyhow::Result<Vec<CalendarEntry>> {
            Ok(self.0.clone())
        }
    }

    fn entry(event_type: &str, in_days: i64) -> CalendarEntry {
        CalendarEntry {
            entry_id: "pdufa-8821".into(),
            company: "Neurovia Therapeutics".into(),
            event_type: event_type.into(),
            date: Utc::now() + ChronoDuration::days(in_days),
            drug: Some("NVT-201".into()),
            market_value: Some(2_000_000_000.0),
            sec_cik: Some("0001811210".into()),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn pdufa_entry_keeps_its_named_deadline_field() {
        let adapter = RegulatoryCalendarAdapter::new(
            Arc::new(FixtureFeed(vec![entry("pdufa_date", 45)])),
            Duration::from_secs(3600),
        );
        let signals = adapter.poll().await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, "pdufa_date");
        assert!(signals[0].data.contains_key("pdufa_date"));
        assert_eq!(
            signals[0]
                .entity
                .identifiers
                .get(&IdentifierKey::SecCik)
                .unwrap(),
            "0001811210"
        );
        assert_eq!(signals[0].triggers.regulatory_risk, 70.0);
    }

    #[tokio::test]
    async fn other_events_use_the_generic_deadline_field() {
        let adapter = RegulatoryCalendarAdapter::new(
            Arc::new(FixtureFeed(vec![entry("clinical_trial_completion", 90)])),
            Duration::from_secs(3600),
        );
        let signals = adapter.poll().await.unwrap();
        assert!(signals[0].data.contains_key("deadline"));
        assert!(!signals[0].data.contains_key("pdufa_date"));
    }

    #[tokio::test]
    async fn unknown_event_types_are_skipped() {
        let adapter = RegulatoryCalendarAdapter::new(
            Arc::new(FixtureFeed(vec![entry("earnings_call", 10)])),
            Duration::from_secs(3600),
        );
        assert!(adapter.poll().await.unwrap().is_empty());
    }
}
