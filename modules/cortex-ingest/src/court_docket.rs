//! Court docket adapter — foreclosures, probate, evictions, divorces from a
//! county docket feed. The deadline is the auction/hearing/writ date.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use cortex_common::{EntityDescriptor, EntityType, IdentifierKey, Signal, TriggerMap};

use crate::adapter::{FailureCounter, SignalFeed, SourceAdapter};

const CASE_TYPES: [&str; 4] = ["foreclosure", "probate", "eviction", "divorce"];

/// Urgency for deadline-driven dockets, documented and bit-exact:
/// `clamp(100 × (1/√max(days,1)) × (log10(max(value,10)) / 4), 0, 100)`.
pub fn docket_urgency(days_to_deadline: f64, dollar_value: f64) -> f64 {
    let days = days_to_deadline.max(1.0);
    let value = dollar_value.max(10.0);
    (100.0 * (1.0 / days.sqrt()) * (value.log10() / 4.0)).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocketRecord {
    pub case_id: String,
    pub case_type: String,
    /// Defendant or estate for person cases; street address for property cases.
    pub party: String,
    #[serde(default)]
    pub apn: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub auction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hearing_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub writ_date: Option<DateTime<Utc>>,
    /// Judgment or assessed value in dollars.
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub filed_at: Option<DateTime<Utc>>,
}

pub struct CourtDocketAdapter {
    feed: Arc<dyn SignalFeed<DocketRecord>>,
    cadence: Duration,
    failures: FailureCounter,
}

impl CourtDocketAdapter {
    pub fn new(feed: Arc<dyn SignalFeed<DocketRecord>>, cadence: Duration) -> Self {
        Self {
            feed,
            cadence,
            failures: FailureCounter::default(),
        }
    }

    fn record_to_signal(&self, record: DocketRecord, now: DateTime<Utc>) -> Option<Signal> {
        if !CASE_TYPES.contains(&record.case_type.as_str()) {
            debug!(case_type = record.case_type.as_str(), "Skipping unknown case type");
            return None;
        }

        // Deadline precedence mirrors how dockets publish dates: sale first,
        // then hearing, then writ.
        let (deadline_field, deadline) = if let Some(d) = record.auction_date {
            ("auction_date", d)
        } else if let Some(d) = record.hearing_date {
            ("hearing_date", d)
        } else if let Some(d) = record.writ_date {
            ("deadline", d)
        } else {
            debug!(case_id = record.case_id.as_str(), "Docket record has no date, skipping");
            return None;
        };

        let days = (deadline - now).num_seconds() as f64 / 86_400.0;
        let value = record.amount.unwrap_or(0.0);

        let mut triggers = TriggerMap {
            urgency: docket_urgency(days, value),
            ..Default::default()
        };
        // Case-type baselines: what the filing itself says about the party.
        match record.case_type.as_str() {
            "foreclosure" => triggers.financial_stress = 85.0,
            "eviction" => triggers.financial_stress = 70.0,
            "divorce" => triggers.financial_stress = 50.0,
            _ => triggers.financial_stress = 40.0, // probate
        }

        let is_property = matches!(record.case_type.as_str(), "foreclosure" | "eviction");
        let mut identifiers = BTreeMap::new();
        if let Some(apn) = record.apn.as_deref() {
            identifiers.insert(IdentifierKey::Apn, apn.to_string());
        }
        if let Some(address) = record.address.as_deref() {
            identifiers.insert(IdentifierKey::Address, address.to_string());
        }

        let mut data = serde_json::Map::new();
        data.insert(
            deadline_field.to_string(),
            serde_json::Value::String(deadline.to_rfc3339()),
        );
        if value > 0.0 {
            data.insert("property_value".into(), serde_json::json!(value));
        }
        if let Some(county) = record.county {
            data.insert("county".into(), serde_json::Value::String(county));
        }
        data.insert(
            "case_number".into(),
            serde_json::Value::String(record.case_id.clone()),
        );

        Some(Signal {
            id: format!("docket-{}", record.case_id),
            signal_type: record.case_type,
            source: "court_docket".into(),
            entity: EntityDescriptor {
                entity_type: if is_property {
                    EntityType::Property
                } else {
                    EntityType::Person
                },
                name: record
                    .address
                    .filter(|_| is_property)
                    .unwrap_or(record.party),
                identifiers,
            },
            triggers: triggers.clamped(),
            data,
            observed_at: record.filed_at.unwrap_or(now),
        })
    }
}

#[async_trait]
impl SourceAdapter for CourtDocketAdapter {
    fn name(&self) -> &str {
        "court_docket"
    }

    fn industry(&self) -> &str {
        "real_estate"
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn poll(&self) -> anyhow::Result<Vec<Signal>> {
        let records = match self.feed.fetch().await {
            Ok(records) => records,
            Err(e) => {
                self.failures.record();
                warn!(error = %e, "Court docket feed unavailable, yielding empty batch");
                return Ok(Vec::new());
            }
        };

        let now = Utc::now();
        Ok(records
            .into_iter()
            .filter_map(|r| self.record_to_signal(r, now))
            .collect())
    }

    fn upstream_failures(&self) -> u64 {
        self.failures.get()
    }
}
