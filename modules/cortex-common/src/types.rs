use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Entity classification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Company,
    Property,
    Person,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Company => write!(f, "company"),
            EntityType::Property => write!(f, "property"),
            EntityType::Person => write!(f, "person"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "company" => Ok(Self::Company),
            "property" => Ok(Self::Property),
            "person" => Ok(Self::Person),
            other => Err(format!("unknown EntityType: {other}")),
        }
    }
}

/// Identifier namespaces. A value is globally unique within its key namespace,
/// so the resolver can treat (key, value) as a primary lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKey {
    Ein,
    Duns,
    SecCik,
    Apn,
    Address,
    LinkedinUrl,
    Email,
}

impl IdentifierKey {
    pub const ALL: [IdentifierKey; 7] = [
        IdentifierKey::Ein,
        IdentifierKey::Duns,
        IdentifierKey::SecCik,
        IdentifierKey::Apn,
        IdentifierKey::Address,
        IdentifierKey::LinkedinUrl,
        IdentifierKey::Email,
    ];
}

impl std::fmt::Display for IdentifierKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierKey::Ein => write!(f, "ein"),
            IdentifierKey::Duns => write!(f, "duns"),
            IdentifierKey::SecCik => write!(f, "sec_cik"),
            IdentifierKey::Apn => write!(f, "apn"),
            IdentifierKey::Address => write!(f, "address"),
            IdentifierKey::LinkedinUrl => write!(f, "linkedin_url"),
            IdentifierKey::Email => write!(f, "email"),
        }
    }
}

impl std::str::FromStr for IdentifierKey {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ein" => Ok(Self::Ein),
            "duns" => Ok(Self::Duns),
            "sec_cik" => Ok(Self::SecCik),
            "apn" => Ok(Self::Apn),
            "address" => Ok(Self::Address),
            "linkedin_url" => Ok(Self::LinkedinUrl),
            "email" => Ok(Self::Email),
            other => Err(format!("unknown IdentifierKey: {other}")),
        }
    }
}

/// Who or what a signal is about, as observed by the upstream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub entity_type: EntityType,
    pub name: String,
    /// Upstream key casing varies; keys are lowercased on the way in and
    /// unknown namespaces are dropped rather than failing the signal.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "de_identifiers"
    )]
    pub identifiers: BTreeMap<IdentifierKey, String>,
}

fn de_identifiers<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<IdentifierKey, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| {
            let key: IdentifierKey = k.trim().to_lowercase().parse().ok()?;
            let value = v.trim().to_string();
            (!value.is_empty()).then_some((key, value))
        })
        .collect())
}

// --- Trigger map ---

/// The six scoring inputs. Fixed keys, values in [0,100]; absent keys are 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerMap {
    #[serde(default)]
    pub urgency: f64,
    #[serde(default)]
    pub financial_stress: f64,
    #[serde(default)]
    pub operational_disruption: f64,
    #[serde(default)]
    pub competitive_threat: f64,
    #[serde(default)]
    pub regulatory_risk: f64,
    #[serde(default)]
    pub strategic: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKey {
    Urgency,
    FinancialStress,
    OperationalDisruption,
    CompetitiveThreat,
    RegulatoryRisk,
    Strategic,
}

impl TriggerKey {
    pub const ALL: [TriggerKey; 6] = [
        TriggerKey::Urgency,
        TriggerKey::FinancialStress,
        TriggerKey::OperationalDisruption,
        TriggerKey::CompetitiveThreat,
        TriggerKey::RegulatoryRisk,
        TriggerKey::Strategic,
    ];
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKey::Urgency => write!(f, "urgency"),
            TriggerKey::FinancialStress => write!(f, "financial_stress"),
            TriggerKey::OperationalDisruption => write!(f, "operational_disruption"),
            TriggerKey::CompetitiveThreat => write!(f, "competitive_threat"),
            TriggerKey::RegulatoryRisk => write!(f, "regulatory_risk"),
            TriggerKey::Strategic => write!(f, "strategic"),
        }
    }
}

impl std::str::FromStr for TriggerKey {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "urgency" => Ok(Self::Urgency),
            "financial_stress" => Ok(Self::FinancialStress),
            "operational_disruption" => Ok(Self::OperationalDisruption),
            "competitive_threat" => Ok(Self::CompetitiveThreat),
            "regulatory_risk" => Ok(Self::RegulatoryRisk),
            "strategic" => Ok(Self::Strategic),
            other => Err(format!("unknown TriggerKey: {other}")),
        }
    }
}

impl TriggerMap {
    pub fn get(&self, key: TriggerKey) -> f64 {
        match key {
            TriggerKey::Urgency => self.urgency,
            TriggerKey::FinancialStress => self.financial_stress,
            TriggerKey::OperationalDisruption => self.operational_disruption,
            TriggerKey::CompetitiveThreat => self.competitive_threat,
            TriggerKey::RegulatoryRisk => self.regulatory_risk,
            TriggerKey::Strategic => self.strategic,
        }
    }

    pub fn set(&mut self, key: TriggerKey, value: f64) {
        let slot = match key {
            TriggerKey::Urgency => &mut self.urgency,
            TriggerKey::FinancialStress => &mut self.financial_stress,
            TriggerKey::OperationalDisruption => &mut self.operational_disruption,
            TriggerKey::CompetitiveThreat => &mut self.competitive_threat,
            TriggerKey::RegulatoryRisk => &mut self.regulatory_risk,
            TriggerKey::Strategic => &mut self.strategic,
        };
        *slot = value;
    }

    /// Clamp every trigger into [0,100]. Applied during ingest normalization.
    pub fn clamped(mut self) -> Self {
        for key in TriggerKey::ALL {
            self.set(key, self.get(key).clamp(0.0, 100.0));
        }
        self
    }

    /// The highest trigger and its value. Ties resolve to the earlier key in
    /// declaration order, which keeps pain-point derivation deterministic.
    pub fn dominant(&self) -> (TriggerKey, f64) {
        let mut best = (TriggerKey::Urgency, self.urgency);
        for key in TriggerKey::ALL {
            if self.get(key) > best.1 {
                best = (key, self.get(key));
            }
        }
        best
    }
}

// --- Signal ---

/// A single raw observation from one upstream source. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub signal_type: String,
    pub source: String,
    pub entity: EntityDescriptor,
    #[serde(default)]
    pub triggers: TriggerMap,
    /// Free-form typed payload: deadlines, dollar values, counts. An explicit
    /// JSON null marks a field as present-but-unknown.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_observed_at")]
    pub observed_at: DateTime<Utc>,
}

fn default_observed_at() -> DateTime<Utc> {
    Utc::now()
}

impl Signal {
    /// Fetch a numeric field from the data bag, tolerating string encodings.
    pub fn data_f64(&self, field: &str) -> Option<f64> {
        match self.data.get(field)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// True when the data bag holds an explicit null under `field` —
    /// the upstream knew the dimension exists but couldn't fill it.
    pub fn data_is_unknown(&self, field: &str) -> bool {
        matches!(self.data.get(field), Some(serde_json::Value::Null))
    }
}

// --- Entity ---

/// The canonical deduplicated record. Owned solely by the entity resolver;
/// never destroyed, only merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub canonical_name: String,
    /// Normalized (lowercase, punctuation stripped, whitespace collapsed).
    pub aliases: BTreeSet<String>,
    pub identifiers: BTreeMap<IdentifierKey, String>,
    /// Ordered by observed_at, oldest first.
    pub signals: Vec<Signal>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- Scored signal ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown Priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Playbook {
    Rescue,
    Buy,
    Partner,
    Refinance,
    Litigate,
    Walk,
}

impl std::fmt::Display for Playbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Playbook::Rescue => write!(f, "rescue"),
            Playbook::Buy => write!(f, "buy"),
            Playbook::Partner => write!(f, "partner"),
            Playbook::Refinance => write!(f, "refinance"),
            Playbook::Litigate => write!(f, "litigate"),
            Playbook::Walk => write!(f, "walk"),
        }
    }
}

impl std::str::FromStr for Playbook {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rescue" => Ok(Self::Rescue),
            "buy" => Ok(Self::Buy),
            "partner" => Ok(Self::Partner),
            "refinance" => Ok(Self::Refinance),
            "litigate" => Ok(Self::Litigate),
            "walk" => Ok(Self::Walk),
            other => Err(format!("unknown Playbook: {other}")),
        }
    }
}

/// A signal after scoring. Immutable; carries everything downstream stages
/// need inline, so they never have to wait on the resolver's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSignal {
    pub signal: Signal,
    pub entity_id: Uuid,
    /// Integer opportunity score in [0, 1000].
    pub score: u32,
    pub probability_to_win: f64,
    /// Positive integer estimate; provisional 30 until routing re-derives it.
    pub days_to_win: u32,
    pub priority: Priority,
    pub playbook: Playbook,
}

// --- Alert ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub signal_id: String,
    pub entity_id: Uuid,
    pub deadline: DateTime<Utc>,
    /// One of the configured countdown thresholds (days).
    pub threshold: u32,
    /// Whole days remaining at creation time.
    pub days_remaining: i64,
    pub priority: Priority,
    pub message: String,
    pub action_items: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

// --- Playbook route ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub action: String,
    pub estimated_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookRoute {
    pub signal_id: String,
    pub playbook: Playbook,
    pub steps: Vec<PlaybookStep>,
    /// Nominal calendar window in days.
    pub window_min_days: u32,
    pub window_max_days: u32,
    /// Re-derived days-to-win: the window midpoint (never below 1).
    pub days_to_win: u32,
}

// --- Outreach ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachChannel {
    Email,
    Sms,
    Phone,
    Linkedin,
}

impl OutreachChannel {
    pub const ALL: [OutreachChannel; 4] = [
        OutreachChannel::Email,
        OutreachChannel::Sms,
        OutreachChannel::Phone,
        OutreachChannel::Linkedin,
    ];
}

impl std::fmt::Display for OutreachChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutreachChannel::Email => write!(f, "email"),
            OutreachChannel::Sms => write!(f, "sms"),
            OutreachChannel::Phone => write!(f, "phone"),
            OutreachChannel::Linkedin => write!(f, "linkedin"),
        }
    }
}

impl std::str::FromStr for OutreachChannel {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "phone" => Ok(Self::Phone),
            "linkedin" => Ok(Self::Linkedin),
            other => Err(format!("unknown OutreachChannel: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outreach {
    pub template_id: String,
    pub channel: OutreachChannel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    /// responded/sent from recorded stats; 0.5 before any sends.
    pub estimated_conversion: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_map_defaults_missing_keys_to_zero() {
        let json = serde_json::json!({ "urgency": 90.0, "financial_stress": 85.0 });
        let map: TriggerMap = serde_json::from_value(json).unwrap();
        assert_eq!(map.urgency, 90.0);
        assert_eq!(map.operational_disruption, 0.0);
        assert_eq!(map.strategic, 0.0);
    }

    #[test]
    fn trigger_map_dominant_prefers_declaration_order_on_tie() {
        let map = TriggerMap {
            urgency: 70.0,
            financial_stress: 70.0,
            ..Default::default()
        };
        let (key, value) = map.dominant();
        assert_eq!(key, TriggerKey::Urgency);
        assert_eq!(value, 70.0);
    }

    #[test]
    fn trigger_map_clamped_bounds_values() {
        let map = TriggerMap {
            urgency: 150.0,
            financial_stress: -5.0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(map.urgency, 100.0);
        assert_eq!(map.financial_stress, 0.0);
    }

    #[test]
    fn identifier_key_round_trips_through_strings() {
        for key in IdentifierKey::ALL {
            let parsed: IdentifierKey = key.to_string().parse().unwrap();
            assert_eq!(parsed, key);
        }
        assert!("fax_number".parse::<IdentifierKey>().is_err());
    }

    #[test]
    fn signal_data_null_is_present_but_unknown() {
        let mut data = serde_json::Map::new();
        data.insert("financial_stress".into(), serde_json::Value::Null);
        data.insert("property_value".into(), serde_json::json!(500_000));
        let signal = Signal {
            id: "sig-1".into(),
            signal_type: "foreclosure".into(),
            source: "county_docket".into(),
            entity: EntityDescriptor {
                entity_type: EntityType::Property,
                name: "123 Main St".into(),
                identifiers: BTreeMap::new(),
            },
            triggers: TriggerMap::default(),
            data,
            observed_at: Utc::now(),
        };
        assert!(signal.data_is_unknown("financial_stress"));
        assert!(!signal.data_is_unknown("property_value"));
        assert_eq!(signal.data_f64("property_value"), Some(500_000.0));
    }

    #[test]
    fn identifier_keys_are_lowercased_and_unknowns_dropped() {
        let json = serde_json::json!({
            "entity_type": "company",
            "name": "Apple Inc.",
            "identifiers": { "EIN": "12-3456789", "fax": "555-1234", "duns": " 081466849 " }
        });
        let descriptor: EntityDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(
            descriptor.identifiers.get(&IdentifierKey::Ein).unwrap(),
            "12-3456789"
        );
        assert_eq!(
            descriptor.identifiers.get(&IdentifierKey::Duns).unwrap(),
            "081466849"
        );
        assert_eq!(descriptor.identifiers.len(), 2);
    }

    #[test]
    fn signal_observed_at_defaults_to_now_when_missing() {
        let json = serde_json::json!({
            "id": "sig-9",
            "signal_type": "foreclosure",
            "source": "county_docket",
            "entity": { "entity_type": "property", "name": "9 Oak Ave" }
        });
        let signal: Signal = serde_json::from_value(json).unwrap();
        assert!((Utc::now() - signal.observed_at).num_seconds() < 5);
    }

    #[test]
    fn priority_orders_critical_first() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }
}
