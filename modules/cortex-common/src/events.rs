//! Bus event schema — the closed topic set, the tagged payload enum, and the
//! wire envelope. Every topic has exactly one payload shape; handler
//! registration is by concrete signature, never by runtime reflection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Alert, Outreach, PlaybookRoute, ScoredSignal, Signal};

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// The closed set of bus topics, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "signal.raw")]
    SignalRaw,
    #[serde(rename = "signal.ingested")]
    SignalIngested,
    #[serde(rename = "signal.resolved")]
    SignalResolved,
    #[serde(rename = "signal.scored")]
    SignalScored,
    #[serde(rename = "alert.triggered")]
    AlertTriggered,
    #[serde(rename = "alert.acknowledged")]
    AlertAcknowledged,
    #[serde(rename = "playbook.routed")]
    PlaybookRouted,
    #[serde(rename = "outreach.generated")]
    OutreachGenerated,
    #[serde(rename = "audit.log")]
    AuditLog,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Topic::SignalRaw,
        Topic::SignalIngested,
        Topic::SignalResolved,
        Topic::SignalScored,
        Topic::AlertTriggered,
        Topic::AlertAcknowledged,
        Topic::PlaybookRouted,
        Topic::OutreachGenerated,
        Topic::AuditLog,
    ];

    /// `audit.log` events may be dropped under backpressure; pipeline topics
    /// must instead fail the upstream operation.
    pub fn is_droppable(&self) -> bool {
        matches!(self, Topic::AuditLog)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::SignalRaw => write!(f, "signal.raw"),
            Topic::SignalIngested => write!(f, "signal.ingested"),
            Topic::SignalResolved => write!(f, "signal.resolved"),
            Topic::SignalScored => write!(f, "signal.scored"),
            Topic::AlertTriggered => write!(f, "alert.triggered"),
            Topic::AlertAcknowledged => write!(f, "alert.acknowledged"),
            Topic::PlaybookRouted => write!(f, "playbook.routed"),
            Topic::OutreachGenerated => write!(f, "outreach.generated"),
            Topic::AuditLog => write!(f, "audit.log"),
        }
    }
}

impl std::str::FromStr for Topic {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "signal.raw" => Ok(Self::SignalRaw),
            "signal.ingested" => Ok(Self::SignalIngested),
            "signal.resolved" => Ok(Self::SignalResolved),
            "signal.scored" => Ok(Self::SignalScored),
            "alert.triggered" => Ok(Self::AlertTriggered),
            "alert.acknowledged" => Ok(Self::AlertAcknowledged),
            "playbook.routed" => Ok(Self::PlaybookRouted),
            "outreach.generated" => Ok(Self::OutreachGenerated),
            "audit.log" => Ok(Self::AuditLog),
            other => Err(format!("unknown Topic: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One variant per event type. The serde tag is the `event_type` sub-tag on
/// the wire; unknown fields inside payloads are ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    SignalRaw {
        signal: Signal,
    },
    SignalIngested {
        signal: Signal,
    },
    SignalResolved {
        signal: Signal,
        entity_id: Uuid,
    },
    SignalScored {
        scored: ScoredSignal,
    },
    AlertTriggered {
        alert: Alert,
    },
    AlertAcknowledged {
        alert_id: Uuid,
        signal_id: String,
    },
    PlaybookRouted {
        route: PlaybookRoute,
    },
    OutreachGenerated {
        signal_id: String,
        outreach: Outreach,
    },
    AuditLog {
        component: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signal_id: Option<String>,
        kind: String,
        detail: String,
    },
}

impl PipelineEvent {
    /// The snake_case event type string for this variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::SignalRaw { .. } => "signal_raw",
            PipelineEvent::SignalIngested { .. } => "signal_ingested",
            PipelineEvent::SignalResolved { .. } => "signal_resolved",
            PipelineEvent::SignalScored { .. } => "signal_scored",
            PipelineEvent::AlertTriggered { .. } => "alert_triggered",
            PipelineEvent::AlertAcknowledged { .. } => "alert_acknowledged",
            PipelineEvent::PlaybookRouted { .. } => "playbook_routed",
            PipelineEvent::OutreachGenerated { .. } => "outreach_generated",
            PipelineEvent::AuditLog { .. } => "audit_log",
        }
    }

    /// The topic this event belongs on.
    pub fn topic(&self) -> Topic {
        match self {
            PipelineEvent::SignalRaw { .. } => Topic::SignalRaw,
            PipelineEvent::SignalIngested { .. } => Topic::SignalIngested,
            PipelineEvent::SignalResolved { .. } => Topic::SignalResolved,
            PipelineEvent::SignalScored { .. } => Topic::SignalScored,
            PipelineEvent::AlertTriggered { .. } => Topic::AlertTriggered,
            PipelineEvent::AlertAcknowledged { .. } => Topic::AlertAcknowledged,
            PipelineEvent::PlaybookRouted { .. } => Topic::PlaybookRouted,
            PipelineEvent::OutreachGenerated { .. } => Topic::OutreachGenerated,
            PipelineEvent::AuditLog { .. } => Topic::AuditLog,
        }
    }

    /// Shorthand for audit records emitted on per-event failures.
    pub fn audit(
        component: impl Into<String>,
        signal_id: Option<String>,
        kind: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        PipelineEvent::AuditLog {
            component: component.into(),
            signal_id,
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The wire envelope. Serialized as-is to the external mirror; in-process
/// subscribers receive the same struct with the payload still typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_id: String,
    /// Root event id of the pipeline pass this event belongs to; equals
    /// `event_id` for root events. One signal flowing ingested → resolved →
    /// scored → routed keeps one correlation id, so every stage runs its
    /// side effects once per pass no matter how many times the pass reaches
    /// it (bus redelivery, or a synchronous call racing its own bus echo).
    #[serde(default)]
    pub correlation_id: String,
    pub topic: Topic,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: PipelineEvent,
}

impl BusEvent {
    /// A root event: starts a new pipeline pass.
    pub fn new(payload: PipelineEvent) -> Self {
        let event_id = Uuid::new_v4().to_string();
        Self {
            event_id: event_id.clone(),
            correlation_id: event_id,
            topic: payload.topic(),
            event_type: payload.event_type().to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// A derived event: continues the pass identified by `correlation_id`.
    pub fn correlated(payload: PipelineEvent, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ..Self::new(payload)
        }
    }

    /// Serialize for the external mirror.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::Value::Null)
    }

    /// Deserialize an envelope received from the mirror side. Envelopes from
    /// producers that don't stamp a correlation get their own event id.
    pub fn from_wire(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut event: Self = serde_json::from_value(value.clone())?;
        if event.correlation_id.is_empty() {
            event.correlation_id = event.event_id.clone();
        }
        Ok(event)
    }
}
