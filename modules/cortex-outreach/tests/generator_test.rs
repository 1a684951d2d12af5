//! Template selection, substitution, variants, and the critical-alert path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use cortex_bus::{BusHandler, EventBus};
use cortex_common::{
    Alert, BusEvent, EntityDescriptor, EntityType, OutreachChannel, PipelineEvent, Playbook,
    Priority, ScoredSignal, Signal, Topic, TriggerMap,
};
use cortex_engine::ConversionStats;
use cortex_outreach::OutreachGenerator;

fn scored_foreclosure(days_out: i64, value: f64) -> ScoredSignal {
    let mut data = serde_json::Map::new();
    data.insert(
        "auction_date".into(),
        serde_json::Value::String((Utc::now() + ChronoDuration::days(days_out)).to_rfc3339()),
    );
    data.insert("property_value".into(), serde_json::json!(value));
    ScoredSignal {
        signal: Signal {
            id: "sig-1".into(),
            signal_type: "foreclosure".into(),
            source: "court_docket".into(),
            entity: EntityDescriptor {
                entity_type: EntityType::Property,
                name: "123 Main St".into(),
                identifiers: Default::default(),
            },
            triggers: TriggerMap {
                urgency: 90.0,
                financial_stress: 85.0,
                ..Default::default()
            },
            data,
            observed_at: Utc::now(),
        },
        entity_id: Uuid::new_v4(),
        score: 920,
        probability_to_win: 0.7,
        days_to_win: 30,
        priority: Priority::Critical,
        playbook: Playbook::Rescue,
    }
}

fn bus() -> Arc<EventBus> {
    Arc::new(EventBus::new(64, Duration::from_secs(1)))
}

#[test]
fn foreclosure_email_fills_deadline_and_value() {
    let generator = OutreachGenerator::new(bus(), OutreachChannel::Email);
    let outreach = generator.generate(&scored_foreclosure(5, 500_000.0), OutreachChannel::Email);

    assert!(outreach.template_id.starts_with("foreclosure-email"));
    assert_eq!(outreach.channel, OutreachChannel::Email);
    assert!(outreach.subject.is_some());
    assert!(
        outreach.body.contains("5 days") || outreach.body.contains("in 5 days"),
        "body should humanize the 5-day deadline: {}",
        outreach.body
    );
    assert!(
        outreach.body.contains("$500,000") || outreach.body.contains("123 Main St"),
        "body should carry the property value or address: {}",
        outreach.body
    );
    assert!(!outreach.body.contains("{{"), "unresolved vars: {}", outreach.body);
    assert_eq!(outreach.estimated_conversion, 0.5);
}

#[test]
fn unknown_signal_type_falls_back_to_the_channel_generic() {
    let generator = OutreachGenerator::new(bus(), OutreachChannel::Email);
    let mut scored = scored_foreclosure(5, 0.0);
    scored.signal.signal_type = "mystery_event".into();

    let outreach = generator.generate(&scored, OutreachChannel::Sms);
    assert_eq!(outreach.template_id, "generic-sms");
}

#[test]
fn selection_prefers_the_template_with_better_conversion() {
    let generator = OutreachGenerator::new(bus(), OutreachChannel::Email);

    // Direct template converts poorly, advisor converts well.
    for _ in 0..10 {
        generator.record_response("foreclosure-email-direct", false);
        generator.record_response("foreclosure-email-advisor", true);
    }

    let outreach = generator.generate(&scored_foreclosure(5, 0.0), OutreachChannel::Email);
    assert_eq!(outreach.template_id, "foreclosure-email-advisor");
    assert_eq!(outreach.estimated_conversion, 1.0);
}

#[test]
fn variants_permute_interior_paragraphs() {
    let generator = OutreachGenerator::new(bus(), OutreachChannel::Email);
    // Steer selection to the four-paragraph direct template so there is
    // interior to permute.
    generator.record_response("foreclosure-email-direct", true);
    let variants =
        generator.generate_variants(&scored_foreclosure(5, 500_000.0), OutreachChannel::Email, 3);

    assert_eq!(variants.len(), 3);
    assert!(variants.iter().all(|v| v.template_id == variants[0].template_id));
    // The 4-paragraph foreclosure template has enough interior to permute.
    assert_ne!(variants[0].body, variants[1].body);
    // Same sentences, different order.
    let mut lines_a: Vec<&str> = variants[0].body.split("\n\n").collect();
    let mut lines_b: Vec<&str> = variants[1].body.split("\n\n").collect();
    lines_a.sort();
    lines_b.sort();
    assert_eq!(lines_a, lines_b);
}

#[test]
fn playbook_conversion_rolls_up_template_stats() {
    let generator = OutreachGenerator::new(bus(), OutreachChannel::Email);
    assert_eq!(generator.conversion(Playbook::Rescue), None);

    generator.record_response("foreclosure-email-direct", true);
    generator.record_response("foreclosure-sms-short", false);
    assert_eq!(generator.conversion(Playbook::Rescue), Some(0.5));
    assert_eq!(generator.conversion(Playbook::Litigate), None);
}

struct Collector {
    events: Mutex<Vec<BusEvent>>,
}

#[async_trait]
impl BusHandler for Collector {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

fn alert_for(scored: &ScoredSignal, priority: Priority) -> Alert {
    Alert {
        id: Uuid::new_v4(),
        signal_id: scored.signal.id.clone(),
        entity_id: scored.entity_id,
        deadline: Utc::now() + ChronoDuration::days(5),
        threshold: 7,
        days_remaining: 5,
        priority,
        message: "test".into(),
        action_items: vec![],
        created_at: Utc::now(),
        acknowledged: false,
    }
}

#[tokio::test]
async fn critical_alert_generates_outreach_on_the_default_channel() {
    let bus = bus();
    let collector = Arc::new(Collector {
        events: Mutex::new(Vec::new()),
    });
    bus.subscribe(Topic::OutreachGenerated, collector.clone());

    let generator = Arc::new(OutreachGenerator::new(bus.clone(), OutreachChannel::Email));
    let scored = scored_foreclosure(5, 500_000.0);

    // The generator watches signal.scored for context, then alert.triggered.
    generator
        .handle(BusEvent::new(PipelineEvent::SignalScored {
            scored: scored.clone(),
        }))
        .await
        .unwrap();
    generator
        .handle(BusEvent::new(PipelineEvent::AlertTriggered {
            alert: alert_for(&scored, Priority::Critical),
        }))
        .await
        .unwrap();
    // Non-critical alerts generate nothing.
    generator
        .handle(BusEvent::new(PipelineEvent::AlertTriggered {
            alert: alert_for(&scored, Priority::Medium),
        }))
        .await
        .unwrap();

    bus.shutdown(Duration::from_secs(2)).await;
    let events = collector.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    match &events[0].payload {
        PipelineEvent::OutreachGenerated { signal_id, outreach } => {
            assert_eq!(signal_id, "sig-1");
            assert_eq!(outreach.channel, OutreachChannel::Email);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_alert_delivery_generates_once() {
    let bus = bus();
    let collector = Arc::new(Collector {
        events: Mutex::new(Vec::new()),
    });
    bus.subscribe(Topic::OutreachGenerated, collector.clone());

    let generator = Arc::new(OutreachGenerator::new(bus.clone(), OutreachChannel::Email));
    let scored = scored_foreclosure(5, 0.0);
    generator
        .handle(BusEvent::new(PipelineEvent::SignalScored {
            scored: scored.clone(),
        }))
        .await
        .unwrap();

    let event = BusEvent::new(PipelineEvent::AlertTriggered {
        alert: alert_for(&scored, Priority::Critical),
    });
    generator.handle(event.clone()).await.unwrap();
    generator.handle(event).await.unwrap();

    bus.shutdown(Duration::from_secs(2)).await;
    assert_eq!(collector.events.lock().unwrap().len(), 1);
}
