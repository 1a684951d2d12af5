//! Ingestor scheduling and normalization behavior against stub adapters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use cortex_bus::{BusHandler, EventBus};
use cortex_common::{
    BusEvent, EntityDescriptor, EntityType, PipelineEvent, Signal, Topic, TriggerMap,
};
use cortex_ingest::{Ingestor, SourceAdapter};

fn signal(id: &str) -> Signal {
    Signal {
        id: id.into(),
        signal_type: "foreclosure".into(),
        source: "stub".into(),
        entity: EntityDescriptor {
            entity_type: EntityType::Property,
            name: "123 Main St".into(),
            identifiers: BTreeMap::new(),
        },
        triggers: TriggerMap::default(),
        data: serde_json::Map::new(),
        observed_at: Utc::now(),
    }
}

struct StubAdapter {
    name: String,
    batch: Vec<Signal>,
    polls: AtomicU64,
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn industry(&self) -> &str {
        "test"
    }

    fn cadence(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn poll(&self) -> anyhow::Result<Vec<Signal>> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        // Unique ids per poll so every batch member is observable.
        Ok(self
            .batch
            .iter()
            .cloned()
            .map(|mut s| {
                s.id = format!("{}-poll{}", s.id, n);
                s
            })
            .collect())
    }
}

struct FailingAdapter;

#[async_trait]
impl SourceAdapter for FailingAdapter {
    fn name(&self) -> &str {
        "broken"
    }

    fn industry(&self) -> &str {
        "test"
    }

    fn cadence(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn poll(&self) -> anyhow::Result<Vec<Signal>> {
        anyhow::bail!("upstream exploded")
    }
}

struct Collector {
    topic: Topic,
    seen: Mutex<Vec<BusEvent>>,
}

impl Collector {
    fn new(topic: Topic) -> Arc<Self> {
        Arc::new(Self {
            topic,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl BusHandler for Collector {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        assert_eq!(event.topic, self.topic);
        self.seen.lock().unwrap().push(event);
        Ok(())
    }
}

#[tokio::test]
async fn adapter_signals_flow_raw_then_ingested() {
    let bus = Arc::new(EventBus::new(64, Duration::from_secs(1)));
    let raw = Collector::new(Topic::SignalRaw);
    let ingested = Collector::new(Topic::SignalIngested);
    bus.subscribe(Topic::SignalRaw, raw.clone());
    bus.subscribe(Topic::SignalIngested, ingested.clone());

    let ingestor = Ingestor::new(bus.clone(), 100);
    ingestor.register(Arc::new(StubAdapter {
        name: "stub".into(),
        batch: vec![signal("a"), signal("b")],
        polls: AtomicU64::new(0),
    }));
    ingestor.start();

    tokio::time::sleep(Duration::from_millis(120)).await;
    ingestor.shutdown(Duration::from_secs(2)).await;
    bus.shutdown(Duration::from_secs(2)).await;

    assert!(raw.count() >= 2, "raw events: {}", raw.count());
    assert_eq!(raw.count(), ingested.count());
    let stats = ingestor.stats();
    assert!(stats["stub"].polls >= 1);
    assert_eq!(stats["stub"].signals_emitted as usize, ingested.count());
}

#[tokio::test]
async fn invalid_signals_are_dropped_with_an_audit_record() {
    let bus = Arc::new(EventBus::new(64, Duration::from_secs(1)));
    let ingested = Collector::new(Topic::SignalIngested);
    let audit = Collector::new(Topic::AuditLog);
    bus.subscribe(Topic::SignalIngested, ingested.clone());
    bus.subscribe(Topic::AuditLog, audit.clone());

    let mut bad = signal("bad");
    bad.id = "   ".into();

    let ingestor = Ingestor::new(bus.clone(), 100);
    ingestor.register(Arc::new(StubAdapter {
        name: "stub".into(),
        batch: vec![bad, signal("ok")],
        polls: AtomicU64::new(0),
    }));
    ingestor.start();

    tokio::time::sleep(Duration::from_millis(80)).await;
    ingestor.shutdown(Duration::from_secs(2)).await;
    bus.shutdown(Duration::from_secs(2)).await;

    assert!(audit.count() >= 1, "expected a validation audit record");
    let audit_events = audit.seen.lock().unwrap();
    match &audit_events[0].payload {
        PipelineEvent::AuditLog { kind, .. } => assert_eq!(kind, "validation"),
        other => panic!("unexpected payload: {other:?}"),
    }
    // Only the valid signal made it through per poll.
    assert!(ingested.count() >= 1);
}

#[tokio::test]
async fn oversized_batches_are_truncated_to_the_cap() {
    let bus = Arc::new(EventBus::new(256, Duration::from_secs(1)));
    let ingested = Collector::new(Topic::SignalIngested);
    bus.subscribe(Topic::SignalIngested, ingested.clone());

    let batch: Vec<Signal> = (0..10).map(|i| signal(&format!("s{i}"))).collect();
    let ingestor = Ingestor::new(bus.clone(), 3);
    ingestor.register(Arc::new(StubAdapter {
        name: "stub".into(),
        batch,
        polls: AtomicU64::new(0),
    }));
    ingestor.start();

    tokio::time::sleep(Duration::from_millis(60)).await;
    ingestor.shutdown(Duration::from_secs(2)).await;
    bus.shutdown(Duration::from_secs(2)).await;

    let stats = ingestor.stats();
    let polls = stats["stub"].polls;
    assert_eq!(stats["stub"].signals_emitted, polls * 3);
}

#[tokio::test]
async fn one_broken_adapter_does_not_stop_the_others() {
    let bus = Arc::new(EventBus::new(64, Duration::from_secs(1)));
    let ingested = Collector::new(Topic::SignalIngested);
    bus.subscribe(Topic::SignalIngested, ingested.clone());

    let ingestor = Ingestor::new(bus.clone(), 100);
    ingestor.register(Arc::new(FailingAdapter));
    ingestor.register(Arc::new(StubAdapter {
        name: "healthy".into(),
        batch: vec![signal("ok")],
        polls: AtomicU64::new(0),
    }));
    ingestor.start();

    tokio::time::sleep(Duration::from_millis(120)).await;
    ingestor.shutdown(Duration::from_secs(2)).await;
    bus.shutdown(Duration::from_secs(2)).await;

    let stats = ingestor.stats();
    assert!(stats["broken"].failures >= 1);
    assert!(stats["healthy"].signals_emitted >= 1);
    assert!(ingested.count() >= 1);
}

#[tokio::test]
async fn shutdown_stops_polling() {
    let bus = Arc::new(EventBus::new(64, Duration::from_secs(1)));
    let ingestor = Ingestor::new(bus.clone(), 100);
    let adapter = Arc::new(StubAdapter {
        name: "stub".into(),
        batch: vec![signal("s")],
        polls: AtomicU64::new(0),
    });
    ingestor.register(adapter.clone());
    ingestor.start();

    tokio::time::sleep(Duration::from_millis(60)).await;
    ingestor.shutdown(Duration::from_secs(2)).await;
    let polls_at_shutdown = adapter.polls.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(adapter.polls.load(Ordering::SeqCst), polls_at_shutdown);
    bus.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn industries_group_registered_adapters() {
    let bus = Arc::new(EventBus::new(64, Duration::from_secs(1)));
    let ingestor = Ingestor::new(bus, 100);
    ingestor.register(Arc::new(StubAdapter {
        name: "stub".into(),
        batch: vec![],
        polls: AtomicU64::new(0),
    }));
    ingestor.register(Arc::new(FailingAdapter));

    let industries = ingestor.industries();
    assert_eq!(industries["test"].len(), 2);
}
