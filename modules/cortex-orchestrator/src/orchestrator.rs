//! The process-level coordinator: builds every component, wires the bus
//! subscriptions, runs the background sweeps, and exposes the read-only
//! query surface plus the synchronous manual-ingest path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cortex_alerts::AlertMonitor;
use cortex_bus::{EventBus, Mirror};
use cortex_common::{
    Alert, Config, CortexError, CortexResult, Entity, PipelineEvent, Priority, RetryPolicy,
    ScoredSignal, Signal, TriggerKey,
};
use cortex_engine::{EnrichmentSink, PlaybookRouter, ScoringEngine, WeightVector};
use cortex_ingest::{
    normalize_signal, CourtDocketAdapter, HttpFeed, Ingestor, RegulatoryCalendarAdapter,
    TalentTrackerAdapter,
};
use cortex_outreach::OutreachGenerator;
use cortex_resolver::{EntityResolver, HttpMatchClient, LlmMatcher};

use crate::store::{Collection, Store};

/// Request deadline for adapter feeds and the LLM resolver.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a deferred route waits for enrichment before walking.
const ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Cadence of the deferred-route sweep.
const DEFERRAL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Cadence of the LLM resolver health probe.
const LLM_PROBE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Metrics {
    pub entities: usize,
    pub alerts: usize,
    pub playbooks: u64,
    pub outreach: u64,
}

/// An enrichment request raised by the playbook router. The receiving end
/// belongs to whatever upstream can fill the gap; the orchestrator drains and
/// logs them when nothing else does.
#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub signal_id: String,
    pub triggers: Vec<TriggerKey>,
}

struct ChannelEnrichmentSink {
    tx: mpsc::UnboundedSender<EnrichmentRequest>,
}

impl EnrichmentSink for ChannelEnrichmentSink {
    fn request(&self, signal_id: &str, triggers: &[TriggerKey]) {
        let _ = self.tx.send(EnrichmentRequest {
            signal_id: signal_id.to_string(),
            triggers: triggers.to_vec(),
        });
    }
}

pub struct Orchestrator {
    config: Config,
    bus: Arc<EventBus>,
    ingestor: Arc<Ingestor>,
    resolver: Arc<EntityResolver>,
    scoring: Arc<ScoringEngine>,
    router: Arc<PlaybookRouter>,
    monitor: Arc<AlertMonitor>,
    outreach: Arc<OutreachGenerator>,
    store: Arc<dyn Store>,
    enrichment_rx: Mutex<Option<mpsc::UnboundedReceiver<EnrichmentRequest>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build and wire components A–H. The mirror is optional so tests and
    /// single-process deployments can run without Redis.
    pub fn build(
        config: Config,
        mirror: Option<Arc<dyn Mirror>>,
        store: Arc<dyn Store>,
    ) -> CortexResult<Self> {
        let bus = Arc::new(EventBus::new(
            config.bus_queue_capacity,
            Duration::from_secs(config.publish_timeout_secs),
        ));
        if let Some(mirror) = mirror {
            bus.attach_mirror(mirror, RetryPolicy::default());
        }

        let matcher = if config.llm_resolver_enabled {
            let client = HttpMatchClient::new(
                &config.llm_resolver_base_url,
                &config.llm_resolver_model,
                HTTP_TIMEOUT,
            )
            .map_err(|e| CortexError::Config(format!("llm resolver client: {e}")))?;
            Some(Arc::new(LlmMatcher::new(
                Arc::new(client),
                config.llm_resolver_model.clone(),
            )))
        } else {
            None
        };

        let resolver = Arc::new(EntityResolver::new(bus.clone(), matcher.clone()));
        let scoring = Arc::new(ScoringEngine::new(
            bus.clone(),
            WeightVector::default().with_overrides(&config.scoring_weights),
        ));

        let (enrichment_tx, enrichment_rx) = mpsc::unbounded_channel();
        let router = Arc::new(PlaybookRouter::new(
            bus.clone(),
            Some(Arc::new(ChannelEnrichmentSink { tx: enrichment_tx })),
            ENRICHMENT_TIMEOUT,
        ));
        let monitor = Arc::new(AlertMonitor::new(
            bus.clone(),
            config.alert_thresholds.clone(),
        ));
        let outreach = Arc::new(OutreachGenerator::new(
            bus.clone(),
            config.default_outreach_channel,
        ));
        router.set_conversion_stats(outreach.clone());

        let ingestor = Arc::new(Ingestor::new(bus.clone(), config.max_signals_per_batch));
        register_adapters(&config, &ingestor)?;

        // Handler chain: ingested → resolver → scored → (alerts, playbooks)
        // → outreach. No component listens to its own emissions.
        bus.subscribe(cortex_common::Topic::SignalIngested, resolver.clone());
        bus.subscribe(cortex_common::Topic::SignalResolved, scoring.clone());
        bus.subscribe(cortex_common::Topic::SignalScored, monitor.clone());
        bus.subscribe(cortex_common::Topic::SignalScored, router.clone());
        bus.subscribe(cortex_common::Topic::SignalScored, outreach.clone());
        bus.subscribe(cortex_common::Topic::AlertTriggered, outreach.clone());

        let orchestrator = Self {
            config,
            bus,
            ingestor,
            resolver,
            scoring,
            router,
            monitor,
            outreach,
            store,
            enrichment_rx: Mutex::new(Some(enrichment_rx)),
            background: Mutex::new(Vec::new()),
        };

        if let Some(matcher) = matcher {
            orchestrator
                .background
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(matcher.start_health_probe(LLM_PROBE_INTERVAL));
        }

        Ok(orchestrator)
    }

    /// Start adapters and background sweeps.
    pub fn start(&self) {
        self.ingestor.start();

        let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
        background.push(self.monitor.start_sweep(Duration::from_secs(
            self.config.alert_check_interval_hours * 3600,
        )));
        background.push(self.router.start_sweep(DEFERRAL_SWEEP_INTERVAL));

        // Drain enrichment requests. In a full deployment an upstream
        // enricher owns this receiver; standalone, the requests are logged
        // and the router's timeout downgrades the deferred routes.
        if let Some(mut rx) = self
            .enrichment_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            background.push(tokio::spawn(async move {
                while let Some(request) = rx.recv().await {
                    debug!(
                        signal = request.signal_id.as_str(),
                        triggers = ?request.triggers,
                        "Enrichment requested"
                    );
                }
            }));
        }

        info!(
            industries = ?self.ingestor.industries().keys().collect::<Vec<_>>(),
            "Orchestrator started"
        );
    }

    /// Synchronous ingest: validate → resolve → score → alert check → route,
    /// returning the scored signal. Events are still published on the bus,
    /// but the call does not wait for mirror acknowledgement.
    ///
    /// The published `signal.ingested` event and the direct calls below share
    /// one correlation id, so the bus-dispatched handlers recognize this pass
    /// as already processed — each stage runs exactly once per ingest.
    pub async fn ingest(&self, raw: Signal) -> CortexResult<ScoredSignal> {
        let now = Utc::now();
        let signal = match normalize_signal(raw, now) {
            Ok(signal) => signal,
            Err(e) => {
                let _ = self
                    .bus
                    .publish(PipelineEvent::audit(
                        "orchestrator",
                        None,
                        e.kind(),
                        e.to_string(),
                    ))
                    .await;
                return Err(e);
            }
        };

        let root = self
            .bus
            .publish(PipelineEvent::SignalIngested {
                signal: signal.clone(),
            })
            .await?;
        let correlation = root.correlation_id;

        let outcome = self.resolver.resolve(&signal, &correlation).await?;
        let scored = self
            .scoring
            .score_and_publish(&signal, outcome.entity_id, &correlation)
            .await?;
        // Hand the scored context to the outreach generator before any alert
        // for it can fire.
        self.outreach.remember(&scored);
        self.monitor.evaluate(&scored, now, &correlation).await?;
        self.router.route(&scored, &correlation).await?;

        self.persist(&scored).await;
        Ok(scored)
    }

    /// Best-effort snapshot persistence through the opaque store.
    async fn persist(&self, scored: &ScoredSignal) {
        if let Some(entity) = self.resolver.entity(scored.entity_id) {
            let key = entity.id.to_string();
            if let Ok(value) = serde_json::to_value(&entity) {
                if let Err(e) = self.store.put(Collection::Entities, &key, value).await {
                    warn!(error = %e, "Entity snapshot not persisted");
                }
            }
        }
        for alert in self.monitor.active_alerts(None) {
            if alert.signal_id != scored.signal.id {
                continue;
            }
            let key = alert.id.to_string();
            if let Ok(value) = serde_json::to_value(&alert) {
                if let Err(e) = self.store.put(Collection::Alerts, &key, value).await {
                    warn!(error = %e, "Alert snapshot not persisted");
                }
            }
        }
    }

    // --- Query surface (read-only; used by the external HTTP layer) ---

    pub fn search_entities(&self, query: &str, limit: usize) -> Vec<Entity> {
        self.resolver.search_entities(query, limit)
    }

    pub fn get_entity_timeline(&self, entity_id: Uuid) -> Vec<Signal> {
        self.resolver.timeline(entity_id)
    }

    pub fn get_active_alerts(&self, priority: Option<Priority>) -> Vec<Alert> {
        self.monitor.active_alerts(priority)
    }

    pub fn get_metrics(&self) -> Metrics {
        Metrics {
            entities: self.resolver.entity_count(),
            alerts: self.monitor.alert_count(),
            playbooks: self.router.routed_count(),
            outreach: self.outreach.generated_count(),
        }
    }

    pub async fn acknowledge_alert(&self, alert_id: Uuid) -> CortexResult<bool> {
        self.monitor.acknowledge(alert_id).await
    }

    pub fn update_weights(&self, updates: &std::collections::BTreeMap<TriggerKey, f64>) {
        self.scoring.update_weights(updates);
    }

    pub fn record_response(&self, template_id: &str, responded: bool) {
        self.outreach.record_response(template_id, responded);
    }

    pub fn outreach(&self) -> &OutreachGenerator {
        &self.outreach
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Graceful shutdown: stop adapters, drain in-flight events up to the
    /// grace window, close the mirror path.
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        self.ingestor.shutdown(grace).await;

        let background: Vec<JoinHandle<()>> = {
            let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in background {
            handle.abort();
        }

        self.bus.shutdown(grace).await;
        info!("Orchestrator stopped");
    }
}

fn register_adapters(config: &Config, ingestor: &Ingestor) -> CortexResult<()> {
    let cadence = |minutes: Option<u64>| {
        Duration::from_secs(minutes.unwrap_or(config.ingest_interval_minutes) * 60)
    };

    if config.court_docket.enabled {
        if let Some(url) = config.court_docket.feed_url.as_deref() {
            let feed = HttpFeed::new(url, HTTP_TIMEOUT)
                .map_err(|e| CortexError::Config(format!("court docket feed: {e}")))?;
            ingestor.register(Arc::new(CourtDocketAdapter::new(
                Arc::new(feed),
                cadence(config.court_docket.cadence_minutes),
            )));
        }
    }
    if config.regulatory_calendar.enabled {
        if let Some(url) = config.regulatory_calendar.feed_url.as_deref() {
            let feed = HttpFeed::new(url, HTTP_TIMEOUT)
                .map_err(|e| CortexError::Config(format!("regulatory calendar feed: {e}")))?;
            ingestor.register(Arc::new(RegulatoryCalendarAdapter::new(
                Arc::new(feed),
                cadence(config.regulatory_calendar.cadence_minutes),
            )));
        }
    }
    if config.talent_tracker.enabled {
        if let Some(url) = config.talent_tracker.feed_url.as_deref() {
            let feed = HttpFeed::new(url, HTTP_TIMEOUT)
                .map_err(|e| CortexError::Config(format!("talent tracker feed: {e}")))?;
            ingestor.register(Arc::new(TalentTrackerAdapter::new(
                Arc::new(feed),
                cadence(config.talent_tracker.cadence_minutes),
            )));
        }
    }
    Ok(())
}
