//! The ingestor owns the registered source adapters, schedules each on its
//! own timer, and feeds normalized signals onto the bus.
//!
//! Concurrency contract: polls across adapters run concurrently; polls of the
//! same adapter never overlap (each adapter has exactly one task, and the
//! task awaits its poll before ticking again).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cortex_bus::EventBus;
use cortex_common::{CortexError, PipelineEvent, Signal};

use crate::adapter::SourceAdapter;
use crate::normalize::normalize_signal;

#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterStats {
    pub polls: u64,
    pub signals_emitted: u64,
    pub failures: u64,
}

struct Registration {
    adapter: Arc<dyn SourceAdapter>,
}

pub struct Ingestor {
    bus: Arc<EventBus>,
    max_signals_per_batch: usize,
    registrations: Mutex<Vec<Registration>>,
    stats: Arc<Mutex<HashMap<String, AdapterStats>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Ingestor {
    pub fn new(bus: Arc<EventBus>, max_signals_per_batch: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            max_signals_per_batch,
            registrations: Mutex::new(Vec::new()),
            stats: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register an adapter. Call before `start`.
    pub fn register(&self, adapter: Arc<dyn SourceAdapter>) {
        info!(
            adapter = adapter.name(),
            industry = adapter.industry(),
            cadence_secs = adapter.cadence().as_secs(),
            "Registered source adapter"
        );
        self.registrations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Registration { adapter });
    }

    /// Registered adapter names grouped by industry tag.
    pub fn industries(&self) -> HashMap<String, Vec<String>> {
        let registrations = self.registrations.lock().unwrap_or_else(|e| e.into_inner());
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for r in registrations.iter() {
            map.entry(r.adapter.industry().to_string())
                .or_default()
                .push(r.adapter.name().to_string());
        }
        map
    }

    pub fn stats(&self) -> HashMap<String, AdapterStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Spawn one timer task per registered adapter.
    pub fn start(&self) {
        let registrations = self.registrations.lock().unwrap_or_else(|e| e.into_inner());
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        for registration in registrations.iter() {
            let adapter = registration.adapter.clone();
            let bus = self.bus.clone();
            let stats = self.stats.clone();
            let max_batch = self.max_signals_per_batch;
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            tasks.push(tokio::spawn(async move {
                let cadence = adapter.cadence();
                let mut ticker = tokio::time::interval(cadence);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            poll_once(adapter.as_ref(), &bus, &stats, max_batch).await;
                        }
                        _ = shutdown_rx.changed() => {
                            debug!(adapter = adapter.name(), "Adapter timer cancelled");
                            break;
                        }
                    }
                }
            }));
        }

        info!(adapters = tasks.len(), "Ingestor started");
    }

    /// Cooperative shutdown: cancel timers, await in-flight polls up to the
    /// grace window, then force-stop.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);

        let mut tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        let drain = futures::future::join_all(tasks.iter_mut());
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Adapter polls did not finish within grace window, aborting");
            for task in &tasks {
                task.abort();
            }
        }
        info!("Ingestor stopped");
    }
}

async fn poll_once(
    adapter: &dyn SourceAdapter,
    bus: &EventBus,
    stats: &Mutex<HashMap<String, AdapterStats>>,
    max_batch: usize,
) {
    let name = adapter.name().to_string();
    bump(stats, &name, |s| s.polls += 1);

    // An adapter must not block longer than cadence×2.
    let poll_deadline = adapter.cadence() * 2;
    let batch = match tokio::time::timeout(poll_deadline, adapter.poll()).await {
        Ok(Ok(batch)) => batch,
        Ok(Err(e)) => {
            warn!(adapter = name.as_str(), error = %e, "Adapter poll failed");
            bump(stats, &name, |s| s.failures += 1);
            return;
        }
        Err(_) => {
            warn!(
                adapter = name.as_str(),
                deadline_secs = poll_deadline.as_secs(),
                "Adapter poll exceeded deadline, cancelled"
            );
            bump(stats, &name, |s| s.failures += 1);
            return;
        }
    };

    let total = batch.len();
    if total > max_batch {
        warn!(
            adapter = name.as_str(),
            emitted = total,
            cap = max_batch,
            "Adapter batch over cap, truncating"
        );
    }

    for signal in batch.into_iter().take(max_batch) {
        match ingest_one(bus, &name, signal).await {
            Ok(true) => bump(stats, &name, |s| s.signals_emitted += 1),
            Ok(false) => {}
            Err(e) => {
                // Backpressure on a pipeline topic fails this batch member
                // but never the adapter loop.
                warn!(adapter = name.as_str(), error = %e, "Signal not ingested");
                bump(stats, &name, |s| s.failures += 1);
            }
        }
    }
}

/// Publish raw, normalize, publish ingested. Validation failures drop the
/// signal and leave an audit record. Returns whether the signal made it
/// through to `signal.ingested`.
async fn ingest_one(bus: &EventBus, adapter: &str, signal: Signal) -> Result<bool, CortexError> {
    bus.publish(PipelineEvent::SignalRaw {
        signal: signal.clone(),
    })
    .await?;

    let signal_id = signal.id.clone();
    match normalize_signal(signal, chrono::Utc::now()) {
        Ok(normalized) => {
            bus.publish(PipelineEvent::SignalIngested { signal: normalized })
                .await?;
            Ok(true)
        }
        Err(e @ CortexError::Validation(_)) => {
            let _ = bus
                .publish(PipelineEvent::audit(
                    format!("ingestor/{adapter}"),
                    Some(signal_id),
                    e.kind(),
                    e.to_string(),
                ))
                .await;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn bump(
    stats: &Mutex<HashMap<String, AdapterStats>>,
    name: &str,
    f: impl FnOnce(&mut AdapterStats),
) {
    let mut guard = stats.lock().unwrap_or_else(|e| e.into_inner());
    f(guard.entry(name.to_string()).or_default());
}
