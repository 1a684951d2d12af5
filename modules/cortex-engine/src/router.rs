//! The playbook router stage: applies the decision tree to scored signals,
//! defers signals whose deciding triggers are present-but-unknown, and
//! swaps to the adjacent branch when the selected playbook's conversion
//! history is poor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cortex_bus::{BusHandler, EventBus};
use cortex_common::{
    BusEvent, CortexResult, Playbook, PipelineEvent, PlaybookRoute, ScoredSignal, SeenEvents,
    TriggerKey,
};

use crate::playbook::{
    branch_inputs, matching_branches, nominal_window, playbook_days_to_win, playbook_steps,
};

/// Conversion below this swaps to the next matching branch (when one exists).
const CONVERSION_OVERRIDE_FLOOR: f64 = 0.2;
const SEEN_EVENTS_CAP: usize = 65_536;

/// Historical conversion per playbook, fed by the outreach response stats.
pub trait ConversionStats: Send + Sync {
    /// None when no outreach for this playbook has been sent yet.
    fn conversion(&self, playbook: Playbook) -> Option<f64>;
}

/// The side channel back to the ingestor for signals that need enrichment
/// before they can be routed.
pub trait EnrichmentSink: Send + Sync {
    fn request(&self, signal_id: &str, triggers: &[TriggerKey]);
}

struct Deferred {
    scored: ScoredSignal,
    expires_at: DateTime<Utc>,
}

pub struct PlaybookRouter {
    bus: Arc<EventBus>,
    stats: Mutex<Option<Arc<dyn ConversionStats>>>,
    enrichment: Option<Arc<dyn EnrichmentSink>>,
    defer_timeout: Duration,
    deferred: Mutex<HashMap<String, Deferred>>,
    routed: AtomicU64,
    seen: Mutex<SeenEvents>,
}

impl PlaybookRouter {
    pub fn new(
        bus: Arc<EventBus>,
        enrichment: Option<Arc<dyn EnrichmentSink>>,
        defer_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            stats: Mutex::new(None),
            enrichment,
            defer_timeout,
            deferred: Mutex::new(HashMap::new()),
            routed: AtomicU64::new(0),
            seen: Mutex::new(SeenEvents::new(SEEN_EVENTS_CAP)),
        }
    }

    /// Routes published since startup (includes walk downgrades).
    pub fn routed_count(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    /// Wire the outreach stats in after construction (the generator is built
    /// later in startup order).
    pub fn set_conversion_stats(&self, stats: Arc<dyn ConversionStats>) {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner()) = Some(stats);
    }

    /// Route a scored signal. Returns None when routing is deferred pending
    /// enrichment, or when this pipeline pass was already routed (bus
    /// redelivery, or a manual ingest racing its own echo).
    pub async fn route(
        &self,
        scored: &ScoredSignal,
        correlation_id: &str,
    ) -> CortexResult<Option<PlaybookRoute>> {
        let fresh = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            seen.insert(correlation_id)
        };
        if !fresh {
            debug!(
                correlation = correlation_id,
                "Pass already routed, skipping"
            );
            return Ok(None);
        }

        let branches = matching_branches(&scored.signal, scored.score);
        let selected = branches[0];

        // Missing-data rule: a deciding trigger that is zero AND explicitly
        // null in the data bag means the upstream knew the dimension but
        // couldn't fill it. Ask for enrichment and wait.
        let unknown: Vec<TriggerKey> = branch_inputs(selected)
            .iter()
            .copied()
            .filter(|k| {
                scored.signal.triggers.get(*k) == 0.0
                    && scored.signal.data_is_unknown(&k.to_string())
            })
            .collect();
        if !unknown.is_empty() {
            let first_deferral = {
                let mut deferred = self.deferred.lock().unwrap_or_else(|e| e.into_inner());
                match deferred.entry(scored.signal.id.clone()) {
                    std::collections::hash_map::Entry::Occupied(_) => false,
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        slot.insert(Deferred {
                            scored: scored.clone(),
                            expires_at: Utc::now()
                                + chrono::Duration::from_std(self.defer_timeout)
                                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
                        });
                        true
                    }
                }
            };
            if first_deferral {
                info!(
                    signal = scored.signal.id.as_str(),
                    playbook = %selected,
                    triggers = ?unknown,
                    "Deferring route pending enrichment"
                );
                if let Some(sink) = &self.enrichment {
                    sink.request(&scored.signal.id, &unknown);
                }
            }
            return Ok(None);
        }

        // A fresh route supersedes any standing deferral for this signal
        // (the enriched re-score travels the same topic).
        self.deferred
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&scored.signal.id);

        let selected = self.apply_conversion_override(selected, &branches);
        let route = self
            .publish_route(&scored.signal.id, selected, Some(correlation_id))
            .await?;
        Ok(Some(route))
    }

    /// Score override: a selected playbook converting under the floor yields
    /// to the next branch in tree order, when one matched.
    fn apply_conversion_override(&self, selected: Playbook, branches: &[Playbook]) -> Playbook {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stats) = stats.as_ref() else {
            return selected;
        };
        let Some(conversion) = stats.conversion(selected) else {
            return selected;
        };
        if conversion < CONVERSION_OVERRIDE_FLOOR && branches.len() > 1 {
            let alternative = branches[1];
            info!(
                from = %selected,
                to = %alternative,
                conversion,
                "Conversion override engaged"
            );
            return alternative;
        }
        selected
    }

    async fn publish_route(
        &self,
        signal_id: &str,
        playbook: Playbook,
        correlation_id: Option<&str>,
    ) -> CortexResult<PlaybookRoute> {
        let (window_min_days, window_max_days) = nominal_window(playbook);
        let route = PlaybookRoute {
            signal_id: signal_id.to_string(),
            playbook,
            steps: playbook_steps(playbook),
            window_min_days,
            window_max_days,
            days_to_win: playbook_days_to_win(playbook),
        };
        let routed = PipelineEvent::PlaybookRouted {
            route: route.clone(),
        };
        match correlation_id {
            Some(correlation) => self.bus.publish_correlated(routed, correlation).await?,
            None => self.bus.publish(routed).await?,
        };
        self.routed.fetch_add(1, Ordering::Relaxed);
        Ok(route)
    }

    /// Downgrade deferred signals whose enrichment window has closed to walk.
    /// Called by the sweep task; also safe to call directly in tests.
    pub async fn expire_deferred(&self, now: DateTime<Utc>) -> CortexResult<usize> {
        let expired: Vec<Deferred> = {
            let mut deferred = self.deferred.lock().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<String> = deferred
                .iter()
                .filter(|(_, d)| d.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| deferred.remove(&id)).collect()
        };

        let count = expired.len();
        for entry in expired {
            warn!(
                signal = entry.scored.signal.id.as_str(),
                "Enrichment window closed, downgrading to walk"
            );
            self.publish_route(&entry.scored.signal.id, Playbook::Walk, None)
                .await?;
        }
        Ok(count)
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Periodic sweep for expired deferrals.
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = router.expire_deferred(Utc::now()).await {
                    warn!(error = %e, "Deferral sweep failed");
                }
            }
        })
    }
}

#[async_trait]
impl BusHandler for PlaybookRouter {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        if let PipelineEvent::SignalScored { scored } = &event.payload {
            self.route(scored, &event.correlation_id).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "playbook_router"
    }
}
