//! Entity resolution: identifier match, optional LLM-assisted match, fuzzy
//! name match, then create. First sufficient match wins. All writes are
//! serialized behind one lock; identifier conflicts force a merge, never a
//! silent overwrite.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use cortex_bus::{BusHandler, EventBus};
use cortex_common::normalize::{name_similarity, normalize_name};
use cortex_common::{BusEvent, CortexResult, Entity, PipelineEvent, SeenEvents, Signal};

use crate::llm::LlmMatcher;
use crate::store::{EntityStore, MergeRecord};

/// Minimum similarity for the fuzzy tier.
const FUZZY_THRESHOLD: f64 = 0.85;
/// Minimum confidence for the assisted tier.
const ASSISTED_THRESHOLD: f64 = 0.85;
/// How many canonical names the assisted tier samples.
const ASSISTED_SAMPLE: usize = 10;
/// Bounded correlation-id memory for at-least-once redelivery.
const SEEN_EVENTS_CAP: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMethod {
    Identifier,
    Assisted,
    Fuzzy,
    Created,
}

#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub entity_id: Uuid,
    pub method: ResolutionMethod,
    pub score: f64,
    /// Whether this call appended a new signal entry (false on re-delivery).
    pub appended: bool,
    pub merges: Vec<MergeRecord>,
}

pub struct EntityResolver {
    store: RwLock<EntityStore>,
    bus: Arc<EventBus>,
    matcher: Option<Arc<LlmMatcher>>,
    seen: Mutex<SeenEvents>,
}

impl EntityResolver {
    pub fn new(bus: Arc<EventBus>, matcher: Option<Arc<LlmMatcher>>) -> Self {
        Self {
            store: RwLock::new(EntityStore::new()),
            bus,
            matcher,
            seen: Mutex::new(SeenEvents::new(SEEN_EVENTS_CAP)),
        }
    }

    /// Resolve a signal to its canonical entity, publish `signal.resolved`,
    /// and audit any merges. `correlation_id` identifies the pipeline pass:
    /// resolution itself is idempotent, and the publishes happen once per
    /// pass even when a synchronous call races its own bus echo.
    pub async fn resolve(
        &self,
        signal: &Signal,
        correlation_id: &str,
    ) -> CortexResult<ResolutionOutcome> {
        // Tier 1: identifier index.
        let identifier_hit = {
            let store = self.store.read().unwrap_or_else(|e| e.into_inner());
            signal
                .entity
                .identifiers
                .iter()
                .find_map(|(k, v)| store.lookup_identifier(*k, v))
        };
        if let Some(entity_id) = identifier_hit {
            let outcome = self.attach(signal, entity_id, ResolutionMethod::Identifier, 0.99);
            return self.publish(signal, outcome, correlation_id).await;
        }

        // Tier 2: LLM-assisted (skipped silently while unhealthy).
        if let Some(matcher) = &self.matcher {
            let candidates: Vec<String> = {
                let store = self.store.read().unwrap_or_else(|e| e.into_inner());
                let mut entities: Vec<&Entity> = store.iter().collect();
                entities.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                entities
                    .iter()
                    .take(ASSISTED_SAMPLE)
                    .map(|e| e.canonical_name.clone())
                    .collect()
            };
            if let Some(response) = matcher.try_match(&signal.entity.name, candidates).await {
                if response.matched && response.confidence >= ASSISTED_THRESHOLD {
                    let suggested_hit = response.suggested_canonical_name.as_deref().and_then(
                        |suggested| {
                            let store = self.store.read().unwrap_or_else(|e| e.into_inner());
                            store.find_by_canonical_name(suggested)
                        },
                    );
                    if let Some(entity_id) = suggested_hit {
                        debug!(
                            signal = signal.id.as_str(),
                            confidence = response.confidence,
                            "Assisted match accepted"
                        );
                        let outcome = self.attach(
                            signal,
                            entity_id,
                            ResolutionMethod::Assisted,
                            response.confidence,
                        );
                        return self.publish(signal, outcome, correlation_id).await;
                    }
                }
            }
        }

        // Tier 3: fuzzy name match over canonical names and aliases.
        let fuzzy_hit = {
            let store = self.store.read().unwrap_or_else(|e| e.into_inner());
            let mut best: Option<(Uuid, f64)> = None;
            for entity in store.iter() {
                let mut score = name_similarity(&signal.entity.name, &entity.canonical_name);
                for alias in &entity.aliases {
                    score = score.max(name_similarity(&signal.entity.name, alias));
                }
                let better = match best {
                    None => score >= FUZZY_THRESHOLD,
                    Some((_, current)) => score > current,
                };
                if better && score >= FUZZY_THRESHOLD {
                    best = Some((entity.id, score));
                }
            }
            best
        };
        if let Some((entity_id, score)) = fuzzy_hit {
            let outcome = self.attach(signal, entity_id, ResolutionMethod::Fuzzy, score);
            return self.publish(signal, outcome, correlation_id).await;
        }

        // Tier 4: create, with a recheck under the write lock in case a
        // concurrent manual ingest created the same entity meanwhile.
        let outcome = {
            let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
            let recheck = signal
                .entity
                .identifiers
                .iter()
                .find_map(|(k, v)| store.lookup_identifier(*k, v))
                .or_else(|| store.find_by_alias(&normalize_name(&signal.entity.name)));

            match recheck {
                Some(entity_id) => {
                    attach_locked(&mut store, signal, entity_id, ResolutionMethod::Identifier, 0.99)
                }
                None => {
                    let entity_id = store.create(
                        signal.entity.entity_type,
                        &signal.entity.name,
                        signal.clone(),
                    );
                    info!(
                        signal = signal.id.as_str(),
                        entity = %entity_id,
                        name = signal.entity.name.as_str(),
                        "Created entity"
                    );
                    ResolutionOutcome {
                        entity_id,
                        method: ResolutionMethod::Created,
                        score: 1.0,
                        appended: true,
                        merges: Vec::new(),
                    }
                }
            }
        };
        self.publish(signal, outcome, correlation_id).await
    }

    fn attach(
        &self,
        signal: &Signal,
        entity_id: Uuid,
        method: ResolutionMethod,
        score: f64,
    ) -> ResolutionOutcome {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        attach_locked(&mut store, signal, entity_id, method, score)
    }

    async fn publish(
        &self,
        signal: &Signal,
        outcome: ResolutionOutcome,
        correlation_id: &str,
    ) -> CortexResult<ResolutionOutcome> {
        // One `signal.resolved` per pipeline pass: whichever of the direct
        // call and its bus echo gets here first wins the publish.
        let first = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            seen.insert(correlation_id)
        };
        if !first {
            debug!(
                correlation = correlation_id,
                "Resolution already published for this pass"
            );
            return Ok(outcome);
        }

        for merge in &outcome.merges {
            // audit.log is droppable; a backpressure drop never fails resolution.
            self.bus
                .publish_correlated(
                    PipelineEvent::audit(
                        "resolver",
                        Some(signal.id.clone()),
                        "duplicate_identifier_conflict",
                        format!(
                            "merged entity {} into {} ({})",
                            merge.retired, merge.survivor, merge.reason
                        ),
                    ),
                    correlation_id,
                )
                .await?;
        }

        self.bus
            .publish_correlated(
                PipelineEvent::SignalResolved {
                    signal: signal.clone(),
                    entity_id: outcome.entity_id,
                },
                correlation_id,
            )
            .await?;
        Ok(outcome)
    }

    // --- Snapshot queries (read-only, for the orchestrator) ---

    pub fn entity(&self, id: Uuid) -> Option<Entity> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        store.get(id).cloned()
    }

    /// Substring search over normalized canonical names and aliases,
    /// most recently updated first.
    pub fn search_entities(&self, query: &str, limit: usize) -> Vec<Entity> {
        let needle = normalize_name(query);
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        let mut hits: Vec<Entity> = store
            .iter()
            .filter(|e| {
                needle.is_empty()
                    || normalize_name(&e.canonical_name).contains(&needle)
                    || e.aliases.iter().any(|a| a.contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        hits.truncate(limit);
        hits
    }

    /// The entity's signals in observation order.
    pub fn timeline(&self, entity_id: Uuid) -> Vec<Signal> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        store
            .get(entity_id)
            .map(|e| e.signals.clone())
            .unwrap_or_default()
    }

    pub fn entity_count(&self) -> usize {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        store.len()
    }
}

/// Append a signal to an entity, absorbing its identifiers. Any identifier
/// already bound to a different entity forces a merge; the surviving id is
/// re-resolved after each merge so chained conflicts settle.
fn attach_locked(
    store: &mut EntityStore,
    signal: &Signal,
    entity_id: Uuid,
    method: ResolutionMethod,
    score: f64,
) -> ResolutionOutcome {
    let mut target = store.canonical_id(entity_id);
    let mut merges = Vec::new();

    for (key, value) in &signal.entity.identifiers {
        loop {
            match store.bind_identifier(target, *key, value) {
                Ok(()) => break,
                Err(other) => {
                    match store.merge(target, other, &format!("identifier {key}={value}")) {
                        Some(record) => {
                            target = record.survivor;
                            merges.push(record);
                        }
                        None => break,
                    }
                }
            }
        }
    }

    let appended = store.append_signal(target, signal.clone());
    ResolutionOutcome {
        entity_id: store.canonical_id(target),
        method,
        score,
        appended,
        merges,
    }
}

#[async_trait]
impl BusHandler for EntityResolver {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        if let PipelineEvent::SignalIngested { signal } = &event.payload {
            // Cheap pre-check; resolve() re-checks atomically before it
            // publishes, so racing the manual-ingest path is still safe.
            let done = {
                let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
                seen.contains(&event.correlation_id)
            };
            if done {
                debug!(
                    correlation = event.correlation_id.as_str(),
                    "Pass already resolved, skipping"
                );
                return Ok(());
            }
            self.resolve(signal, &event.correlation_id).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "resolver"
    }
}
