//! Deterministic scoring. A pure function over (trigger map, observed-at,
//! now, active weights, provisional days-to-win): same inputs, same score,
//! within floating tolerance, forever.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use cortex_bus::{BusHandler, EventBus};
use cortex_common::{
    BusEvent, CortexResult, PipelineEvent, Priority, ScoredSignal, SeenEvents, Signal, TriggerKey,
    TriggerMap,
};

use crate::playbook;
use crate::weights::WeightVector;

/// Days-to-win before the router assigns a playbook window. The score keeps
/// this provisional value even after routing re-derives the estimate.
pub const PROVISIONAL_DAYS_TO_WIN: u32 = 30;

/// Time-decay floor. Old signals never decay past this.
const DECAY_FLOOR: f64 = 0.2;
/// Decay time constant in days.
const DECAY_TAU_DAYS: f64 = 14.0;

const SEEN_EVENTS_CAP: usize = 65_536;

/// Priority bands over the [0,1000] score.
pub fn priority_for_score(score: u32) -> Priority {
    match score {
        800.. => Priority::Critical,
        600..=799 => Priority::High,
        400..=599 => Priority::Medium,
        _ => Priority::Low,
    }
}

/// Probability-to-win: weighted average of trigger values / 100.
fn probability(triggers: &TriggerMap, weights: &WeightVector) -> f64 {
    let weighted: f64 = TriggerKey::ALL
        .iter()
        .map(|k| triggers.get(*k) * weights.get(*k))
        .sum();
    (weighted / weights.sum() / 100.0).clamp(0.0, 1.0)
}

/// Time decay: exp(−Δdays/14) with a mandatory floor of 0.2.
fn decay(observed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let delta_days = ((now - observed_at).num_seconds().max(0)) as f64 / 86_400.0;
    (-(delta_days / DECAY_TAU_DAYS)).exp().max(DECAY_FLOOR)
}

/// Raw weighted trigger sum. Urgency enters squared on both sides.
fn trigger_sum(triggers: &TriggerMap, weights: &WeightVector) -> f64 {
    triggers.urgency.powi(2) * weights.urgency.powi(2)
        + triggers.financial_stress * weights.financial_stress
        + triggers.operational_disruption * weights.operational_disruption
        + triggers.competitive_threat * weights.competitive_threat
        + triggers.regulatory_risk * weights.regulatory_risk
        + triggers.strategic * weights.strategic
}

/// The score formula:
/// `clamp(P · ln(max(D,1)+1) · L · S · δ, 0, 1000)`, rounded to integer.
pub fn compute_score(
    triggers: &TriggerMap,
    weights: &WeightVector,
    observed_at: DateTime<Utc>,
    now: DateTime<Utc>,
    days_to_win: u32,
) -> (u32, f64) {
    let p = probability(triggers, weights);
    let horizon = ((days_to_win.max(1) + 1) as f64).ln();
    let lift = 1.0
        + triggers
            .financial_stress
            .max(triggers.operational_disruption)
            / 100.0;
    let s = trigger_sum(triggers, weights);
    let d = decay(observed_at, now);

    let raw = p * horizon * lift * s * d;
    (raw.clamp(0.0, 1000.0).round() as u32, p)
}

pub struct ScoringEngine {
    weights: RwLock<WeightVector>,
    bus: Arc<EventBus>,
    seen: Mutex<SeenEvents>,
}

impl ScoringEngine {
    pub fn new(bus: Arc<EventBus>, weights: WeightVector) -> Self {
        Self {
            weights: RwLock::new(weights),
            bus,
            seen: Mutex::new(SeenEvents::new(SEEN_EVENTS_CAP)),
        }
    }

    pub fn weights(&self) -> WeightVector {
        *self.weights.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Swap in new weights atomically. Single-writer; every scoring call
    /// after the swap sees the full new vector. Previously scored signals are
    /// not re-scored.
    pub fn update_weights(&self, updates: &BTreeMap<TriggerKey, f64>) {
        let mut weights = self.weights.write().unwrap_or_else(|e| e.into_inner());
        *weights = weights.with_overrides(updates);
        debug!(?weights, "Scoring weights updated");
    }

    /// Score a resolved signal against the active weights.
    pub fn score(&self, signal: &Signal, entity_id: Uuid, now: DateTime<Utc>) -> ScoredSignal {
        let weights = self.weights();
        let (score, probability_to_win) = compute_score(
            &signal.triggers,
            &weights,
            signal.observed_at,
            now,
            PROVISIONAL_DAYS_TO_WIN,
        );
        let priority = priority_for_score(score);
        let playbook = playbook::select(signal, score);

        ScoredSignal {
            signal: signal.clone(),
            entity_id,
            score,
            probability_to_win,
            days_to_win: PROVISIONAL_DAYS_TO_WIN,
            priority,
            playbook,
        }
    }

    /// Score and publish `signal.scored`. Scoring is pure and always runs;
    /// the publish happens once per pipeline pass, so a synchronous call and
    /// its own bus echo produce a single scored event.
    pub async fn score_and_publish(
        &self,
        signal: &Signal,
        entity_id: Uuid,
        correlation_id: &str,
    ) -> CortexResult<ScoredSignal> {
        let scored = self.score(signal, entity_id, Utc::now());
        let first = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            seen.insert(correlation_id)
        };
        if first {
            self.bus
                .publish_correlated(
                    PipelineEvent::SignalScored {
                        scored: scored.clone(),
                    },
                    correlation_id,
                )
                .await?;
        } else {
            debug!(
                correlation = correlation_id,
                "Score already published for this pass"
            );
        }
        Ok(scored)
    }
}

#[async_trait]
impl BusHandler for ScoringEngine {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        if let PipelineEvent::SignalResolved { signal, entity_id } = &event.payload {
            self.score_and_publish(signal, *entity_id, &event.correlation_id)
                .await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "scoring"
    }
}
