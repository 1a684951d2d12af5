//! The alert monitor: crosses countdown thresholds exactly once per
//! (signal, threshold), sweeps outstanding signals on a cadence so far-out
//! deadlines still alert, and garbage-collects long-past alerts while
//! keeping the dedupe record.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cortex_bus::{BusHandler, EventBus};
use cortex_common::{
    Alert, BusEvent, CortexResult, PipelineEvent, Priority, ScoredSignal, SeenEvents,
};

use crate::deadline::extract_deadline;

/// Alerts whose deadline is this far past get garbage-collected.
const GC_AFTER_DAYS: i64 = 30;
const SEEN_EVENTS_CAP: usize = 65_536;

/// Alert priority per threshold, conditioned on the signal's own priority.
fn alert_priority(threshold: u32, signal_priority: Priority) -> Priority {
    let critical_signal = signal_priority == Priority::Critical;
    match threshold {
        0..=2 => Priority::Critical,
        3..=7 => {
            if critical_signal {
                Priority::Critical
            } else {
                Priority::High
            }
        }
        8..=14 => {
            if critical_signal {
                Priority::High
            } else {
                Priority::Medium
            }
        }
        _ => Priority::Medium,
    }
}

fn action_items(threshold: u32) -> Vec<String> {
    let items: &[&str] = match threshold {
        0..=2 => &[
            "Final outreach push to the decision-maker",
            "Prepare closing documents",
            "Check in daily until the deadline",
        ],
        3..=7 => &[
            "Escalate to the deal lead",
            "Send time-sensitive outreach",
            "Line up financing and approvals",
        ],
        8..=14 => &[
            "Confirm decision-maker contact",
            "Prepare offer terms",
            "Schedule the first call",
        ],
        _ => &[
            "Review the opportunity and assign an owner",
            "Gather missing financials",
            "Draft the outreach plan",
        ],
    };
    items.iter().map(|s| s.to_string()).collect()
}

struct Outstanding {
    scored: ScoredSignal,
    deadline: DateTime<Utc>,
}

#[derive(Default)]
struct MonitorState {
    /// (signal id, threshold) pairs that have already fired. Survives GC.
    fired: HashSet<(String, u32)>,
    alerts: HashMap<uuid::Uuid, Alert>,
    /// Signals with future deadlines, re-evaluated by the sweep.
    outstanding: HashMap<String, Outstanding>,
}

pub struct AlertMonitor {
    bus: Arc<EventBus>,
    /// Thresholds in descending order.
    thresholds: Vec<u32>,
    state: Mutex<MonitorState>,
    seen: Mutex<SeenEvents>,
}

impl AlertMonitor {
    pub fn new(bus: Arc<EventBus>, mut thresholds: Vec<u32>) -> Self {
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();
        Self {
            bus,
            thresholds,
            state: Mutex::new(MonitorState::default()),
            seen: Mutex::new(SeenEvents::new(SEEN_EVENTS_CAP)),
        }
    }

    /// Evaluate one scored signal against every threshold.
    ///
    /// `correlation_id` identifies the pipeline pass: a pass is evaluated
    /// once, however many times it arrives (bus redelivery, or a manual
    /// ingest racing its own echo). A genuine re-ingest is a new pass and
    /// leaves a `duplicate_suppressed` audit record for thresholds that
    /// already fired.
    pub async fn evaluate(
        &self,
        scored: &ScoredSignal,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> CortexResult<Vec<Alert>> {
        let fresh = {
            let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
            seen.insert(correlation_id)
        };
        if !fresh {
            debug!(
                correlation = correlation_id,
                "Pass already evaluated, skipping"
            );
            return Ok(Vec::new());
        }
        self.evaluate_inner(scored, now, true, Some(correlation_id))
            .await
    }

    /// The sweep re-evaluates outstanding signals outside any pipeline pass:
    /// no correlation gate, and repeats never leave audit records.
    async fn evaluate_inner(
        &self,
        scored: &ScoredSignal,
        now: DateTime<Utc>,
        audit_repeats: bool,
        correlation_id: Option<&str>,
    ) -> CortexResult<Vec<Alert>> {
        let Some(deadline) = extract_deadline(&scored.signal) else {
            // DeadlineParse is normal control flow, never surfaced.
            debug!(signal = scored.signal.id.as_str(), "No recognized deadline, skipping");
            return Ok(Vec::new());
        };

        let days_remaining = (deadline - now).num_seconds() as f64 / 86_400.0;
        if days_remaining <= 0.0 {
            debug!(signal = scored.signal.id.as_str(), "Deadline already past, ignoring");
            return Ok(Vec::new());
        }

        let (to_fire, suppressed) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.outstanding.insert(
                scored.signal.id.clone(),
                Outstanding {
                    scored: scored.clone(),
                    deadline,
                },
            );

            let mut to_fire = Vec::new();
            let mut suppressed = 0usize;
            for &threshold in &self.thresholds {
                // Inclusive upper bound: exactly T days out fires T.
                if days_remaining > 0.0 && days_remaining <= threshold as f64 {
                    let key = (scored.signal.id.clone(), threshold);
                    if state.fired.contains(&key) {
                        suppressed += 1;
                    } else {
                        state.fired.insert(key);
                        to_fire.push(threshold);
                    }
                }
            }
            (to_fire, suppressed)
        };

        if suppressed > 0 && audit_repeats {
            let audit = PipelineEvent::audit(
                "alert_monitor",
                Some(scored.signal.id.clone()),
                "duplicate_suppressed",
                format!("{suppressed} threshold(s) already alerted for this signal"),
            );
            match correlation_id {
                Some(correlation) => self.bus.publish_correlated(audit, correlation).await?,
                None => self.bus.publish(audit).await?,
            };
        }

        let mut alerts = Vec::new();
        for threshold in to_fire {
            let alert = Alert {
                id: uuid::Uuid::new_v4(),
                signal_id: scored.signal.id.clone(),
                entity_id: scored.entity_id,
                deadline,
                threshold,
                days_remaining: days_remaining.floor() as i64,
                priority: alert_priority(threshold, scored.priority),
                message: format!(
                    "{} \"{}\": {:.0} day(s) until deadline ({})",
                    scored.signal.signal_type,
                    scored.signal.entity.name,
                    days_remaining.floor(),
                    deadline.format("%Y-%m-%d"),
                ),
                action_items: action_items(threshold),
                created_at: now,
                acknowledged: false,
            };

            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.alerts.insert(alert.id, alert.clone());
            }
            info!(
                signal = scored.signal.id.as_str(),
                threshold,
                priority = %alert.priority,
                "Alert triggered"
            );
            let triggered = PipelineEvent::AlertTriggered {
                alert: alert.clone(),
            };
            match correlation_id {
                Some(correlation) => self.bus.publish_correlated(triggered, correlation).await?,
                None => self.bus.publish(triggered).await?,
            };
            alerts.push(alert);
        }

        Ok(alerts)
    }

    /// Idempotent acknowledgement. Emits `alert.acknowledged` at most once.
    pub async fn acknowledge(&self, alert_id: uuid::Uuid) -> CortexResult<bool> {
        let signal_id = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.alerts.get_mut(&alert_id) {
                Some(alert) if !alert.acknowledged => {
                    alert.acknowledged = true;
                    Some(alert.signal_id.clone())
                }
                _ => None,
            }
        };

        match signal_id {
            Some(signal_id) => {
                self.bus
                    .publish(PipelineEvent::AlertAcknowledged {
                        alert_id,
                        signal_id,
                    })
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Unacknowledged alerts, optionally filtered by priority, ordered by
    /// deadline (days-remaining ascending).
    pub fn active_alerts(&self, priority: Option<Priority>) -> Vec<Alert> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| !a.acknowledged)
            .filter(|a| priority.map_or(true, |p| a.priority == p))
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.deadline);
        alerts
    }

    pub fn alert_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.alerts.len()
    }

    /// Re-evaluate outstanding signals (thresholds cross as time passes) and
    /// garbage-collect long-past alerts. The dedupe set is retained so a GC'd
    /// alert can never re-fire.
    pub async fn sweep(&self, now: DateTime<Utc>) -> CortexResult<usize> {
        let outstanding: Vec<ScoredSignal> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let horizon = now - ChronoDuration::days(GC_AFTER_DAYS);
            state.outstanding.retain(|_, o| o.deadline > horizon);
            state.alerts.retain(|_, a| a.deadline > horizon);
            state
                .outstanding
                .values()
                .filter(|o| o.deadline > now)
                .map(|o| o.scored.clone())
                .collect()
        };

        let mut fired = 0usize;
        for scored in outstanding {
            fired += self.evaluate_inner(&scored, now, false, None).await?.len();
        }
        if fired > 0 {
            info!(fired, "Monitor sweep fired new alerts");
        }
        Ok(fired)
    }

    /// Background sweep at the configured cadence (default every 6 hours).
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick is immediate; skip it so startup ingest settles.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = monitor.sweep(Utc::now()).await {
                    warn!(error = %e, "Alert sweep failed");
                }
            }
        })
    }
}

#[async_trait]
impl BusHandler for AlertMonitor {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        if let PipelineEvent::SignalScored { scored } = &event.payload {
            self.evaluate(scored, Utc::now(), &event.correlation_id)
                .await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "alert_monitor"
    }
}
