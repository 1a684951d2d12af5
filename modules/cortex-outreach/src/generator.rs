//! Outreach generation: template selection by recorded conversion, variable
//! substitution, and A/B variants. Listens for critical alerts; transports
//! are external subscribers on `outreach.generated`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use cortex_alerts::extract_deadline;
use cortex_bus::{BusHandler, EventBus};
use cortex_common::{
    BusEvent, CortexResult, Outreach, OutreachChannel, PipelineEvent, Playbook, Priority,
    ScoredSignal, SeenEvents, TriggerKey,
};
use cortex_engine::ConversionStats;

use crate::stats::ResponseStats;
use crate::templates::{builtin_templates, OutreachTemplate};
use crate::vars::{format_dollars, humanize_deadline, substitute};

const SEEN_EVENTS_CAP: usize = 65_536;

pub struct OutreachGenerator {
    bus: Arc<EventBus>,
    templates: Vec<OutreachTemplate>,
    stats: Arc<ResponseStats>,
    default_channel: OutreachChannel,
    seen: Mutex<SeenEvents>,
    /// Scored signals by id, kept so alert-driven generation has the full
    /// signal at hand (the alert carries only references).
    recent: Mutex<HashMap<String, ScoredSignal>>,
    generated: AtomicU64,
}

impl OutreachGenerator {
    pub fn new(bus: Arc<EventBus>, default_channel: OutreachChannel) -> Self {
        Self {
            bus,
            templates: builtin_templates(),
            stats: Arc::new(ResponseStats::new()),
            default_channel,
            seen: Mutex::new(SeenEvents::new(SEEN_EVENTS_CAP)),
            recent: Mutex::new(HashMap::new()),
            generated: AtomicU64::new(0),
        }
    }

    /// Outreach messages published since startup.
    pub fn generated_count(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Arc<ResponseStats> {
        Arc::clone(&self.stats)
    }

    pub fn record_response(&self, template_id: &str, responded: bool) {
        self.stats.record_response(template_id, responded);
    }

    /// Best template for (signal type, channel): highest recorded conversion
    /// among matches, else the channel's generic fallback.
    fn select_template(&self, signal_type: &str, channel: OutreachChannel) -> &OutreachTemplate {
        let best_match = self
            .templates
            .iter()
            .filter(|t| t.channel == channel && t.signal_type.as_deref() == Some(signal_type))
            .max_by(|a, b| {
                self.stats
                    .conversion(&a.id)
                    .total_cmp(&self.stats.conversion(&b.id))
            });

        best_match.unwrap_or_else(|| {
            self.templates
                .iter()
                .filter(|t| t.channel == channel && t.signal_type.is_none())
                .max_by(|a, b| {
                    self.stats
                        .conversion(&a.id)
                        .total_cmp(&self.stats.conversion(&b.id))
                })
                .expect("builtin catalog has a fallback per channel")
        })
    }

    fn variables(&self, scored: &ScoredSignal) -> HashMap<&'static str, String> {
        let signal = &scored.signal;
        let now = Utc::now();

        let mut vars: HashMap<&'static str, String> = HashMap::new();
        vars.insert("entityName", signal.entity.name.clone());

        if let Some(deadline) = extract_deadline(signal) {
            let days = (deadline - now).num_seconds() as f64 / 86_400.0;
            vars.insert("deadline", humanize_deadline(days.max(0.0)));
            vars.insert("daysRemaining", format!("{}", days.round().max(0.0) as i64));
        } else {
            vars.insert("deadline", "soon".to_string());
            vars.insert("daysRemaining", "—".to_string());
        }

        vars.insert(
            "urgencyScore",
            format!("{}", signal.triggers.urgency.round() as i64),
        );

        let value = signal
            .data_f64("property_value")
            .or_else(|| signal.data_f64("market_value"))
            .or_else(|| signal.data_f64("value"));
        if let Some(value) = value {
            vars.insert("value", format_dollars(value));
        }

        let industry = signal
            .data
            .get("industry")
            .and_then(|v| v.as_str())
            .unwrap_or(&signal.source);
        vars.insert("industry", industry.to_string());

        let location = signal
            .data
            .get("location")
            .or_else(|| signal.data.get("county"))
            .and_then(|v| v.as_str())
            .unwrap_or(&signal.entity.name);
        vars.insert("location", location.to_string());

        vars.insert("painPoint", pain_point(signal.triggers.dominant().0));
        vars.insert("solution", solution(scored.playbook));
        vars
    }

    /// Generate one outreach for a scored signal on the given channel.
    pub fn generate(&self, scored: &ScoredSignal, channel: OutreachChannel) -> Outreach {
        self.generate_variant(scored, channel, 0)
    }

    fn generate_variant(
        &self,
        scored: &ScoredSignal,
        channel: OutreachChannel,
        variant: usize,
    ) -> Outreach {
        let template = self.select_template(&scored.signal.signal_type, channel);
        let vars = self.variables(scored);

        // Variant n rotates the interior paragraphs; opener and closer stay
        // put so the message still reads as intended.
        let mut paragraphs = template.paragraphs.clone();
        if variant > 0 && paragraphs.len() > 3 {
            let interior = &mut paragraphs[1..];
            let last = interior.len() - 1;
            let body = &mut interior[..last];
            body.rotate_left(variant % body.len().max(1));
        }

        let body = paragraphs
            .iter()
            .map(|p| substitute(p, &vars))
            .collect::<Vec<_>>()
            .join("\n\n");

        Outreach {
            template_id: template.id.clone(),
            channel,
            subject: template.subject.as_deref().map(|s| substitute(s, &vars)),
            body,
            estimated_conversion: self.stats.conversion(&template.id),
        }
    }

    /// n generations with permuted interior ordering, for experimentation.
    pub fn generate_variants(
        &self,
        scored: &ScoredSignal,
        channel: OutreachChannel,
        n: usize,
    ) -> Vec<Outreach> {
        (0..n)
            .map(|i| self.generate_variant(scored, channel, i))
            .collect()
    }

    /// Generate on the default channel and publish `outreach.generated`.
    pub async fn generate_and_publish(
        &self,
        scored: &ScoredSignal,
        channel: Option<OutreachChannel>,
    ) -> CortexResult<Outreach> {
        let channel = channel.unwrap_or(self.default_channel);
        let outreach = self.generate(scored, channel);
        self.bus
            .publish(PipelineEvent::OutreachGenerated {
                signal_id: scored.signal.id.clone(),
                outreach: outreach.clone(),
            })
            .await?;
        self.generated.fetch_add(1, Ordering::Relaxed);
        Ok(outreach)
    }

    /// Remember a scored signal so later alerts can reach its full payload.
    pub fn remember(&self, scored: &ScoredSignal) {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.insert(scored.signal.id.clone(), scored.clone());
    }

    fn recall(&self, signal_id: &str) -> Option<ScoredSignal> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.get(signal_id).cloned()
    }
}

fn pain_point(dominant: TriggerKey) -> String {
    match dominant {
        TriggerKey::Urgency => "a hard deadline closing in",
        TriggerKey::FinancialStress => "mounting financial pressure",
        TriggerKey::OperationalDisruption => "operational gaps from recent departures",
        TriggerKey::CompetitiveThreat => "competitors moving on the same ground",
        TriggerKey::RegulatoryRisk => "regulatory exposure on the horizon",
        TriggerKey::Strategic => "a strategic window that won't stay open",
    }
    .to_string()
}

fn solution(playbook: Playbook) -> String {
    match playbook {
        Playbook::Rescue => "a fast cash resolution before the deadline",
        Playbook::Buy => "a straightforward acquisition conversation",
        Playbook::Partner => "a partnership that plugs the gap without a hiring cycle",
        Playbook::Refinance => "restructured financing that relieves the pressure",
        Playbook::Litigate => "a legal strategy with experienced counsel",
        Playbook::Walk => "keeping a line open in case the picture changes",
    }
    .to_string()
}

#[async_trait]
impl BusHandler for OutreachGenerator {
    async fn handle(&self, event: BusEvent) -> anyhow::Result<()> {
        match &event.payload {
            // Track scored signals so alert-driven generation has full context.
            PipelineEvent::SignalScored { scored } => {
                self.remember(scored);
            }
            PipelineEvent::AlertTriggered { alert } if alert.priority == Priority::Critical => {
                let fresh = {
                    let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
                    seen.insert(&event.event_id)
                };
                if !fresh {
                    return Ok(());
                }
                match self.recall(&alert.signal_id) {
                    Some(scored) => {
                        self.generate_and_publish(&scored, None).await?;
                    }
                    None => {
                        debug!(
                            signal = alert.signal_id.as_str(),
                            "Critical alert for unknown signal, no outreach generated"
                        );
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "outreach"
    }
}

impl ConversionStats for OutreachGenerator {
    fn conversion(&self, playbook: Playbook) -> Option<f64> {
        self.stats.aggregate(
            self.templates
                .iter()
                .filter(|t| t.playbook == Some(playbook))
                .map(|t| t.id.as_str()),
        )
    }
}
