//! Per-template response counters. Conversion = responded/sent, defaulting
//! to 0.5 for templates with no sends yet (so new templates aren't starved
//! by selection).

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateCounts {
    pub sent: u64,
    pub responded: u64,
}

#[derive(Default)]
pub struct ResponseStats {
    counts: Mutex<HashMap<String, TemplateCounts>>,
}

impl ResponseStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome for a template.
    pub fn record_response(&self, template_id: &str, responded: bool) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counts.entry(template_id.to_string()).or_default();
        entry.sent += 1;
        if responded {
            entry.responded += 1;
        }
    }

    pub fn conversion(&self, template_id: &str) -> f64 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        match counts.get(template_id) {
            Some(c) if c.sent > 0 => c.responded as f64 / c.sent as f64,
            _ => 0.5,
        }
    }

    pub fn counts(&self, template_id: &str) -> TemplateCounts {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.get(template_id).copied().unwrap_or_default()
    }

    /// (sent, responded) across a set of templates; None when nothing was
    /// sent. Used for per-playbook conversion roll-ups.
    pub fn aggregate<'a>(&self, template_ids: impl Iterator<Item = &'a str>) -> Option<f64> {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let mut sent = 0u64;
        let mut responded = 0u64;
        for id in template_ids {
            if let Some(c) = counts.get(id) {
                sent += c.sent;
                responded += c.responded;
            }
        }
        (sent > 0).then(|| responded as f64 / sent as f64)
    }

    pub fn total_sent(&self) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.values().map(|c| c.sent).sum()
    }
}
