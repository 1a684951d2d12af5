use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cortex_common::TriggerKey;

/// The active scoring weights. Urgency enters the trigger sum squared (both
/// the trigger and its weight), which is why its weight dominates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub urgency: f64,
    pub financial_stress: f64,
    pub operational_disruption: f64,
    pub competitive_threat: f64,
    pub regulatory_risk: f64,
    pub strategic: f64,
}

impl Default for WeightVector {
    fn default() -> Self {
        Self {
            urgency: 2.5,
            financial_stress: 1.8,
            operational_disruption: 1.5,
            competitive_threat: 1.2,
            regulatory_risk: 1.2,
            strategic: 1.2,
        }
    }
}

impl WeightVector {
    pub fn get(&self, key: TriggerKey) -> f64 {
        match key {
            TriggerKey::Urgency => self.urgency,
            TriggerKey::FinancialStress => self.financial_stress,
            TriggerKey::OperationalDisruption => self.operational_disruption,
            TriggerKey::CompetitiveThreat => self.competitive_threat,
            TriggerKey::RegulatoryRisk => self.regulatory_risk,
            TriggerKey::Strategic => self.strategic,
        }
    }

    pub fn set(&mut self, key: TriggerKey, value: f64) {
        match key {
            TriggerKey::Urgency => self.urgency = value,
            TriggerKey::FinancialStress => self.financial_stress = value,
            TriggerKey::OperationalDisruption => self.operational_disruption = value,
            TriggerKey::CompetitiveThreat => self.competitive_threat = value,
            TriggerKey::RegulatoryRisk => self.regulatory_risk = value,
            TriggerKey::Strategic => self.strategic = value,
        }
    }

    pub fn sum(&self) -> f64 {
        TriggerKey::ALL.iter().map(|k| self.get(*k)).sum()
    }

    /// Apply partial overrides (config or `update_weights` calls).
    pub fn with_overrides(mut self, overrides: &BTreeMap<TriggerKey, f64>) -> Self {
        for (key, value) in overrides {
            self.set(*key, *value);
        }
        self
    }
}
