//! The playbook decision tree and the fixed step catalogs. Pure functions —
//! the router stage layers deferral and override logic on top.

use cortex_common::{Playbook, PlaybookStep, Signal, TriggerKey};

fn step(action: &str, estimated_hours: f64) -> PlaybookStep {
    PlaybookStep {
        action: action.to_string(),
        estimated_hours,
    }
}

/// Nominal calendar window in days for each playbook.
pub fn nominal_window(playbook: Playbook) -> (u32, u32) {
    match playbook {
        Playbook::Rescue => (7, 14),
        Playbook::Buy => (60, 90),
        Playbook::Partner => (90, 120),
        Playbook::Refinance => (30, 60),
        Playbook::Litigate => (120, 240),
        Playbook::Walk => (0, 0),
    }
}

/// Days-to-win re-derived from the window midpoint; never below 1 so the
/// `ln(D+1)` horizon stays meaningful.
pub fn playbook_days_to_win(playbook: Playbook) -> u32 {
    let (min, max) = nominal_window(playbook);
    ((min + max) / 2).max(1)
}

pub fn playbook_steps(playbook: Playbook) -> Vec<PlaybookStep> {
    match playbook {
        Playbook::Rescue => vec![
            step("Research distress context and decision chain", 4.0),
            step("Contact decision-maker directly", 2.0),
            step("Present fast cash offer at 70-80% FMV", 3.0),
            step("Send urgency reminder ahead of deadline", 1.0),
            step("Close", 8.0),
        ],
        Playbook::Buy => vec![
            step("Full financial analysis", 16.0),
            step("Warm introduction through shared contact", 2.0),
            step("Strategic pitch meeting", 4.0),
            step("Due diligence", 40.0),
            step("Negotiate terms", 12.0),
            step("Close", 8.0),
        ],
        Playbook::Partner => vec![
            step("Identify operating pain points", 6.0),
            step("Solution pitch", 4.0),
            step("Run 90-day pilot", 20.0),
            step("Convert to long-term agreement", 6.0),
        ],
        Playbook::Refinance => vec![
            step("Debt stack and covenant review", 8.0),
            step("Term sheet with bridge options", 6.0),
            step("Lender syndication", 10.0),
            step("Close refinancing", 6.0),
        ],
        Playbook::Litigate => vec![
            step("Case merit assessment with counsel", 10.0),
            step("Preserve evidence and file", 12.0),
            step("Discovery", 60.0),
            step("Settle or try", 40.0),
        ],
        Playbook::Walk => Vec::new(),
    }
}

/// Triggers each branch's predicate reads. Used by the missing-data rule: a
/// zero that the data bag marks present-but-unknown defers routing.
pub fn branch_inputs(playbook: Playbook) -> &'static [TriggerKey] {
    match playbook {
        Playbook::Rescue => &[TriggerKey::Urgency, TriggerKey::FinancialStress],
        Playbook::Buy => &[TriggerKey::FinancialStress],
        Playbook::Partner => &[TriggerKey::OperationalDisruption],
        Playbook::Refinance => &[TriggerKey::FinancialStress, TriggerKey::RegulatoryRisk],
        Playbook::Litigate | Playbook::Walk => &[],
    }
}

fn branch_matches(playbook: Playbook, signal: &Signal, score: u32) -> bool {
    let t = &signal.triggers;
    match playbook {
        Playbook::Rescue => t.urgency >= 80.0 && t.financial_stress >= 70.0,
        Playbook::Buy => score >= 700 && t.financial_stress < 40.0,
        Playbook::Partner => t.operational_disruption >= 60.0,
        Playbook::Refinance => t.financial_stress >= 60.0 && t.regulatory_risk >= 40.0,
        Playbook::Litigate => {
            matches!(signal.signal_type.as_str(), "lawsuit" | "statute_of_limitations")
        }
        Playbook::Walk => true,
    }
}

const TREE_ORDER: [Playbook; 6] = [
    Playbook::Rescue,
    Playbook::Buy,
    Playbook::Partner,
    Playbook::Refinance,
    Playbook::Litigate,
    Playbook::Walk,
];

/// All branches that match, in tree order. Never empty — walk always matches.
pub fn matching_branches(signal: &Signal, score: u32) -> Vec<Playbook> {
    TREE_ORDER
        .iter()
        .copied()
        .filter(|p| branch_matches(*p, signal, score))
        .collect()
}

/// First matching branch.
pub fn select(signal: &Signal, score: u32) -> Playbook {
    matching_branches(signal, score)[0]
}
