//! Signal normalization and validation, applied to every raw signal before it
//! is published to `signal.ingested` (bus path and manual ingest both).

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use cortex_common::{CortexError, CortexResult, Signal};

/// Timestamps further ahead than this are treated as malformed rather than
/// merely optimistic.
const MAX_FUTURE_SKEW_HOURS: i64 = 24;

/// Trim string fields, clamp triggers, and validate the invariants a signal
/// must hold before entering the pipeline. Malformed signals are dropped by
/// the caller with an `audit.log` record.
pub fn normalize_signal(mut signal: Signal, now: DateTime<Utc>) -> CortexResult<Signal> {
    signal.id = signal.id.trim().to_string();
    signal.signal_type = signal.signal_type.trim().to_string();
    signal.source = signal.source.trim().to_string();
    signal.entity.name = signal.entity.name.trim().to_string();

    if signal.id.is_empty() {
        return Err(CortexError::Validation("signal id is empty".into()));
    }
    if signal.signal_type.is_empty() {
        return Err(CortexError::Validation(format!(
            "signal {} has no type tag",
            signal.id
        )));
    }
    if signal.entity.name.is_empty() {
        return Err(CortexError::Validation(format!(
            "signal {} has no entity name",
            signal.id
        )));
    }
    if signal.observed_at > now + ChronoDuration::hours(MAX_FUTURE_SKEW_HOURS) {
        return Err(CortexError::Validation(format!(
            "signal {} observed_at {} is in the future",
            signal.id, signal.observed_at
        )));
    }

    signal.entity.identifiers = signal
        .entity
        .identifiers
        .into_iter()
        .filter_map(|(k, v)| {
            let v = v.trim().to_string();
            (!v.is_empty()).then_some((k, v))
        })
        .collect();

    signal.triggers = signal.triggers.clamped();

    Ok(signal)
}
