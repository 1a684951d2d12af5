//! Deadline extraction from the signal data bag.

use chrono::{DateTime, NaiveDate, Utc};

use cortex_common::Signal;

/// Recognized deadline field names, in precedence order.
pub const DEADLINE_FIELDS: [&str; 9] = [
    "deadline",
    "auction_date",
    "sale_date",
    "hearing_date",
    "pdufa_date",
    "buyout_deadline",
    "response_deadline",
    "expiration_date",
    "maturity_date",
];

/// First recognized field that parses wins. Accepts RFC3339 or bare
/// `YYYY-MM-DD` (midnight UTC). Returns None when no field parses — the
/// monitor treats that as normal control flow and skips the signal.
pub fn extract_deadline(signal: &Signal) -> Option<DateTime<Utc>> {
    for field in DEADLINE_FIELDS {
        let Some(value) = signal.data.get(field) else {
            continue;
        };
        if let Some(parsed) = parse_timestamp(value) {
            return Some(parsed);
        }
    }
    None
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_common::{EntityDescriptor, EntityType, TriggerMap};

    fn signal_with_data(pairs: &[(&str, serde_json::Value)]) -> Signal {
        Signal {
            id: "sig-1".into(),
            signal_type: "foreclosure".into(),
            source: "test".into(),
            entity: EntityDescriptor {
                entity_type: EntityType::Property,
                name: "123 Main St".into(),
                identifiers: Default::default(),
            },
            triggers: TriggerMap::default(),
            data: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn precedence_prefers_deadline_over_later_fields() {
        let signal = signal_with_data(&[
            ("auction_date", serde_json::json!("2026-09-01")),
            ("deadline", serde_json::json!("2026-08-15")),
        ]);
        let deadline = extract_deadline(&signal).unwrap();
        assert_eq!(deadline.format("%Y-%m-%d").to_string(), "2026-08-15");
    }

    #[test]
    fn rfc3339_and_bare_dates_both_parse() {
        let signal = signal_with_data(&[("pdufa_date", serde_json::json!("2026-11-30T15:00:00Z"))]);
        assert!(extract_deadline(&signal).is_some());

        let signal = signal_with_data(&[("maturity_date", serde_json::json!("2027-01-01"))]);
        assert!(extract_deadline(&signal).is_some());
    }

    #[test]
    fn unparsable_field_falls_through_to_the_next() {
        let signal = signal_with_data(&[
            ("deadline", serde_json::json!("next tuesday")),
            ("sale_date", serde_json::json!("2026-10-05")),
        ]);
        let deadline = extract_deadline(&signal).unwrap();
        assert_eq!(deadline.format("%Y-%m-%d").to_string(), "2026-10-05");
    }

    #[test]
    fn missing_or_nonstring_fields_yield_none() {
        assert!(extract_deadline(&signal_with_data(&[])).is_none());
        assert!(extract_deadline(&signal_with_data(&[(
            "deadline",
            serde_json::json!(1234567890)
        )]))
        .is_none());
    }
}
