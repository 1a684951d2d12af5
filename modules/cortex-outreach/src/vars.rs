//! `{{variable}}` resolution for outreach bodies. Unknown variables are left
//! in place so a half-filled template is visible in review rather than
//! silently blank.

use std::collections::HashMap;

/// Resolve `{{var}}` placeholders from the context map.
pub fn substitute(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '{' && chars.peek() == Some(&'{') {
            chars.next();

            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') if chars.peek() == Some(&'}') => {
                        chars.next();
                        break;
                    }
                    Some(ch) => var_name.push(ch),
                    None => {
                        // Malformed; emit what we have.
                        result.push_str("{{");
                        result.push_str(&var_name);
                        return result;
                    }
                }
            }

            let var_name = var_name.trim();
            if let Some(value) = vars.get(var_name) {
                result.push_str(value);
            } else {
                result.push_str("{{");
                result.push_str(var_name);
                result.push_str("}}");
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Humanize a days-until-deadline count: "today", "tomorrow",
/// "in N days/weeks/months".
pub fn humanize_deadline(days_remaining: f64) -> String {
    if days_remaining < 1.0 {
        "today".to_string()
    } else if days_remaining < 2.0 {
        "tomorrow".to_string()
    } else if days_remaining < 14.0 {
        format!("in {} days", days_remaining.round() as i64)
    } else if days_remaining < 61.0 {
        format!("in {} weeks", (days_remaining / 7.0).round() as i64)
    } else {
        format!("in {} months", (days_remaining / 30.0).round() as i64)
    }
}

/// "$500,000" style formatting for dollar amounts.
pub fn format_dollars(value: f64) -> String {
    let whole = value.round() as i64;
    let digits = whole.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if whole < 0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}
