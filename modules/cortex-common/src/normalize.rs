//! Name normalization and similarity, shared by the resolver and the entity
//! alias sets. Aliases are always stored in normalized form.

use std::sync::LazyLock;

use regex::Regex;

static PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a display name: lowercase, punctuation stripped, whitespace
/// collapsed to single spaces.
///
/// ```
/// assert_eq!(cortex_common::normalize::normalize_name("Apple, Inc."), "apple inc");
/// assert_eq!(cortex_common::normalize::normalize_name("  123  Main   St "), "123 main st");
/// ```
pub fn normalize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = PUNCT_RE.replace_all(&lowered, "");
    WS_RE.replace_all(stripped.trim(), " ").into_owned()
}

/// Similarity in [0,1] between two names after normalization:
/// `1 − levenshtein(a,b) / max(|a|,|b|)`. Empty-vs-empty is 1.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(&a, &b);
    1.0 - distance as f64 / max_len as f64
}
