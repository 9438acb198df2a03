//! Resource name normalization and similarity

use regex::Regex;
use std::sync::LazyLock;

/// Trailing segments that providers and templates append: hex hashes and
/// timestamps, e.g. `web-sg-0a1b2c3d4e` or `db-20240105`.
// Both patterns are literals; `expect` only fires on a typo here.
static GENERATED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[-_.](?:[0-9a-f]{8,}|\d{8,}))+$").expect("suffix pattern is valid")
});

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-_.:/]+").expect("separator pattern is valid"));

/// Lowercase, drop generated suffixes, fold separators away
pub fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let stripped = GENERATED_SUFFIX.replace(&lowered, "");
    let base = if stripped.is_empty() {
        lowered.as_str()
    } else {
        stripped.as_ref()
    };
    SEPARATORS.replace_all(base, "").into_owned()
}

/// Normalized Levenshtein similarity of the normalized names, 0.0..=1.0.
/// Two empty names never match.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}
