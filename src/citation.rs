//! Citation tokens inside legal text.
//!
//! Citations ("Article 21", "Article 19(1)(a)", "Section 124A", "Art. 14") must
//! survive simplification verbatim, and generated links refer to articles by
//! their number. Both needs share the patterns below.

use std::sync::LazyLock;

use regex::Regex;

// ── Regex patterns ──────────────────────────────────────────────────────

static RE_CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:article|art\.|section|sec\.)\s*\d+[A-Z]?(?:\(\w+\))*").unwrap()
});

static RE_ARTICLE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:article|art\.)\s*(\d+[A-Z]?)(?:\([^)]+\))*").unwrap()
});

static RE_BARE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+[A-Z]?)(?:\(\w+\))*").unwrap()
});

/// All citation tokens in `text`, in order of appearance, without duplicates.
pub fn extract_citations(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in RE_CITATION.find_iter(text) {
        let token = m.as_str().trim().to_string();
        if !out.contains(&token) {
            out.push(token);
        }
    }
    out
}

/// The article number mentioned in `text` ("Article 31A(1)" → "31A").
pub fn article_number(text: &str) -> Option<String> {
    RE_ARTICLE_NUMBER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
}

/// Article numbers listed after the arrow of a generated link line
/// ("Principle 2 -> Article 19(1)(a), 21" → ["19", "21"]).
pub fn linked_numbers(list: &str) -> Vec<String> {
    RE_BARE_NUMBER
        .captures_iter(list)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
        .collect()
}

/// Append every citation of `original` that `rewritten` dropped.
///
/// Returns the rewritten text unchanged when nothing was lost.
pub fn restore_citations(original: &str, rewritten: &str) -> String {
    let missing: Vec<String> = extract_citations(original)
        .into_iter()
        .filter(|c| !rewritten.contains(c.as_str()))
        .collect();
    if missing.is_empty() {
        rewritten.to_string()
    } else {
        format!("{} [{}]", rewritten.trim_end(), missing.join("; "))
    }
}
