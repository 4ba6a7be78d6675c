//! Heuristic 0–10 scoring of catalogue candidates against a letter product.

use strsim::jaro_winkler;

use crate::filters::{mentions_device, SearchFilters};
use crate::models::{LetterProduct, ProductCandidate};

pub const MAX_SCORE: f64 = 10.0;

const IDENTIFIER_EXACT: f64 = 4.0;
const IDENTIFIER_PARTIAL: f64 = 2.0;
const RANGE_EXACT: f64 = 3.0;
const RANGE_FUZZY: f64 = 1.5;
const SUBRANGE_EXACT: f64 = 1.5;
const SUBRANGE_FUZZY: f64 = 0.75;
const STATUS_ALIGNED: f64 = 1.0;
const DEVICE_TYPE_AGREES: f64 = 0.5;
const FUZZY_THRESHOLD: f64 = 0.88;
/// Shortest identifier that may earn partial credit as a prefix of the other.
const MIN_PARTIAL_ID_LEN: usize = 4;

/// Coarse lifecycle reading of a letter status or catalogue commercial status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Ending,
    Unknown,
}

/// Interpret free-text lifecycle wording from a letter or the catalogue.
///
/// Catalogue statuses look like `"08-Commercialised"` or
/// `"19-end of commercialization"`; letter statuses are whatever the model wrote.
pub fn lifecycle(status: &str) -> Lifecycle {
    let s = status.to_lowercase();
    const ENDING: &[&str] = &[
        "end of", "end-of", "end_of", "obsolete", "withdraw", "discontinu",
        "phase out", "phase-out", "eol", "no longer",
    ];
    if ENDING.iter().any(|k| s.contains(k)) {
        return Lifecycle::Ending;
    }
    if s.contains("commerciali") || s.contains("active") || s.contains("available") {
        return Lifecycle::Active;
    }
    Lifecycle::Unknown
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn fuzzy_eq(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a) || jaro_winkler(&a, &b) >= FUZZY_THRESHOLD
}

/// One identifier extends the other, e.g. `PIX2B` and `PIX2B-1250`.
fn identifier_prefix(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().count() >= MIN_PARTIAL_ID_LEN && long.starts_with(short)
}

fn label_score(wanted: Option<&str>, actual: Option<&str>, exact: f64, fuzzy: f64) -> f64 {
    match (wanted, actual) {
        (Some(w), Some(a)) if eq_ignore_case(w, a) => exact,
        (Some(w), Some(a)) if fuzzy_eq(w, a) => fuzzy,
        _ => 0.0,
    }
}

/// Score one candidate on the 0–10 scale.
pub fn score_candidate(
    product: &LetterProduct,
    filters: &SearchFilters,
    candidate: &ProductCandidate,
) -> f64 {
    let mut score = 0.0;

    if let Some(id) = filters.product_identifier.as_deref() {
        let cand = candidate.product_identifier.trim().to_lowercase();
        let wanted = id.trim().to_lowercase();
        if cand == wanted {
            score += IDENTIFIER_EXACT;
        } else if identifier_prefix(&cand, &wanted) {
            score += IDENTIFIER_PARTIAL;
        }
    }

    score += label_score(
        filters.range_label.as_deref(),
        candidate.range_label.as_deref(),
        RANGE_EXACT,
        RANGE_FUZZY,
    );
    score += label_score(
        filters.subrange_label.as_deref(),
        candidate.subrange_label.as_deref(),
        SUBRANGE_EXACT,
        SUBRANGE_FUZZY,
    );

    if let (Some(letter_status), Some(cand_status)) = (
        product.obsolescence_status.as_deref(),
        candidate.commercial_status.as_deref(),
    ) {
        let wanted = lifecycle(letter_status);
        if wanted != Lifecycle::Unknown && wanted == lifecycle(cand_status) {
            score += STATUS_ALIGNED;
        }
    }

    if let Some(device) = filters.device_type.as_deref() {
        let in_label = candidate
            .devicetype_label
            .as_deref()
            .is_some_and(|d| mentions_device(d, device));
        if in_label {
            score += DEVICE_TYPE_AGREES;
        }
    }

    score.min(MAX_SCORE)
}

/// Score every candidate, drop zero scores, and sort best first.
///
/// Ties break on product identifier so the order is deterministic.
pub fn rank_candidates(
    product: &LetterProduct,
    filters: &SearchFilters,
    candidates: Vec<ProductCandidate>,
) -> Vec<ProductCandidate> {
    let mut ranked: Vec<ProductCandidate> = candidates
        .into_iter()
        .map(|mut c| {
            c.match_score = score_candidate(product, filters, &c);
            c
        })
        .filter(|c| c.match_score > 0.0)
        .collect();

    ranked.sort_by(|a, b| {
        b.match_score
            .partial_cmp(&a.match_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.product_identifier.cmp(&b.product_identifier))
    });
    ranked
}
