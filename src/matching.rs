//! LLM arbitration over the ranked candidate shortlist.
//!
//! The database stage over-selects on purpose; the model sees the
//! letter product and the top candidates and returns the subset that truly
//! matches. Any failure here yields an empty result, never an error.

use serde::Deserialize;
use std::collections::HashMap;

use crate::llm::{parse_json_payload, LlmClient};
use crate::models::{lenient_f64, lenient_string, LetterProduct, ProductCandidate, ProductMatch};

const SYSTEM_PROMPT: &str = "You are a Schneider Electric product catalogue expert. \
Given a product withdrawn by an obsolescence letter and a list of catalogue candidates, \
select only the candidates that are the same product family and device type. \
Answer with strictly valid JSON.";

#[derive(Deserialize)]
struct RawArbitration {
    #[serde(default)]
    matches: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawMatch {
    #[serde(default, deserialize_with = "lenient_string")]
    product_identifier: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    technical_match_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    nomenclature_match_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    product_line_match_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    reason: Option<String>,
}

fn unit(score: Option<f64>) -> f64 {
    score.unwrap_or(0.0).clamp(0.0, 1.0)
}

/// Render the letter product as prompt text.
pub fn describe_product(product: &LetterProduct) -> String {
    let mut lines = Vec::new();
    let fields = [
        ("Product identifier", &product.product_identifier),
        ("Range", &product.range_label),
        ("Subrange", &product.subrange_label),
        ("Product line", &product.product_line),
        ("Description", &product.product_description),
        ("Obsolescence status", &product.obsolescence_status),
        ("End of service", &product.end_of_service_date),
    ];
    for (label, value) in fields {
        if let Some(v) = value {
            lines.push(format!("{}: {}", label, v));
        }
    }
    if !product.technical_specifications.is_empty() {
        let specs = product
            .technical_specifications
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        lines.push(format!("Technical specifications: {}", specs));
    }
    lines.join("\n")
}

/// One line per candidate, numbered from 1.
pub fn format_candidates(candidates: &[ProductCandidate]) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "{}. {} | range: {} | subrange: {} | device: {} | status: {} | PL: {} | score: {:.1}/10 | {}",
                i + 1,
                c.product_identifier,
                c.range_label.as_deref().unwrap_or("-"),
                c.subrange_label.as_deref().unwrap_or("-"),
                c.devicetype_label.as_deref().unwrap_or("-"),
                c.commercial_status.as_deref().unwrap_or("-"),
                c.pl_services.as_deref().unwrap_or("-"),
                c.match_score,
                c.product_description.as_deref().unwrap_or(""),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(product: &LetterProduct, shortlist: &[ProductCandidate]) -> String {
    format!(
        "LETTER PRODUCT\n{}\n\nCATALOGUE CANDIDATES\n{}\n\n\
         Return JSON: {{\"matches\": [{{\"product_identifier\": \"...\", \"confidence\": 0.0, \
         \"technical_match_score\": 0.0, \"nomenclature_match_score\": 0.0, \
         \"product_line_match_score\": 0.0, \"reason\": \"...\"}}]}}\n\
         All scores are between 0 and 1. Only include candidates from the list above. \
         Return an empty list when nothing matches.",
        describe_product(product),
        format_candidates(shortlist)
    )
}

/// Turn an arbitration reply into confirmed matches.
///
/// Matches below `min_confidence` or naming identifiers outside the
/// shortlist are dropped; duplicates keep the highest confidence. A malformed
/// entry is skipped without discarding the rest of the reply.
pub fn parse_matches(
    reply: &str,
    shortlist: &[ProductCandidate],
    min_confidence: f64,
) -> anyhow::Result<Vec<ProductMatch>> {
    let value = parse_json_payload(reply)?;
    let raw: RawArbitration = serde_json::from_value(value)?;

    let known: HashMap<String, &ProductCandidate> = shortlist
        .iter()
        .map(|c| (c.product_identifier.to_uppercase(), c))
        .collect();

    let entries = match raw.matches {
        Some(serde_json::Value::Array(entries)) => entries,
        _ => Vec::new(),
    };

    let mut best: HashMap<String, ProductMatch> = HashMap::new();
    for entry in entries {
        let m = match serde_json::from_value::<RawMatch>(entry) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed match entry");
                continue;
            }
        };
        let Some(id) = m.product_identifier else {
            continue;
        };
        let Some(candidate) = known.get(&id.to_uppercase()) else {
            tracing::debug!(id = %id, "model named a product outside the shortlist");
            continue;
        };
        let confidence = unit(m.confidence);
        if confidence < min_confidence {
            continue;
        }
        let confirmed = ProductMatch {
            product_identifier: candidate.product_identifier.clone(),
            confidence,
            technical_match_score: unit(m.technical_match_score),
            nomenclature_match_score: unit(m.nomenclature_match_score),
            product_line_match_score: unit(m.product_line_match_score),
            reason: m.reason,
            candidate_score: candidate.match_score,
        };
        match best.get(&confirmed.product_identifier) {
            Some(existing) if existing.confidence >= confirmed.confidence => {}
            _ => {
                best.insert(confirmed.product_identifier.clone(), confirmed);
            }
        }
    }

    let mut matches: Vec<ProductMatch> = best.into_values().collect();
    matches.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.product_identifier.cmp(&b.product_identifier))
    });
    Ok(matches)
}

/// Ask the model which of the top `shortlist_len` ranked candidates match.
///
/// LLM or parse failures are logged and produce an empty result.
pub async fn arbitrate(
    llm: &dyn LlmClient,
    product: &LetterProduct,
    ranked: &[ProductCandidate],
    shortlist_len: usize,
    min_confidence: f64,
) -> Vec<ProductMatch> {
    let shortlist = &ranked[..ranked.len().min(shortlist_len)];
    if shortlist.is_empty() {
        return Vec::new();
    }

    let prompt = build_prompt(product, shortlist);
    let reply = match llm.complete(SYSTEM_PROMPT, &prompt).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(product = %product.label(), error = %e, "arbitration call failed");
            return Vec::new();
        }
    };

    match parse_matches(&reply, shortlist, min_confidence) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!(product = %product.label(), error = %e, "arbitration reply unparseable");
            Vec::new()
        }
    }
}
