//! Core data models used throughout SE Letters.
//!
//! These types represent the letters, extracted product references, catalogue
//! candidates, and confirmed matches that flow through the processing pipeline.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Processing outcome recorded on a letter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LetterStatus {
    Processed,
    Failed,
}

impl LetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LetterStatus::Processed => "processed",
            LetterStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processed" => Some(LetterStatus::Processed),
            "failed" => Some(LetterStatus::Failed),
            _ => None,
        }
    }
}

/// A source document as stored in the letters database.
#[derive(Debug, Clone, Serialize)]
pub struct Letter {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_hash: String,
    pub content_type: String,
    pub document_title: Option<String>,
    pub document_type: Option<String>,
    pub document_number: Option<String>,
    /// As written by the model, normally `YYYY-MM-DD`.
    pub publication_date: Option<String>,
    pub language: Option<String>,
    pub status: LetterStatus,
    pub extraction_confidence: f64,
    pub processing_time_ms: i64,
    pub raw_llm_json: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One product reference extracted from a letter.
///
/// Deserialized directly from the model's JSON, so every field tolerates
/// absence and `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LetterProduct {
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_identifier: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub range_label: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub subrange_label: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub product_line: Option<String>,
    #[serde(
        default,
        alias = "description",
        deserialize_with = "lenient_string"
    )]
    pub product_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_map")]
    pub technical_specifications: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub obsolescence_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub end_of_service_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub replacement_suggestions: Vec<String>,
}

impl LetterProduct {
    /// True when the reference carries anything the catalogue search can use.
    pub fn is_searchable(&self) -> bool {
        [
            &self.product_identifier,
            &self.range_label,
            &self.subrange_label,
            &self.product_description,
        ]
        .iter()
        .any(|f| f.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    /// Short human label: identifier, else range, else description.
    pub fn label(&self) -> String {
        self.product_identifier
            .as_deref()
            .or(self.range_label.as_deref())
            .or(self.product_description.as_deref())
            .unwrap_or("(unnamed product)")
            .to_string()
    }
}

/// A letter product as persisted, with its row id.
#[derive(Debug, Clone, Serialize)]
pub struct StoredLetterProduct {
    pub id: String,
    pub letter_id: String,
    pub position: i64,
    #[serde(flatten)]
    pub product: LetterProduct,
}

/// A catalogue row considered as a possible match.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProductCandidate {
    pub product_identifier: String,
    pub product_type: Option<String>,
    pub product_description: Option<String>,
    pub brand_code: Option<String>,
    pub brand_label: Option<String>,
    pub range_code: Option<String>,
    pub range_label: Option<String>,
    pub subrange_code: Option<String>,
    pub subrange_label: Option<String>,
    pub devicetype_label: Option<String>,
    pub commercial_status: Option<String>,
    pub end_of_production_date: Option<String>,
    pub end_of_service_date: Option<String>,
    pub pl_services: Option<String>,
    /// Database-stage heuristic score on a 0–10 scale.
    pub match_score: f64,
}

/// LLM-confirmed association between a letter product and a catalogue row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductMatch {
    pub product_identifier: String,
    pub confidence: f64,
    pub technical_match_score: f64,
    pub nomenclature_match_score: f64,
    pub product_line_match_score: f64,
    pub reason: Option<String>,
    pub candidate_score: f64,
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| value_to_string(&v)))
}

pub(crate) fn lenient_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    if let Some(serde_json::Value::Object(map)) = value {
        for (k, v) in map {
            if let Some(s) = value_to_string(&v) {
                out.insert(k, s);
            }
        }
    }
    Ok(out)
}

pub(crate) fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => {
            items.iter().filter_map(value_to_string).collect()
        }
        Some(other) => value_to_string(&other).into_iter().collect(),
        None => Vec::new(),
    })
}

/// A number, or a string holding one. Anything else reads as absent.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite()))
}

/// Render a scalar-ish JSON value as text. Empty strings and nulls become `None`.
fn value_to_string(value: &serde_json::Value) -> Option<String> {
    let s = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(value_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_product_tolerates_loose_json() {
        let json = serde_json::json!({
            "product_identifier": "LC1D09",
            "range_label": " TeSys D ",
            "subrange_label": "",
            "description": "Contactor 9A",
            "technical_specifications": { "voltage": 400, "poles": "3", "aux": null },
            "replacement_suggestions": "LC1D09BD",
            "obsolescence_status": null
        });
        let p: LetterProduct = serde_json::from_value(json).unwrap();
        assert_eq!(p.range_label.as_deref(), Some("TeSys D"));
        assert_eq!(p.subrange_label, None);
        assert_eq!(p.product_description.as_deref(), Some("Contactor 9A"));
        assert_eq!(p.technical_specifications.get("voltage").unwrap(), "400");
        assert!(!p.technical_specifications.contains_key("aux"));
        assert_eq!(p.replacement_suggestions, vec!["LC1D09BD".to_string()]);
        assert_eq!(p.obsolescence_status, None);
    }

    #[test]
    fn searchable_requires_some_text() {
        let empty = LetterProduct::default();
        assert!(!empty.is_searchable());
        let only_line = LetterProduct {
            product_line: Some("PPIBS".into()),
            ..Default::default()
        };
        assert!(!only_line.is_searchable());
        let ranged = LetterProduct {
            range_label: Some("PIX".into()),
            ..Default::default()
        };
        assert!(ranged.is_searchable());
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!(LetterStatus::parse("processed"), Some(LetterStatus::Processed));
        assert_eq!(LetterStatus::Failed.as_str(), "failed");
        assert_eq!(LetterStatus::parse("pending"), None);
    }
}
