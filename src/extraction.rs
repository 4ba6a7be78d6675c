//! Letter metadata extraction through the LLM.
//!
//! Sends the letter text with a fixed JSON schema prompt and turns the reply
//! into a [`LetterExtraction`].

use anyhow::Result;
use serde::Deserialize;

use crate::llm::{parse_json_payload, LlmClient};
use crate::models::{lenient_f64, lenient_string, LetterProduct};

const SYSTEM_PROMPT: &str = "You are an expert in Schneider Electric product obsolescence \
communications. You read obsolescence letters and return strictly valid JSON describing \
the document and every product range it withdraws. Never invent product identifiers.";

const SCHEMA_HINT: &str = r#"{
  "document_information": {
    "document_type": "obsolescence_letter | end_of_service_notice | other",
    "language": "ISO 639-1 code",
    "title": "string",
    "document_number": "string or null",
    "publication_date": "YYYY-MM-DD or null"
  },
  "products": [
    {
      "product_identifier": "commercial reference or null",
      "range_label": "product range, e.g. TeSys D",
      "subrange_label": "sub-range or null",
      "product_line": "business line incl. PL_SERVICES code if present, e.g. PPIBS",
      "product_description": "free text",
      "technical_specifications": { "key": "value" },
      "obsolescence_status": "e.g. end_of_commercialization, obsolete, end_of_service",
      "end_of_service_date": "YYYY-MM-DD or null",
      "replacement_suggestions": ["range or reference"]
    }
  ],
  "extraction_confidence": 0.0
}"#;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DocumentInformation {
    #[serde(default, deserialize_with = "lenient_string")]
    pub document_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub language: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub document_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub publication_date: Option<String>,
}

/// Structured content recovered from one letter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LetterExtraction {
    pub document: DocumentInformation,
    pub products: Vec<LetterProduct>,
    /// In [0,1].
    pub confidence: f64,
    /// The model's reply as received.
    pub raw_json: String,
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    document_information: Option<serde_json::Value>,
    #[serde(default)]
    products: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient_f64")]
    extraction_confidence: Option<f64>,
}

/// Build the user prompt, truncating the letter body to `max_chars` characters.
pub fn build_prompt(letter_text: &str, max_chars: usize) -> String {
    let body: String = letter_text.chars().take(max_chars).collect();
    format!(
        "Extract the obsolescence information from the letter below.\n\
         Respond with a single JSON object using exactly this schema:\n{}\n\n\
         --- LETTER ---\n{}\n--- END LETTER ---",
        SCHEMA_HINT, body
    )
}

/// Ask the model for the letter's metadata.
pub async fn extract_metadata(
    llm: &dyn LlmClient,
    letter_text: &str,
    max_chars: usize,
) -> Result<LetterExtraction> {
    let prompt = build_prompt(letter_text, max_chars);
    let reply = llm.complete(SYSTEM_PROMPT, &prompt).await?;
    parse_extraction(&reply)
}

/// Parse a model reply into a [`LetterExtraction`].
///
/// Products that cannot drive a catalogue search are dropped; a product
/// entry that fails to deserialize is skipped rather than failing the letter.
pub fn parse_extraction(reply: &str) -> Result<LetterExtraction> {
    let value = parse_json_payload(reply)?;
    let raw: RawExtraction = serde_json::from_value(value)?;

    let document = match raw.document_information {
        Some(v @ serde_json::Value::Object(_)) => {
            serde_json::from_value::<DocumentInformation>(v).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring malformed document_information");
                DocumentInformation::default()
            })
        }
        _ => DocumentInformation::default(),
    };

    let items = match raw.products {
        Some(serde_json::Value::Array(items)) => items,
        _ => Vec::new(),
    };
    let mut products = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<LetterProduct>(item) {
            Ok(p) if p.is_searchable() => products.push(p),
            Ok(p) => tracing::debug!(product = ?p, "dropping product without searchable fields"),
            Err(e) => tracing::warn!(error = %e, "skipping malformed product entry"),
        }
    }

    Ok(LetterExtraction {
        document,
        products,
        confidence: raw.extraction_confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        raw_json: reply.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_reply() {
        let reply = r#"```json
        {
          "document_information": { "title": "PIX 2B withdrawal", "language": "en", "document_type": "obsolescence_letter" },
          "products": [
            { "range_label": "PIX", "subrange_label": "PIX 2B", "product_line": "PSIBS - Power Systems",
              "product_description": "Medium voltage switchgear", "technical_specifications": { "rated_voltage": "12 kV" } },
            { "product_line": "PSIBS" },
            "garbage"
          ],
          "extraction_confidence": 1.7
        }
        ```"#;
        let ex = parse_extraction(reply).unwrap();
        assert_eq!(ex.document.title.as_deref(), Some("PIX 2B withdrawal"));
        assert_eq!(ex.products.len(), 1);
        assert_eq!(ex.products[0].subrange_label.as_deref(), Some("PIX 2B"));
        assert_eq!(ex.confidence, 1.0);
        assert!(ex.raw_json.contains("PIX 2B"));
    }

    #[test]
    fn missing_sections_default() {
        let ex = parse_extraction("{}").unwrap();
        assert!(ex.products.is_empty());
        assert_eq!(ex.confidence, 0.0);
        assert_eq!(ex.document, DocumentInformation::default());
    }

    #[test]
    fn loose_document_fields_are_tolerated() {
        let ex = parse_extraction(
            r#"{"document_information": {"document_number": 12345, "title": "  PIX 2B  ", "publication_date": null},
                "products": [{"range_label": "PIX"}],
                "extraction_confidence": "0.9"}"#,
        )
        .unwrap();
        assert_eq!(ex.document.document_number.as_deref(), Some("12345"));
        assert_eq!(ex.document.title.as_deref(), Some("PIX 2B"));
        assert_eq!(ex.document.publication_date, None);
        assert_eq!(ex.confidence, 0.9);
        assert_eq!(ex.products.len(), 1);
    }

    #[test]
    fn null_sections_default() {
        let ex = parse_extraction(
            r#"{"document_information": null, "products": null, "extraction_confidence": null}"#,
        )
        .unwrap();
        assert_eq!(ex.document, DocumentInformation::default());
        assert!(ex.products.is_empty());
        assert_eq!(ex.confidence, 0.0);

        let ex = parse_extraction(
            r#"{"document_information": "n/a", "products": [{"range_label": "TeSys D"}], "extraction_confidence": "high"}"#,
        )
        .unwrap();
        assert_eq!(ex.document, DocumentInformation::default());
        assert_eq!(ex.products.len(), 1);
        assert_eq!(ex.confidence, 0.0);
    }

    #[test]
    fn non_json_reply_fails() {
        assert!(parse_extraction("I cannot help with that").is_err());
    }

    #[test]
    fn prompt_truncates_by_chars() {
        let prompt = build_prompt("ééééé", 2);
        assert!(prompt.contains("--- LETTER ---\néé\n--- END LETTER ---"));
    }
}
