//! Catalogue search filters built from an extracted letter product.
//!
//! Extracted text is noisy ("PIX 2B - Medium Voltage Switchgear 12kV",
//! "Power Products (PPIBS)"), so each field is normalised into a `LIKE`
//! pattern and the free-text description is reduced to a few keywords.
//!
//! A device-type keyword is inferred from the text and applied as a hard
//! constraint. Without it an OR over range/keywords pulls in unrelated device
//! categories that share a range name (transformers and drives alongside
//! switchgear).

use regex::Regex;
use std::sync::OnceLock;

use crate::models::LetterProduct;

/// Device types recognised in letter text, checked in order.
///
/// Each entry is `(device keyword, trigger phrases)`. The device keyword is
/// what the catalogue's `devicetype_label` / description must contain.
const DEVICE_TYPES: &[(&str, &[&str])] = &[
    ("switchgear", &["switchgear", "switchboard", "ring main unit", "rmu"]),
    ("circuit breaker", &["circuit breaker", "circuit-breaker", "mccb", "acb", "mcb"]),
    ("contactor", &["contactor"]),
    ("motor starter", &["motor starter", "motor-starter", "starter"]),
    ("relay", &["relay", "protection relay"]),
    ("ups", &["ups", "uninterruptible"]),
    ("drive", &["variable speed drive", "drive", "inverter", "vsd"]),
    ("transformer", &["transformer"]),
    ("plc", &["plc", "programmable logic controller", "controller"]),
    ("sensor", &["sensor", "detector"]),
    ("meter", &["power meter", "meter"]),
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "this", "that", "range", "product", "products",
    "series", "type", "new", "all", "are", "its", "end", "life", "service", "obsolete",
    "obsolescence", "commercialization", "commercialisation", "schneider", "electric",
    "des", "les", "pour", "avec", "gamme",
];

/// Minimum keyword length kept from free text.
const MIN_KEYWORD_LEN: usize = 3;

fn pl_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]{2}IBS)\b").expect("valid PL_SERVICES pattern"))
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}\-/.]*").expect("valid token pattern"))
}

/// Normalised search constraints for one letter product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub product_identifier: Option<String>,
    pub range_label: Option<String>,
    pub subrange_label: Option<String>,
    /// PL_SERVICES code such as `PPIBS`.
    pub product_line_code: Option<String>,
    pub keywords: Vec<String>,
    pub device_type: Option<String>,
}

impl SearchFilters {
    pub fn from_product(product: &LetterProduct, max_keywords: usize) -> Self {
        let range_label = clean(product.range_label.as_deref());
        let subrange_label = clean(product.subrange_label.as_deref());

        let free_text = [
            product.product_description.as_deref(),
            product.range_label.as_deref(),
            product.subrange_label.as_deref(),
            product.product_line.as_deref(),
        ]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

        let keywords = description_keywords(
            product.product_description.as_deref().unwrap_or(""),
            &[range_label.as_deref(), subrange_label.as_deref()],
            max_keywords,
        );

        Self {
            product_identifier: clean(product.product_identifier.as_deref()),
            range_label,
            subrange_label,
            product_line_code: product
                .product_line
                .as_deref()
                .and_then(product_line_code),
            keywords,
            device_type: infer_device_type(&free_text).map(|s| s.to_string()),
        }
    }

    /// True when at least one OR term exists; without one nothing is searched.
    pub fn has_terms(&self) -> bool {
        self.product_identifier.is_some()
            || self.range_label.is_some()
            || self.subrange_label.is_some()
            || !self.keywords.is_empty()
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
}

/// Pull a PL_SERVICES code (`[A-Z]{2}IBS`) out of a product-line string.
pub fn product_line_code(product_line: &str) -> Option<String> {
    pl_code_regex()
        .captures(&product_line.to_uppercase())
        .map(|c| c[1].to_string())
}

/// Infer a device-type keyword from free text.
///
/// Trigger phrases are matched on word boundaries so that `"ups"` does not
/// fire inside `"groups"`.
pub fn infer_device_type(text: &str) -> Option<&'static str> {
    let lower = format!(" {} ", normalise_for_phrases(text));
    DEVICE_TYPES
        .iter()
        .find(|(_, triggers)| {
            triggers
                .iter()
                .any(|t| lower.contains(&format!(" {} ", t)))
        })
        .map(|(device, _)| *device)
}

fn normalise_for_phrases(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reduce a description to distinctive lower-case keywords.
pub fn description_keywords(
    description: &str,
    already_covered: &[Option<&str>],
    max_keywords: usize,
) -> Vec<String> {
    let covered: Vec<String> = already_covered
        .iter()
        .flatten()
        .map(|s| s.to_lowercase())
        .collect();

    let mut out: Vec<String> = Vec::new();
    for m in token_regex().find_iter(description) {
        let token = m
            .as_str()
            .trim_end_matches(['.', '-', '/'])
            .to_lowercase();
        if token.chars().count() < MIN_KEYWORD_LEN
            || STOP_WORDS.contains(&token.as_str())
            || token.chars().all(|c| c.is_ascii_digit())
            || covered.iter().any(|c| c == &token)
            || out.contains(&token)
        {
            continue;
        }
        out.push(token);
        if out.len() >= max_keywords {
            break;
        }
    }
    out
}

/// Punctuation read as a word break when matching device types.
pub const DEVICE_WORD_SEPARATORS: &[char] = &['-', '/', ',', '.', '(', ')', ';', ':'];

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape `LIKE` wildcards and wrap the value as a substring pattern.
pub fn like_pattern(value: &str) -> String {
    format!("%{}%", escape_like(value))
}

/// `LIKE` pattern for `value` at the start of a word, against text that is
/// space-prefixed with separators turned into spaces.
pub fn word_start_pattern(value: &str) -> String {
    format!("% {}%", escape_like(&value.to_lowercase()))
}

/// Whether `text` has a word starting with the device keyword.
///
/// `"UPS, 10 kVA"` and `"power meters"` match; `"groups"` and
/// `"parameter"` do not.
pub fn mentions_device(text: &str, device: &str) -> bool {
    let padded: String = std::iter::once(' ')
        .chain(
            text.to_lowercase()
                .chars()
                .map(|c| if DEVICE_WORD_SEPARATORS.contains(&c) { ' ' } else { c }),
        )
        .collect();
    padded.contains(&format!(" {}", device.to_lowercase()))
}
