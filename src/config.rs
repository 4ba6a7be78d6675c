//! TOML configuration parsing and validation.
//!
//! All settings live in one file (default `./config/sel.toml`). Secrets are
//! never read from it: the LLM API key comes from `XAI_API_KEY`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub letters: LettersConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "grok-3-latest".to_string()
}
fn default_base_url() -> String {
    "https://api.x.ai/v1".to_string()
}
fn default_temperature() -> f64 {
    0.1
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    120
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Letter text beyond this many characters is not sent to the model.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Files larger than this are marked failed before text extraction.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_chars() -> usize {
    20_000
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: i64,
    #[serde(default = "default_llm_shortlist")]
    pub llm_shortlist: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            candidate_limit: default_candidate_limit(),
            llm_shortlist: default_llm_shortlist(),
            min_confidence: default_min_confidence(),
            max_keywords: default_max_keywords(),
        }
    }
}

fn default_candidate_limit() -> i64 {
    100
}
fn default_llm_shortlist() -> usize {
    20
}
fn default_min_confidence() -> f64 {
    0.5
}
fn default_max_keywords() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LettersConfig {
    #[serde(default = "default_letters_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for LettersConfig {
    fn default() -> Self {
        Self {
            root: default_letters_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_letters_root() -> PathBuf {
    PathBuf::from("./data/letters")
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
        "**/*.doc".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.matching.candidate_limit < 1 {
        anyhow::bail!("matching.candidate_limit must be >= 1");
    }

    if config.matching.llm_shortlist == 0 {
        anyhow::bail!("matching.llm_shortlist must be > 0");
    }

    if !(0.0..=1.0).contains(&config.matching.min_confidence) {
        anyhow::bail!("matching.min_confidence must be in [0.0, 1.0]");
    }

    if config.extraction.max_chars == 0 {
        anyhow::bail!("extraction.max_chars must be > 0");
    }

    match config.llm.provider.as_str() {
        "disabled" | "xai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or xai.",
            other
        ),
    }

    Ok(())
}
