//! Letter processing orchestration.
//!
//! letter file → text → LLM metadata → stored letter + products →
//! per product: filters → candidates → scoring → arbitration → stored matches.
//!
//! Every stage failure is caught and logged. A letter that fails is stored
//! with status `failed` and the run moves on; a product whose search fails
//! simply gets no matches.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

use crate::catalogue;
use crate::config::{Config, MatchingConfig};
use crate::db;
use crate::extract;
use crate::extraction::{self, LetterExtraction};
use crate::filters::SearchFilters;
use crate::letters_source::{self, file_hash, LetterFile};
use crate::llm::{self, LlmClient};
use crate::matching;
use crate::models::{Letter, LetterProduct, LetterStatus, ProductCandidate, ProductMatch};
use crate::progress::{LetterResult, ProgressEvent, ProgressMode, ProgressReporter};
use crate::scoring;
use crate::store;

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// File or directory to process instead of `[letters].root`.
    pub target: Option<PathBuf>,
    /// Reprocess letters that were already processed.
    pub force: bool,
    pub dry_run: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LetterOutcome {
    Processed {
        letter_id: String,
        products: usize,
        matches: u64,
    },
    Skipped {
        letter_id: String,
    },
    Failed {
        letter_id: String,
        error: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub discovered: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub products: u64,
    pub matches: u64,
}

/// Candidates for one letter product after discovery and scoring.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub device_type: Option<String>,
    pub product_line_code: Option<String>,
    pub keywords: Vec<String>,
    pub candidates: Vec<ProductCandidate>,
}

/// Filter construction, query execution and scoring for one letter product.
pub async fn discover_candidates(
    pool: &SqlitePool,
    matching: &MatchingConfig,
    product: &LetterProduct,
) -> Result<CandidateReport> {
    let filters = SearchFilters::from_product(product, matching.max_keywords);
    tracing::debug!(?filters, product = %product.label(), "candidate filters");

    let found = catalogue::search_candidates(pool, &filters, matching.candidate_limit).await?;
    let candidates = scoring::rank_candidates(product, &filters, found);

    Ok(CandidateReport {
        device_type: filters.device_type,
        product_line_code: filters.product_line_code,
        keywords: filters.keywords,
        candidates,
    })
}

/// Discover, score and arbitrate matches for one letter product.
pub async fn match_product(
    pool: &SqlitePool,
    llm: &dyn LlmClient,
    matching: &MatchingConfig,
    product: &LetterProduct,
) -> Vec<ProductMatch> {
    let report = match discover_candidates(pool, matching, product).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(product = %product.label(), error = %e, "candidate search failed");
            return Vec::new();
        }
    };

    tracing::info!(
        product = %product.label(),
        candidates = report.candidates.len(),
        "candidates ranked"
    );

    matching::arbitrate(
        llm,
        product,
        &report.candidates,
        matching.llm_shortlist,
        matching.min_confidence,
    )
    .await
}

async fn extract_letter_text(config: &Config, file: &LetterFile, bytes: Vec<u8>) -> Result<String> {
    if bytes.len() as u64 > config.extraction.max_file_bytes {
        bail!(
            "file exceeds extraction.max_file_bytes ({} > {})",
            bytes.len(),
            config.extraction.max_file_bytes
        );
    }
    let content_type = file.content_type;
    let text = tokio::task::spawn_blocking(move || extract::extract_text(&bytes, content_type))
        .await??;
    if text.trim().is_empty() {
        bail!("no text extracted");
    }
    Ok(text)
}

/// Process one letter end to end.
pub async fn process_letter(
    config: &Config,
    pool: &SqlitePool,
    llm: &dyn LlmClient,
    file: &LetterFile,
    force: bool,
) -> Result<LetterOutcome> {
    let started = Instant::now();
    let bytes = file.read()?;
    let hash = file_hash(&bytes);

    let existing = store::find_by_hash(pool, &hash).await?;
    if let Some(prev) = &existing {
        if prev.status == LetterStatus::Processed && !force {
            tracing::info!(file = %file.file_name, letter_id = %prev.id, "already processed, skipping");
            return Ok(LetterOutcome::Skipped {
                letter_id: prev.id.clone(),
            });
        }
    }

    let now = chrono::Utc::now().timestamp();
    let mut letter = Letter {
        id: existing
            .as_ref()
            .map(|l| l.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        file_path: file.path.display().to_string(),
        file_name: file.file_name.clone(),
        file_hash: hash,
        content_type: file.content_type.to_string(),
        document_title: None,
        document_type: None,
        document_number: None,
        publication_date: None,
        language: None,
        status: LetterStatus::Failed,
        extraction_confidence: 0.0,
        processing_time_ms: 0,
        raw_llm_json: None,
        error: None,
        created_at: existing.as_ref().map(|l| l.created_at).unwrap_or(now),
        updated_at: now,
    };

    let extraction = match extract_stage(config, llm, file, bytes).await {
        Ok(extraction) => extraction,
        Err(e) => {
            let error = format!("{:#}", e);
            // A forced rerun that fails leaves the earlier processed result in place.
            if let Some(prev) = existing.filter(|l| l.status == LetterStatus::Processed) {
                tracing::warn!(
                    file = %file.file_name,
                    letter_id = %prev.id,
                    error = %error,
                    "reprocessing failed, keeping previous result"
                );
                return Ok(LetterOutcome::Failed {
                    letter_id: prev.id,
                    error,
                });
            }
            tracing::warn!(file = %file.file_name, error = %error, "letter extraction failed");
            letter.error = Some(error.clone());
            letter.processing_time_ms = started.elapsed().as_millis() as i64;
            store::save_letter(pool, &letter, &[]).await?;
            return Ok(LetterOutcome::Failed {
                letter_id: letter.id,
                error,
            });
        }
    };

    letter.status = LetterStatus::Processed;
    letter.document_title = extraction.document.title.clone();
    letter.document_type = extraction.document.document_type.clone();
    letter.document_number = extraction.document.document_number.clone();
    letter.publication_date = extraction.document.publication_date.clone();
    letter.language = extraction.document.language.clone();
    letter.extraction_confidence = extraction.confidence;
    letter.raw_llm_json = Some(extraction.raw_json.clone());

    let stored = store::save_letter(pool, &letter, &extraction.products).await?;

    let mut total_matches = 0u64;
    for product in &stored {
        let matches = match_product(pool, llm, &config.matching, &product.product).await;
        if matches.is_empty() {
            continue;
        }
        match store::save_matches(pool, product, &matches).await {
            Ok(n) => total_matches += n,
            Err(e) => tracing::warn!(product = %product.product.label(), error = %e, "saving matches failed"),
        }
    }

    let elapsed = started.elapsed().as_millis() as i64;
    sqlx::query("UPDATE letters SET processing_time_ms = ? WHERE id = ?")
        .bind(elapsed)
        .bind(&letter.id)
        .execute(pool)
        .await?;

    tracing::info!(
        file = %file.file_name,
        products = stored.len(),
        matches = total_matches,
        elapsed_ms = elapsed,
        "letter processed"
    );

    Ok(LetterOutcome::Processed {
        letter_id: letter.id,
        products: stored.len(),
        matches: total_matches,
    })
}

async fn extract_stage(
    config: &Config,
    llm: &dyn LlmClient,
    file: &LetterFile,
    bytes: Vec<u8>,
) -> Result<LetterExtraction> {
    let text = extract_letter_text(config, file, bytes).await?;
    extraction::extract_metadata(llm, &text, config.extraction.max_chars).await
}

/// Process a batch of letters, reporting progress per letter.
pub async fn process_letters(
    config: &Config,
    pool: &SqlitePool,
    llm: &dyn LlmClient,
    files: &[LetterFile],
    force: bool,
    reporter: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let mut summary = RunSummary {
        discovered: files.len() as u64,
        ..Default::default()
    };
    let total = files.len() as u64;

    for (i, file) in files.iter().enumerate() {
        let n = i as u64 + 1;
        reporter.report(ProgressEvent::Started {
            n,
            total,
            file: file.file_name.clone(),
        });

        let result = match process_letter(config, pool, llm, file, force).await {
            Ok(LetterOutcome::Processed {
                products, matches, ..
            }) => {
                summary.processed += 1;
                summary.products += products as u64;
                summary.matches += matches;
                LetterResult::Processed { products, matches }
            }
            Ok(LetterOutcome::Skipped { .. }) => {
                summary.skipped += 1;
                LetterResult::Skipped
            }
            Ok(LetterOutcome::Failed { .. }) => {
                summary.failed += 1;
                LetterResult::Failed
            }
            Err(e) => {
                tracing::error!(file = %file.file_name, error = %e, "letter could not be recorded");
                summary.failed += 1;
                LetterResult::Failed
            }
        };

        reporter.report(ProgressEvent::Finished {
            n,
            total,
            file: file.file_name.clone(),
            result,
        });
    }

    Ok(summary)
}

/// CLI entry point for `sel process`.
pub async fn run_process(
    config: &Config,
    options: ProcessOptions,
    progress: ProgressMode,
) -> Result<()> {
    let reporter = progress.reporter();
    reporter.report(ProgressEvent::Discovering);

    let mut files = letters_source::scan_letters(&config.letters, options.target.as_deref())?;
    if let Some(limit) = options.limit {
        files.truncate(limit);
    }

    if options.dry_run {
        println!("process (dry-run)");
        println!("  letters found: {}", files.len());
        for file in &files {
            println!("  {}  ({} bytes)", file.path.display(), file.size);
        }
        return Ok(());
    }

    if !config.llm.is_enabled() {
        bail!("LLM provider is disabled. Set [llm] provider = \"xai\" in config.");
    }
    let client = llm::create_client(&config.llm)?;
    let pool = db::connect(config).await?;
    tracing::info!(model = client.model_name(), letters = files.len(), "processing letters");

    let summary = process_letters(
        config,
        &pool,
        client.as_ref(),
        &files,
        options.force,
        reporter.as_ref(),
    )
    .await?;

    println!("process");
    println!("  letters found: {}", summary.discovered);
    println!("  processed: {}", summary.processed);
    println!("  skipped: {}", summary.skipped);
    println!("  failed: {}", summary.failed);
    println!("  products extracted: {}", summary.products);
    println!("  matches written: {}", summary.matches);
    println!("ok");

    pool.close().await;
    Ok(())
}

/// CLI entry point for `sel candidates`: discovery and scoring without the LLM.
pub async fn run_candidates(
    config: &Config,
    product: LetterProduct,
    limit: usize,
    json: bool,
) -> Result<()> {
    if !product.is_searchable() {
        bail!("Give at least one of --id, --range, --subrange or --description.");
    }
    let pool = db::connect(config).await?;
    let mut report = discover_candidates(&pool, &config.matching, &product).await?;
    pool.close().await;
    report.candidates.truncate(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("candidates for {}", product.label());
    if let Some(ref dt) = report.device_type {
        println!("  device type: {}", dt);
    }
    if let Some(ref pl) = report.product_line_code {
        println!("  product line: {}", pl);
    }
    if !report.keywords.is_empty() {
        println!("  keywords: {}", report.keywords.join(", "));
    }
    println!();

    if report.candidates.is_empty() {
        println!("No candidates.");
        return Ok(());
    }
    for (i, c) in report.candidates.iter().enumerate() {
        println!(
            "{}. [{:.1}] {}  {} / {}  {}",
            i + 1,
            c.match_score,
            c.product_identifier,
            c.range_label.as_deref().unwrap_or("-"),
            c.subrange_label.as_deref().unwrap_or("-"),
            c.commercial_status.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::migrate::apply_schema;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const EXTRACTION_REPLY: &str = r#"{
        "document_information": {"title": "PIX 2B end of commercialization", "language": "en"},
        "products": [
            {"range_label": "PIX", "subrange_label": "PIX 2B", "product_line": "PSIBS",
             "product_description": "PIX 2B double busbar switchgear"}
        ],
        "extraction_confidence": 0.9
    }"#;

    const ARBITRATION_REPLY: &str = r#"{"matches": [
        {"product_identifier": "PIX2B-1250", "confidence": 0.92, "reason": "same subrange"}
    ]}"#;

    /// Answers extraction and arbitration prompts; extraction can be made to fail.
    struct FakeLlm {
        fail_extraction: bool,
        calls: AtomicUsize,
    }

    impl FakeLlm {
        fn new(fail_extraction: bool) -> Self {
            Self {
                fail_extraction,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        fn model_name(&self) -> &str {
            "fake"
        }
        async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if user.contains("CATALOGUE CANDIDATES") {
                return Ok(ARBITRATION_REPLY.to_string());
            }
            if self.fail_extraction {
                return Err(LlmError::Api {
                    status: 500,
                    body: "upstream down".into(),
                });
            }
            Ok(EXTRACTION_REPLY.to_string())
        }
    }

    fn test_config(root: &std::path::Path, max_file_bytes: u64) -> Config {
        let src = format!(
            "[db]\npath = \"{}\"\n[extraction]\nmax_file_bytes = {}\n[letters]\nroot = \"{}\"\n",
            root.join("sel.sqlite").display(),
            max_file_bytes,
            root.display()
        );
        toml::from_str(&src).unwrap()
    }

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        apply_schema(&pool).await.unwrap();
        let rows: Vec<Vec<String>> = [
            ["PRODUCT_IDENTIFIER", "RANGE_LABEL", "SUBRANGE_LABEL", "DEVICETYPE_LABEL", "PL_SERVICES"],
            ["PIX2B-1250", "PIX", "PIX 2B", "MV Switchgear", "PSIBS"],
            ["PIX-STD-630", "PIX", "PIX Standard", "MV Switchgear", "PSIBS"],
            ["ATV61HU15", "Altivar", "ATV61", "Variable speed drive", "IDIBS"],
        ]
        .iter()
        .map(|r| r.iter().map(|s| s.to_string()).collect())
        .collect();
        catalogue::import_rows(&pool, &rows).await.unwrap();
        pool
    }

    fn write_docx(dir: &std::path::Path, name: &str, text: &str) -> LetterFile {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let body = format!(
            "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            text
        );
        zip.write_all(body.as_bytes()).unwrap();
        zip.finish().unwrap();
        let size = std::fs::metadata(&path).unwrap().len();
        LetterFile {
            path,
            file_name: name.to_string(),
            content_type: extract::MIME_DOCX,
            size,
        }
    }

    #[tokio::test]
    async fn processes_then_skips_then_forces() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), 1_000_000);
        let pool = seeded_pool().await;
        let llm = FakeLlm::new(false);
        let file = write_docx(tmp.path(), "pix2b.docx", "PIX 2B switchgear is withdrawn.");

        let first = process_letter(&config, &pool, &llm, &file, false).await.unwrap();
        let LetterOutcome::Processed { letter_id, products, matches } = first else {
            panic!("expected the letter to be processed");
        };
        assert_eq!(products, 1);
        assert_eq!(matches, 1);

        let detail = store::get_letter(&pool, &letter_id).await.unwrap().unwrap();
        assert_eq!(detail.letter.status, LetterStatus::Processed);
        assert_eq!(
            detail.letter.document_title.as_deref(),
            Some("PIX 2B end of commercialization")
        );
        assert_eq!(detail.products[0].matches[0].product_identifier, "PIX2B-1250");

        let second = process_letter(&config, &pool, &llm, &file, false).await.unwrap();
        assert_eq!(second, LetterOutcome::Skipped { letter_id: letter_id.clone() });

        let calls_before = llm.calls.load(Ordering::SeqCst);
        let forced = process_letter(&config, &pool, &llm, &file, true).await.unwrap();
        assert!(matches!(forced, LetterOutcome::Processed { letter_id: ref id, .. } if *id == letter_id));
        assert!(llm.calls.load(Ordering::SeqCst) > calls_before);
        assert_eq!(store::list_letters(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_is_recorded_and_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), 1_000_000);
        let pool = seeded_pool().await;
        let file = write_docx(tmp.path(), "broken.docx", "Some letter");

        let outcome = process_letter(&config, &pool, &FakeLlm::new(true), &file, false)
            .await
            .unwrap();
        let LetterOutcome::Failed { letter_id, error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("500"));
        let stored = store::get_letter(&pool, &letter_id).await.unwrap().unwrap();
        assert_eq!(stored.letter.status, LetterStatus::Failed);
        assert!(stored.products.is_empty());

        // A failed letter is not skipped on the next run.
        let retry = process_letter(&config, &pool, &FakeLlm::new(false), &file, false)
            .await
            .unwrap();
        assert!(matches!(retry, LetterOutcome::Processed { .. }));
    }

    #[tokio::test]
    async fn failed_forced_rerun_keeps_processed_letter() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), 1_000_000);
        let pool = seeded_pool().await;
        let file = write_docx(tmp.path(), "pix2b.docx", "PIX 2B switchgear is withdrawn.");

        let first = process_letter(&config, &pool, &FakeLlm::new(false), &file, false)
            .await
            .unwrap();
        let LetterOutcome::Processed { letter_id, .. } = first else {
            panic!("expected the letter to be processed");
        };

        let forced = process_letter(&config, &pool, &FakeLlm::new(true), &file, true)
            .await
            .unwrap();
        assert!(matches!(forced, LetterOutcome::Failed { letter_id: ref id, .. } if *id == letter_id));

        let detail = store::get_letter(&pool, &letter_id).await.unwrap().unwrap();
        assert_eq!(detail.letter.status, LetterStatus::Processed);
        assert_eq!(detail.letter.error, None);
        assert_eq!(detail.products.len(), 1);
        assert_eq!(detail.products[0].matches.len(), 1);
    }

    #[tokio::test]
    async fn batch_counts_oversized_letters_as_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), 64);
        let pool = seeded_pool().await;
        let file = write_docx(tmp.path(), "large.docx", "PIX 2B switchgear is withdrawn.");
        assert!(file.size > 64);

        let summary = process_letters(
            &config,
            &pool,
            &FakeLlm::new(false),
            &[file],
            false,
            &crate::progress::NoProgress,
        )
        .await
        .unwrap();
        assert_eq!(summary.discovered, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 0);

        let letters = store::list_letters(&pool).await.unwrap();
        assert!(letters[0].error.as_deref().unwrap_or("").contains("max_file_bytes"));
    }
}
