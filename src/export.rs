//! Export processed letters as JSON.
//!
//! Produces one document holding every letter with its extracted products
//! and their confirmed catalogue matches, for downstream reporting.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::store::{self, LetterDetail};

#[derive(Debug, Serialize)]
pub struct ExportData {
    pub exported_at: String,
    pub letters: Vec<LetterDetail>,
}

pub async fn collect_export(pool: &SqlitePool) -> Result<ExportData> {
    let mut letters = Vec::new();
    for letter in store::list_letters(pool).await? {
        if let Some(detail) = store::get_letter(pool, &letter.id).await? {
            letters.push(detail);
        }
    }
    Ok(ExportData {
        exported_at: chrono::Utc::now().to_rfc3339(),
        letters,
    })
}

/// Export letters, products and matches as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    let data = collect_export(&pool).await?;
    pool.close().await;

    let letter_count = data.letters.len();
    let product_count: usize = data.letters.iter().map(|l| l.products.len()).sum();
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} letters, {} products to {}",
                letter_count,
                product_count,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}
