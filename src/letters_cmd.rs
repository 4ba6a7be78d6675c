//! `sel letters` subcommands: list, show and delete stored letters.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::store::{self, LetterDetail};

pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let letters = store::list_letters(&pool).await?;
    pool.close().await;

    if letters.is_empty() {
        println!("No letters.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<9}  {:>4}  {:<19}  {}",
        "ID", "STATUS", "CONF", "UPDATED", "FILE"
    );
    for l in &letters {
        println!(
            "{:<36}  {:<9}  {:>4.2}  {:<19}  {}",
            l.id,
            l.status.as_str(),
            l.extraction_confidence,
            format_ts_iso(l.updated_at),
            l.file_name
        );
    }
    Ok(())
}

/// Print one letter with its products and matches. `--json` prints the
/// same structure the HTTP API returns.
pub async fn run_show(config: &Config, id: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let detail = store::get_letter(&pool, id).await?;
    pool.close().await;

    let Some(detail) = detail else {
        bail!("letter not found: {}", id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
    } else {
        print_detail(&detail);
    }
    Ok(())
}

fn print_detail(detail: &LetterDetail) {
    let l = &detail.letter;
    println!("--- Letter ---");
    println!("id:           {}", l.id);
    println!(
        "title:        {}",
        l.document_title.as_deref().unwrap_or("(untitled)")
    );
    println!("file:         {}", l.file_path);
    println!("status:       {}", l.status.as_str());
    if let Some(ref n) = l.document_number {
        println!("number:       {}", n);
    }
    if let Some(ref d) = l.publication_date {
        println!("published:    {}", d);
    }
    if let Some(ref lang) = l.language {
        println!("language:     {}", lang);
    }
    println!("confidence:   {:.2}", l.extraction_confidence);
    println!("elapsed:      {} ms", l.processing_time_ms);
    println!("updated_at:   {}", format_ts_iso(l.updated_at));
    if let Some(ref err) = l.error {
        println!("error:        {}", err);
    }
    println!();

    println!("--- Products ({}) ---", detail.products.len());
    for p in &detail.products {
        println!("[{}] {}", p.product.position, p.product.product.label());
        if let Some(ref status) = p.product.product.obsolescence_status {
            println!("    status: {}", status);
        }
        if p.matches.is_empty() {
            println!("    no confirmed matches");
        }
        for m in &p.matches {
            println!(
                "    {:<24} conf {:.2}  score {:.1}  {}",
                m.product_identifier,
                m.confidence,
                m.candidate_score,
                m.reason.as_deref().unwrap_or("")
            );
        }
    }
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let removed = store::delete_letter(&pool, id).await?;
    pool.close().await;

    if !removed {
        bail!("letter not found: {}", id);
    }
    println!("Deleted letter {}", id);
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
