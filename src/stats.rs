//! Database statistics.
//!
//! Letter, product, match and catalogue counts for `sel stats`, enough to
//! see at a glance whether processing runs are producing matches.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DbStats {
    pub letters: i64,
    pub processed: i64,
    pub failed: i64,
    pub products: i64,
    /// Letter products with at least one confirmed match.
    pub matched_products: i64,
    pub matches: i64,
    pub catalogue_products: i64,
    pub avg_confidence: Option<f64>,
    pub last_processed_at: Option<i64>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<DbStats> {
    let letters = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'processed' THEN 1 ELSE 0 END), 0) AS processed,
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
            MAX(updated_at) AS last_ts
        FROM letters
        "#,
    )
    .fetch_one(pool)
    .await?;

    let products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM letter_products")
        .fetch_one(pool)
        .await?;

    let matches = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(DISTINCT letter_product_id) AS matched,
            AVG(match_confidence) AS avg_conf
        FROM letter_product_matches
        "#,
    )
    .fetch_one(pool)
    .await?;

    let catalogue_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;

    Ok(DbStats {
        letters: letters.get("total"),
        processed: letters.get("processed"),
        failed: letters.get("failed"),
        products,
        matched_products: matches.get("matched"),
        matches: matches.get("total"),
        catalogue_products,
        avg_confidence: matches.get("avg_conf"),
        last_processed_at: letters.get("last_ts"),
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("SE Letters — Database Stats");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Letters:     {} ({} processed, {} failed)",
        stats.letters, stats.processed, stats.failed
    );
    println!("  Products:    {}", stats.products);
    println!(
        "  Matched:     {} / {} ({}%)",
        stats.matched_products,
        stats.products,
        if stats.products > 0 {
            (stats.matched_products * 100) / stats.products
        } else {
            0
        }
    );
    println!("  Matches:     {}", stats.matches);
    if let Some(avg) = stats.avg_confidence {
        println!("  Avg conf.:   {:.2}", avg);
    }
    println!("  Catalogue:   {} products", stats.catalogue_products);
    println!(
        "  Last run:    {}",
        match stats.last_processed_at {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        }
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 || delta >= 86400 * 30 {
        return chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts.to_string());
    }
    let (n, unit) = match delta {
        d if d < 60 => return "just now".to_string(),
        d if d < 3600 => (d / 60, "min"),
        d if d < 86400 => (d / 3600, "hour"),
        d => (d / 86400, "day"),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}
