use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // IBcatalogue rows
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            product_identifier TEXT PRIMARY KEY,
            product_type TEXT,
            product_description TEXT,
            brand_code TEXT,
            brand_label TEXT,
            range_code TEXT,
            range_label TEXT,
            subrange_code TEXT,
            subrange_label TEXT,
            devicetype_label TEXT,
            commercial_status TEXT,
            end_of_production_date TEXT,
            end_of_service_date TEXT,
            pl_services TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS letters (
            id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_hash TEXT NOT NULL UNIQUE,
            content_type TEXT NOT NULL,
            document_title TEXT,
            document_type TEXT,
            document_number TEXT,
            publication_date TEXT,
            language TEXT,
            status TEXT NOT NULL,
            extraction_confidence REAL NOT NULL DEFAULT 0,
            processing_time_ms INTEGER NOT NULL DEFAULT 0,
            raw_llm_json TEXT,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS letter_products (
            id TEXT PRIMARY KEY,
            letter_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            product_identifier TEXT,
            range_label TEXT,
            subrange_label TEXT,
            product_line TEXT,
            product_description TEXT,
            technical_specifications_json TEXT NOT NULL DEFAULT '{}',
            obsolescence_status TEXT,
            end_of_service_date TEXT,
            replacement_suggestions_json TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (letter_id) REFERENCES letters(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS letter_product_matches (
            id TEXT PRIMARY KEY,
            letter_id TEXT NOT NULL,
            letter_product_id TEXT NOT NULL,
            product_identifier TEXT NOT NULL,
            match_confidence REAL NOT NULL,
            technical_match_score REAL NOT NULL,
            nomenclature_match_score REAL NOT NULL,
            product_line_match_score REAL NOT NULL,
            candidate_score REAL NOT NULL,
            match_reason TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(letter_product_id, product_identifier),
            FOREIGN KEY (letter_id) REFERENCES letters(id) ON DELETE CASCADE,
            FOREIGN KEY (letter_product_id) REFERENCES letter_products(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_range ON products(range_label)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_subrange ON products(subrange_label)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_products_pl ON products(pl_services)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_letter_products_letter ON letter_products(letter_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_matches_letter_product ON letter_product_matches(letter_product_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
