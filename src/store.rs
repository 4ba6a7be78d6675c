//! Letters database: letters, their extracted products, and confirmed matches.

use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::models::{Letter, LetterProduct, LetterStatus, ProductMatch, StoredLetterProduct};

/// A letter product with the matches confirmed for it.
#[derive(Debug, Clone, Serialize)]
pub struct ProductWithMatches {
    #[serde(flatten)]
    pub product: StoredLetterProduct,
    pub matches: Vec<ProductMatch>,
}

/// Everything stored about one letter.
#[derive(Debug, Clone, Serialize)]
pub struct LetterDetail {
    #[serde(flatten)]
    pub letter: Letter,
    pub products: Vec<ProductWithMatches>,
}

const LETTER_COLUMNS: &str = "id, file_path, file_name, file_hash, content_type, document_title, \
    document_type, document_number, publication_date, language, status, extraction_confidence, processing_time_ms, \
    raw_llm_json, error, created_at, updated_at";

fn letter_from_row(row: &SqliteRow) -> Letter {
    let status: String = row.get("status");
    Letter {
        id: row.get("id"),
        file_path: row.get("file_path"),
        file_name: row.get("file_name"),
        file_hash: row.get("file_hash"),
        content_type: row.get("content_type"),
        document_title: row.get("document_title"),
        document_type: row.get("document_type"),
        document_number: row.get("document_number"),
        publication_date: row.get("publication_date"),
        language: row.get("language"),
        status: LetterStatus::parse(&status).unwrap_or(LetterStatus::Failed),
        extraction_confidence: row.get("extraction_confidence"),
        processing_time_ms: row.get("processing_time_ms"),
        raw_llm_json: row.get("raw_llm_json"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub async fn find_by_hash(pool: &SqlitePool, file_hash: &str) -> Result<Option<Letter>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM letters WHERE file_hash = ?",
        LETTER_COLUMNS
    ))
    .bind(file_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(letter_from_row))
}

async fn delete_letter_rows(conn: &mut SqliteConnection, letter_id: &str) -> Result<u64> {
    sqlx::query("DELETE FROM letter_product_matches WHERE letter_id = ?")
        .bind(letter_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM letter_products WHERE letter_id = ?")
        .bind(letter_id)
        .execute(&mut *conn)
        .await?;
    let res = sqlx::query("DELETE FROM letters WHERE id = ?")
        .bind(letter_id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected())
}

/// Store a letter and its products, replacing any earlier row with the same file hash.
///
/// Returns the stored products in extraction order.
pub async fn save_letter(
    pool: &SqlitePool,
    letter: &Letter,
    products: &[LetterProduct],
) -> Result<Vec<StoredLetterProduct>> {
    let mut tx = pool.begin().await?;

    let previous: Option<String> = sqlx::query_scalar("SELECT id FROM letters WHERE file_hash = ?")
        .bind(&letter.file_hash)
        .fetch_optional(&mut *tx)
        .await?;
    if let Some(prev_id) = previous {
        delete_letter_rows(&mut tx, &prev_id).await?;
    }

    sqlx::query(&format!(
        "INSERT INTO letters ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        LETTER_COLUMNS
    ))
    .bind(&letter.id)
    .bind(&letter.file_path)
    .bind(&letter.file_name)
    .bind(&letter.file_hash)
    .bind(&letter.content_type)
    .bind(&letter.document_title)
    .bind(&letter.document_type)
    .bind(&letter.document_number)
    .bind(&letter.publication_date)
    .bind(&letter.language)
    .bind(letter.status.as_str())
    .bind(letter.extraction_confidence)
    .bind(letter.processing_time_ms)
    .bind(&letter.raw_llm_json)
    .bind(&letter.error)
    .bind(letter.created_at)
    .bind(letter.updated_at)
    .execute(&mut *tx)
    .await?;

    let mut stored = Vec::with_capacity(products.len());
    for (position, product) in products.iter().enumerate() {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO letter_products (id, letter_id, position, product_identifier, range_label,
                subrange_label, product_line, product_description, technical_specifications_json,
                obsolescence_status, end_of_service_date, replacement_suggestions_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&letter.id)
        .bind(position as i64)
        .bind(&product.product_identifier)
        .bind(&product.range_label)
        .bind(&product.subrange_label)
        .bind(&product.product_line)
        .bind(&product.product_description)
        .bind(serde_json::to_string(&product.technical_specifications)?)
        .bind(&product.obsolescence_status)
        .bind(&product.end_of_service_date)
        .bind(serde_json::to_string(&product.replacement_suggestions)?)
        .execute(&mut *tx)
        .await?;

        stored.push(StoredLetterProduct {
            id,
            letter_id: letter.id.clone(),
            position: position as i64,
            product: product.clone(),
        });
    }

    tx.commit().await?;
    Ok(stored)
}

/// Upsert confirmed matches for one letter product. Returns rows written.
pub async fn save_matches(
    pool: &SqlitePool,
    product: &StoredLetterProduct,
    matches: &[ProductMatch],
) -> Result<u64> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for m in matches {
        sqlx::query(
            r#"
            INSERT INTO letter_product_matches (id, letter_id, letter_product_id, product_identifier,
                match_confidence, technical_match_score, nomenclature_match_score,
                product_line_match_score, candidate_score, match_reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(letter_product_id, product_identifier) DO UPDATE SET
                match_confidence = excluded.match_confidence,
                technical_match_score = excluded.technical_match_score,
                nomenclature_match_score = excluded.nomenclature_match_score,
                product_line_match_score = excluded.product_line_match_score,
                candidate_score = excluded.candidate_score,
                match_reason = excluded.match_reason
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&product.letter_id)
        .bind(&product.id)
        .bind(&m.product_identifier)
        .bind(m.confidence)
        .bind(m.technical_match_score)
        .bind(m.nomenclature_match_score)
        .bind(m.product_line_match_score)
        .bind(m.candidate_score)
        .bind(&m.reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        written += 1;
    }
    tx.commit().await?;
    Ok(written)
}

/// All letters, newest first.
pub async fn list_letters(pool: &SqlitePool) -> Result<Vec<Letter>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM letters ORDER BY updated_at DESC, file_name ASC",
        LETTER_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(letter_from_row).collect())
}

pub async fn get_letter(pool: &SqlitePool, id: &str) -> Result<Option<LetterDetail>> {
    let row = sqlx::query(&format!("SELECT {} FROM letters WHERE id = ?", LETTER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let letter = letter_from_row(&row);

    let product_rows = sqlx::query(
        "SELECT * FROM letter_products WHERE letter_id = ? ORDER BY position ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut products = Vec::with_capacity(product_rows.len());
    for prow in &product_rows {
        let product = stored_product_from_row(prow);
        let matches = matches_for(pool, &product.id).await?;
        products.push(ProductWithMatches { product, matches });
    }

    Ok(Some(LetterDetail { letter, products }))
}

fn stored_product_from_row(row: &SqliteRow) -> StoredLetterProduct {
    let specs: String = row.get("technical_specifications_json");
    let replacements: String = row.get("replacement_suggestions_json");
    StoredLetterProduct {
        id: row.get("id"),
        letter_id: row.get("letter_id"),
        position: row.get("position"),
        product: LetterProduct {
            product_identifier: row.get("product_identifier"),
            range_label: row.get("range_label"),
            subrange_label: row.get("subrange_label"),
            product_line: row.get("product_line"),
            product_description: row.get("product_description"),
            technical_specifications: serde_json::from_str(&specs).unwrap_or_default(),
            obsolescence_status: row.get("obsolescence_status"),
            end_of_service_date: row.get("end_of_service_date"),
            replacement_suggestions: serde_json::from_str(&replacements).unwrap_or_default(),
        },
    }
}

async fn matches_for(pool: &SqlitePool, letter_product_id: &str) -> Result<Vec<ProductMatch>> {
    let rows = sqlx::query(
        r#"
        SELECT product_identifier, match_confidence, technical_match_score,
               nomenclature_match_score, product_line_match_score, candidate_score, match_reason
        FROM letter_product_matches
        WHERE letter_product_id = ?
        ORDER BY match_confidence DESC, product_identifier ASC
        "#,
    )
    .bind(letter_product_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| ProductMatch {
            product_identifier: r.get("product_identifier"),
            confidence: r.get("match_confidence"),
            technical_match_score: r.get("technical_match_score"),
            nomenclature_match_score: r.get("nomenclature_match_score"),
            product_line_match_score: r.get("product_line_match_score"),
            reason: r.get("match_reason"),
            candidate_score: r.get("candidate_score"),
        })
        .collect())
}

/// Remove a letter with its products and matches. Returns false if it did not exist.
pub async fn delete_letter(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let removed = delete_letter_rows(&mut tx, id).await?;
    tx.commit().await?;
    Ok(removed > 0)
}
