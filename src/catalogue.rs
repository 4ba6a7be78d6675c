//! IBcatalogue storage: candidate search and workbook import.
//!
//! Candidate search is one parameterized query. OR terms (identifier, range,
//! subrange, description keywords) select rows; device type and PL_SERVICES
//! code are AND constraints on top. SQLite's `LIKE` is case-insensitive for
//! ASCII, which stands in for `ILIKE`.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::extract::read_xlsx_rows;
use crate::filters::{like_pattern, word_start_pattern, SearchFilters, DEVICE_WORD_SEPARATORS};
use crate::models::ProductCandidate;

/// Catalogue columns in table order, with the IBcatalogue header names they import from.
const COLUMNS: &[(&str, &[&str])] = &[
    ("product_identifier", &["PRODUCT_IDENTIFIER"]),
    ("product_type", &["PRODUCT_TYPE"]),
    ("product_description", &["PRODUCT_DESCRIPTION"]),
    ("brand_code", &["BRAND_CODE"]),
    ("brand_label", &["BRAND_LABEL"]),
    ("range_code", &["RANGE_CODE"]),
    ("range_label", &["RANGE_LABEL"]),
    ("subrange_code", &["SUBRANGE_CODE"]),
    ("subrange_label", &["SUBRANGE_LABEL"]),
    ("devicetype_label", &["DEVICETYPE_LABEL", "DEVICE_TYPE_LABEL"]),
    ("commercial_status", &["COMMERCIAL_STATUS"]),
    ("end_of_production_date", &["END_OF_PRODUCTION_DATE"]),
    (
        "end_of_service_date",
        &["END_OF_SERVICE_DATE", "SERVICE_OBSOLECENSE_DATE"],
    ),
    ("pl_services", &["PL_SERVICES"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub rows_read: u64,
    pub upserted: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogueStats {
    pub total_products: i64,
    pub distinct_ranges: i64,
    pub by_commercial_status: Vec<(String, i64)>,
}

fn column_list() -> String {
    COLUMNS
        .iter()
        .map(|(c, _)| *c)
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_or_like(qb: &mut QueryBuilder<'_, Sqlite>, first: &mut bool, column: &str, value: &str) {
    if !*first {
        qb.push(" OR ");
    }
    *first = false;
    qb.push(column)
        .push(" LIKE ")
        .push_bind(like_pattern(value))
        .push(" ESCAPE '\\'");
}

/// `column` lower-cased, separators replaced by spaces, with a leading space,
/// for use with [`word_start_pattern`].
fn word_text(column: &str) -> String {
    let mut expr = format!("lower({})", column);
    for sep in DEVICE_WORD_SEPARATORS {
        expr = format!("replace({}, '{}', ' ')", expr, sep);
    }
    format!("(' ' || {})", expr)
}

/// Build the candidate query without executing it.
pub fn build_candidate_query(filters: &SearchFilters, limit: i64) -> QueryBuilder<'static, Sqlite> {
    let mut qb: QueryBuilder<'static, Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM products WHERE (", column_list()));

    let mut first = true;
    if let Some(id) = &filters.product_identifier {
        push_or_like(&mut qb, &mut first, "product_identifier", id);
    }
    if let Some(range) = &filters.range_label {
        push_or_like(&mut qb, &mut first, "range_label", range);
    }
    if let Some(subrange) = &filters.subrange_label {
        push_or_like(&mut qb, &mut first, "subrange_label", subrange);
    }
    for keyword in &filters.keywords {
        push_or_like(&mut qb, &mut first, "product_description", keyword);
    }
    qb.push(")");

    if let Some(device) = &filters.device_type {
        let pattern = word_start_pattern(device);
        qb.push(" AND (")
            .push(word_text("devicetype_label"))
            .push(" LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR ")
            .push(word_text("product_description"))
            .push(" LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }

    if let Some(code) = &filters.product_line_code {
        qb.push(" AND pl_services LIKE ")
            .push_bind(like_pattern(code))
            .push(" ESCAPE '\\'");
    }

    qb.push(" ORDER BY ");
    if let Some(id) = &filters.product_identifier {
        qb.push("CASE WHEN product_identifier = ")
            .push_bind(id.clone())
            .push(" COLLATE NOCASE THEN 0 ELSE 1 END, ");
    }
    if let Some(range) = &filters.range_label {
        qb.push("CASE WHEN range_label = ")
            .push_bind(range.clone())
            .push(" COLLATE NOCASE THEN 0 ELSE 1 END, ");
    }
    qb.push("product_identifier LIMIT ").push_bind(limit);
    qb
}

/// Fetch up to `limit` catalogue rows matching `filters`.
///
/// Returns nothing when the filters carry no OR term, so an empty product
/// never turns into a full catalogue scan.
pub async fn search_candidates(
    pool: &SqlitePool,
    filters: &SearchFilters,
    limit: i64,
) -> Result<Vec<ProductCandidate>> {
    if !filters.has_terms() {
        return Ok(Vec::new());
    }

    let mut qb = build_candidate_query(filters, limit);
    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows.iter().map(candidate_from_row).collect())
}

fn candidate_from_row(row: &SqliteRow) -> ProductCandidate {
    ProductCandidate {
        product_identifier: row.get("product_identifier"),
        product_type: row.get("product_type"),
        product_description: row.get("product_description"),
        brand_code: row.get("brand_code"),
        brand_label: row.get("brand_label"),
        range_code: row.get("range_code"),
        range_label: row.get("range_label"),
        subrange_code: row.get("subrange_code"),
        subrange_label: row.get("subrange_label"),
        devicetype_label: row.get("devicetype_label"),
        commercial_status: row.get("commercial_status"),
        end_of_production_date: row.get("end_of_production_date"),
        end_of_service_date: row.get("end_of_service_date"),
        pl_services: row.get("pl_services"),
        match_score: 0.0,
    }
}

/// Import an IBcatalogue XLSX export.
pub async fn import_xlsx(pool: &SqlitePool, bytes: &[u8]) -> Result<ImportSummary> {
    let rows = read_xlsx_rows(bytes)?;
    import_rows(pool, &rows).await
}

/// Upsert catalogue rows; the first row is the header.
///
/// Headers are matched case-insensitively against IBcatalogue column names.
/// Unknown columns are ignored and rows without an identifier are skipped.
pub async fn import_rows(pool: &SqlitePool, rows: &[Vec<String>]) -> Result<ImportSummary> {
    let Some((header, body)) = rows.split_first() else {
        bail!("catalogue sheet is empty");
    };

    // positions[i] = index in the sheet row of COLUMNS[i]
    let positions: Vec<Option<usize>> = COLUMNS
        .iter()
        .map(|(_, aliases)| {
            header.iter().position(|h| {
                aliases
                    .iter()
                    .any(|a| h.trim().eq_ignore_ascii_case(a))
            })
        })
        .collect();

    if positions[0].is_none() {
        bail!("catalogue header has no PRODUCT_IDENTIFIER column");
    }

    // Only columns present in this sheet are overwritten on conflict, so a
    // partial workbook (e.g. identifier + status) updates rows in place.
    let placeholders = vec!["?"; COLUMNS.len()].join(", ");
    let updates = COLUMNS
        .iter()
        .zip(&positions)
        .skip(1)
        .filter(|(_, pos)| pos.is_some())
        .map(|((c, _), _)| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>();
    let on_conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    let sql = format!(
        "INSERT INTO products ({}) VALUES ({}) ON CONFLICT(product_identifier) {}",
        column_list(),
        placeholders,
        on_conflict
    );

    let mut summary = ImportSummary::default();
    let mut tx = pool.begin().await?;

    for row in body {
        summary.rows_read += 1;
        let values: Vec<Option<String>> = positions
            .iter()
            .map(|pos| {
                pos.and_then(|i| row.get(i))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            })
            .collect();

        if values[0].is_none() {
            summary.skipped += 1;
            continue;
        }

        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        query.execute(&mut *tx).await?;
        summary.upserted += 1;
    }

    tx.commit().await?;
    Ok(summary)
}

pub async fn catalogue_stats(pool: &SqlitePool) -> Result<CatalogueStats> {
    let total_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
        .fetch_one(pool)
        .await?;
    let distinct_ranges: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT range_label) FROM products")
            .fetch_one(pool)
            .await?;
    let rows = sqlx::query(
        r#"
        SELECT COALESCE(commercial_status, '(none)') AS status, COUNT(*) AS n
        FROM products
        GROUP BY status
        ORDER BY n DESC, status ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(CatalogueStats {
        total_products,
        distinct_ranges,
        by_commercial_status: rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect(),
    })
}

/// CLI entry point for `sel catalogue import`.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read catalogue {}", path.display()))?;
    let pool = db::connect(config).await?;
    let started = std::time::Instant::now();
    let summary = import_xlsx(&pool, &bytes).await?;
    pool.close().await;

    tracing::info!(
        rows = summary.rows_read,
        upserted = summary.upserted,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "catalogue imported"
    );
    println!("catalogue import {}", path.display());
    println!("  rows read: {}", summary.rows_read);
    println!("  upserted: {}", summary.upserted);
    println!("  skipped (no identifier): {}", summary.skipped);
    println!("ok");
    Ok(())
}

/// CLI entry point for `sel catalogue stats`.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = catalogue_stats(&pool).await?;
    pool.close().await;

    println!("IBcatalogue");
    println!("  products: {}", stats.total_products);
    println!("  ranges:   {}", stats.distinct_ranges);
    if !stats.by_commercial_status.is_empty() {
        println!();
        println!("  {:<40} {:>8}", "COMMERCIAL STATUS", "PRODUCTS");
        for (status, n) in &stats.by_commercial_status {
            println!("  {:<40} {:>8}", status, n);
        }
    }
    Ok(())
}
