//! Receipt repository: the `receipts` and `line_items` tables.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use super::models::{date_to_sql, LineItemRow, NewLineItem, ReceiptRow, ReceiptStatus};
use super::{now_timestamp, DatabaseError};

/// Extracted fields written when a receipt becomes `processed`.
#[derive(Debug, Clone, Default)]
pub struct ProcessedFields {
    pub store_name: Option<String>,
    pub total_amount: Decimal,
    pub tax_amount: Option<Decimal>,
    pub transaction_date: Option<NaiveDate>,
    pub currency: String,
    pub keywords: Vec<String>,
}

/// A prior receipt considered by duplicate scoring, with its item count.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub receipt: ReceiptRow,
    pub item_count: i64,
}

/// Per-status receipt counts for one upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub processed: u64,
    pub failed: u64,
    pub unreadable: u64,
    pub duplicates: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processed + self.failed + self.unreadable
    }
}

/// Creates (or resets) the `pending` receipt for one region of an upload and
/// returns its id. Rows left behind by an interrupted earlier run for the same
/// `(upload_id, region_index)` are reset instead of duplicated.
pub fn upsert_pending(
    conn: &Connection,
    upload_id: i64,
    region_index: usize,
    image_url: Option<&str>,
) -> Result<i64, DatabaseError> {
    let id: i64 = conn.query_row(
        "INSERT INTO receipts (upload_id, region_index, status, image_url)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (upload_id, region_index) DO UPDATE SET
             status = excluded.status,
             image_url = excluded.image_url,
             store_name = NULL,
             total_amount = NULL,
             tax_amount = NULL,
             transaction_date = NULL,
             currency = NULL,
             keywords = NULL,
             is_duplicate = 0,
             duplicate_of_receipt_id = NULL,
             duplicate_confidence_score = NULL,
             duplicate_checked_at = NULL,
             duplicate_override = 0
         RETURNING id",
        params![upload_id, region_index as i64, ReceiptStatus::Pending, image_url],
        |r| r.get(0),
    )?;

    conn.execute("DELETE FROM line_items WHERE receipt_id = ?1", params![id])?;
    conn.execute(
        "DELETE FROM processing_errors WHERE receipt_id = ?1",
        params![id],
    )?;
    conn.execute(
        "DELETE FROM duplicate_matches WHERE receipt_id = ?1 OR potential_duplicate_id = ?1",
        params![id],
    )?;

    Ok(id)
}

/// Moves a receipt to a terminal non-processed status.
pub fn mark_status(
    conn: &Connection,
    id: i64,
    status: ReceiptStatus,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE receipts SET status = ?2 WHERE id = ?1",
        params![id, status],
    )?;
    Ok(())
}

/// Marks a receipt `processed` and stores its extracted fields.
pub fn mark_processed(
    conn: &Connection,
    id: i64,
    fields: &ProcessedFields,
) -> Result<(), DatabaseError> {
    let keywords = serde_json::to_string(&fields.keywords)?;
    conn.execute(
        "UPDATE receipts SET status = ?2, store_name = ?3, total_amount = ?4, tax_amount = ?5,
             transaction_date = ?6, currency = ?7, keywords = ?8
         WHERE id = ?1",
        params![
            id,
            ReceiptStatus::Processed,
            fields.store_name,
            fields.total_amount.to_string(),
            fields.tax_amount.map(|t| t.to_string()),
            fields.transaction_date.map(date_to_sql),
            fields.currency,
            keywords,
        ],
    )?;
    Ok(())
}

/// Inserts the line items of a processed receipt, preserving order.
pub fn insert_line_items(
    conn: &Connection,
    receipt_id: i64,
    items: &[NewLineItem],
) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO line_items (receipt_id, description, amount, unit, price_per_unit,
             total_price, keywords)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for item in items {
        stmt.execute(params![
            receipt_id,
            item.description,
            item.amount.to_string(),
            item.unit,
            item.price_per_unit.map(|p| p.to_string()),
            item.total_price.to_string(),
            serde_json::to_string(&item.keywords)?,
        ])?;
    }
    Ok(())
}

/// Finds a receipt by id.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<ReceiptRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM receipts WHERE id = ?1",
            params![id],
            ReceiptRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists an upload's receipts in region order.
pub fn list_for_upload(
    conn: &Connection,
    upload_id: i64,
) -> Result<Vec<ReceiptRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM receipts WHERE upload_id = ?1 ORDER BY region_index")?;
    let rows = stmt
        .query_map(params![upload_id], ReceiptRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Lists a receipt's line items in insertion order.
pub fn line_items(conn: &Connection, receipt_id: i64) -> Result<Vec<LineItemRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM line_items WHERE receipt_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![receipt_id], LineItemRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts a receipt's line items.
pub fn count_line_items(conn: &Connection, receipt_id: i64) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM line_items WHERE receipt_id = ?1",
        params![receipt_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Counts an upload's receipts by status.
pub fn status_counts(conn: &Connection, upload_id: i64) -> Result<StatusCounts, DatabaseError> {
    let mut counts = StatusCounts::default();
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*), SUM(is_duplicate) FROM receipts WHERE upload_id = ?1
         GROUP BY status",
    )?;
    let rows = stmt.query_map(params![upload_id], |r| {
        Ok((
            r.get::<_, ReceiptStatus>(0)?,
            r.get::<_, u64>(1)?,
            r.get::<_, Option<u64>>(2)?,
        ))
    })?;
    for row in rows {
        let (status, count, duplicates) = row?;
        match status {
            ReceiptStatus::Pending => counts.pending = count,
            ReceiptStatus::Processed => counts.processed = count,
            ReceiptStatus::Failed => counts.failed = count,
            ReceiptStatus::Unreadable => counts.unreadable = count,
        }
        counts.duplicates += duplicates.unwrap_or(0);
    }
    Ok(counts)
}

/// Prior processed receipts of `user_id` other than `exclude_id`, optionally
/// restricted to an inclusive transaction-date window. Ordered by id so the
/// first-encountered candidate is stable.
pub fn find_candidates(
    conn: &Connection,
    user_id: i64,
    exclude_id: i64,
    window: Option<(NaiveDate, NaiveDate)>,
) -> Result<Vec<Candidate>, DatabaseError> {
    let base = "SELECT r.*, (SELECT COUNT(*) FROM line_items li WHERE li.receipt_id = r.id)
                    AS item_count
                FROM receipts r
                JOIN receipt_uploads u ON u.id = r.upload_id
                WHERE u.user_id = ?1 AND r.status = ?2 AND r.id != ?3";

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<Candidate> {
        Ok(Candidate {
            receipt: ReceiptRow::from_row(r)?,
            item_count: r.get("item_count")?,
        })
    };

    let rows = match window {
        Some((start, end)) => {
            let sql = format!(
                "{} AND r.transaction_date >= ?4 AND r.transaction_date <= ?5 ORDER BY r.id",
                base
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        user_id,
                        ReceiptStatus::Processed,
                        exclude_id,
                        date_to_sql(start),
                        date_to_sql(end)
                    ],
                    map_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let sql = format!("{} ORDER BY r.id", base);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![user_id, ReceiptStatus::Processed, exclude_id],
                    map_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

/// Flags a receipt as a duplicate of another.
pub fn mark_duplicate(
    conn: &Connection,
    id: i64,
    duplicate_of: i64,
    confidence_score: f64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE receipts SET is_duplicate = 1, duplicate_of_receipt_id = ?2,
             duplicate_confidence_score = ?3, duplicate_checked_at = ?4
         WHERE id = ?1",
        params![id, duplicate_of, confidence_score, now_timestamp()],
    )?;
    Ok(())
}

/// Clears the duplicate flag and records the user's override.
pub fn override_duplicate(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE receipts SET is_duplicate = 0, duplicate_override = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Deletes every receipt of an upload together with its line items,
/// duplicate matches (either side) and receipt-scoped processing errors.
/// Upload-level errors are only removed when `include_upload_errors` is set.
/// Receipts elsewhere that were flagged as duplicates of a deleted receipt
/// lose that flag.
pub fn clear_for_upload(
    conn: &Connection,
    upload_id: i64,
    include_upload_errors: bool,
) -> Result<(), DatabaseError> {
    const OWNED: &str = "SELECT id FROM receipts WHERE upload_id = ?1";

    conn.execute(
        &format!(
            "DELETE FROM duplicate_matches
             WHERE receipt_id IN ({owned}) OR potential_duplicate_id IN ({owned})",
            owned = OWNED
        ),
        params![upload_id],
    )?;
    conn.execute(
        &format!(
            "UPDATE receipts SET is_duplicate = 0, duplicate_of_receipt_id = NULL,
                 duplicate_confidence_score = NULL
             WHERE upload_id != ?1 AND duplicate_of_receipt_id IN ({})",
            OWNED
        ),
        params![upload_id],
    )?;
    conn.execute(
        &format!("DELETE FROM line_items WHERE receipt_id IN ({})", OWNED),
        params![upload_id],
    )?;
    if include_upload_errors {
        conn.execute(
            "DELETE FROM processing_errors WHERE upload_id = ?1",
            params![upload_id],
        )?;
    } else {
        conn.execute(
            "DELETE FROM processing_errors WHERE upload_id = ?1 AND receipt_id IS NOT NULL",
            params![upload_id],
        )?;
    }
    conn.execute("DELETE FROM receipts WHERE upload_id = ?1", params![upload_id])?;
    Ok(())
}
