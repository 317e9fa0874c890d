//! Processing-error repository: the append-only `processing_errors` table.

use rusqlite::{params, Connection};

use super::models::{ErrorCategory, ProcessingErrorRow};
use super::{now_timestamp, DatabaseError};

/// Appends an audit record. `receipt_id` is `None` for whole-upload failures.
pub fn insert(
    conn: &Connection,
    upload_id: i64,
    receipt_id: Option<i64>,
    category: ErrorCategory,
    message: &str,
    metadata: &serde_json::Value,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO processing_errors (upload_id, receipt_id, category, message, metadata,
             created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            upload_id,
            receipt_id,
            category,
            message,
            serde_json::to_string(metadata)?,
            now_timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Lists an upload's audit records in insertion order.
pub fn list_for_upload(
    conn: &Connection,
    upload_id: i64,
) -> Result<Vec<ProcessingErrorRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM processing_errors WHERE upload_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![upload_id], ProcessingErrorRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Counts an upload's audit records of one category.
pub fn count_by_category(
    conn: &Connection,
    upload_id: i64,
    category: ErrorCategory,
) -> Result<u64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM processing_errors WHERE upload_id = ?1 AND category = ?2",
        params![upload_id, category],
        |r| r.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{receipt_repo, upload_repo, Database};

    #[test]
    fn test_insert_and_list() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let upload = upload_repo::insert(conn, 1, "/files/a.jpg")?;
            let receipt = receipt_repo::upsert_pending(conn, upload, 0, None)?;

            insert(
                conn,
                upload,
                Some(receipt),
                ErrorCategory::ExtractionFailure,
                "no total",
                &serde_json::json!({ "region_index": 0 }),
            )?;
            insert(
                conn,
                upload,
                None,
                ErrorCategory::SystemError,
                "segmenter unavailable",
                &serde_json::json!({}),
            )?;

            let rows = list_for_upload(conn, upload)?;
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].receipt_id, Some(receipt));
            assert_eq!(rows[0].category, ErrorCategory::ExtractionFailure);
            assert_eq!(rows[0].metadata["region_index"], 0);
            assert_eq!(rows[1].receipt_id, None);
            assert_eq!(rows[1].message.as_deref(), Some("segmenter unavailable"));

            assert_eq!(
                count_by_category(conn, upload, ErrorCategory::SystemError)?,
                1
            );
            assert_eq!(
                count_by_category(conn, upload, ErrorCategory::ImageQuality)?,
                0
            );
            Ok(())
        })
        .unwrap();
    }
}
