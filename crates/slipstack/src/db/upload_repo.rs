//! Upload repository: the `receipt_uploads` table.

use rusqlite::{params, Connection, OptionalExtension};

use super::models::{UploadRow, UploadStatus};
use super::{now_timestamp, DatabaseError};

/// Inserts a new upload in `processing` state and returns its id.
pub fn insert(
    conn: &Connection,
    user_id: i64,
    original_image_url: &str,
) -> Result<i64, DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO receipt_uploads (user_id, original_image_url, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![user_id, original_image_url, UploadStatus::Processing, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Finds an upload by id.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<UploadRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM receipt_uploads WHERE id = ?1",
            params![id],
            UploadRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists a user's uploads, newest first.
pub fn list_for_user(conn: &Connection, user_id: i64) -> Result<Vec<UploadRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM receipt_uploads WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![user_id], UploadRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Updates only the status and `updated_at` of an upload.
pub fn update_status(
    conn: &Connection,
    id: i64,
    status: UploadStatus,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE receipt_uploads SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status, now_timestamp()],
    )?;
    Ok(())
}

/// Records the outcome of segmentation.
pub fn set_has_receipts(
    conn: &Connection,
    id: i64,
    has_receipts: bool,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE receipt_uploads SET has_receipts = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, has_receipts, now_timestamp()],
    )?;
    Ok(())
}

/// Attaches the annotated overlay image.
pub fn set_marked_image(conn: &Connection, id: i64, url: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE receipt_uploads SET marked_image_url = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, url, now_timestamp()],
    )?;
    Ok(())
}

/// Puts an upload back into `processing` and forgets segmentation results.
/// Only the reprocess path calls this, after purging the upload's children.
pub fn reset_for_reprocess(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE receipt_uploads
         SET status = ?2, marked_image_url = NULL, has_receipts = NULL, updated_at = ?3
         WHERE id = ?1",
        params![id, UploadStatus::Processing, now_timestamp()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = insert(conn, 42, "/files/sheet.jpg")?;
            let found = find_by_id(conn, id)?.unwrap();
            assert_eq!(found.user_id, 42);
            assert_eq!(found.original_image_url, "/files/sheet.jpg");
            assert_eq!(found.status, UploadStatus::Processing);
            assert_eq!(found.has_receipts, None);
            assert!(found.marked_image_url.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        let found = db.with_conn(|conn| find_by_id(conn, 999)).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_stage_updates() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = insert(conn, 1, "/files/a.jpg")?;
            set_has_receipts(conn, id, true)?;
            set_marked_image(conn, id, "/files/marked-1.jpg")?;
            update_status(conn, id, UploadStatus::PartlyCompleted)?;

            let found = find_by_id(conn, id)?.unwrap();
            assert_eq!(found.has_receipts, Some(true));
            assert_eq!(found.marked_image_url.as_deref(), Some("/files/marked-1.jpg"));
            assert_eq!(found.status, UploadStatus::PartlyCompleted);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reset_for_reprocess() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = insert(conn, 1, "/files/a.jpg")?;
            set_has_receipts(conn, id, false)?;
            set_marked_image(conn, id, "/files/marked-1.jpg")?;
            update_status(conn, id, UploadStatus::Failed)?;

            reset_for_reprocess(conn, id)?;
            let found = find_by_id(conn, id)?.unwrap();
            assert_eq!(found.status, UploadStatus::Processing);
            assert_eq!(found.has_receipts, None);
            assert!(found.marked_image_url.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_list_for_user() {
        let db = test_db();
        db.with_conn(|conn| {
            insert(conn, 1, "/files/a.jpg")?;
            insert(conn, 1, "/files/b.jpg")?;
            insert(conn, 2, "/files/c.jpg")?;
            assert_eq!(list_for_user(conn, 1)?.len(), 2);
            assert_eq!(list_for_user(conn, 2)?.len(), 1);
            assert!(list_for_user(conn, 3)?.is_empty());
            Ok(())
        })
        .unwrap();
    }
}
