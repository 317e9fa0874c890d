//! Duplicate-match repository: the `duplicate_matches` table.

use rusqlite::{params, Connection};

use super::models::{DuplicateMatchRow, UserAction};
use super::{now_timestamp, DatabaseError};

/// Records a significant scoring decision awaiting user action.
pub fn insert(
    conn: &Connection,
    receipt_id: i64,
    potential_duplicate_id: i64,
    confidence_score: f64,
    match_factors: &serde_json::Value,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO duplicate_matches (receipt_id, potential_duplicate_id, confidence_score,
             match_factors, user_action, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            receipt_id,
            potential_duplicate_id,
            confidence_score,
            serde_json::to_string(match_factors)?,
            UserAction::Pending,
            now_timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Lists the matches where `receipt_id` is the scored subject.
pub fn list_for_receipt(
    conn: &Connection,
    receipt_id: i64,
) -> Result<Vec<DuplicateMatchRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM duplicate_matches WHERE receipt_id = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![receipt_id], DuplicateMatchRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Sets the user action on every match naming `receipt_id` as the subject.
/// When `only_pending` is set, matches already decided are left alone.
pub fn set_user_action(
    conn: &Connection,
    receipt_id: i64,
    action: UserAction,
    only_pending: bool,
) -> Result<usize, DatabaseError> {
    let changed = if only_pending {
        conn.execute(
            "UPDATE duplicate_matches SET user_action = ?2
             WHERE receipt_id = ?1 AND user_action = ?3",
            params![receipt_id, action, UserAction::Pending],
        )?
    } else {
        conn.execute(
            "UPDATE duplicate_matches SET user_action = ?2 WHERE receipt_id = ?1",
            params![receipt_id, action],
        )?
    };
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{receipt_repo, upload_repo, Database};

    #[test]
    fn test_insert_and_set_user_action() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let upload = upload_repo::insert(conn, 1, "/files/a.jpg")?;
            let subject = receipt_repo::upsert_pending(conn, upload, 0, None)?;
            let prior = receipt_repo::upsert_pending(conn, upload, 1, None)?;

            insert(conn, subject, prior, 88.0, &serde_json::json!({ "date": { "score": 20 } }))?;
            insert(conn, subject, prior, 72.0, &serde_json::json!({}))?;

            let rows = list_for_receipt(conn, subject)?;
            assert_eq!(rows.len(), 2);
            assert!(rows.iter().all(|r| r.user_action == UserAction::Pending));
            assert_eq!(rows[0].match_factors["date"]["score"], 20);

            let changed = set_user_action(conn, subject, UserAction::Override, false)?;
            assert_eq!(changed, 2);
            let changed = set_user_action(conn, subject, UserAction::ConfirmedDuplicate, true)?;
            assert_eq!(changed, 0);

            let rows = list_for_receipt(conn, subject)?;
            assert!(rows.iter().all(|r| r.user_action == UserAction::Override));
            assert!(list_for_receipt(conn, prior)?.is_empty());
            Ok(())
        })
        .unwrap();
    }
}
