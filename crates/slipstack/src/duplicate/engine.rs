//! Candidate selection, aggregation and confidence classification.

use chrono::Days;
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::factors::{score_pair, MatchFactors, ScoringFields};
use crate::db::models::{ReceiptRow, UserAction};
use crate::db::receipt_repo::{self, Candidate};
use crate::db::{duplicate_repo, Database, DatabaseError};

/// Score at or above which a receipt is flagged as a duplicate.
pub const DUPLICATE_THRESHOLD: f64 = 85.0;
/// Score at or above which a match is persisted for user review.
pub const REPORTING_THRESHOLD: f64 = 70.0;
/// Candidates must be dated within this many days of the subject.
pub const DATE_WINDOW_DAYS: u64 = 3;

const DEFINITE_THRESHOLD: f64 = 95.0;
const UNCERTAIN_THRESHOLD: f64 = 50.0;

#[derive(Error, Debug)]
pub enum DuplicateError {
    #[error("Receipt {0} not found")]
    ReceiptNotFound(i64),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Named confidence band of a duplicate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    DefiniteDuplicate,
    LikelyDuplicate,
    PossibleDuplicate,
    Uncertain,
    NotDuplicate,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::DefiniteDuplicate => "DEFINITE_DUPLICATE",
            ConfidenceLevel::LikelyDuplicate => "LIKELY_DUPLICATE",
            ConfidenceLevel::PossibleDuplicate => "POSSIBLE_DUPLICATE",
            ConfidenceLevel::Uncertain => "UNCERTAIN",
            ConfidenceLevel::NotDuplicate => "NOT_DUPLICATE",
        }
    }
}

pub fn classify_confidence(score: f64) -> ConfidenceLevel {
    if score >= DEFINITE_THRESHOLD {
        ConfidenceLevel::DefiniteDuplicate
    } else if score >= DUPLICATE_THRESHOLD {
        ConfidenceLevel::LikelyDuplicate
    } else if score >= REPORTING_THRESHOLD {
        ConfidenceLevel::PossibleDuplicate
    } else if score >= UNCERTAIN_THRESHOLD {
        ConfidenceLevel::Uncertain
    } else {
        ConfidenceLevel::NotDuplicate
    }
}

/// Result of scoring one receipt against the user's history.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub confidence_score: f64,
    pub confidence_level: ConfidenceLevel,
    pub matched_receipt: Option<ReceiptRow>,
    pub match_factors: Option<MatchFactors>,
}

impl DuplicateCheck {
    fn no_match() -> Self {
        Self {
            is_duplicate: false,
            confidence_score: 0.0,
            confidence_level: ConfidenceLevel::NotDuplicate,
            matched_receipt: None,
            match_factors: None,
        }
    }

    /// Whether the match is strong enough to be kept for review.
    pub fn is_reported(&self) -> bool {
        self.matched_receipt.is_some() && self.confidence_score >= REPORTING_THRESHOLD
    }
}

fn scoring_fields(receipt: &ReceiptRow, item_count: i64) -> ScoringFields<'_> {
    ScoringFields {
        store_name: receipt.store_name.as_deref(),
        total_amount: receipt.total_amount,
        tax_amount: receipt.tax_amount,
        transaction_date: receipt.transaction_date,
        item_count,
    }
}

/// Picks the candidate with the strictly highest score. The first candidate
/// wins ties; a candidate scoring zero is never a match.
pub fn best_match<'a>(
    subject: &ScoringFields<'_>,
    candidates: &'a [Candidate],
) -> Option<(&'a Candidate, MatchFactors)> {
    let mut best: Option<(&Candidate, MatchFactors)> = None;
    let mut highest = 0;

    for candidate in candidates {
        let factors = score_pair(
            subject,
            &scoring_fields(&candidate.receipt, candidate.item_count),
        );
        let total = factors.total();
        if total > highest {
            highest = total;
            best = Some((candidate, factors));
        }
    }

    best
}

/// Scores `receipt_id` against the same user's other processed receipts
/// and persists a pending [`DuplicateMatch`](crate::db::models::DuplicateMatchRow)
/// when the best score reaches [`REPORTING_THRESHOLD`].
///
/// Runs on a borrowed connection so callers can include it in a larger
/// transaction.
pub fn check_for_duplicates(
    conn: &Connection,
    receipt_id: i64,
    user_id: i64,
) -> Result<DuplicateCheck, DuplicateError> {
    let subject = receipt_repo::find_by_id(conn, receipt_id)?
        .ok_or(DuplicateError::ReceiptNotFound(receipt_id))?;
    let item_count = receipt_repo::count_line_items(conn, receipt_id)?;

    let window = subject.transaction_date.map(|date| {
        let days = Days::new(DATE_WINDOW_DAYS);
        (
            date.checked_sub_days(days).unwrap_or(chrono::NaiveDate::MIN),
            date.checked_add_days(days).unwrap_or(chrono::NaiveDate::MAX),
        )
    });

    let candidates = receipt_repo::find_candidates(conn, user_id, receipt_id, window)?;
    debug!(
        receipt_id,
        candidates = candidates.len(),
        "Scoring receipt against prior receipts"
    );

    let subject_fields = scoring_fields(&subject, item_count);
    let Some((candidate, factors)) = best_match(&subject_fields, &candidates) else {
        return Ok(DuplicateCheck::no_match());
    };

    let score = f64::from(factors.total());
    let check = DuplicateCheck {
        is_duplicate: score >= DUPLICATE_THRESHOLD,
        confidence_score: score,
        confidence_level: classify_confidence(score),
        matched_receipt: Some(candidate.receipt.clone()),
        match_factors: Some(factors),
    };

    if check.is_reported() {
        let breakdown = serde_json::to_value(factors).map_err(DatabaseError::from)?;
        duplicate_repo::insert(conn, receipt_id, candidate.receipt.id, score, &breakdown)?;
        debug!(
            receipt_id,
            matched = candidate.receipt.id,
            score,
            level = check.confidence_level.as_str(),
            "Recorded duplicate match"
        );
    }

    Ok(check)
}

/// Duplicate operations over the shared database handle.
#[derive(Clone)]
pub struct DuplicateDetector {
    db: Database,
}

impl DuplicateDetector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Scores a receipt in its own transaction.
    pub fn score(&self, receipt_id: i64, user_id: i64) -> Result<DuplicateCheck, DuplicateError> {
        self.db
            .with_transaction(|conn| check_for_duplicates(conn, receipt_id, user_id))
    }

    /// Flags `receipt_id` as a duplicate of `duplicate_of`.
    pub fn mark_as_duplicate(
        &self,
        receipt_id: i64,
        duplicate_of: i64,
        confidence_score: f64,
    ) -> Result<(), DuplicateError> {
        self.db.with_transaction(|conn| {
            ensure_exists(conn, receipt_id)?;
            receipt_repo::mark_duplicate(conn, receipt_id, duplicate_of, confidence_score)?;
            Ok(())
        })
    }

    /// Clears the duplicate flag on the user's behalf and marks every match
    /// with this subject as overridden.
    pub fn override_duplicate_flag(&self, receipt_id: i64) -> Result<(), DuplicateError> {
        self.db.with_transaction(|conn| {
            ensure_exists(conn, receipt_id)?;
            receipt_repo::override_duplicate(conn, receipt_id)?;
            duplicate_repo::set_user_action(conn, receipt_id, UserAction::Override, false)?;
            Ok(())
        })
    }

    /// Confirms every pending match for `receipt_id`. Returns the number of
    /// matches updated.
    pub fn confirm_duplicate(&self, receipt_id: i64) -> Result<usize, DuplicateError> {
        self.db.with_transaction(|conn| {
            ensure_exists(conn, receipt_id)?;
            let changed = duplicate_repo::set_user_action(
                conn,
                receipt_id,
                UserAction::ConfirmedDuplicate,
                true,
            )?;
            Ok(changed)
        })
    }
}

fn ensure_exists(conn: &Connection, receipt_id: i64) -> Result<(), DuplicateError> {
    receipt_repo::find_by_id(conn, receipt_id)?
        .map(|_| ())
        .ok_or(DuplicateError::ReceiptNotFound(receipt_id))
}
