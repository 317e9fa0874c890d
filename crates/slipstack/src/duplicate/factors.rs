//! Factor scorers for duplicate detection.
//!
//! Each factor maps a difference (or a similarity) onto a small point
//! budget through an ordered band table. The sum of the five factors is
//! the candidate's confidence score (0–100).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use super::similarity::string_similarity;

/// Which side of a band threshold satisfies the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// `value >= threshold`; tables are ordered by descending threshold.
    AtLeast,
    /// `value <= threshold`; tables are ordered by ascending threshold.
    AtMost,
}

/// Returns the points of the first band whose threshold `value` satisfies,
/// or 0 when none does.
pub fn band_points<T: PartialOrd>(bands: &[(T, u32)], value: &T, bound: Bound) -> u32 {
    bands
        .iter()
        .find(|(threshold, _)| match bound {
            Bound::AtLeast => value >= threshold,
            Bound::AtMost => value <= threshold,
        })
        .map(|(_, points)| *points)
        .unwrap_or(0)
}

pub const STORE_NAME_MAX: u32 = 30;
pub const TOTAL_AMOUNT_MAX: u32 = 25;
pub const DATE_MAX: u32 = 20;
pub const ITEM_COUNT_MAX: u32 = 15;
pub const TAX_AMOUNT_MAX: u32 = 10;

const STORE_NAME_BANDS: &[(f64, u32)] = &[
    (100.0, 30),
    (90.0, 28),
    (80.0, 23),
    (70.0, 18),
    (60.0, 12),
];

const DATE_BANDS: &[(i64, u32)] = &[(0, 20), (1, 15), (3, 10)];

const ITEM_COUNT_BANDS: &[(i64, u32)] = &[(0, 15), (1, 12), (2, 8), (3, 5)];

fn total_amount_bands() -> [(Decimal, u32); 5] {
    [
        (Decimal::ZERO, 25),
        (Decimal::new(1, 2), 23),
        (Decimal::new(10, 2), 20),
        (Decimal::ONE, 15),
        (Decimal::new(5, 0), 10),
    ]
}

fn tax_amount_bands() -> [(Decimal, u32); 3] {
    [
        (Decimal::ZERO, 10),
        (Decimal::new(1, 2), 8),
        (Decimal::new(10, 2), 5),
    ]
}

/// Store-name contribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreNameFactor {
    pub score: u32,
    /// Similarity in percent, rounded to a whole number.
    pub similarity: f64,
}

/// Contribution of a monetary field (total or tax).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountFactor {
    pub score: u32,
    /// Absolute difference, rounded to cents. `None` when either side is missing.
    pub difference: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateFactor {
    pub score: u32,
    pub days_difference: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCountFactor {
    pub score: u32,
    pub difference: i64,
}

/// Per-factor breakdown of a candidate's score, persisted as
/// `duplicate_matches.match_factors`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFactors {
    pub store_name: StoreNameFactor,
    pub total_amount: AmountFactor,
    pub date: DateFactor,
    pub item_count: ItemCountFactor,
    pub tax_amount: AmountFactor,
}

impl MatchFactors {
    pub fn total(&self) -> u32 {
        self.store_name.score
            + self.total_amount.score
            + self.date.score
            + self.item_count.score
            + self.tax_amount.score
    }
}

/// The fields of a receipt that take part in scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringFields<'a> {
    pub store_name: Option<&'a str>,
    pub total_amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub transaction_date: Option<NaiveDate>,
    pub item_count: i64,
}

pub fn score_store_name(a: Option<&str>, b: Option<&str>) -> StoreNameFactor {
    match (a, b) {
        (Some(a), Some(b)) => {
            let similarity = string_similarity(a, b);
            StoreNameFactor {
                score: band_points(STORE_NAME_BANDS, &similarity, Bound::AtLeast),
                similarity: similarity.round(),
            }
        }
        _ => StoreNameFactor {
            score: 0,
            similarity: 0.0,
        },
    }
}

fn score_amount(a: Option<Decimal>, b: Option<Decimal>, bands: &[(Decimal, u32)]) -> AmountFactor {
    // an unrepresentable difference earns no points
    match a.zip(b).and_then(|(a, b)| a.checked_sub(b)) {
        Some(difference) => {
            let difference = difference.abs();
            AmountFactor {
                score: band_points(bands, &difference, Bound::AtMost),
                difference: Some(difference.round_dp(2)),
            }
        }
        None => AmountFactor {
            score: 0,
            difference: None,
        },
    }
}

pub fn score_total_amount(a: Option<Decimal>, b: Option<Decimal>) -> AmountFactor {
    score_amount(a, b, &total_amount_bands())
}

pub fn score_tax_amount(a: Option<Decimal>, b: Option<Decimal>) -> AmountFactor {
    score_amount(a, b, &tax_amount_bands())
}

pub fn score_date(a: Option<NaiveDate>, b: Option<NaiveDate>) -> DateFactor {
    match (a, b) {
        (Some(a), Some(b)) => {
            let days = (a - b).num_days().abs();
            DateFactor {
                score: band_points(DATE_BANDS, &days, Bound::AtMost),
                days_difference: Some(days),
            }
        }
        _ => DateFactor {
            score: 0,
            days_difference: None,
        },
    }
}

pub fn score_item_count(a: i64, b: i64) -> ItemCountFactor {
    let difference = (a - b).abs();
    ItemCountFactor {
        score: band_points(ITEM_COUNT_BANDS, &difference, Bound::AtMost),
        difference,
    }
}

/// Scores a subject receipt against one candidate.
pub fn score_pair(subject: &ScoringFields<'_>, candidate: &ScoringFields<'_>) -> MatchFactors {
    MatchFactors {
        store_name: score_store_name(subject.store_name, candidate.store_name),
        total_amount: score_total_amount(subject.total_amount, candidate.total_amount),
        date: score_date(subject.transaction_date, candidate.transaction_date),
        item_count: score_item_count(subject.item_count, candidate.item_count),
        tax_amount: score_tax_amount(subject.tax_amount, candidate.tax_amount),
    }
}
