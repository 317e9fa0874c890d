//! Row types and status enums shared by the repositories.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Error returned when a stored enum value is not recognized.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Declares a TEXT-backed enum with string conversions and rusqlite glue.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: UnknownVariant| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum!(
    /// Lifecycle of an ingested sheet.
    UploadStatus, "upload status" {
        Processing => "processing",
        Completed => "completed",
        PartlyCompleted => "partly_completed",
        Failed => "failed",
    }
);

text_enum!(
    /// Lifecycle of a single detected receipt.
    ReceiptStatus, "receipt status" {
        Pending => "pending",
        Processed => "processed",
        Failed => "failed",
        Unreadable => "unreadable",
    }
);

text_enum!(
    /// Category of a processing-error audit row.
    ErrorCategory, "error category" {
        ImageQuality => "IMAGE_QUALITY",
        ExtractionFailure => "EXTRACTION_FAILURE",
        SystemError => "SYSTEM_ERROR",
        ValidationWarning => "VALIDATION_WARNING",
    }
);

text_enum!(
    /// User decision recorded against a duplicate match.
    UserAction, "user action" {
        Pending => "pending",
        ConfirmedDuplicate => "confirmed_duplicate",
        Override => "override",
    }
);

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Processing)
    }
}

/// One ingested sheet.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRow {
    pub id: i64,
    pub user_id: i64,
    pub original_image_url: String,
    pub marked_image_url: Option<String>,
    pub status: UploadStatus,
    /// `None` until segmentation has run.
    pub has_receipts: Option<bool>,
    pub created_at: String,
    pub updated_at: String,
}

impl UploadRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            original_image_url: row.get("original_image_url")?,
            marked_image_url: row.get("marked_image_url")?,
            status: row.get("status")?,
            has_receipts: row.get("has_receipts")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// One detected receipt within an upload.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiptRow {
    pub id: i64,
    pub upload_id: i64,
    pub region_index: i64,
    pub store_name: Option<String>,
    pub total_amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub transaction_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub status: ReceiptStatus,
    pub image_url: Option<String>,
    pub keywords: Vec<String>,
    pub is_duplicate: bool,
    pub duplicate_of_receipt_id: Option<i64>,
    pub duplicate_confidence_score: Option<f64>,
    pub duplicate_checked_at: Option<String>,
    pub duplicate_override: bool,
}

impl ReceiptRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            upload_id: row.get("upload_id")?,
            region_index: row.get("region_index")?,
            store_name: row.get("store_name")?,
            total_amount: decimal_column(row, "total_amount")?,
            tax_amount: decimal_column(row, "tax_amount")?,
            transaction_date: date_column(row, "transaction_date")?,
            currency: row.get("currency")?,
            status: row.get("status")?,
            image_url: row.get("image_url")?,
            keywords: keywords_column(row, "keywords")?,
            is_duplicate: row.get("is_duplicate")?,
            duplicate_of_receipt_id: row.get("duplicate_of_receipt_id")?,
            duplicate_confidence_score: row.get("duplicate_confidence_score")?,
            duplicate_checked_at: row.get("duplicate_checked_at")?,
            duplicate_override: row.get("duplicate_override")?,
        })
    }
}

/// A line item to be inserted for a processed receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub description: String,
    pub amount: Decimal,
    pub unit: Option<String>,
    pub price_per_unit: Option<Decimal>,
    pub total_price: Decimal,
    pub keywords: Vec<String>,
}

/// A stored line item.
#[derive(Debug, Clone, Serialize)]
pub struct LineItemRow {
    pub id: i64,
    pub receipt_id: i64,
    pub description: String,
    pub amount: Decimal,
    pub unit: Option<String>,
    pub price_per_unit: Option<Decimal>,
    pub total_price: Decimal,
    pub keywords: Vec<String>,
}

impl LineItemRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            receipt_id: row.get("receipt_id")?,
            description: row.get("description")?,
            amount: decimal_column(row, "amount")?.unwrap_or(Decimal::ONE),
            unit: row.get("unit")?,
            price_per_unit: decimal_column(row, "price_per_unit")?,
            total_price: decimal_column(row, "total_price")?.unwrap_or(Decimal::ZERO),
            keywords: keywords_column(row, "keywords")?,
        })
    }
}

/// An append-only processing audit record.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingErrorRow {
    pub id: i64,
    pub upload_id: i64,
    /// `None` for whole-upload failures.
    pub receipt_id: Option<i64>,
    pub category: ErrorCategory,
    pub message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

impl ProcessingErrorRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            upload_id: row.get("upload_id")?,
            receipt_id: row.get("receipt_id")?,
            category: row.get("category")?,
            message: row.get("message")?,
            metadata: json_column(row, "metadata")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A persisted duplicate-scoring decision.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatchRow {
    pub id: i64,
    pub receipt_id: i64,
    pub potential_duplicate_id: i64,
    pub confidence_score: f64,
    pub match_factors: serde_json::Value,
    pub user_action: UserAction,
    pub created_at: String,
}

impl DuplicateMatchRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            receipt_id: row.get("receipt_id")?,
            potential_duplicate_id: row.get("potential_duplicate_id")?,
            confidence_score: row.get("confidence_score")?,
            match_factors: json_column(row, "match_factors")?,
            user_action: row.get("user_action")?,
            created_at: row.get("created_at")?,
        })
    }
}

fn conversion_failure<E>(idx: &str, row: &Row<'_>, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let index = row.as_ref().column_index(idx).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn decimal_column(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(name)?;
    raw.map(|s| Decimal::from_str(&s).map_err(|e| conversion_failure(name, row, e)))
        .transpose()
}

fn date_column(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(name)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| conversion_failure(name, row, e)))
        .transpose()
}

fn keywords_column(row: &Row<'_>, name: &str) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(name)?;
    match raw {
        Some(s) => serde_json::from_str(&s).map_err(|e| conversion_failure(name, row, e)),
        None => Ok(Vec::new()),
    }
}

fn json_column(row: &Row<'_>, name: &str) -> rusqlite::Result<serde_json::Value> {
    let raw: Option<String> = row.get(name)?;
    match raw {
        Some(s) => serde_json::from_str(&s).map_err(|e| conversion_failure(name, row, e)),
        None => Ok(serde_json::Value::Null),
    }
}

/// Formats a date the way `transaction_date` is stored.
pub(crate) fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
