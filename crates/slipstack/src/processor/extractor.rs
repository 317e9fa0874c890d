//! Structured field extraction from a single cropped receipt.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use super::strip_code_fences;

/// One purchased line as reported by the extractor. `price` is the line
/// total, not the unit price.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default, alias = "quantityUnit")]
    pub unit: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,
}

/// Fields extracted from a readable receipt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptData {
    #[serde(default)]
    pub merchant_name: Option<String>,
    /// `YYYY-MM-DD` as reported; see [`ReceiptData::date`].
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<ReceiptItem>,
    #[serde(default)]
    pub subtotal: Option<Decimal>,
    #[serde(default)]
    pub tax: Option<Decimal>,
    pub total: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,
}

impl ReceiptData {
    /// The transaction date, if present and well formed.
    pub fn date(&self) -> Option<NaiveDate> {
        self.transaction_date
            .as_deref()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
    }

    /// Merchant name with surrounding whitespace removed; blank counts as missing.
    pub fn merchant(&self) -> Option<&str> {
        self.merchant_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Outcome of a successful extractor call.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Readable(ReceiptData),
    /// The extractor judged the image unreadable.
    Unreadable,
}

#[derive(Error, Debug)]
pub enum ExtractError {
    /// The extractor could not be reached. Affects the whole upload.
    #[error("Extractor unavailable: {0}")]
    Unavailable(String),

    /// The extractor answered with something that is not a receipt record.
    #[error("Extractor returned malformed output: {0}")]
    Malformed(String),

    #[error("Extracted receipt has no usable total amount")]
    MissingTotal,
}

impl ExtractError {
    /// Whether the failure is confined to the receipt being extracted.
    pub fn is_per_receipt(&self) -> bool {
        !matches!(self, ExtractError::Unavailable(_))
    }
}

/// Extracts structured fields from a cropped receipt image.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Extraction, ExtractError>;
}

/// Parses a model answer into an [`Extraction`]. An empty JSON object means
/// the model found the image unreadable; a missing, null or zero total is
/// an error.
pub fn parse_extraction(text: &str) -> Result<Extraction, ExtractError> {
    let cleaned = strip_code_fences(text);
    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|e| ExtractError::Malformed(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| ExtractError::Malformed("expected a JSON object".to_string()))?;
    if object.is_empty() {
        return Ok(Extraction::Unreadable);
    }
    if object.get("total").map_or(true, serde_json::Value::is_null) {
        return Err(ExtractError::MissingTotal);
    }

    let data: ReceiptData =
        serde_json::from_value(value).map_err(|e| ExtractError::Malformed(e.to_string()))?;
    if data.total.is_zero() {
        return Err(ExtractError::MissingTotal);
    }
    Ok(Extraction::Readable(data))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
