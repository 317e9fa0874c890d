//! Consistency checks on extracted receipt data.
//!
//! Issues are advisory: they are stored as `VALIDATION_WARNING` rows and
//! never change the receipt's status.

use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::processor::ReceiptData;

/// Largest difference between two amounts still treated as equal.
fn tolerance() -> Decimal {
    Decimal::new(5, 2)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    /// Line items add up to neither the total nor the subtotal. `items_sum`
    /// is `None` when the prices are too large to add.
    ItemsTotalMismatch {
        items_sum: Option<Decimal>,
        total: Decimal,
        subtotal: Option<Decimal>,
    },
    /// `subtotal + tax` differs from the total.
    SubtotalTaxMismatch {
        subtotal: Decimal,
        tax: Decimal,
        total: Decimal,
    },
    ZeroPriceItem { index: usize, description: String },
    /// A single line costs more than the whole receipt.
    ExtremePriceItem {
        index: usize,
        description: String,
        price: Decimal,
        total: Decimal,
    },
}

impl ValidationIssue {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationIssue::ItemsTotalMismatch { .. } => "ITEMS_TOTAL_MISMATCH",
            ValidationIssue::SubtotalTaxMismatch { .. } => "SUBTOTAL_TAX_MISMATCH",
            ValidationIssue::ZeroPriceItem { .. } => "ZERO_PRICE_ITEM",
            ValidationIssue::ExtremePriceItem { .. } => "EXTREME_PRICE_ITEM",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ValidationIssue::ItemsTotalMismatch {
                items_sum, total, ..
            } => match items_sum {
                Some(sum) => format!("Line items sum to {} but the total is {}", sum, total),
                None => format!("Line items sum overflows but the total is {}", total),
            },
            ValidationIssue::SubtotalTaxMismatch {
                subtotal,
                tax,
                total,
            } => format!(
                "Subtotal {} plus tax {} does not match total {}",
                subtotal, tax, total
            ),
            ValidationIssue::ZeroPriceItem { description, .. } => {
                format!("Item '{}' has no price", description)
            }
            ValidationIssue::ExtremePriceItem {
                description,
                price,
                total,
                ..
            } => format!(
                "Item '{}' costs {} which exceeds the total {}",
                description, price, total
            ),
        }
    }

    /// Metadata stored with the warning row.
    pub fn metadata(&self) -> Value {
        let details = match self {
            ValidationIssue::ItemsTotalMismatch {
                items_sum,
                total,
                subtotal,
            } => json!({
                "itemsSum": items_sum.map(|s| s.to_string()),
                "total": total.to_string(),
                "subtotal": subtotal.map(|s| s.to_string()),
            }),
            ValidationIssue::SubtotalTaxMismatch {
                subtotal,
                tax,
                total,
            } => json!({
                "subtotal": subtotal.to_string(),
                "tax": tax.to_string(),
                "total": total.to_string(),
            }),
            ValidationIssue::ZeroPriceItem { index, description } => json!({
                "itemIndex": index,
                "description": description,
            }),
            ValidationIssue::ExtremePriceItem {
                index,
                description,
                price,
                total,
            } => json!({
                "itemIndex": index,
                "description": description,
                "price": price.to_string(),
                "total": total.to_string(),
            }),
        };
        json!({ "code": self.code(), "details": details })
    }
}

/// Amounts whose difference is not representable always differ.
fn differs(a: Decimal, b: Decimal) -> bool {
    a.checked_sub(b).map_or(true, |d| d.abs() > tolerance())
}

fn differs_opt(a: Option<Decimal>, b: Decimal) -> bool {
    a.map_or(true, |a| differs(a, b))
}

/// Checks extracted data for internal inconsistencies.
pub fn validate_receipt(data: &ReceiptData) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let total = data.total;

    if !data.items.is_empty() {
        let items_sum = data
            .items
            .iter()
            .filter_map(|i| i.price)
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p));
        let matches_subtotal = data.subtotal.is_some_and(|s| !differs_opt(items_sum, s));
        if differs_opt(items_sum, total) && !matches_subtotal {
            issues.push(ValidationIssue::ItemsTotalMismatch {
                items_sum,
                total,
                subtotal: data.subtotal,
            });
        }
    }

    if let (Some(subtotal), Some(tax)) = (data.subtotal, data.tax) {
        if differs_opt(subtotal.checked_add(tax), total) {
            issues.push(ValidationIssue::SubtotalTaxMismatch {
                subtotal,
                tax,
                total,
            });
        }
    }

    for (index, item) in data.items.iter().enumerate() {
        match item.price {
            None => issues.push(ValidationIssue::ZeroPriceItem {
                index,
                description: item.description.clone(),
            }),
            Some(price) if price.is_zero() => issues.push(ValidationIssue::ZeroPriceItem {
                index,
                description: item.description.clone(),
            }),
            Some(price) if total > Decimal::ZERO && price > total => {
                issues.push(ValidationIssue::ExtremePriceItem {
                    index,
                    description: item.description.clone(),
                    price,
                    total,
                })
            }
            Some(_) => {}
        }
    }

    issues
}
