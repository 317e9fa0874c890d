//! Duplicate receipt detection.
//!
//! Multi-factor fuzzy matching with confidence scoring. Five independent
//! factor scorers (store name, total, date, item count, tax) are summed per
//! candidate; the best candidate is classified into a confidence band.

pub mod engine;
pub mod factors;
pub mod similarity;

pub use engine::{
    check_for_duplicates, classify_confidence, ConfidenceLevel, DuplicateCheck,
    DuplicateDetector, DuplicateError, DATE_WINDOW_DAYS, DUPLICATE_THRESHOLD,
    REPORTING_THRESHOLD,
};
pub use factors::MatchFactors;
pub use similarity::string_similarity;
