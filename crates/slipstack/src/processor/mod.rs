//! Stage adapters around the sheet image: segmentation, field extraction
//! and the pixel work between them.

pub mod extractor;
pub mod gemini;
pub mod image;
pub mod segmenter;

pub use extractor::{
    parse_extraction, ExtractError, Extraction, FieldExtractor, ReceiptData, ReceiptItem,
};
pub use gemini::GeminiClient;
pub use self::image::{Annotator, RegionOutlines};
pub use segmenter::{parse_regions, Region, SegmentError, Segmenter};

/// Removes a surrounding markdown code fence (```` ``` ```` or ```` ```json ````)
/// from a model answer.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("[1]"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\": 1}\n"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fences("```json{}```"), "{}");
        assert_eq!(strip_code_fences("```json\n[]"), "[]");
    }
}
