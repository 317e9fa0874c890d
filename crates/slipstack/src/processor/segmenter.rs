//! Receipt region detection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::strip_code_fences;

/// Side length of the normalized coordinate grid regions are reported on.
pub const GRID_SIZE: f64 = 1000.0;

/// A bounding box on the 0–1000 grid, `(x, y)` being the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Error, Debug)]
pub enum SegmentError {
    /// The segmenter answered, but not with a list of regions.
    #[error("Segmenter returned malformed output: {0}")]
    Malformed(String),

    /// The segmenter could not be reached or rejected the request.
    #[error("Segmenter unavailable: {0}")]
    Unavailable(String),
}

/// Splits a sheet image into receipt regions.
pub trait Segmenter: Send + Sync {
    /// Returns the detected regions in reading order. Zero regions is a
    /// valid answer.
    fn segment(&self, image: &[u8]) -> Result<Vec<Region>, SegmentError>;
}

/// Parses a model answer into regions. Accepts a bare JSON array, optionally
/// wrapped in a markdown code fence.
pub fn parse_regions(text: &str) -> Result<Vec<Region>, SegmentError> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str::<Vec<Region>>(cleaned)
        .map_err(|e| SegmentError::Malformed(format!("{} in {:?}", e, truncate(cleaned, 120))))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
