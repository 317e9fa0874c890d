//! Hosted vision model client implementing both [`Segmenter`] and
//! [`FieldExtractor`] over the `generateContent` REST endpoint.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use serde_json::{json, Value};

use super::extractor::{parse_extraction, ExtractError, Extraction, FieldExtractor};
use super::segmenter::{parse_regions, Region, SegmentError, Segmenter};
use crate::config::GeminiConfig;
use crate::error::ConfigError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const SEGMENT_PROMPT: &str = "\
Identify every distinct paper receipt in this image. For each one, return its bounding box \
as a JSON array of objects: [{\"x\": int, \"y\": int, \"width\": int, \"height\": int}]. \
Coordinates are on a 1000x1000 grid where [0,0] is the top-left corner and [1000,1000] the \
bottom-right. x and y are the left and top edges; width and height span the whole receipt. \
Boxes must contain the complete receipt including edges, barcodes and all text; for receipts \
placed side by side, give each one its own accurate box. Return an empty array when there are \
no receipts. Return only the JSON array.";

const EXTRACT_PROMPT: &str = "\
Analyze this receipt image. If it is too blurry, dark or otherwise unreadable to extract data \
with confidence, return an empty JSON object {}. Otherwise return one JSON object: \
{\"merchantName\": string, \"transactionDate\": \"YYYY-MM-DD\", \"transactionTime\": \"HH:MM:SS\", \
\"items\": [{\"description\": string, \"quantity\": number, \"quantityUnit\": string, \
\"price\": number, \"keywords\": [string]}], \"subtotal\": number|null, \"tax\": number|null, \
\"total\": number, \"currency\": ISO 4217 code, \"keywords\": [string]}. \
The total is mandatory. Item price is the line total. Root keywords are broad purchase \
categories (groceries, dinner); item keywords are specific (fruit, beverage). \
Monetary values are numbers. Return only the JSON object.";

/// Blocking client for a Gemini-compatible `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Builds a client from config, reading the API key from the configured
    /// environment variable.
    pub fn from_config(config: &GeminiConfig) -> Result<Self, ConfigError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| ConfigError::MissingEnv {
            name: config.api_key_env.clone(),
        })?;
        Self::new(&config.endpoint, &config.model, api_key).map_err(|e| ConfigError::Validation {
            message: format!("cannot build HTTP client: {}", e),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    /// Sends one prompt with one inline image and returns the answer text.
    fn generate(&self, prompt: &str, image: &[u8]) -> Result<String, String> {
        let body = request_body(prompt, image);
        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, detail));
        }

        let value: Value = response
            .json()
            .map_err(|e| format!("invalid response body: {}", e))?;
        Ok(response_text(&value))
    }
}

fn mime_type(image: &[u8]) -> &'static str {
    image::guess_format(image)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/jpeg")
}

fn request_body(prompt: &str, image: &[u8]) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                {
                    "inline_data": {
                        "mime_type": mime_type(image),
                        "data": BASE64_STANDARD.encode(image),
                    }
                }
            ]
        }]
    })
}

/// Concatenates the text parts of the first candidate.
fn response_text(value: &Value) -> String {
    value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

impl Segmenter for GeminiClient {
    fn segment(&self, image: &[u8]) -> Result<Vec<Region>, SegmentError> {
        let _span = tracing::info_span!("gemini.segment", model = %self.model).entered();
        let text = self
            .generate(SEGMENT_PROMPT, image)
            .map_err(SegmentError::Unavailable)?;
        tracing::debug!(chars = text.len(), "Segmenter answered");
        parse_regions(&text)
    }
}

impl FieldExtractor for GeminiClient {
    fn extract(&self, image: &[u8]) -> Result<Extraction, ExtractError> {
        let _span = tracing::info_span!("gemini.extract", model = %self.model).entered();
        let text = self
            .generate(EXTRACT_PROMPT, image)
            .map_err(ExtractError::Unavailable)?;
        tracing::debug!(chars = text.len(), "Extractor answered");
        parse_extraction(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_inlines_image() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        let body = request_body("find receipts", &png_magic);
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "find receipts");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        let data = parts[1]["inline_data"]["data"].as_str().unwrap();
        assert_eq!(BASE64_STANDARD.decode(data).unwrap(), png_magic);
    }

    #[test]
    fn test_unknown_bytes_default_to_jpeg() {
        assert_eq!(mime_type(b"????"), "image/jpeg");
    }

    #[test]
    fn test_response_text_joins_parts() {
        let value = json!({
            "candidates": [{
                "content": { "parts": [ { "text": "```json\n[" }, { "text": "]\n```" } ] }
            }]
        });
        assert_eq!(response_text(&value), "```json\n[]\n```");
        assert!(parse_regions(&response_text(&value)).unwrap().is_empty());
    }

    #[test]
    fn test_response_without_candidates() {
        assert_eq!(response_text(&json!({ "promptFeedback": {} })), "");
    }

    #[test]
    fn test_url() {
        let client = GeminiClient::new("https://example.test/v1beta/", "vision-1", "k").unwrap();
        assert_eq!(
            client.url(),
            "https://example.test/v1beta/models/vision-1:generateContent"
        );
    }
}
