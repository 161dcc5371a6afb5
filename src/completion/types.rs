//! Request/response payloads and errors shared by completion clients.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned while talking to the remote completion service.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// HTTP layer failed before or while receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider signalled rate limiting (HTTP 429 or a "rate limit" body).
    #[error("Rate limited by completion service ({status}): {body}")]
    RateLimited {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Provider responded with a non-success status.
    #[error("Unexpected completion response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Provider response could not be decoded into the expected shape.
    #[error("Malformed completion response: {0}")]
    InvalidResponse(String),
    /// The operation requires a bearer token and none was configured.
    #[error("Completion credentials are not configured")]
    MissingCredentials,
    /// The service did not start responding within the configured timeout.
    #[error("Completion service did not respond within {0:?}")]
    Timeout(Duration),
}

impl CompletionError {
    /// Classify a failed response, treating 429 and "rate limit" bodies as rate limiting.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS || mentions_rate_limit(&body) {
            Self::RateLimited { status, body }
        } else {
            Self::UnexpectedStatus { status, body }
        }
    }

    /// Whether the provider asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether repeating the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingCredentials)
    }
}

/// Best-effort wording heuristic; status codes take precedence when available.
fn mentions_rate_limit(body: &str) -> bool {
    body.to_lowercase().contains("rate limit")
}

/// Body of the `AnalyzeChunk` operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeChunkRequest {
    /// Chunk text to analyze.
    pub chunk: String,
    /// Zero-based position of the chunk in the document.
    pub chunk_index: usize,
    /// Total number of chunks in the document.
    pub total_chunks: usize,
    /// Page count of the source document.
    pub total_pages: usize,
}

/// Decoded response of the `AnalyzeChunk` operation.
#[derive(Debug, Deserialize)]
pub struct AnalyzeChunkResponse {
    /// Model summary of the chunk.
    pub analysis: String,
}

/// Body of the `SynthesizeSection` operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeSectionRequest {
    /// Ordered texts merged into one synthesis.
    pub analyses: Vec<String>,
    /// Zero-based index of the group being synthesized.
    pub section_index: usize,
    /// Number of groups in the current pass.
    pub total_sections: usize,
}

/// Decoded response of the `SynthesizeSection` operation.
#[derive(Debug, Deserialize)]
pub struct SynthesizeSectionResponse {
    /// Model synthesis of the group.
    pub synthesis: String,
}

/// Body of the `DetectDocType` operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectDocTypeRequest {
    /// Leading sample of the document text.
    pub content_sample: String,
    /// Display name of the document.
    pub file_name: String,
}

/// Decoded response of the `DetectDocType` operation.
#[derive(Debug, Clone, Deserialize)]
pub struct DocTypeClassification {
    /// Lowercase type tag picked by the classifier.
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Classifier confidence, 0 to 100.
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Body of the `ConsolidateStream` operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidateRequest {
    /// Already reduced working sections.
    pub sections: Vec<String>,
    /// Question asked by the user about the document.
    #[serde(rename = "userMessage")]
    pub user_question: String,
    /// Display name of the document.
    #[serde(rename = "fileName")]
    pub document_name: String,
    /// Page count of the source document.
    pub total_pages: usize,
}
