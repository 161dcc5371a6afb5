//! Remote completion service abstraction.
//!
//! The pipeline only ever talks to the service through [`CompletionClient`], which exposes the
//! logical operations it needs: document type detection, per-chunk analysis, group synthesis and
//! the streamed final consolidation. [`HttpCompletionClient`] is the production adapter; tests substitute fakes.

mod client;
pub mod sse;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

pub use client::HttpCompletionClient;
pub use types::{
    AnalyzeChunkRequest, AnalyzeChunkResponse, CompletionError, ConsolidateRequest,
    DetectDocTypeRequest, DocTypeClassification, SynthesizeSectionRequest,
    SynthesizeSectionResponse,
};

/// Ordered, append-only stream of answer fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Interface implemented by completion backends.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Classify a document from a leading sample of its text.
    async fn detect_doc_type(
        &self,
        request: &DetectDocTypeRequest,
    ) -> Result<DocTypeClassification, CompletionError>;

    /// Summarize one chunk of the document.
    async fn analyze_chunk(&self, request: &AnalyzeChunkRequest) -> Result<String, CompletionError>;

    /// Merge a group of texts into one shorter synthesis.
    async fn synthesize_section(
        &self,
        request: &SynthesizeSectionRequest,
    ) -> Result<String, CompletionError>;

    /// Open the streamed final consolidation.
    ///
    /// Fails before yielding anything when the service rejects the request; once the stream is
    /// open, read errors are delivered as `Err` items.
    async fn consolidate_stream(
        &self,
        request: &ConsolidateRequest,
    ) -> Result<FragmentStream, CompletionError>;
}
