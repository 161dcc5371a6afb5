//! Document digest pipeline: chunking, analysis, synthesis, consolidation and streaming.

pub mod analyzer;
pub mod cache;
pub mod chunking;
pub mod consolidate;
pub mod finalize;
pub mod retry;
mod service;
pub mod settings;
pub mod synthesis;
#[cfg(test)]
mod testing;
pub mod types;

pub use analyzer::{ChunkAnalyses, ChunkAnalyzer};
pub use cache::{CachePhase, DocumentCache, FileCacheStore, MemoryCacheStore, fingerprint};
pub use chunking::{chunk_document, create_chunks};
pub use consolidate::{ConsolidationOutcome, Consolidator};
pub use finalize::consolidate_and_stream;
pub use retry::RetryPolicy;
pub use service::{DigestApi, DigestPipeline};
pub use settings::{
    AnalysisSettings, ChunkingSettings, ConsolidationSettings, PipelineSettings, SynthesisSettings,
};
pub use synthesis::SectionSynthesizer;
pub use types::{
    CancellationFlag, Chunk, ChunkStrategy, DigestRequest, DocType, Document, Phase, PipelineError,
    ProgressEvent, ProgressObserver,
};
