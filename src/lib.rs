#![deny(missing_docs)]

//! Core library for the docdigest document summarization service.

/// HTTP routing and SSE handlers.
pub mod api;
/// Remote completion service client and stream decoding.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Chunking, analysis, synthesis, consolidation and streaming phases.
pub mod pipeline;
