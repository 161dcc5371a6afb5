//! Core data types and error definitions for the digest pipeline.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::completion::CompletionError;

/// Errors that abort a pipeline run. Each message names the failing phase.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Extraction produced no usable text.
    #[error("Document contains no extractable text")]
    EmptyDocument,
    /// The caller cancelled the run between two units of work.
    #[error("Pipeline run was cancelled")]
    Cancelled,
    /// A section synthesis call failed.
    #[error("Section synthesis failed for section {section}: {source}")]
    Synthesis {
        /// 1-based section number.
        section: usize,
        /// Underlying remote failure.
        #[source]
        source: CompletionError,
    },
    /// A merge call failed during hierarchical consolidation.
    #[error("Consolidation round {round} failed for group {group}: {source}")]
    Consolidation {
        /// 1-based round number.
        round: u32,
        /// 1-based group number within the round.
        group: usize,
        /// Underlying remote failure.
        #[source]
        source: CompletionError,
    },
    /// The streamed final consolidation could not be opened or was interrupted.
    #[error("Final consolidation failed: {0}")]
    Finalize(#[source] CompletionError),
}

/// Error returned when parsing an unknown document type.
#[derive(Debug, Error)]
#[error("unknown document type '{0}'")]
pub struct ParseDocTypeError(pub String);

/// Document category used to pick a chunking strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Anything else; fixed-size chunks with overlap.
    #[default]
    General,
    /// CV or job application.
    Resume,
    /// Academic paper.
    Paper,
    /// Spreadsheet-like or heavily tabular content.
    Table,
    /// FAQ, interview transcript.
    Qa,
    /// Legal contract with numbered clauses.
    Contract,
    /// User manual or how-to guide.
    Manual,
}

impl DocType {
    /// Lowercase tag used on the wire and in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Resume => "resume",
            Self::Paper => "paper",
            Self::Table => "table",
            Self::Qa => "qa",
            Self::Contract => "contract",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = ParseDocTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "resume" => Ok(Self::Resume),
            "paper" => Ok(Self::Paper),
            "table" => Ok(Self::Table),
            "qa" => Ok(Self::Qa),
            "contract" => Ok(Self::Contract),
            "manual" => Ok(Self::Manual),
            other => Err(ParseDocTypeError(other.to_string())),
        }
    }
}

/// Extracted document handed to the pipeline.
#[derive(Debug, Clone)]
pub struct Document {
    /// Raw extracted text.
    pub text: String,
    /// Page count reported by the extractor.
    pub total_pages: usize,
    /// Display name used in the final prompt.
    pub name: String,
    /// Category used to select a chunking strategy; detected remotely when absent.
    pub doc_type: Option<DocType>,
}

/// Input of one pipeline run.
#[derive(Debug, Clone)]
pub struct DigestRequest {
    /// Document to digest.
    pub document: Document,
    /// Question the final answer must address.
    pub question: String,
}

/// How a chunk boundary was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Sliding window with overlap.
    FixedSize,
    /// Resume section headers.
    ResumeSection,
    /// Academic section headers.
    PaperSection,
    /// Groups of table rows.
    TableRows,
    /// Question markers.
    QaPair,
    /// Numbered contract clauses.
    ContractClause,
    /// Chapters, steps and numbered manual sections.
    ManualSection,
}

impl ChunkStrategy {
    /// Tag used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FixedSize => "fixed_size",
            Self::ResumeSection => "resume_section",
            Self::PaperSection => "paper_section",
            Self::TableRows => "table_rows",
            Self::QaPair => "qa_pair",
            Self::ContractClause => "contract_clause",
            Self::ManualSection => "manual_section",
        }
    }
}

/// A contiguous piece of the document sent for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the chunk sequence.
    pub index: usize,
    /// Strategy that produced the chunk.
    pub strategy: ChunkStrategy,
    /// Chunk contents.
    pub text: String,
    /// Character span in the source document (Unicode scalar values, end exclusive).
    pub span: Range<usize>,
    /// Table header sent ahead of `text` for analysis; not covered by `span`.
    pub context_header: Option<String>,
}

/// Pipeline phase reported in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Splitting the document.
    Chunking,
    /// Per-chunk remote analysis.
    Analysis,
    /// Section synthesis.
    Synthesis,
    /// Hierarchical consolidation.
    Consolidation,
    /// Final streamed answer.
    Streaming,
}

/// Incremental progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Phase the event belongs to.
    pub phase: Phase,
    /// Units of work completed before this step.
    pub current: usize,
    /// Total units of work in the phase.
    pub total: usize,
    /// Human-readable status line.
    pub status: String,
}

impl ProgressEvent {
    /// Build an event.
    pub fn new(phase: Phase, current: usize, total: usize, status: impl Into<String>) -> Self {
        Self {
            phase,
            current,
            total,
            status: status.into(),
        }
    }
}

/// Receives progress events synchronously from the running phase.
pub trait ProgressObserver: Send + Sync {
    /// Handle one event. Must not block.
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Cooperative cancellation flag checked between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create a flag in the "running" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; takes effect before the next unit of work.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`PipelineError::Cancelled`] when cancellation was requested.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}
