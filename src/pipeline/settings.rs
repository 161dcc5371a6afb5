//! Tunables for each pipeline phase.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;

/// All pipeline tunables, grouped by phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Chunk sizing.
    pub chunking: ChunkingSettings,
    /// Per-chunk analysis batching and retry.
    pub analysis: AnalysisSettings,
    /// Section grouping.
    pub synthesis: SynthesisSettings,
    /// Hierarchical reduction before the final call.
    pub consolidation: ConsolidationSettings,
}

/// Chunk sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    /// Characters assumed per page of extracted text.
    pub chars_per_page: usize,
    /// Absolute ceiling on a chunk's character budget.
    pub max_chunk_chars: usize,
    /// Overlap between adjacent fixed-size chunks, in percent of the budget.
    pub overlap_percent: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chars_per_page: 3500,
            max_chunk_chars: 120_000,
            overlap_percent: 15,
        }
    }
}

/// Chunk analysis parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Chunks analyzed concurrently per batch.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub inter_batch_delay: Duration,
    /// Retry policy applied to each chunk.
    pub retry: RetryPolicy,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            batch_size: 2,
            inter_batch_delay: Duration::from_millis(3000),
            retry: RetryPolicy::default(),
        }
    }
}

/// Section synthesis parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisSettings {
    /// Number of contiguous groups the analyses are split into.
    pub section_count: usize,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self { section_count: 3 }
    }
}

/// Hierarchical consolidation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationSettings {
    /// Estimated-token ceiling for the final call's input.
    pub token_threshold: usize,
    /// Characters per token used by the estimate.
    pub chars_per_token: usize,
    /// Per-text truncation applied before a group is merged.
    pub group_truncate_chars: usize,
    /// Round ceiling before the forced-truncation fallback.
    pub max_rounds: u32,
    /// Per-section truncation applied by the fallback.
    pub forced_truncate_chars: usize,
}

impl Default for ConsolidationSettings {
    fn default() -> Self {
        Self {
            token_threshold: 8000,
            chars_per_token: 3,
            group_truncate_chars: 20_000,
            max_rounds: 5,
            forced_truncate_chars: 15_000,
        }
    }
}
