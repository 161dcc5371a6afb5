//! Per-chunk remote analysis with bounded batch concurrency.

use futures_util::future::join_all;

use crate::completion::{AnalyzeChunkRequest, CompletionClient, CompletionError};
use crate::metrics::PipelineMetrics;

use super::cache::{CachePhase, DocumentCache};
use super::settings::AnalysisSettings;
use super::types::{CancellationFlag, Chunk, Phase, PipelineError, ProgressEvent, ProgressObserver};

/// Text substituted for a chunk whose analysis failed on every attempt.
pub fn unavailable_placeholder(chunk_number: usize, error: &CompletionError) -> String {
    format!("[Chunk {chunk_number} analysis unavailable: {error}]")
}

/// Analyses of one document in chunk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAnalyses {
    /// One text per chunk; failed chunks hold a placeholder.
    pub texts: Vec<String>,
    /// Placeholders substituted during this run.
    pub failures: usize,
}

impl ChunkAnalyses {
    /// Whether every chunk has a real analysis.
    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

/// Drives the analysis phase for one document.
pub struct ChunkAnalyzer<'a> {
    client: &'a dyn CompletionClient,
    cache: &'a DocumentCache,
    settings: &'a AnalysisSettings,
    metrics: &'a PipelineMetrics,
}

impl<'a> ChunkAnalyzer<'a> {
    /// Borrow the collaborators for one run.
    pub fn new(
        client: &'a dyn CompletionClient,
        cache: &'a DocumentCache,
        settings: &'a AnalysisSettings,
        metrics: &'a PipelineMetrics,
    ) -> Self {
        Self {
            client,
            cache,
            settings,
            metrics,
        }
    }

    /// Analyze every chunk, returning one text per chunk in chunk order.
    ///
    /// Chunks are processed in batches of `batch_size`; a chunk that exhausts its retries is
    /// replaced by a placeholder and the run continues. The result set is cached only when every
    /// chunk succeeded.
    pub async fn analyze_chunks(
        &self,
        fingerprint: &str,
        chunks: &[Chunk],
        total_pages: usize,
        observer: &dyn ProgressObserver,
        cancel: &CancellationFlag,
    ) -> Result<ChunkAnalyses, PipelineError> {
        if let Some(cached) = self
            .cache
            .load::<Vec<String>>(fingerprint, CachePhase::Analyses)
            .await
        {
            if cached.len() == chunks.len() {
                tracing::info!(fingerprint, chunks = chunks.len(), "Reusing cached chunk analyses");
                self.metrics.record_cache_hit();
                return Ok(ChunkAnalyses {
                    texts: cached,
                    failures: 0,
                });
            }
            tracing::debug!(
                fingerprint,
                cached = cached.len(),
                chunks = chunks.len(),
                "Ignoring cached analyses of a different chunking"
            );
        }

        let total = chunks.len();
        let batch_size = self.settings.batch_size.max(1);
        let mut analyses: Vec<Option<String>> = vec![None; total];
        let mut failures = 0usize;

        for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
            if batch_number > 0 {
                cancel.check()?;
                tokio::time::sleep(self.settings.inter_batch_delay).await;
            }
            cancel.check()?;

            let first = batch_number * batch_size;
            observer.on_progress(ProgressEvent::new(
                Phase::Analysis,
                first,
                total,
                format!(
                    "Analyzing chunks {}-{} of {}",
                    first + 1,
                    first + batch.len(),
                    total
                ),
            ));

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|chunk| self.analyze_one(chunk, total, total_pages)),
            )
            .await;

            for (offset, outcome) in outcomes.into_iter().enumerate() {
                let slot = first + offset;
                analyses[slot] = Some(match outcome {
                    Ok(analysis) => analysis,
                    Err(error) => {
                        failures += 1;
                        tracing::error!(
                            chunk = slot + 1,
                            total,
                            error = %error,
                            "Chunk analysis failed after retries; using placeholder"
                        );
                        unavailable_placeholder(slot + 1, &error)
                    }
                });
            }
        }

        let analyses = ChunkAnalyses {
            texts: analyses.into_iter().flatten().collect(),
            failures,
        };
        self.metrics
            .record_analysis((total - failures) as u64, failures as u64);
        tracing::info!(fingerprint, chunks = total, failures, "Chunk analysis complete");

        if analyses.is_complete() {
            self.cache
                .save(fingerprint, CachePhase::Analyses, &analyses.texts)
                .await;
        }
        Ok(analyses)
    }

    async fn analyze_one(
        &self,
        chunk: &Chunk,
        total_chunks: usize,
        total_pages: usize,
    ) -> Result<String, CompletionError> {
        let text = match &chunk.context_header {
            Some(header) => format!("{header}\n{}", chunk.text),
            None => chunk.text.clone(),
        };
        let request = AnalyzeChunkRequest {
            chunk: text,
            chunk_index: chunk.index,
            total_chunks,
            total_pages,
        };
        let label = format!("analyze_chunk[{}]", chunk.index);
        self.settings
            .retry
            .run(&label, |attempt| {
                tracing::debug!(chunk = chunk.index, attempt, "Requesting chunk analysis");
                self.client.analyze_chunk(&request)
            })
            .await
    }
}
