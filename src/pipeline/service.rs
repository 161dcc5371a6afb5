//! Pipeline orchestration shared by the HTTP surface and the CLI.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;
use uuid::Uuid;

use crate::completion::{
    CompletionClient, CompletionError, DetectDocTypeRequest, FragmentStream, HttpCompletionClient,
};
use crate::config::Config;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};

use super::analyzer::ChunkAnalyzer;
use super::cache::{CachePhase, DocumentCache, FileCacheStore, fingerprint};
use super::chunking::chunk_document;
use super::consolidate::Consolidator;
use super::finalize::consolidate_and_stream;
use super::settings::PipelineSettings;
use super::synthesis::SectionSynthesizer;
use super::types::{
    CancellationFlag, DigestRequest, DocType, Document, Phase, PipelineError, ProgressEvent,
    ProgressObserver,
};

/// Leading characters sent to the document type classifier.
const DETECT_SAMPLE_CHARS: usize = 3000;

/// Runs the whole chunk → analyze → synthesize → consolidate → stream pipeline.
///
/// Holds long-lived handles to the completion client, cache and metrics so every surface reuses
/// the same components. Construct once near process start and share through an `Arc`.
pub struct DigestPipeline {
    client: Arc<dyn CompletionClient>,
    cache: DocumentCache,
    settings: PipelineSettings,
    metrics: Arc<PipelineMetrics>,
}

/// Abstraction over the pipeline used by external surfaces.
#[async_trait]
pub trait DigestApi: Send + Sync {
    /// Digest one document and open the streamed answer.
    async fn digest(
        &self,
        request: &DigestRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationFlag,
    ) -> Result<FragmentStream, PipelineError>;

    /// Current counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl DigestPipeline {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        cache: DocumentCache,
        settings: PipelineSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            client,
            cache,
            settings,
            metrics,
        }
    }

    /// Build the production pipeline: HTTP completion client and file-backed cache.
    pub fn from_config(config: &Config) -> Result<Self, CompletionError> {
        let client = HttpCompletionClient::from_config(config)?;
        let store = FileCacheStore::new(&config.cache_dir);
        tracing::debug!(
            base_url = %config.completion_base_url,
            cache_dir = %config.cache_dir,
            "Digest pipeline configured"
        );
        Ok(Self::new(
            Arc::new(client),
            DocumentCache::new(Arc::new(store), config.cache_ttl),
            config.pipeline.clone(),
            Arc::new(PipelineMetrics::new()),
        ))
    }

    /// Active tunables.
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Counters accumulated across runs.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run every phase for `request` and return the final answer stream.
    pub async fn run(
        &self,
        request: &DigestRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationFlag,
    ) -> Result<FragmentStream, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "digest",
            %run_id,
            document = %request.document.name,
            doc_type = request.document.doc_type.map_or("auto", DocType::as_str)
        );
        self.run_phases(request, observer, cancel)
            .instrument(span)
            .await
    }

    async fn run_phases(
        &self,
        request: &DigestRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationFlag,
    ) -> Result<FragmentStream, PipelineError> {
        let document = &request.document;
        if document.text.trim().is_empty() {
            return Err(PipelineError::EmptyDocument);
        }
        let fingerprint = fingerprint(&document.text);
        tracing::info!(
            fingerprint = %fingerprint,
            pages = document.total_pages,
            chars = document.text.len(),
            "Digest started"
        );

        let sections = match self
            .cache
            .load::<Vec<String>>(&fingerprint, CachePhase::Sections)
            .await
        {
            Some(sections) if !sections.is_empty() => {
                tracing::info!(sections = sections.len(), "Reusing cached section syntheses");
                self.metrics.record_cache_hit();
                sections
            }
            _ => {
                let (sections, complete) = self
                    .build_sections(&fingerprint, request, observer, cancel)
                    .await?;
                if complete {
                    self.cache
                        .save(&fingerprint, CachePhase::Sections, &sections)
                        .await;
                } else {
                    tracing::info!("Sections include placeholder analyses; not caching them");
                }
                sections
            }
        };

        cancel.check()?;
        let consolidator = Consolidator::new(
            self.client.as_ref(),
            &self.settings.consolidation,
            &self.metrics,
        );
        let outcome = consolidator.consolidate(sections, observer, cancel).await?;
        tracing::debug!(
            rounds = outcome.rounds,
            sections = outcome.sections.len(),
            forced_truncation = outcome.forced_truncation,
            "Consolidation finished"
        );

        cancel.check()?;
        observer.on_progress(ProgressEvent::new(
            Phase::Streaming,
            0,
            1,
            "Streaming final answer",
        ));
        let stream = consolidate_and_stream(
            self.client.as_ref(),
            outcome.sections,
            &request.question,
            &document.name,
            document.total_pages,
        )
        .await?;
        self.metrics.record_document();
        Ok(stream)
    }

    /// Chunk, analyze and synthesize; the flag reports whether every chunk was analyzed.
    async fn build_sections(
        &self,
        fingerprint: &str,
        request: &DigestRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationFlag,
    ) -> Result<(Vec<String>, bool), PipelineError> {
        let document = &request.document;
        cancel.check()?;
        let doc_type = self.resolve_doc_type(document).await;
        cancel.check()?;
        observer.on_progress(ProgressEvent::new(
            Phase::Chunking,
            0,
            1,
            format!("Splitting {} pages", document.total_pages),
        ));
        let chunks = chunk_document(
            &document.text,
            document.total_pages,
            doc_type,
            &self.settings.chunking,
        );
        if chunks.is_empty() {
            return Err(PipelineError::EmptyDocument);
        }

        let analyzer = ChunkAnalyzer::new(
            self.client.as_ref(),
            &self.cache,
            &self.settings.analysis,
            &self.metrics,
        );
        let analyses = analyzer
            .analyze_chunks(fingerprint, &chunks, document.total_pages, observer, cancel)
            .await?;

        let sections = SectionSynthesizer::new(self.client.as_ref(), &self.settings.synthesis)
            .synthesize_sections(&analyses.texts, observer, cancel)
            .await?;
        Ok((sections, analyses.is_complete()))
    }

    async fn resolve_doc_type(&self, document: &Document) -> DocType {
        if let Some(doc_type) = document.doc_type {
            return doc_type;
        }
        let request = DetectDocTypeRequest {
            content_sample: document.text.chars().take(DETECT_SAMPLE_CHARS).collect(),
            file_name: document.name.clone(),
        };
        match self.client.detect_doc_type(&request).await {
            Ok(classification) => match classification.doc_type.parse::<DocType>() {
                Ok(doc_type) => {
                    tracing::info!(
                        doc_type = %doc_type,
                        confidence = ?classification.confidence,
                        "Detected document type"
                    );
                    doc_type
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Classifier returned an unknown type; using general");
                    DocType::General
                }
            },
            Err(error) => {
                tracing::warn!(error = %error, "Document type detection failed; using general");
                DocType::General
            }
        }
    }
}

#[async_trait]
impl DigestApi for DigestPipeline {
    async fn digest(
        &self,
        request: &DigestRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationFlag,
    ) -> Result<FragmentStream, PipelineError> {
        self.run(request, observer, cancel).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        DigestPipeline::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedClient;
    use futures_util::StreamExt;
    use std::sync::Mutex;
    use std::time::Duration;

    fn request(text: &str) -> DigestRequest {
        DigestRequest {
            document: Document {
                text: text.to_string(),
                total_pages: 45,
                name: "annual-report.pdf".into(),
                doc_type: Some(DocType::General),
            },
            question: "What changed this year?".into(),
        }
    }

    fn pipeline(client: Arc<ScriptedClient>, cache: DocumentCache) -> DigestPipeline {
        DigestPipeline::new(
            client,
            cache,
            PipelineSettings::default(),
            Arc::new(PipelineMetrics::new()),
        )
    }

    async fn collect(stream: FragmentStream) -> String {
        stream
            .map(|fragment| fragment.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[tokio::test(start_paused = true)]
    async fn large_document_flows_through_every_phase() {
        let client = Arc::new(ScriptedClient::new().with_fragments(&["The ", "answer."]));
        let pipeline = pipeline(client.clone(), DocumentCache::in_memory(Duration::from_secs(60)));
        let phases = Mutex::new(Vec::new());
        let observer = |event: ProgressEvent| phases.lock().unwrap().push(event.phase);

        let stream = pipeline
            .run(&request(&"a".repeat(200_000)), &observer, &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(collect(stream).await, "The answer.");

        assert_eq!(client.analyze_calls(), 5);
        // Five analyses fall into three sections, then one merge round leaves two.
        assert_eq!(client.synthesis_calls(), 4);
        let consolidate = client.consolidate_requests.lock().unwrap();
        assert_eq!(consolidate[0].sections.len(), 2);

        let phases = phases.into_inner().unwrap();
        assert_eq!(phases.first(), Some(&Phase::Chunking));
        assert_eq!(phases.last(), Some(&Phase::Streaming));
        assert!(phases.contains(&Phase::Analysis));
        assert!(phases.contains(&Phase::Consolidation));
        assert_eq!(pipeline.metrics_snapshot().documents_processed, 1);
        assert!(client.detect_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_document_is_rejected() {
        let client = Arc::new(ScriptedClient::new());
        let pipeline = pipeline(client.clone(), DocumentCache::in_memory(Duration::from_secs(60)));
        let result = pipeline
            .run(&request("  \n\t "), &|_: ProgressEvent| {}, &CancellationFlag::new())
            .await;
        assert!(matches!(result, Err(PipelineError::EmptyDocument)));
        assert_eq!(client.analyze_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_sections_skip_analysis_and_synthesis() {
        let cache = DocumentCache::in_memory(Duration::from_secs(3600));
        let text = "Revenue grew in every region. ".repeat(100);

        let first = Arc::new(ScriptedClient::new());
        let stream = pipeline(first.clone(), cache.clone())
            .run(&request(&text), &|_: ProgressEvent| {}, &CancellationFlag::new())
            .await
            .unwrap();
        collect(stream).await;
        assert_eq!(first.analyze_calls(), 1);

        let second = Arc::new(ScriptedClient::new());
        let rerun = pipeline(second.clone(), cache);
        let stream = rerun
            .run(&request(&text), &|_: ProgressEvent| {}, &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(collect(stream).await, "Final answer.");
        assert_eq!(second.analyze_calls(), 0);
        assert_eq!(second.synthesis_calls(), 0);
        assert_eq!(rerun.metrics_snapshot().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sections_with_placeholders_are_rebuilt_on_rerun() {
        let cache = DocumentCache::in_memory(Duration::from_secs(3600));
        let text = "a".repeat(200_000);

        let degraded = Arc::new(ScriptedClient::new().always_failing(1));
        let stream = pipeline(degraded.clone(), cache.clone())
            .run(&request(&text), &|_: ProgressEvent| {}, &CancellationFlag::new())
            .await
            .unwrap();
        collect(stream).await;
        let sent = degraded.consolidate_requests.lock().unwrap()[0].sections.join("\n");
        assert!(sent.contains("[Chunk 2 analysis unavailable:"));

        let healthy = Arc::new(ScriptedClient::new());
        let rerun = pipeline(healthy.clone(), cache);
        let stream = rerun
            .run(&request(&text), &|_: ProgressEvent| {}, &CancellationFlag::new())
            .await
            .unwrap();
        collect(stream).await;

        assert_eq!(healthy.analyze_calls(), 5);
        assert_eq!(rerun.metrics_snapshot().cache_hits, 0);
        let sent = healthy.consolidate_requests.lock().unwrap()[0].sections.join("\n");
        assert!(!sent.contains("unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn detected_type_selects_chunking_strategy() {
        let mut lines = vec!["Region | Q1 | Q2".to_string()];
        lines.extend((0..250).map(|row| format!("r{row} | {row} | {}", row * 2)));
        let mut request = request(&lines.join("\n"));
        request.document.doc_type = None;

        let client = Arc::new(ScriptedClient::new().detecting("table"));
        let pipeline = pipeline(client.clone(), DocumentCache::in_memory(Duration::from_secs(60)));
        let stream = pipeline
            .run(&request, &|_: ProgressEvent| {}, &CancellationFlag::new())
            .await
            .unwrap();
        collect(stream).await;

        let detect = client.detect_requests.lock().unwrap();
        assert_eq!(detect.len(), 1);
        assert_eq!(detect[0].file_name, "annual-report.pdf");
        assert!(detect[0].content_sample.starts_with("Region | Q1 | Q2"));

        let analyzed = client.analyze_requests.lock().unwrap();
        assert_eq!(analyzed.len(), 3);
        assert!(analyzed[1].chunk.starts_with("Region | Q1 | Q2\nr99 |"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_detection_falls_back_to_general() {
        let mut request = request(&"x".repeat(10_000));
        request.document.doc_type = None;

        let client = Arc::new(ScriptedClient::new().failing_detection());
        let pipeline = pipeline(client.clone(), DocumentCache::in_memory(Duration::from_secs(60)));
        let stream = pipeline
            .run(&request, &|_: ProgressEvent| {}, &CancellationFlag::new())
            .await
            .unwrap();
        assert_eq!(collect(stream).await, "Final answer.");

        let detect = client.detect_requests.lock().unwrap();
        assert_eq!(detect[0].content_sample.chars().count(), 3000);
        let analyzed = client.analyze_requests.lock().unwrap();
        assert_eq!(analyzed.len(), 1);
        assert_eq!(analyzed[0].chunk.len(), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn synthesis_failure_reports_phase() {
        let client = Arc::new(ScriptedClient::new().failing_synthesis_call(1));
        let pipeline = pipeline(client.clone(), DocumentCache::in_memory(Duration::from_secs(60)));
        let result = pipeline
            .run(&request("Some text."), &|_: ProgressEvent| {}, &CancellationFlag::new())
            .await;

        let Err(error) = result else {
            panic!("expected synthesis failure");
        };
        assert!(error.to_string().starts_with("Section synthesis failed for section 1"));
        assert!(client.consolidate_requests.lock().unwrap().is_empty());
        assert_eq!(pipeline.metrics_snapshot().documents_processed, 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_calls() {
        let client = Arc::new(ScriptedClient::new());
        let pipeline = pipeline(client.clone(), DocumentCache::in_memory(Duration::from_secs(60)));
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let result = pipeline
            .run(&request("Some text."), &|_: ProgressEvent| {}, &cancel)
            .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(client.analyze_calls(), 0);
    }
}
