//! Scripted completion backend shared by the pipeline unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::completion::{
    AnalyzeChunkRequest, CompletionClient, CompletionError, ConsolidateRequest,
    DetectDocTypeRequest, DocTypeClassification, FragmentStream, SynthesizeSectionRequest,
};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    RateLimited,
    ServerError,
}

impl Failure {
    fn to_error(self) -> CompletionError {
        match self {
            Self::RateLimited => CompletionError::RateLimited {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: "slow down".into(),
            },
            Self::ServerError => CompletionError::UnexpectedStatus {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".into(),
            },
        }
    }
}

type SynthesisFn = Box<dyn Fn(&SynthesizeSectionRequest) -> String + Send + Sync>;

pub(crate) struct ScriptedClient {
    /// Tag returned by detection; `None` fails the call.
    detected_type: Option<String>,
    delays: HashMap<usize, Duration>,
    /// Remaining scripted failures per chunk index; `usize::MAX` fails forever.
    failures: Mutex<HashMap<usize, (Failure, usize)>>,
    failing_synthesis_calls: HashSet<usize>,
    synthesize: SynthesisFn,
    fragments: Vec<String>,
    reject_consolidation: bool,
    synthesis_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub(crate) detect_requests: Mutex<Vec<DetectDocTypeRequest>>,
    pub(crate) analyze_requests: Mutex<Vec<AnalyzeChunkRequest>>,
    pub(crate) synthesis_requests: Mutex<Vec<SynthesizeSectionRequest>>,
    pub(crate) consolidate_requests: Mutex<Vec<ConsolidateRequest>>,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self {
            detected_type: Some("general".into()),
            delays: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            failing_synthesis_calls: HashSet::new(),
            synthesize: Box::new(|request| {
                format!("section {}: {}", request.section_index + 1, request.analyses.join(" + "))
            }),
            fragments: vec!["Final ".into(), "answer.".into()],
            reject_consolidation: false,
            synthesis_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            detect_requests: Mutex::new(Vec::new()),
            analyze_requests: Mutex::new(Vec::new()),
            synthesis_requests: Mutex::new(Vec::new()),
            consolidate_requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn detecting(mut self, tag: &str) -> Self {
        self.detected_type = Some(tag.to_string());
        self
    }

    pub(crate) fn failing_detection(mut self) -> Self {
        self.detected_type = None;
        self
    }

    pub(crate) fn with_delay(mut self, chunk_index: usize, delay: Duration) -> Self {
        self.delays.insert(chunk_index, delay);
        self
    }

    pub(crate) fn failing(self, chunk_index: usize, failure: Failure, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(chunk_index, (failure, times));
        self
    }

    pub(crate) fn always_failing(self, chunk_index: usize) -> Self {
        self.failing(chunk_index, Failure::ServerError, usize::MAX)
    }

    /// Fail the `call`-th synthesis request (1-based, counted across the run).
    pub(crate) fn failing_synthesis_call(mut self, call: usize) -> Self {
        self.failing_synthesis_calls.insert(call);
        self
    }

    pub(crate) fn with_synthesis(
        mut self,
        synthesize: impl Fn(&SynthesizeSectionRequest) -> String + Send + Sync + 'static,
    ) -> Self {
        self.synthesize = Box::new(synthesize);
        self
    }

    pub(crate) fn with_fragments(mut self, fragments: &[&str]) -> Self {
        self.fragments = fragments.iter().map(|fragment| fragment.to_string()).collect();
        self
    }

    pub(crate) fn rejecting_consolidation(mut self) -> Self {
        self.reject_consolidation = true;
        self
    }

    pub(crate) fn analyze_calls(&self) -> usize {
        self.analyze_requests.lock().unwrap().len()
    }

    pub(crate) fn synthesis_calls(&self) -> usize {
        self.synthesis_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_failure(&self, chunk_index: usize) -> Option<CompletionError> {
        let mut failures = self.failures.lock().unwrap();
        let (failure, remaining) = failures.get_mut(&chunk_index)?;
        if *remaining == 0 {
            return None;
        }
        if *remaining != usize::MAX {
            *remaining -= 1;
        }
        Some(failure.to_error())
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn detect_doc_type(
        &self,
        request: &DetectDocTypeRequest,
    ) -> Result<DocTypeClassification, CompletionError> {
        self.detect_requests.lock().unwrap().push(request.clone());
        match &self.detected_type {
            Some(tag) => Ok(DocTypeClassification {
                doc_type: tag.clone(),
                confidence: Some(90.0),
            }),
            None => Err(Failure::ServerError.to_error()),
        }
    }

    async fn analyze_chunk(&self, request: &AnalyzeChunkRequest) -> Result<String, CompletionError> {
        self.analyze_requests.lock().unwrap().push(request.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&request.chunk_index) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.take_failure(request.chunk_index) {
            Some(error) => Err(error),
            None => Ok(format!("analysis {}", request.chunk_index)),
        }
    }

    async fn synthesize_section(
        &self,
        request: &SynthesizeSectionRequest,
    ) -> Result<String, CompletionError> {
        self.synthesis_requests.lock().unwrap().push(request.clone());
        let call = self.synthesis_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_synthesis_calls.contains(&call) {
            return Err(Failure::ServerError.to_error());
        }
        Ok((self.synthesize)(request))
    }

    async fn consolidate_stream(
        &self,
        request: &ConsolidateRequest,
    ) -> Result<FragmentStream, CompletionError> {
        self.consolidate_requests.lock().unwrap().push(request.clone());
        if self.reject_consolidation {
            return Err(CompletionError::MissingCredentials);
        }
        let fragments: Vec<Result<String, CompletionError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(fragments)))
    }
}
