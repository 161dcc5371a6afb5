//! reqwest-backed client for the hosted `rag-*` completion functions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Serialize, de::DeserializeOwned};

use super::sse::decode_event_stream;
use super::types::{
    AnalyzeChunkRequest, AnalyzeChunkResponse, CompletionError, ConsolidateRequest,
    DetectDocTypeRequest, DocTypeClassification, SynthesizeSectionRequest,
    SynthesizeSectionResponse,
};
use super::{CompletionClient, FragmentStream};
use crate::config::Config;

const DETECT_PATH: &str = "detect-doc-type";
const ANALYZE_PATH: &str = "rag-analyze-chunk";
const SYNTHESIZE_PATH: &str = "rag-synthesize-section";
const CONSOLIDATE_PATH: &str = "rag-consolidate";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP implementation of [`CompletionClient`].
pub struct HttpCompletionClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) request_timeout: Duration,
}

impl HttpCompletionClient {
    /// Build a client for the given base URL.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .user_agent("docdigest/0.1")
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.is_some(),
            timeout_secs = request_timeout.as_secs(),
            "Initialized completion HTTP client"
        );
        Ok(Self {
            http,
            base_url,
            api_key,
            request_timeout,
        })
    }

    /// Build a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, CompletionError> {
        Self::new(
            config.completion_base_url.clone(),
            config.completion_api_key.clone(),
            config.completion_timeout,
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.http.post(self.endpoint(path));
        match self.api_key.as_deref() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CompletionError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .post(path)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = CompletionError::from_status(status, body);
            tracing::warn!(endpoint = path, status = %status, error = %error, "Completion call failed");
            return Err(error);
        }

        response.json::<Resp>().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode {path} response: {error}"))
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn detect_doc_type(
        &self,
        request: &DetectDocTypeRequest,
    ) -> Result<DocTypeClassification, CompletionError> {
        self.post_json(DETECT_PATH, request).await
    }

    async fn analyze_chunk(&self, request: &AnalyzeChunkRequest) -> Result<String, CompletionError> {
        let response: AnalyzeChunkResponse = self.post_json(ANALYZE_PATH, request).await?;
        Ok(response.analysis)
    }

    async fn synthesize_section(
        &self,
        request: &SynthesizeSectionRequest,
    ) -> Result<String, CompletionError> {
        let response: SynthesizeSectionResponse = self.post_json(SYNTHESIZE_PATH, request).await?;
        Ok(response.synthesis)
    }

    async fn consolidate_stream(
        &self,
        request: &ConsolidateRequest,
    ) -> Result<FragmentStream, CompletionError> {
        if self.api_key.is_none() {
            return Err(CompletionError::MissingCredentials);
        }

        // Only the wait for headers is bounded; the body may stream for longer.
        let send = self
            .post(CONSOLIDATE_PATH)
            .header(header::ACCEPT, "text/event-stream")
            .json(request)
            .send();
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| CompletionError::Timeout(self.request_timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Consolidation request rejected");
            return Err(CompletionError::from_status(status, body));
        }

        tracing::debug!(sections = request.sections.len(), "Consolidation stream opened");
        Ok(Box::pin(decode_event_stream(response.bytes_stream())))
    }
}
