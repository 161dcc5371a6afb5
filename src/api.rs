//! HTTP surface for docdigest.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /digest` – Run the digest pipeline over an extracted document and stream the answer as
//!   server-sent events. Emits `progress` (JSON progress event), `fragment` (answer text),
//!   `error` (message) and a final `done` event. Closing the connection cancels the run before
//!   its next unit of work.
//! - `GET /metrics` – Observe pipeline counters.
//! - `GET /health` – Liveness probe.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::metrics::MetricsSnapshot;
use crate::pipeline::{
    CancellationFlag, DigestApi, DigestRequest, DocType, Document, ProgressEvent,
};
use async_stream::stream;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Build the HTTP router exposing the digest API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: DigestApi + 'static,
{
    Router::new()
        .route("/digest", post(digest_document::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for the `POST /digest` endpoint.
#[derive(Deserialize)]
struct DigestBody {
    /// Extracted document text.
    text: String,
    /// Page count reported by the extractor.
    total_pages: usize,
    /// Question the answer must address.
    question: String,
    /// Optional display name (defaults to `"document"`).
    #[serde(default)]
    document_name: Option<String>,
    /// Optional document type selecting the chunking strategy (detected when omitted).
    #[serde(default)]
    doc_type: Option<String>,
}

impl DigestBody {
    fn into_request(self) -> Result<DigestRequest, AppError> {
        if self.question.trim().is_empty() {
            return Err(AppError::BadRequest("question must not be empty".into()));
        }
        let doc_type = self
            .doc_type
            .as_deref()
            .map(str::parse::<DocType>)
            .transpose()
            .map_err(|error| AppError::BadRequest(error.to_string()))?;
        Ok(DigestRequest {
            document: Document {
                text: self.text,
                total_pages: self.total_pages,
                name: self.document_name.unwrap_or_else(|| "document".to_string()),
                doc_type,
            },
            question: self.question,
        })
    }
}

/// Messages relayed from the pipeline task to the SSE response.
#[derive(Debug, PartialEq)]
enum DigestEvent {
    Progress(ProgressEvent),
    Fragment(String),
    Error(String),
    Done,
}

impl DigestEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Done)
    }

    fn into_sse(self) -> Event {
        match self {
            Self::Progress(progress) => Event::default()
                .event("progress")
                .json_data(&progress)
                .unwrap_or_else(|_| Event::default().event("progress").data(progress.status)),
            Self::Fragment(text) => Event::default()
                .event("fragment")
                .data(text.replace('\r', "")),
            Self::Error(message) => Event::default()
                .event("error")
                .data(message.replace('\r', "")),
            Self::Done => Event::default().event("done").data("[DONE]"),
        }
    }
}

/// Digest a document and stream the answer.
///
/// The pipeline runs in its own task and reports through a channel, so a slow client never
/// blocks the synchronous progress callback.
async fn digest_document<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<DigestBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError>
where
    S: DigestApi + 'static,
{
    let request = body.into_request()?;
    tracing::info!(
        document = %request.document.name,
        pages = request.document.total_pages,
        doc_type = request.document.doc_type.map_or("auto", DocType::as_str),
        "Digest request accepted"
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(run_digest(service, request, tx, CancellationFlag::new()));

    let events = stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            yield Ok::<_, Infallible>(DigestEvent::into_sse(event));
            if terminal {
                break;
            }
        }
    };
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn run_digest<S>(
    service: Arc<S>,
    request: DigestRequest,
    tx: mpsc::UnboundedSender<DigestEvent>,
    cancel: CancellationFlag,
) where
    S: DigestApi + ?Sized,
{
    let watcher = {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tx.closed().await;
            tracing::info!("Digest client disconnected; cancelling run");
            cancel.cancel();
        })
    };

    let progress_tx = tx.clone();
    let observer = move |event: ProgressEvent| {
        let _ = progress_tx.send(DigestEvent::Progress(event));
    };

    match service.digest(&request, &observer, &cancel).await {
        Ok(mut fragments) => {
            let mut finished = true;
            while let Some(item) = fragments.next().await {
                let event = match item {
                    Ok(fragment) => DigestEvent::Fragment(fragment),
                    Err(error) => {
                        finished = false;
                        DigestEvent::Error(error.to_string())
                    }
                };
                if tx.send(event).is_err() || !finished {
                    break;
                }
            }
            if finished {
                let _ = tx.send(DigestEvent::Done);
            }
        }
        Err(error) => {
            tracing::warn!(error = %error, "Digest run failed");
            let _ = tx.send(DigestEvent::Error(error.to_string()));
        }
    }
    watcher.abort();
}

/// Return the pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: DigestApi,
{
    Json(service.metrics_snapshot())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "digest",
                method: "POST",
                path: "/digest",
                description: "Chunk, analyze and consolidate an extracted document, streaming the answer as server-sent events (progress, fragment, error, done).",
                request_example: Some(json!({
                    "text": "Extracted document text",
                    "total_pages": 45,
                    "question": "What are the key findings?",
                    "document_name": "annual-report.pdf",
                    "doc_type": "general"
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return pipeline counters: documents, analyzed and failed chunks, cache hits and forced truncations.",
                request_example: None,
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/health",
                description: "Liveness probe returning { \"status\": \"ok\" }.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
        }
    }
}
