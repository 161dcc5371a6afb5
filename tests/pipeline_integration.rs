use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docdigest::completion::HttpCompletionClient;
use docdigest::metrics::PipelineMetrics;
use docdigest::pipeline::{
    CancellationFlag, DigestPipeline, DigestRequest, DocType, Document, DocumentCache,
    FileCacheStore, PipelineError, PipelineSettings, ProgressEvent,
};
use futures_util::StreamExt;
use httpmock::{Method::POST, MockServer};
use serde_json::json;

const API_KEY: &str = "test-key";

fn sse_body(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        let payload = json!({ "choices": [{ "delta": { "content": fragment } }] });
        body.push_str(&format!("data: {payload}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn fast_settings() -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.analysis.inter_batch_delay = Duration::from_millis(0);
    settings.analysis.retry.initial_backoff = Duration::from_millis(10);
    settings
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("docdigest-it-{}", uuid::Uuid::new_v4()))
}

fn pipeline(server: &MockServer, cache_dir: &Path) -> DigestPipeline {
    let client = HttpCompletionClient::new(server.base_url(), Some(API_KEY.into()), Duration::from_secs(5))
        .expect("client");
    DigestPipeline::new(
        Arc::new(client),
        DocumentCache::new(
            Arc::new(FileCacheStore::new(cache_dir)),
            Duration::from_secs(3600),
        ),
        fast_settings(),
        Arc::new(PipelineMetrics::new()),
    )
}

fn request() -> DigestRequest {
    DigestRequest {
        document: Document {
            text: "Revenue grew 12% year over year. Costs were flat.\n".repeat(40),
            total_pages: 2,
            name: "q3-report.pdf".into(),
            doc_type: Some(DocType::General),
        },
        question: "How did revenue change?".into(),
    }
}

async fn answer(pipeline: &DigestPipeline) -> Result<String, PipelineError> {
    answer_for(pipeline, &request()).await
}

async fn answer_for(
    pipeline: &DigestPipeline,
    request: &DigestRequest,
) -> Result<String, PipelineError> {
    let stream = pipeline
        .run(request, &|_: ProgressEvent| {}, &CancellationFlag::new())
        .await?;
    let fragments: Vec<String> = stream
        .map(|fragment| fragment.expect("fragment"))
        .collect()
        .await;
    Ok(fragments.concat())
}

#[tokio::test]
async fn digest_runs_end_to_end_against_http_service() {
    let server = MockServer::start_async().await;
    let analyze = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rag-analyze-chunk")
                .header("authorization", format!("Bearer {API_KEY}"))
                .body_contains("\"chunkIndex\":0");
            then.status(200)
                .json_body(json!({ "analysis": "Revenue up 12%." }));
        })
        .await;
    let synthesize = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rag-synthesize-section")
                .body_contains("Revenue up 12%.");
            then.status(200)
                .json_body(json!({ "synthesis": "Section: revenue grew." }));
        })
        .await;
    let consolidate = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rag-consolidate")
                .header("authorization", format!("Bearer {API_KEY}"))
                .body_contains("How did revenue change?")
                .body_contains("q3-report.pdf");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(sse_body(&["Revenue ", "grew ", "12%."]));
        })
        .await;

    let dir = scratch_dir();
    let pipeline = pipeline(&server, &dir);
    assert_eq!(answer(&pipeline).await.expect("answer"), "Revenue grew 12%.");

    analyze.assert_async().await;
    synthesize.assert_async().await;
    consolidate.assert_async().await;
    assert_eq!(pipeline.metrics_snapshot().documents_processed, 1);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn synthesis_failure_aborts_before_final_call() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-analyze-chunk");
            then.status(200).json_body(json!({ "analysis": "summary" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-synthesize-section");
            then.status(500).body("model overloaded");
        })
        .await;
    let consolidate = server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-consolidate");
            then.status(200).body(sse_body(&["unused"]));
        })
        .await;

    let dir = scratch_dir();
    let error = answer(&pipeline(&server, &dir)).await.unwrap_err();
    let message = error.to_string();
    assert!(message.starts_with("Section synthesis failed for section 1"), "{message}");
    assert!(message.contains("model overloaded"), "{message}");
    assert_eq!(consolidate.hits_async().await, 0);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn rate_limited_chunk_degrades_to_placeholder() {
    let server = MockServer::start_async().await;
    let analyze = server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-analyze-chunk");
            then.status(429).body("rate limit exceeded");
        })
        .await;
    let synthesize = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rag-synthesize-section")
                .body_contains("[Chunk 1 analysis unavailable:");
            then.status(200).json_body(json!({ "synthesis": "Little is known." }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-consolidate");
            then.status(200).body(sse_body(&["No data."]));
        })
        .await;

    let dir = scratch_dir();
    let pipeline = pipeline(&server, &dir);
    assert_eq!(answer(&pipeline).await.expect("answer"), "No data.");

    assert_eq!(analyze.hits_async().await, 3);
    synthesize.assert_async().await;
    let metrics = pipeline.metrics_snapshot();
    assert_eq!(metrics.chunk_failures, 1);
    assert_eq!(metrics.chunks_analyzed, 0);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn file_cache_skips_earlier_phases_on_rerun() {
    let server = MockServer::start_async().await;
    let analyze = server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-analyze-chunk");
            then.status(200).json_body(json!({ "analysis": "summary" }));
        })
        .await;
    let synthesize = server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-synthesize-section");
            then.status(200).json_body(json!({ "synthesis": "section" }));
        })
        .await;
    let consolidate = server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-consolidate");
            then.status(200).body(sse_body(&["Cached ", "answer."]));
        })
        .await;

    let dir = scratch_dir();
    assert_eq!(answer(&pipeline(&server, &dir)).await.expect("first"), "Cached answer.");
    let rerun = pipeline(&server, &dir);
    assert_eq!(answer(&rerun).await.expect("second"), "Cached answer.");

    assert_eq!(analyze.hits_async().await, 1);
    assert_eq!(synthesize.hits_async().await, 1);
    assert_eq!(consolidate.hits_async().await, 2);
    assert_eq!(rerun.metrics_snapshot().cache_hits, 1);
    let _ = std::fs::remove_dir_all(&dir);
}

async fn mock_downstream(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-synthesize-section");
            then.status(200).json_body(json!({ "synthesis": "rows" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-consolidate");
            then.status(200).body(sse_body(&["Table ", "digest."]));
        })
        .await;
}

#[tokio::test]
async fn detected_table_sends_header_with_later_row_groups() {
    let server = MockServer::start_async().await;
    let detect = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/detect-doc-type")
                .body_contains("\"fileName\":\"regions.csv\"")
                .body_contains("\"contentSample\":\"Region | Q1 | Q2");
            then.status(200)
                .json_body(json!({ "type": "table", "confidence": 95, "reasoning": "pipes" }));
        })
        .await;
    let first_rows = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rag-analyze-chunk")
                .body_contains("\"chunkIndex\":0");
            then.status(200).json_body(json!({ "analysis": "first rows" }));
        })
        .await;
    let later_rows = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/rag-analyze-chunk")
                .body_contains("\"chunkIndex\":1")
                .body_contains("Region | Q1 | Q2\\nr99 | 99 | 198");
            then.status(200).json_body(json!({ "analysis": "later rows" }));
        })
        .await;
    mock_downstream(&server).await;

    let mut lines = vec!["Region | Q1 | Q2".to_string()];
    lines.extend((0..150).map(|row| format!("r{row} | {row} | {}", row * 2)));
    let request = DigestRequest {
        document: Document {
            text: lines.join("\n"),
            total_pages: 4,
            name: "regions.csv".into(),
            doc_type: None,
        },
        question: "Which region grew most?".into(),
    };

    let dir = scratch_dir();
    let pipeline = pipeline(&server, &dir);
    assert_eq!(answer_for(&pipeline, &request).await.expect("answer"), "Table digest.");

    detect.assert_async().await;
    first_rows.assert_async().await;
    later_rows.assert_async().await;
    assert_eq!(pipeline.metrics_snapshot().chunk_failures, 0);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn failed_detection_still_digests_as_general() {
    let server = MockServer::start_async().await;
    let detect = server
        .mock_async(|when, then| {
            when.method(POST).path("/detect-doc-type");
            then.status(500).json_body(json!({ "error": "OPENAI_API_KEY not configured" }));
        })
        .await;
    let analyze = server
        .mock_async(|when, then| {
            when.method(POST).path("/rag-analyze-chunk");
            then.status(200).json_body(json!({ "analysis": "summary" }));
        })
        .await;
    mock_downstream(&server).await;

    let mut request = request();
    request.document.doc_type = None;

    let dir = scratch_dir();
    let pipeline = pipeline(&server, &dir);
    assert_eq!(answer_for(&pipeline, &request).await.expect("answer"), "Table digest.");

    assert_eq!(detect.hits_async().await, 1);
    analyze.assert_async().await;
    let _ = std::fs::remove_dir_all(&dir);
}
