//! Final streamed consolidation.

use futures_util::StreamExt;

use crate::completion::{CompletionClient, ConsolidateRequest, FragmentStream};

use super::types::PipelineError;

/// Open the streamed final answer for the reduced `sections`.
///
/// Issues exactly one remote request. A rejection before streaming is returned as
/// [`PipelineError::Finalize`]; later read errors arrive as `Err` items on the stream. Dropping
/// the stream closes the underlying connection.
pub async fn consolidate_and_stream(
    client: &dyn CompletionClient,
    sections: Vec<String>,
    question: &str,
    document_name: &str,
    total_pages: usize,
) -> Result<FragmentStream, PipelineError> {
    let section_count = sections.len();
    let request = ConsolidateRequest {
        sections,
        user_question: question.to_string(),
        document_name: document_name.to_string(),
        total_pages,
    };
    let stream = client
        .consolidate_stream(&request)
        .await
        .map_err(PipelineError::Finalize)?;
    tracing::info!(sections = section_count, document = document_name, "Final consolidation streaming");

    let mut fragments = 0usize;
    let relayed = stream.inspect(move |item| match item {
        Ok(_) => fragments += 1,
        Err(error) => tracing::warn!(fragments, error = %error, "Final consolidation stream interrupted"),
    });
    Ok(Box::pin(relayed))
}
