//! Server-sent-events decoding for the streaming consolidation endpoint.

use async_stream::try_stream;
use futures_core::Stream;
use futures_util::{pin_mut, stream::StreamExt};
use serde::Deserialize;

use super::types::CompletionError;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// One meaningful line of the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text to relay to the caller.
    Fragment(String),
    /// Explicit end-of-stream marker.
    End,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Interpret a single line of the event stream.
///
/// Returns `None` for lines that carry nothing to relay: comments, blank keep-alives, payloads
/// without delta content, and malformed JSON.
pub fn parse_event_line(line: &str) -> Option<StreamEvent> {
    let data = line.trim_end_matches('\r').strip_prefix(DATA_PREFIX)?;
    if data.trim() == DONE_MARKER {
        return Some(StreamEvent::End);
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamEvent::Fragment),
        Err(error) => {
            tracing::debug!(error = %error, "Skipping malformed stream payload");
            None
        }
    }
}

/// Turn a raw byte stream into text fragments.
///
/// Lines are reassembled across network chunk boundaries before parsing. The stream finishes at
/// the first `data: [DONE]` line or when the body ends; transport errors are yielded as `Err`.
pub fn decode_event_stream<S, B, E>(body: S) -> impl Stream<Item = Result<String, CompletionError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<CompletionError>,
{
    try_stream! {
        pin_mut!(body);
        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;

        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| -> CompletionError { error.into() })?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(position) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=position).collect();
                let line = String::from_utf8_lossy(&line[..line.len() - 1]);
                match parse_event_line(&line) {
                    Some(StreamEvent::End) => {
                        finished = true;
                        break 'read;
                    }
                    Some(StreamEvent::Fragment(text)) => yield text,
                    None => {}
                }
            }
        }

        if !finished && !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).into_owned();
            if let Some(StreamEvent::Fragment(text)) = parse_event_line(&line) {
                yield text;
            }
        }
    }
}
