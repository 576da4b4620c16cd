//! Relays model fragments to the client as server-sent-event frames.
//!
//! Each fragment is split on `\n`. Every line but the last is written as a
//! `data:` frame followed by a spacer frame, `data:  \n`, which carries a
//! single space and no blank-line terminator. The client's SSE parser folds
//! the spacer into the next event, which is how paragraph breaks survive the
//! transport. The last line of a fragment gets no spacer because the next
//! fragment may continue it.

use super::metrics;
use super::providers::{ProviderError, ProviderStream, StreamChunk};
use axum::body::Bytes;
use futures::{stream, Stream, StreamExt};
use std::time::Instant;

/// Wire encoding of the spacer frame.
pub const SPACER_FRAME: &str = "data:  \n";

/// One unit written to the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `data: <line>` terminated by a blank line.
    Line(String),
    /// The spacer emitted after every non-final line of a fragment.
    Spacer,
}

impl Frame {
    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Line(line) => Bytes::from(format!("data: {}\n\n", line)),
            Frame::Spacer => Bytes::from_static(SPACER_FRAME.as_bytes()),
        }
    }
}

/// Frames for one fragment, in order. Empty fragments produce none.
pub fn frame_fragment(text: &str) -> Vec<Frame> {
    if text.is_empty() {
        return Vec::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let (last, rest) = match lines.split_last() {
        Some(split) => split,
        None => return Vec::new(),
    };

    let mut frames = Vec::with_capacity(rest.len() * 2 + 1);
    for line in rest {
        frames.push(Frame::Line((*line).to_string()));
        frames.push(Frame::Spacer);
    }
    frames.push(Frame::Line((*last).to_string()));
    frames
}

/// Per-stream bookkeeping for the completion log line.
struct RelayStats {
    span: tracing::Span,
    provider: &'static str,
    model: String,
    started: Instant,
    fragments: usize,
    frames: usize,
}

/// Map an upstream chunk stream to encoded SSE bytes.
///
/// Chunks are handled strictly in arrival order. An upstream error is
/// yielded as-is, which makes the HTTP server abort the response; nothing
/// is written to tell the client the stream ended early. Log lines are
/// recorded under the span that was current when the relay was created.
pub fn relay(
    upstream: ProviderStream,
    provider: &'static str,
    model: String,
) -> impl Stream<Item = Result<Bytes, ProviderError>> + Send {
    let mut stats = RelayStats {
        span: tracing::Span::current(),
        provider,
        model,
        started: Instant::now(),
        fragments: 0,
        frames: 0,
    };

    upstream.flat_map(move |chunk| {
        let _entered = stats.span.clone().entered();
        let items: Vec<Result<Bytes, ProviderError>> = match chunk {
            Ok(StreamChunk::Text(text)) => {
                let frames = frame_fragment(&text);
                if !frames.is_empty() {
                    stats.fragments += 1;
                    stats.frames += frames.len();
                }
                frames.iter().map(|frame| Ok(frame.encode())).collect()
            }
            Ok(StreamChunk::Complete {
                input_tokens,
                output_tokens,
                finish_reason,
            }) => {
                let elapsed = stats.started.elapsed().as_secs_f64();
                tracing::info!(
                    provider = stats.provider,
                    model = %stats.model,
                    fragments = stats.fragments,
                    frames = stats.frames,
                    input_tokens,
                    output_tokens,
                    finish_reason = finish_reason.as_str(),
                    elapsed_secs = elapsed,
                    "Consultation stream completed"
                );
                metrics::record_provider_latency(stats.provider, &stats.model, elapsed);
                metrics::record_tokens(&stats.model, input_tokens, output_tokens);
                metrics::record_genai_request(&stats.model, finish_reason.as_str());
                Vec::new()
            }
            Err(e) => {
                tracing::error!(
                    provider = stats.provider,
                    model = %stats.model,
                    fragments = stats.fragments,
                    frames = stats.frames,
                    error = %e,
                    "Upstream stream failed; aborting response"
                );
                metrics::record_provider_error(stats.provider, e.kind());
                vec![Err(e)]
            }
        };
        stream::iter(items)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::FinishReason;

    fn line(text: &str) -> Frame {
        Frame::Line(text.to_string())
    }

    fn upstream(chunks: Vec<Result<StreamChunk, ProviderError>>) -> ProviderStream {
        Box::pin(stream::iter(chunks))
    }

    fn text(fragment: &str) -> Result<StreamChunk, ProviderError> {
        Ok(StreamChunk::Text(fragment.to_string()))
    }

    fn complete() -> Result<StreamChunk, ProviderError> {
        Ok(StreamChunk::Complete {
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::Complete,
        })
    }

    async fn wire(chunks: Vec<Result<StreamChunk, ProviderError>>) -> String {
        let bytes: Vec<Bytes> = relay(upstream(chunks), "test", "test-model".to_string())
            .map(|item| item.unwrap())
            .collect()
            .await;
        bytes
            .iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn single_line_fragment_is_one_terminal_frame() {
        assert_eq!(frame_fragment("Hello"), vec![line("Hello")]);
    }

    #[test]
    fn internal_newlines_insert_spacers() {
        assert_eq!(
            frame_fragment("a\nb\nc"),
            vec![line("a"), Frame::Spacer, line("b"), Frame::Spacer, line("c")]
        );
    }

    #[test]
    fn empty_fragment_produces_nothing() {
        assert!(frame_fragment("").is_empty());
    }

    #[test]
    fn trailing_and_blank_lines_are_kept() {
        assert_eq!(
            frame_fragment("end\n"),
            vec![line("end"), Frame::Spacer, line("")]
        );
        assert_eq!(
            frame_fragment("\n\n"),
            vec![line(""), Frame::Spacer, line(""), Frame::Spacer, line("")]
        );
    }

    #[test]
    fn frames_encode_to_exact_wire_text() {
        assert_eq!(line("Hello").encode(), Bytes::from_static(b"data: Hello\n\n"));
        assert_eq!(line("").encode(), Bytes::from_static(b"data: \n\n"));
        assert_eq!(Frame::Spacer.encode(), Bytes::from_static(b"data:  \n"));
    }

    #[tokio::test]
    async fn relays_fragments_in_order() {
        let body = wire(vec![text("Hello\nworld"), text("!"), complete()]).await;

        assert_eq!(body, "data: Hello\n\ndata:  \ndata: world\n\ndata: !\n\n");
    }

    #[tokio::test]
    async fn empty_fragments_are_skipped() {
        let body = wire(vec![text("a"), text(""), text("b"), complete()]).await;

        assert_eq!(body, "data: a\n\ndata: b\n\n");
    }

    #[tokio::test]
    async fn completion_emits_no_frame() {
        assert_eq!(wire(vec![complete()]).await, "");
    }

    #[tokio::test]
    async fn output_is_stable_across_runs() {
        let chunks = || {
            vec![
                text("### Summary\n"),
                text("Stable BP.\n\n### Next steps"),
                text("\n- Recheck in 2 weeks"),
                complete(),
            ]
        };

        let first = wire(chunks()).await;
        for _ in 0..5 {
            assert_eq!(wire(chunks()).await, first);
        }
    }

    #[tokio::test]
    async fn upstream_error_is_forwarded_after_prior_frames() {
        let items: Vec<_> = relay(
            upstream(vec![
                text("partial"),
                Err(ProviderError::NetworkError("reset".to_string())),
            ]),
            "test",
            "test-model".to_string(),
        )
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Bytes::from_static(b"data: partial\n\n"));
        assert!(matches!(items[1], Err(ProviderError::NetworkError(_))));
    }
}
