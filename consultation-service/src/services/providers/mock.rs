//! Mock provider implementation for testing.

use super::{FinishReason, ProviderError, ProviderStream, StreamChunk, TextProvider};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// How a scripted stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ending {
    Complete,
    /// Fail mid-stream with this message after the scripted fragments.
    Error(String),
}

/// Mock text provider that replays a fixed list of fragments.
///
/// Records every call so tests can assert on what would have been sent
/// upstream.
pub struct MockTextProvider {
    enabled: bool,
    fragments: Vec<String>,
    ending: Ending,
    fail_on_open: bool,
    calls: AtomicUsize,
    last_request: Mutex<Option<(String, String)>>,
}

impl MockTextProvider {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            fragments: fragments.into_iter().map(Into::into).collect(),
            ending: Ending::Complete,
            fail_on_open: false,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// A provider whose health check and stream both fail.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Vec::<String>::new())
        }
    }

    /// End the stream with an error after the scripted fragments.
    pub fn failing_after_fragments(mut self, message: impl Into<String>) -> Self {
        self.ending = Ending::Error(message.into());
        self
    }

    /// Refuse to open the stream at all.
    pub fn failing_on_open(mut self) -> Self {
        self.fail_on_open = true;
        self
    }

    /// Number of `generate_stream` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(system_instruction, prompt)` of the most recent call.
    pub fn last_request(&self) -> Option<(String, String)> {
        self.last_request
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl TextProvider for MockTextProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate_stream(
        &self,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<ProviderStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some((system_instruction.to_string(), prompt.to_string()));
        }

        if !self.enabled {
            return Err(ProviderError::NotConfigured(
                "Mock text provider not enabled".to_string(),
            ));
        }
        if self.fail_on_open {
            return Err(ProviderError::ApiError(
                "Mock upstream refused the request".to_string(),
            ));
        }

        let mut chunks: Vec<Result<StreamChunk, ProviderError>> = self
            .fragments
            .iter()
            .cloned()
            .map(|fragment| Ok(StreamChunk::Text(fragment)))
            .collect();

        match &self.ending {
            Ending::Complete => chunks.push(Ok(StreamChunk::Complete {
                input_tokens: prompt.len() as i32 / 4,
                output_tokens: self.fragments.len() as i32,
                finish_reason: FinishReason::Complete,
            })),
            Ending::Error(message) => {
                chunks.push(Err(ProviderError::NetworkError(message.clone())))
            }
        }

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.enabled {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(
                "Mock text provider not enabled".to_string(),
            ))
        }
    }
}
