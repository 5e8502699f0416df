//! Per-message handling: decode → resolve → play.
//!
//! Received → Parsed → Resolved → Played, or Failed at any step. Each message
//! is independent; failures are logged and never reach the listener loop.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::cache::SynthesisCache;
use crate::error::SpeakerError;
use crate::player::AudioSink;
use crate::request::SpeechRequest;
use crate::resolver::AudioResolver;

const PAYLOAD_PREVIEW_CHARS: usize = 200;

pub struct MessageDispatcher {
    resolver: AudioResolver,
    sink: Arc<dyn AudioSink>,
    cache: SynthesisCache,
}

impl MessageDispatcher {
    pub fn new(resolver: AudioResolver, sink: Arc<dyn AudioSink>, cache: SynthesisCache) -> Self {
        Self {
            resolver,
            sink,
            cache,
        }
    }

    /// Handle one payload and report the typed outcome.
    pub async fn handle(&mut self, payload: &[u8]) -> Result<PathBuf, SpeakerError> {
        let request = SpeechRequest::decode(payload)?;
        let path = self.resolver.resolve(&request, &mut self.cache).await?;
        self.sink.play(&path).await?;
        Ok(path)
    }

    /// Subscription callback. Logs the outcome and swallows every error.
    pub async fn on_message(&mut self, topic: &str, payload: &[u8]) -> Option<PathBuf> {
        match self.handle(payload).await {
            Ok(path) => {
                info!("Played audio file {}", path.display());
                Some(path)
            }
            Err(e) => {
                let preview: String = String::from_utf8_lossy(payload)
                    .chars()
                    .take(PAYLOAD_PREVIEW_CHARS)
                    .collect();
                error!(kind = e.kind(), topic, "Dropping message {preview:?}: {e}");
                None
            }
        }
    }

    pub fn cache(&self) -> &SynthesisCache {
        &self.cache
    }

    /// Give the cache back once listening has stopped.
    pub fn into_cache(self) -> SynthesisCache {
        self.cache
    }
}
