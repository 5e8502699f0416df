//! Service lifecycle: startup, listening, and signal-driven shutdown.
//!
//! STARTING → LISTENING → SHUTTING DOWN

use std::path::Path;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::SynthesisCache;
use crate::config::Config;
use crate::dispatcher::MessageDispatcher;
use crate::player::{AudioSink, RodioSink};
use crate::resolver::AudioResolver;
use crate::synthesizer;
use crate::transport::MqttListener;

pub struct SpeakerService {
    config: Config,
}

impl SpeakerService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until SIGINT or SIGTERM.
    ///
    /// Fails only during startup (unreadable cache, no audio device, signal
    /// registration). Shutdown problems are logged and the call still returns Ok.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let signals = ShutdownSignals::register()?;
        let speech = &self.config.speech;

        info!("Loading previously played messages");
        let cache = SynthesisCache::load(&speech.saved_audio_map)?;
        if cache.is_empty() {
            info!("No previously synthesized messages, starting with an empty cache");
        }

        let sink: Arc<dyn AudioSink> = Arc::new(RodioSink::initialize(&speech.audio_device)?);
        let synthesizer = synthesizer::from_config(&self.config.synthesis);
        info!("Using {} synthesis backend", synthesizer.name());

        let resolver = AudioResolver::new(
            speech.working_dir.clone(),
            speech.saved_audios_dir.clone(),
            synthesizer,
        );
        let dispatcher = MessageDispatcher::new(resolver, sink, cache);

        let listener = MqttListener::connect(&self.config.mqtt);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listening = tokio::spawn(listener.run(dispatcher, shutdown_rx));
        info!("Service ready, waiting for messages on {}", self.config.mqtt.topic_name);

        shut_down_on_signal(signals, shutdown_tx, listening, &speech.saved_audio_map).await
    }
}

/// Wait for the first signal, stop the listener and persist the cache it hands back.
///
/// Runs once. Signals arriving after the first are logged and ignored.
async fn shut_down_on_signal(
    mut signals: ShutdownSignals,
    shutdown_tx: watch::Sender<bool>,
    listening: JoinHandle<MessageDispatcher>,
    cache_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    match signals.recv().await {
        Some(received) => info!("Received {received}, shutting down"),
        None => warn!("Signal handler stopped, shutting down"),
    }
    tokio::spawn(signals.ignore_remaining());

    let _ = shutdown_tx.send(true);
    match listening.await {
        Ok(dispatcher) => save_cache(&dispatcher.into_cache(), cache_path),
        Err(e) => error!("Listener task failed: {e}; synthesis cache not saved"),
    }

    info!("Shutting down text to speech");
    Ok(())
}

fn save_cache(cache: &SynthesisCache, path: &Path) {
    info!("Saving played messages");
    if let Err(e) = cache.persist(path) {
        // The audio files are still on disk; only their index is lost.
        error!(kind = e.kind(), "{e}");
    }
}

/// SIGINT/SIGTERM, registered before anything else starts.
struct ShutdownSignals {
    received: mpsc::UnboundedReceiver<&'static str>,
}

impl ShutdownSignals {
    fn register() -> std::io::Result<Self> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let (tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = interrupt.recv() => "SIGINT",
                    Some(()) = terminate.recv() => "SIGTERM",
                    else => break,
                };
                if tx.send(name).is_err() {
                    break;
                }
            }
        });

        Ok(Self { received })
    }

    async fn recv(&mut self) -> Option<&'static str> {
        self.received.recv().await
    }

    /// Shutdown is not re-entrant: later signals are only logged.
    async fn ignore_remaining(mut self) {
        while let Some(received) = self.recv().await {
            warn!("Received {received} while shutting down, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::dispatcher::tests::RecordingSink;
    use crate::resolver::tests::CountingSynthesizer;

    #[tokio::test]
    async fn missing_cache_file_stops_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.speech.saved_audio_map = dir.path().join("absent.json");

        let err = SpeakerService::new(config).run().await.unwrap_err();
        assert!(err.to_string().contains("failed to load synthesis cache"));
    }

    #[tokio::test]
    async fn corrupt_cache_file_stops_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, "not json").unwrap();
        let mut config = Config::default();
        config.speech.saved_audio_map = path;

        assert!(SpeakerService::new(config).run().await.is_err());
    }

    fn signals() -> (mpsc::UnboundedSender<&'static str>, ShutdownSignals) {
        let (tx, received) = mpsc::unbounded_channel();
        (tx, ShutdownSignals { received })
    }

    /// Dispatcher that has already synthesized `text` during this session.
    async fn dispatcher_with(text: &str) -> MessageDispatcher {
        let resolver = AudioResolver::new(
            PathBuf::from("/work"),
            PathBuf::from("/audio"),
            Arc::new(CountingSynthesizer::default()),
        );
        let mut cache = SynthesisCache::default();
        cache.insert("hello world", "a.wav");
        let mut dispatcher =
            MessageDispatcher::new(resolver, Arc::new(RecordingSink::default()), cache);
        let payload = serde_json::json!({ "text": text }).to_string();
        assert!(dispatcher.on_message("speech", payload.as_bytes()).await.is_some());
        dispatcher
    }

    /// Listener stand-in: returns `dispatcher` once shutdown is requested and
    /// counts how many times it was asked to stop.
    fn listener(
        dispatcher: MessageDispatcher,
        mut shutdown: watch::Receiver<bool>,
        stops: Arc<AtomicUsize>,
    ) -> JoinHandle<MessageDispatcher> {
        tokio::spawn(async move {
            shutdown.changed().await.unwrap();
            stops.fetch_add(1, Ordering::SeqCst);
            // Still busy when the second signal arrives.
            tokio::time::sleep(Duration::from_millis(50)).await;
            dispatcher
        })
    }

    #[tokio::test]
    async fn signal_persists_entries_added_while_listening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_audio_map.json");
        let (tx, signals) = signals();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stops = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with("dinner is ready").await;
        let listening = listener(dispatcher, shutdown_rx, stops.clone());

        tx.send("SIGTERM").unwrap();
        shut_down_on_signal(signals, shutdown_tx, listening, &path)
            .await
            .unwrap();

        let saved = SynthesisCache::load(&path).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved.lookup("hello world"), Some("a.wav"));
        assert_eq!(saved.lookup("dinner is ready"), Some("/work/synth-1.mp3"));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_signal_does_not_restart_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_audio_map.json");
        let (tx, signals) = signals();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stops = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with("good night").await;
        let listening = listener(dispatcher, shutdown_rx, stops.clone());

        tx.send("SIGINT").unwrap();
        tx.send("SIGINT").unwrap();
        shut_down_on_signal(signals, shutdown_tx, listening, &path)
            .await
            .unwrap();
        assert!(path.exists());

        // A second save would recreate the file.
        std::fs::remove_file(&path).unwrap();
        tx.send("SIGTERM").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!path.exists());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persist_failure_still_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("saved_audio_map.json");
        let (tx, signals) = signals();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stops = Arc::new(AtomicUsize::new(0));
        let listening = listener(dispatcher_with("hi").await, shutdown_rx, stops);

        tx.send("SIGINT").unwrap();
        let result = shut_down_on_signal(signals, shutdown_tx, listening, &path).await;

        assert!(result.is_ok());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn failed_listener_skips_the_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved_audio_map.json");
        let (tx, signals) = signals();
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let listening: JoinHandle<MessageDispatcher> =
            tokio::spawn(async { panic!("listener crashed") });

        tx.send("SIGINT").unwrap();
        let result = shut_down_on_signal(signals, shutdown_tx, listening, &path).await;

        assert!(result.is_ok());
        assert!(!path.exists());
    }
}
