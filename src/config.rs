//! Configuration management for mqtt-speaker-rs.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults so a partial file is enough to get started.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host, optionally with `:port`.
    pub host: String,
    pub port: u16,
    pub topic_name: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_MQTT_PORT,
            topic_name: "speech".into(),
            client_id: format!("mqtt-speaker-{}", std::process::id()),
            keep_alive_secs: 60,
            qos: 0,
        }
    }
}

impl MqttConfig {
    /// Split `host` into host and port. A port embedded in `host` wins over `port`.
    pub fn broker_address(&self) -> (String, u16) {
        match self.host.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (self.host.clone(), self.port),
            },
            _ => (self.host.clone(), self.port),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Directory synthesized audio is written to.
    pub working_dir: PathBuf,
    /// JSON file holding the text → audio file map.
    pub saved_audio_map: PathBuf,
    /// Output device name; "default" picks the system default.
    pub audio_device: String,
    /// Base directory for `play_from_file` requests.
    pub saved_audios_dir: PathBuf,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("audio"),
            saved_audio_map: PathBuf::from("saved_audio_map.json"),
            audio_device: "default".into(),
            saved_audios_dir: PathBuf::from("saved_audios"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisBackend {
    Http,
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub backend: SynthesisBackend,

    // HTTP backend
    pub endpoint: String,
    pub timeout_secs: u64,
    pub voice_id: String,
    pub language_code: Option<String>,
    pub engine: Option<String>,
    pub output_format: String,
    pub sample_rate: Option<String>,
    pub text_type: String,

    // Command backend
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            backend: SynthesisBackend::Http,
            endpoint: "http://localhost:5002/v1/speech".into(),
            timeout_secs: 30,
            voice_id: "Joanna".into(),
            language_code: None,
            engine: None,
            output_format: "mp3".into(),
            sample_rate: None,
            text_type: "text".into(),
            command: "espeak-ng".into(),
            args: vec!["-w".into(), "{output}".into(), "{text}".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Daily-rotated log file. Logs go to stderr only when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub speech: SpeechConfig,
    pub synthesis: SynthesisConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/mqtt-speaker/config.yaml
    /// 3. /etc/mqtt-speaker/config.yaml
    ///
    /// Runs before the subscriber is installed, so problems are returned as
    /// warnings for the caller to log.
    pub fn load(path: Option<&Path>) -> (Self, Vec<String>) {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/mqtt-speaker/config.yaml")),
                Some(PathBuf::from("/etc/mqtt-speaker/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            return (Self::default(), vec!["No config file found, using defaults".into()]);
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(mut config) => {
                    let warnings = config.check();
                    (config, warnings)
                }
                Err(e) => (
                    Self::default(),
                    vec![format!("Failed to parse {}: {e}, using defaults", config_path.display())],
                ),
            },
            Err(e) => (
                Self::default(),
                vec![format!("Failed to read {}: {e}, using defaults", config_path.display())],
            ),
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }

    /// Reset out-of-range values and flag settings that will misbehave.
    pub fn check(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.mqtt.qos > 2 {
            warnings.push(format!(
                "mqtt.qos must be 0, 1 or 2 (got {}), using 0",
                self.mqtt.qos
            ));
            self.mqtt.qos = 0;
        }

        // The event loop is not polled while a message is synthesized and
        // played, and brokers drop clients silent for 1.5x the keep-alive.
        if self.mqtt.keep_alive_secs.saturating_mul(3) / 2 <= self.synthesis.timeout_secs {
            warnings.push(format!(
                "mqtt.keep_alive_secs ({}) is short for synthesis.timeout_secs ({}); \
                 the broker may disconnect during slow synthesis",
                self.mqtt.keep_alive_secs, self.synthesis.timeout_secs
            ));
        }

        warnings
    }

    pub fn log_summary(&self) {
        let (host, port) = self.mqtt.broker_address();
        info!(
            "Config: broker={host}:{port} topic={} working_dir={} cache={} device={} saved_audios={}",
            self.mqtt.topic_name,
            self.speech.working_dir.display(),
            self.speech.saved_audio_map.display(),
            self.speech.audio_device,
            self.speech.saved_audios_dir.display(),
        );
    }
}
