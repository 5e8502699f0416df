//! Text-to-speech backends that turn a request into an audio file on disk.
//!
//! - `HttpSynthesizer`: POSTs the text to a speech API and saves the body.
//! - `CommandSynthesizer`: runs a local TTS program (espeak-ng, piper, ...).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{SynthesisBackend, SynthesisConfig};
use crate::error::SpeakerError;
use crate::request::SpeechRequest;

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize the request's text into a new file inside `out_dir`.
    async fn synthesize(
        &self,
        request: &SpeechRequest,
        out_dir: &Path,
    ) -> Result<PathBuf, SpeakerError>;

    fn name(&self) -> &'static str;
}

pub fn from_config(config: &SynthesisConfig) -> Arc<dyn SpeechSynthesizer> {
    match config.backend {
        SynthesisBackend::Http => Arc::new(HttpSynthesizer::new(config.clone())),
        SynthesisBackend::Command => Arc::new(CommandSynthesizer::new(config.clone())),
    }
}

/// File extension for a synthesis output format.
fn extension_for(format: &str) -> &str {
    match format {
        "ogg_vorbis" => "ogg",
        "" => "mp3",
        other => other,
    }
}

/// Fresh output path inside `out_dir`, named by creation time.
fn output_path(out_dir: &Path, extension: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S-%6f");
    out_dir.join(format!("{stamp}.{extension}"))
}

async fn ensure_dir(dir: &Path) -> Result<(), SpeakerError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        SpeakerError::Synthesis(format!("cannot create {}: {e}", dir.display()))
    })
}

// --- HTTP backend ---

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SynthesizeSpeechBody<'a> {
    text: &'a str,
    voice_id: &'a str,
    output_format: &'a str,
    text_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<&'a str>,
}

pub struct HttpSynthesizer {
    config: SynthesisConfig,
    client: Client,
}

impl HttpSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { config, client }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        request: &SpeechRequest,
        out_dir: &Path,
    ) -> Result<PathBuf, SpeakerError> {
        let text = request.speech_text()?;
        let params = &request.params;
        let output_format = params
            .output_format
            .as_deref()
            .unwrap_or(&self.config.output_format);

        let body = SynthesizeSpeechBody {
            text,
            voice_id: params.voice_id.as_deref().unwrap_or(&self.config.voice_id),
            output_format,
            text_type: params.text_type.as_deref().unwrap_or(&self.config.text_type),
            engine: params.engine.as_deref().or(self.config.engine.as_deref()),
            language_code: params
                .language_code
                .as_deref()
                .or(self.config.language_code.as_deref()),
            sample_rate: params
                .sample_rate
                .as_deref()
                .or(self.config.sample_rate.as_deref()),
        };

        debug!("Requesting synthesis of {} chars from {}", text.len(), self.config.endpoint);
        let t0 = Instant::now();

        let resp = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(SpeakerError::Synthesis(format!(
                "backend returned status {status}: {}",
                detail.trim()
            )));
        }

        let audio = resp.bytes().await?;
        if audio.is_empty() {
            return Err(SpeakerError::Synthesis("backend returned no audio".into()));
        }

        ensure_dir(out_dir).await?;
        let path = output_path(out_dir, extension_for(output_format));
        tokio::fs::write(&path, &audio).await.map_err(|e| {
            SpeakerError::Synthesis(format!("cannot write {}: {e}", path.display()))
        })?;

        info!(
            "Synthesized {} bytes to {} ({:.0}ms)",
            audio.len(),
            path.display(),
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(path)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// --- Command backend ---

pub struct CommandSynthesizer {
    config: SynthesisConfig,
}

impl CommandSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    /// Substitute `{text}`, `{output}` and `{voice}` in the configured arguments.
    fn render_args(&self, text: &str, output: &Path, voice: &str) -> Vec<String> {
        let output = output.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{output}", &output)
                    .replace("{voice}", voice)
                    .replace("{text}", text)
            })
            .collect()
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(
        &self,
        request: &SpeechRequest,
        out_dir: &Path,
    ) -> Result<PathBuf, SpeakerError> {
        let text = request.speech_text()?;
        let voice = request
            .params
            .voice_id
            .as_deref()
            .unwrap_or(&self.config.voice_id);

        ensure_dir(out_dir).await?;
        let path = output_path(out_dir, "wav");
        let args = self.render_args(text, &path, voice);
        let t0 = Instant::now();

        let mut child = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SpeakerError::Synthesis(format!("failed to spawn {}: {e}", self.config.command))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // Programs that take the text as an argument may exit without reading stdin.
            if let Err(e) = stdin.write_all(text.as_bytes()).await {
                debug!("{} did not read stdin: {e}", self.config.command);
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            SpeakerError::Synthesis(format!("{} failed: {e}", self.config.command))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeakerError::Synthesis(format!(
                "{} exited with {}: {}",
                self.config.command,
                output.status,
                stderr.trim()
            )));
        }

        if tokio::fs::metadata(&path).await.is_err() {
            return Err(SpeakerError::Synthesis(format!(
                "{} produced no file at {}",
                self.config.command,
                path.display()
            )));
        }

        info!(
            "Synthesized {} with {} ({:.0}ms)",
            path.display(),
            self.config.command,
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(path)
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
