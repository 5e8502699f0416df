//! Audio file playback through rodio.
//!
//! The output stream lives on a dedicated `audio-play` thread for the whole
//! process lifetime. `play` hands the file to that thread and waits for the
//! sink to drain, so one file plays at a time.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use async_trait::async_trait;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::SpeakerError;

#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `path` to completion.
    async fn play(&self, path: &Path) -> Result<(), SpeakerError>;
}

struct PlayCommand {
    path: PathBuf,
    done: oneshot::Sender<Result<(), SpeakerError>>,
}

pub struct RodioSink {
    commands: mpsc::Sender<PlayCommand>,
}

impl RodioSink {
    /// Open the output device and start the playback thread. Call once at startup.
    ///
    /// `device` is matched against output device names; "default" or an empty
    /// string selects the system default.
    pub fn initialize(device: &str) -> Result<Self, SpeakerError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlayCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let device_name = device.to_string();

        thread::Builder::new()
            .name("audio-play".into())
            .spawn(move || {
                let stream = match open_stream(&device_name) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                playback_loop(&stream, cmd_rx);
                debug!("Playback thread exiting");
            })
            .map_err(|e| SpeakerError::playback(device, format!("cannot spawn audio thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio output ready (device: {device})");
                Ok(Self { commands: cmd_tx })
            }
            Ok(Err(reason)) => Err(SpeakerError::playback(device, reason)),
            Err(_) => Err(SpeakerError::playback(device, "audio thread exited during startup")),
        }
    }
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, path: &Path) -> Result<(), SpeakerError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(PlayCommand {
                path: path.to_path_buf(),
                done: done_tx,
            })
            .map_err(|_| SpeakerError::playback(path, "audio thread is not running"))?;

        done_rx
            .await
            .map_err(|_| SpeakerError::playback(path, "audio thread stopped during playback"))?
    }
}

fn open_stream(device: &str) -> Result<OutputStream, String> {
    if device.is_empty() || device == "default" {
        return OutputStreamBuilder::open_default_stream()
            .map_err(|e| format!("Failed to open audio output: {e}"));
    }

    let host = rodio::cpal::default_host();
    let found = host
        .output_devices()
        .map_err(|e| format!("Failed to list output devices: {e}"))?
        .find(|d| d.name().map(|n| n == device).unwrap_or(false))
        .ok_or_else(|| format!("Output device {device:?} not found"))?;

    OutputStreamBuilder::from_device(found)
        .and_then(|builder| builder.open_stream())
        .map_err(|e| format!("Failed to open audio output {device:?}: {e}"))
}

fn playback_loop(stream: &OutputStream, commands: mpsc::Receiver<PlayCommand>) {
    // Ends once every RodioSink handle is dropped.
    while let Ok(PlayCommand { path, done }) = commands.recv() {
        let result = play_file(stream, &path);
        if done.send(result).is_err() {
            warn!("Playback of {} finished after its caller went away", path.display());
        }
    }
}

fn play_file(stream: &OutputStream, path: &Path) -> Result<(), SpeakerError> {
    let file = File::open(path).map_err(|e| SpeakerError::playback(path, e))?;
    let source = Decoder::new(BufReader::new(file))
        .map_err(|e| SpeakerError::playback(path, format!("unsupported audio: {e}")))?;

    let t0 = Instant::now();
    let sink = Sink::connect_new(stream.mixer());
    sink.append(source);
    sink.sleep_until_end();
    debug!("Played {} in {:.1}s", path.display(), t0.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn play_without_audio_thread_is_a_playback_error() {
        let (commands, rx) = mpsc::channel();
        drop(rx);
        let sink = RodioSink { commands };

        let err = sink.play(Path::new("/audio/beep.wav")).await.unwrap_err();
        assert_eq!(err.kind(), "playback");
        assert!(err.to_string().contains("/audio/beep.wav"));
    }

    #[tokio::test]
    async fn reply_from_audio_thread_is_returned() {
        let (commands, rx) = mpsc::channel::<PlayCommand>();
        let worker = thread::spawn(move || {
            let cmd = rx.recv().unwrap();
            let result = Err(SpeakerError::playback(&cmd.path, "device busy"));
            cmd.done.send(result).unwrap();
        });
        let sink = RodioSink { commands };

        let err = sink.play(Path::new("a.wav")).await.unwrap_err();
        assert!(err.to_string().contains("device busy"));
        worker.join().unwrap();
    }
}
