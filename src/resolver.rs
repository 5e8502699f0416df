//! Turns a speech request into the audio file to play.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::cache::SynthesisCache;
use crate::error::SpeakerError;
use crate::request::SpeechRequest;
use crate::synthesizer::SpeechSynthesizer;

pub struct AudioResolver {
    working_dir: PathBuf,
    saved_audios_dir: PathBuf,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl AudioResolver {
    pub fn new(
        working_dir: PathBuf,
        saved_audios_dir: PathBuf,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            working_dir,
            saved_audios_dir,
            synthesizer,
        }
    }

    /// Resolve `request` to a file path.
    ///
    /// File requests map to `saved_audios_dir/file_location` without touching
    /// the disk. Text requests are served from `cache` when possible;
    /// otherwise the synthesizer writes a new file into `working_dir` and the
    /// result is recorded in `cache`.
    pub async fn resolve(
        &self,
        request: &SpeechRequest,
        cache: &mut SynthesisCache,
    ) -> Result<PathBuf, SpeakerError> {
        if request.play_from_file {
            info!("Received request to play an audio file");
            let location = request.file_location()?;
            return Ok(self.saved_audios_dir.join(location));
        }

        info!("Received request to play a text message");
        let key = request.cache_key()?;
        if let Some(path) = cache.lookup(&key) {
            info!("Cache hit for {key:?}: {path}");
            return Ok(PathBuf::from(path));
        }

        let path = self
            .synthesizer
            .synthesize(request, &self.working_dir)
            .await?;
        cache.insert(key, path.to_string_lossy().into_owned());
        Ok(path)
    }
}
