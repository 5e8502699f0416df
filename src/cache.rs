//! Persistent text → synthesized-audio map.
//!
//! Loaded once at startup (a missing or corrupt file is fatal), grown in
//! memory on every synthesis miss, and written back wholesale on shutdown.
//! Entries written since the last clean shutdown are lost if the process is
//! killed; the audio files themselves stay on disk.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::SpeakerError;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SynthesisCache {
    entries: HashMap<String, String>,
}

impl SynthesisCache {
    /// Read the cache file. The file must exist and hold a JSON object of strings.
    pub fn load(path: &Path) -> Result<Self, SpeakerError> {
        let load_err = |reason: String| SpeakerError::CacheLoad {
            path: path.to_path_buf(),
            reason,
        };

        let contents = fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let entries: HashMap<String, String> =
            serde_json::from_str(&contents).map_err(|e| load_err(e.to_string()))?;

        info!("Loaded {} previously synthesized messages from {}", entries.len(), path.display());
        Ok(Self { entries })
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, path: impl Into<String>) {
        let key = key.into();
        let path = path.into();
        debug!("Caching synthesized audio {path} for key {key:?}");
        self.entries.insert(key, path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the whole map to `path`.
    ///
    /// The JSON goes to a sibling temp file first and is renamed into place,
    /// so readers only ever see the old or the new full content.
    pub fn persist(&self, path: &Path) -> Result<(), SpeakerError> {
        let persist_err = |source: std::io::Error| SpeakerError::CachePersist {
            path: path.to_path_buf(),
            source,
        };

        let tmp_path = temp_path_for(path);
        {
            let file = fs::File::create(&tmp_path).map_err(persist_err)?;
            let mut writer = BufWriter::new(file);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
            self.entries
                .serialize(&mut ser)
                .map_err(|e| persist_err(e.into()))?;
            writer.write_all(b"\n").map_err(persist_err)?;
            let file = writer.into_inner().map_err(|e| persist_err(e.into_error()))?;
            file.sync_all().map_err(persist_err)?;
        }

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(persist_err(e));
        }

        info!("Saved {} synthesized messages to {}", self.entries.len(), path.display());
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "saved_audio_map.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");

        let mut cache = SynthesisCache::default();
        cache.insert("hello world", "/tmp/audio/a.mp3");
        cache.insert(r#"["good night",{"voice_id":"Brian"}]"#, "/tmp/audio/b.mp3");
        cache.persist(&path).unwrap();

        let reloaded = SynthesisCache::load(&path).unwrap();
        assert_eq!(reloaded, cache);
        assert_eq!(reloaded.lookup("hello world"), Some("/tmp/audio/a.mp3"));
        assert!(!dir.path().join("map.json.tmp").exists());
    }

    #[test]
    fn persist_overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        fs::write(&path, r#"{"old": "old.wav", "extra": "junk"}"#).unwrap();

        let mut cache = SynthesisCache::load(&path).unwrap();
        cache.insert("new", "new.wav");
        cache.persist(&path).unwrap();

        let reloaded = SynthesisCache::load(&path).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.lookup("new"), Some("new.wav"));
        assert_eq!(reloaded.lookup("old"), Some("old.wav"));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SynthesisCache::load(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.kind(), "cache_load");
    }

    #[test]
    fn corrupt_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        fs::write(&path, "{\"hello\": ").unwrap();
        assert!(matches!(
            SynthesisCache::load(&path),
            Err(SpeakerError::CacheLoad { .. })
        ));

        fs::write(&path, r#"["not", "an", "object"]"#).unwrap();
        assert!(matches!(
            SynthesisCache::load(&path),
            Err(SpeakerError::CacheLoad { .. })
        ));
    }

    #[test]
    fn lookup_is_exact() {
        let mut cache = SynthesisCache::default();
        cache.insert("Hello", "a.wav");
        assert_eq!(cache.lookup("Hello"), Some("a.wav"));
        assert_eq!(cache.lookup("hello"), None);
        assert_eq!(cache.lookup("Hello "), None);
    }

    #[test]
    fn persist_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("map.json");
        let err = SynthesisCache::default().persist(&path).unwrap_err();
        assert_eq!(err.kind(), "cache_persist");
    }
}
