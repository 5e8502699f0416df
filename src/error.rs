//! Error taxonomy for message handling and cache persistence.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeakerError {
    #[error("malformed message payload: {0}")]
    Decode(String),

    #[error("missing required field `{field}` for {mode} request")]
    MissingField {
        field: &'static str,
        mode: &'static str,
    },

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("playback of {path} failed: {reason}")]
    Playback { path: PathBuf, reason: String },

    #[error("failed to load synthesis cache from {path}: {reason}")]
    CacheLoad { path: PathBuf, reason: String },

    #[error("failed to persist synthesis cache to {path}: {source}")]
    CachePersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpeakerError {
    /// Short name used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::MissingField { .. } => "missing_field",
            Self::Synthesis(_) => "synthesis",
            Self::Playback { .. } => "playback",
            Self::CacheLoad { .. } => "cache_load",
            Self::CachePersist { .. } => "cache_persist",
        }
    }

    pub(crate) fn playback(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Playback {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for SpeakerError {
    fn from(e: serde_json::Error) -> Self {
        SpeakerError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for SpeakerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            SpeakerError::Synthesis(format!("cannot connect to synthesis backend: {e}"))
        } else if e.is_timeout() {
            SpeakerError::Synthesis("synthesis request timed out".into())
        } else {
            SpeakerError::Synthesis(e.to_string())
        }
    }
}
