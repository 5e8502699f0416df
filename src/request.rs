//! Inbound speech request, one JSON object per MQTT message.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::error::SpeakerError;

/// Keys starting with this character are JSON-encoded; all others are bare text.
const ENCODED_KEY_PREFIX: char = '[';

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SpeechRequest {
    #[serde(default, deserialize_with = "null_as_false")]
    pub play_from_file: bool,
    pub file_location: Option<String>,
    pub text: Option<String>,
    #[serde(flatten)]
    pub params: SynthesisParams,
}

/// Per-request overrides of the configured synthesis defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SynthesisParams {
    pub voice_id: Option<String>,
    pub language_code: Option<String>,
    pub engine: Option<String>,
    pub output_format: Option<String>,
    pub sample_rate: Option<String>,
    pub text_type: Option<String>,
}

fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

impl SynthesisParams {
    /// Explicitly set parameters in a fixed order.
    fn explicit(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("engine", &self.engine),
            ("language_code", &self.language_code),
            ("output_format", &self.output_format),
            ("sample_rate", &self.sample_rate),
            ("text_type", &self.text_type),
            ("voice_id", &self.voice_id),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|v| (name, v)))
    }
}

impl SpeechRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, SpeakerError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| SpeakerError::Decode(format!("payload is not UTF-8: {e}")))?;
        Ok(serde_json::from_str(text)?)
    }

    /// Text to synthesize. Missing or blank text is rejected.
    pub fn speech_text(&self) -> Result<&str, SpeakerError> {
        match self.text.as_deref() {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(SpeakerError::MissingField {
                field: "text",
                mode: "text-to-speech",
            }),
        }
    }

    pub fn file_location(&self) -> Result<&str, SpeakerError> {
        self.file_location
            .as_deref()
            .ok_or(SpeakerError::MissingField {
                field: "file_location",
                mode: "play-from-file",
            })
    }

    /// Cache key.
    ///
    /// A request without parameters is keyed by its bare text, the format
    /// older cache files use. With parameters the key is the JSON array
    /// `[text, {name: value, ...}]`. Text that itself starts with `[` is
    /// encoded as `[text]`, so no bare key can be mistaken for an encoded one.
    pub fn cache_key(&self) -> Result<String, SpeakerError> {
        let text = self.speech_text()?;
        let params: BTreeMap<&str, &str> = self.params.explicit().collect();

        let key = if !params.is_empty() {
            serde_json::to_string(&(text, &params))?
        } else if text.starts_with(ENCODED_KEY_PREFIX) {
            serde_json::to_string(&[text])?
        } else {
            text.to_string()
        };
        Ok(key)
    }
}
