use crate::error::RelayError;
use serde::Deserialize;

/// Typed control messages carried on the text side of the channel.
///
/// Unknown `type` tags are accepted and mapped to [`ControlMessage::Unknown`];
/// anything that is not a tagged JSON object is a [`RelayError::MalformedMessage`].
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Base64-encoded PCM fragment delivered in-band.
    Audio { data: String },
    /// Recognized speech text for display.
    Transcript { text: String },
    /// Server-side failure notice.
    Error { message: String },
    #[serde(other)]
    Unknown,
}

pub fn parse(raw: &str) -> Result<ControlMessage, RelayError> {
    serde_json::from_str(raw).map_err(|e| RelayError::MalformedMessage(e.to_string()))
}
