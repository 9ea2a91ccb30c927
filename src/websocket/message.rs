use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire envelope used in both directions.
///
/// The broker only requires the `type` discriminator; the payload schema
/// belongs to the application, which decodes it into its own tagged enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Parse an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Build an envelope from an application message tagged with
    /// `#[serde(tag = "type", content = "payload")]`.
    pub fn from_message<T: Serialize>(message: &T) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(message)?)
    }

    /// Re-read the envelope as an application message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

/// A message serialized once and shared by every connection it is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage(Arc<str>);

impl OutboundMessage {
    pub fn encode(envelope: &Envelope) -> Result<Self, serde_json::Error> {
        Ok(Self(Arc::from(serde_json::to_string(envelope)?)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
