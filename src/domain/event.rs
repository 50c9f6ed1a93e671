// Push events as delivered by the device
use serde::Deserialize;
use serde_json::Value;

use super::error::FeedError;

/// One pushed event: `{"topic": "soc/live_samples", "payload": {...}}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventFrame {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventFrame {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Decode a single line of the event stream.
    /// Accepts bare JSON lines as well as SSE `data:` lines.
    pub fn from_line(line: &str) -> Result<Self, FeedError> {
        let line = line.trim();
        let json = line.strip_prefix("data:").map(str::trim_start).unwrap_or(line);
        Ok(serde_json::from_str(json)?)
    }

    /// Split `soc/live_samples` into (`soc`, `live_samples`).
    pub fn split_topic(&self) -> Option<(&str, &str)> {
        self.topic.rsplit_once('/')
    }
}
