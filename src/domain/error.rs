// Errors on the sample data path
use thiserror::Error;

use super::frame::ChartView;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("channel {channel} has {actual} samples, expected {expected}")]
    ChannelLengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("payload carries {actual} channels, feed is configured for {expected}")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("{count} live samples at {rate} samples per second cannot be spaced")]
    MissingSampleRate { count: usize, rate: f64 },

    #[error("negative sample offset {0} ms")]
    NegativeOffset(f64),

    #[error("view {0} is not part of this chart")]
    UnknownView(ChartView),

    #[error("device request failed: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::MalformedPayload(e.to_string())
    }
}

/// Error returned from user-initiated device commands.
/// Its display text is meant to be shown inline next to the control.
#[derive(Debug, Error)]
#[error("{message}: {detail}")]
pub struct CommandError {
    pub message: String,
    pub detail: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: detail.into(),
        }
    }
}
