// Sample payloads: bootstrap batches and incremental deltas
use serde::Deserialize;
use serde_json::Value;

use super::error::FeedError;

/// Samples of one channel. `None` marks a gap (the device reports `null`
/// for history slots it pre-filled after a reboot).
pub type ChannelSamples = Vec<Option<f64>>;

/// The `samples` field as sent by the firmware.
///
/// Multi-value features send one array per channel and `null` for a channel
/// that is not configured. Single-value features may send a flat array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSamples {
    Channels(Vec<Option<Vec<Option<f64>>>>),
    Single(Vec<Option<f64>>),
}

impl RawSamples {
    fn into_channels(self) -> Vec<ChannelSamples> {
        match self {
            RawSamples::Channels(channels) => channels.into_iter().map(Option::unwrap_or_default).collect(),
            RawSamples::Single(samples) => vec![samples],
        }
    }
}

/// Body of `<feature>/live` and `<feature>/history`.
#[derive(Debug, Deserialize)]
struct BatchPayload {
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    samples_per_second: Option<f64>,
    #[serde(default)]
    samples: Option<RawSamples>,
}

/// Payload of `<feature>/live_samples` and `<feature>/history_samples`.
#[derive(Debug, Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    samples_per_second: Option<f64>,
    #[serde(default)]
    samples: Option<RawSamples>,
}

/// A bootstrap snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Age of the newest sample in milliseconds at receipt time.
    pub offset_ms: f64,
    /// Only present for live snapshots.
    pub samples_per_second: Option<f64>,
    pub channels: Vec<ChannelSamples>,
}

impl SampleBatch {
    pub fn from_json(body: &str) -> Result<Self, FeedError> {
        let payload: BatchPayload = serde_json::from_str(body)?;

        if payload.offset < 0.0 || !payload.offset.is_finite() {
            return Err(FeedError::NegativeOffset(payload.offset));
        }

        let channels = payload.samples.map(RawSamples::into_channels).unwrap_or_default();
        common_length(&channels)?;

        Ok(Self {
            offset_ms: payload.offset,
            samples_per_second: payload.samples_per_second,
            channels,
        })
    }

    pub fn sample_count(&self) -> usize {
        longest(&self.channels)
    }
}

/// An incremental push. Its newest sample is implicitly "now".
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub samples_per_second: Option<f64>,
    pub channels: Vec<ChannelSamples>,
}

impl Delta {
    pub fn from_payload(payload: &Value) -> Result<Self, FeedError> {
        let payload = DeltaPayload::deserialize(payload)?;
        let channels = payload.samples.map(RawSamples::into_channels).unwrap_or_default();
        common_length(&channels)?;

        Ok(Self {
            samples_per_second: payload.samples_per_second,
            channels,
        })
    }

    pub fn sample_count(&self) -> usize {
        longest(&self.channels)
    }
}

/// Length shared by all non-empty channels, 0 if every channel is empty.
pub fn common_length(channels: &[ChannelSamples]) -> Result<usize, FeedError> {
    let mut expected: Option<usize> = None;

    for (channel, samples) in channels.iter().enumerate() {
        if samples.is_empty() {
            continue;
        }

        match expected {
            None => expected = Some(samples.len()),
            Some(len) if len != samples.len() => {
                return Err(FeedError::ChannelLengthMismatch {
                    channel,
                    expected: len,
                    actual: samples.len(),
                });
            }
            Some(_) => {}
        }
    }

    Ok(expected.unwrap_or(0))
}

fn longest(channels: &[ChannelSamples]) -> usize {
    channels.iter().map(Vec::len).max().unwrap_or(0)
}

/// Pad with empty channels up to `count`. More channels than configured is
/// a shape error.
pub fn fit_channel_count(mut channels: Vec<ChannelSamples>, count: usize) -> Result<Vec<ChannelSamples>, FeedError> {
    if channels.len() > count {
        return Err(FeedError::ChannelCountMismatch {
            expected: count,
            actual: channels.len(),
        });
    }
    channels.resize_with(count, Vec::new);
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_live_batch() {
        let batch = SampleBatch::from_json(
            r#"{"offset":2000,"samples_per_second":1.0,"samples":[[1,2,3],[4,5,6],[]]}"#,
        )
        .unwrap();

        assert_eq!(batch.offset_ms, 2000.0);
        assert_eq!(batch.samples_per_second, Some(1.0));
        assert_eq!(batch.channels.len(), 3);
        assert_eq!(batch.channels[1], vec![Some(4.0), Some(5.0), Some(6.0)]);
        assert!(batch.channels[2].is_empty());
        assert_eq!(batch.sample_count(), 3);
    }

    #[test]
    fn test_null_channel_becomes_empty() {
        let batch = SampleBatch::from_json(r#"{"offset":0,"samples":[[1,2],[3,4],null]}"#).unwrap();
        assert_eq!(batch.channels.len(), 3);
        assert!(batch.channels[2].is_empty());
        assert_eq!(batch.samples_per_second, None);
    }

    #[test]
    fn test_null_samples_are_gaps() {
        let batch = SampleBatch::from_json(r#"{"offset":0,"samples":[[null,null,7]]}"#).unwrap();
        assert_eq!(batch.channels[0], vec![None, None, Some(7.0)]);
    }

    #[test]
    fn test_flat_samples_are_one_channel() {
        let batch = SampleBatch::from_json(r#"{"offset":10,"samples":[5,6]}"#).unwrap();
        assert_eq!(batch.channels, vec![vec![Some(5.0), Some(6.0)]]);
    }

    #[test]
    fn test_missing_samples() {
        let batch = SampleBatch::from_json(r#"{"offset":0,"samples":null}"#).unwrap();
        assert!(batch.channels.is_empty());
        assert_eq!(batch.sample_count(), 0);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let err = SampleBatch::from_json(r#"{"offset":0,"samples":[[1,2,3],[1,2]]}"#).unwrap_err();
        assert!(matches!(
            err,
            FeedError::ChannelLengthMismatch {
                channel: 1,
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_negative_offset_is_rejected() {
        let err = SampleBatch::from_json(r#"{"offset":-5,"samples":[[1]]}"#).unwrap_err();
        assert!(matches!(err, FeedError::NegativeOffset(_)));
    }

    #[test]
    fn test_delta_from_payload() {
        let delta = Delta::from_payload(&json!({"samples_per_second": 2.5, "samples": [[10], [null], null]})).unwrap();
        assert_eq!(delta.samples_per_second, Some(2.5));
        assert_eq!(delta.channels, vec![vec![Some(10.0)], vec![None], vec![]]);
        assert_eq!(delta.sample_count(), 1);
    }

    #[test]
    fn test_delta_with_wrong_shape() {
        assert!(Delta::from_payload(&json!({"samples": "nope"})).is_err());
        assert!(Delta::from_payload(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_fit_channel_count() {
        let fitted = fit_channel_count(vec![vec![Some(1.0)]], 3).unwrap();
        assert_eq!(fitted.len(), 3);
        assert!(fitted[1].is_empty() && fitted[2].is_empty());

        let err = fit_channel_count(vec![vec![], vec![], vec![]], 2).unwrap_err();
        assert!(matches!(err, FeedError::ChannelCountMismatch { expected: 2, actual: 3 }));
    }
}
