// Rolling multi-channel time series with reconstructed timestamps
use serde::Serialize;

use super::error::FeedError;
use super::samples::ChannelSamples;
use super::units::{minutes_to_ms, ms_to_s, samples_per_second_to_step_ms};

/// How the timestamps of a series are derived from the sample positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timebase {
    /// Spacing comes from the `samples_per_second` of each payload.
    Live,
    /// Fixed spacing; the axis is snapped to multiples of the interval.
    History { interval_minutes: f64 },
}

/// Timestamps (unix seconds) plus one sample column per channel.
///
/// Every non-empty channel has exactly `timestamps.len()` samples. An empty
/// channel is one the device does not report; it is never padded with zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RollingSeries {
    pub timestamps: Vec<f64>,
    pub samples: Vec<ChannelSamples>,
}

impl RollingSeries {
    pub fn empty(channel_count: usize) -> Self {
        Self {
            timestamps: Vec::new(),
            samples: vec![Vec::new(); channel_count],
        }
    }

    pub fn new(timestamps: Vec<f64>, samples: Vec<ChannelSamples>) -> Self {
        Self { timestamps, samples }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    #[cfg(test)]
    pub fn channel(&self, index: usize) -> &[Option<f64>] {
        self.samples.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append `other` and keep only the newest `capacity` points.
    ///
    /// A channel that is empty in a non-empty series stays empty; a channel
    /// that `other` leaves empty gets gaps so the columns stay aligned.
    pub fn append_then_keep_last(&mut self, other: RollingSeries, capacity: usize) {
        let old_len = self.len();
        let added = other.len();

        if self.samples.len() < other.samples.len() {
            self.samples.resize_with(other.samples.len(), Vec::new);
        }

        let mut incoming = other.samples.into_iter();
        for column in self.samples.iter_mut() {
            let extra = incoming.next().unwrap_or_default();

            if column.is_empty() && old_len > 0 {
                continue;
            }

            if extra.is_empty() {
                if !column.is_empty() {
                    column.resize(old_len + added, None);
                }
            } else {
                column.extend(extra);
            }
        }

        self.timestamps.extend(other.timestamps);
        self.keep_last(capacity);
    }

    /// Give each channel that is empty here but carried by `incoming` a gap
    /// for every point already held, so it is not skipped on append.
    pub fn open_channels_of(&mut self, incoming: &RollingSeries) {
        let len = self.len();
        for (column, extra) in self.samples.iter_mut().zip(&incoming.samples) {
            if column.is_empty() && !extra.is_empty() {
                column.resize(len, None);
            }
        }
    }

    /// Drop the oldest points until at most `capacity` remain.
    pub fn keep_last(&mut self, capacity: usize) {
        let excess = self.len().saturating_sub(capacity);
        if excess == 0 {
            return;
        }

        self.timestamps.drain(..excess);
        for column in self.samples.iter_mut().filter(|c| !c.is_empty()) {
            column.drain(..excess.min(column.len()));
        }
    }
}

/// Timestamps for `count` live samples whose newest one is `offset_ms` old.
///
/// With N samples there are N - 1 gaps of `1 / samples_per_second` seconds.
/// A rate of zero means a single sample without spacing.
pub fn live_timestamps(now_ms: i64, offset_ms: f64, samples_per_second: f64, count: usize) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }

    let newest = now_ms as f64 - offset_ms;
    let step = samples_per_second_to_step_ms(samples_per_second).unwrap_or(0.0);
    let start = newest - (count - 1) as f64 * step;

    (0..count).map(|i| ms_to_s(start + i as f64 * step)).collect()
}

/// Timestamps for `count` history samples spaced `interval_minutes` apart.
///
/// The first timestamp is rounded to the nearest interval boundary so ticks
/// land on whole intervals; this moves the axis by at most half an interval.
pub fn history_timestamps(now_ms: i64, offset_ms: f64, interval_minutes: f64, count: usize) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }

    let step = minutes_to_ms(interval_minutes);
    let unaligned = now_ms as f64 - (count - 1) as f64 * step - offset_ms;
    let start = if step > 0.0 {
        (unaligned / step).round() * step
    } else {
        unaligned
    };

    (0..count).map(|i| ms_to_s(start + i as f64 * step)).collect()
}

impl Timebase {
    /// Timestamps for `count` samples, the newest `offset_ms` old at `now_ms`.
    ///
    /// Several live samples need a positive rate to be spaced; without one
    /// they would all share a timestamp, so the payload is rejected.
    pub fn timestamps(
        &self,
        now_ms: i64,
        offset_ms: f64,
        samples_per_second: Option<f64>,
        count: usize,
    ) -> Result<Vec<f64>, FeedError> {
        match *self {
            Timebase::Live => {
                let rate = samples_per_second.unwrap_or(0.0);
                if count > 1 && samples_per_second_to_step_ms(rate).is_none() {
                    return Err(FeedError::MissingSampleRate { count, rate });
                }
                Ok(live_timestamps(now_ms, offset_ms, rate, count))
            }
            Timebase::History { interval_minutes } => {
                Ok(history_timestamps(now_ms, offset_ms, interval_minutes, count))
            }
        }
    }
}
