// Rolling sample buffer: bootstrap hydration plus batched delta merges
use crate::domain::error::FeedError;
use crate::domain::samples::{fit_channel_count, Delta, SampleBatch};
use crate::domain::series::{RollingSeries, Timebase};

pub const DEFAULT_CAPACITY: usize = 720;
pub const DEFAULT_MERGE_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferSettings {
    /// Maximum number of points kept in the series.
    pub capacity: usize,
    /// Pending points required before they are merged into the series.
    pub merge_threshold: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// No bootstrap yet; the delta was dropped.
    Uninitialized,
    /// Queued; holds the number of pending points.
    Pending(usize),
    /// Pending points were merged into the series.
    Merged,
}

#[derive(Debug)]
pub struct RollingBuffer {
    timebase: Timebase,
    channel_count: usize,
    settings: BufferSettings,
    series: Option<RollingSeries>,
    pending: RollingSeries,
}

impl RollingBuffer {
    pub fn new(timebase: Timebase, channel_count: usize, settings: BufferSettings) -> Self {
        let settings = BufferSettings {
            capacity: settings.capacity.max(1),
            merge_threshold: settings.merge_threshold.max(1),
        };

        Self {
            timebase,
            channel_count,
            settings,
            series: None,
            pending: RollingSeries::empty(channel_count),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.series.is_some()
    }

    /// Materialized series, `None` until the first hydrate.
    pub fn read(&self) -> Option<&RollingSeries> {
        self.series.as_ref()
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Replace everything with a bootstrap snapshot taken at `now_ms`.
    /// On error the previous state is kept.
    pub fn hydrate(&mut self, batch: SampleBatch, now_ms: i64) -> Result<(), FeedError> {
        let channels = fit_channel_count(batch.channels, self.channel_count)?;
        let count = channels.iter().map(Vec::len).max().unwrap_or(0);
        let timestamps = self
            .timebase
            .timestamps(now_ms, batch.offset_ms, batch.samples_per_second, count)?;

        let mut series = RollingSeries::new(timestamps, channels);
        series.keep_last(self.settings.capacity);

        tracing::debug!(
            "Hydrated {:?} buffer with {} points",
            self.timebase,
            series.len()
        );

        self.series = Some(series);
        self.pending = RollingSeries::empty(self.channel_count);
        Ok(())
    }

    /// Queue a delta received at `now_ms` and merge once enough points are pending.
    pub fn append(&mut self, delta: Delta, now_ms: i64) -> Result<AppendOutcome, FeedError> {
        let Some(series) = self.series.as_mut() else {
            return Ok(AppendOutcome::Uninitialized);
        };

        let channels = fit_channel_count(delta.channels, self.channel_count)?;
        let count = channels.iter().map(Vec::len).max().unwrap_or(0);
        if count == 0 {
            return Ok(AppendOutcome::Pending(self.pending.len()));
        }

        let timestamps = self
            .timebase
            .timestamps(now_ms, 0.0, delta.samples_per_second, count)?;
        let incoming = RollingSeries::new(timestamps, channels);
        self.pending.open_channels_of(&incoming);
        self.pending.append_then_keep_last(incoming, self.settings.capacity);

        if self.pending.len() < self.settings.merge_threshold {
            return Ok(AppendOutcome::Pending(self.pending.len()));
        }

        let pending = std::mem::replace(&mut self.pending, RollingSeries::empty(self.channel_count));
        series.append_then_keep_last(pending, self.settings.capacity);

        if let Timebase::History { .. } = self.timebase {
            // history samples carry no age of their own; re-anchor the whole axis at receipt
            series.timestamps = self.timebase.timestamps(now_ms, 0.0, None, series.len())?;
        }

        Ok(AppendOutcome::Merged)
    }

    /// Forget all data; the next delta triggers a new bootstrap.
    pub fn reset(&mut self) {
        self.series = None;
        self.pending = RollingSeries::empty(self.channel_count);
    }
}
