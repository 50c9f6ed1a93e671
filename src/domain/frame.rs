// Render frames handed to chart sinks
use serde::{Deserialize, Serialize};
use std::fmt;

use super::series::RollingSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartView {
    Live,
    History,
    Prices,
}

impl ChartView {
    /// Bootstrap endpoint suffix, e.g. `soc/live`.
    pub fn bootstrap_suffix(&self) -> &'static str {
        match self {
            ChartView::Live => "live",
            ChartView::History => "history",
            ChartView::Prices => "prices",
        }
    }

    /// Event name of the incremental push for this view.
    pub fn delta_event(&self) -> &'static str {
        match self {
            ChartView::Live => "live_samples",
            ChartView::History => "history_samples",
            ChartView::Prices => "prices",
        }
    }
}

impl fmt::Display for ChartView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bootstrap_suffix())
    }
}

/// Fixed bounds and minimum span for the value axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct YAxisSettings {
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub y_diff_min: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameChannel {
    pub label: String,
    pub values: Vec<Option<f64>>,
}

/// Everything a chart widget needs to draw one view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFrame {
    pub feature: String,
    pub view: ChartView,
    pub timestamps: Vec<f64>,
    pub channels: Vec<FrameChannel>,
    pub y_range: YRange,
}

impl RenderFrame {
    pub fn from_series(
        feature: &str,
        view: ChartView,
        series: &RollingSeries,
        labels: &[String],
        y_axis: &YAxisSettings,
    ) -> Self {
        let channels = series
            .samples
            .iter()
            .enumerate()
            .map(|(i, values)| FrameChannel {
                label: channel_label(labels, i),
                values: values.clone(),
            })
            .collect();

        Self {
            feature: feature.to_string(),
            view,
            timestamps: series.timestamps.clone(),
            channels,
            y_range: y_range(&series.samples, y_axis),
        }
    }
}

/// Display label for channel `index`, falling back to its position.
pub fn channel_label(labels: &[String], index: usize) -> String {
    labels
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("Channel {}", index + 1))
}

/// Value range over every non-null sample, widened to `y_diff_min`.
///
/// Configured bounds are always included. A widened range does not dip below
/// zero when all data is non-negative.
pub fn y_range(channels: &[Vec<Option<f64>>], settings: &YAxisSettings) -> YRange {
    let mut y_min = settings.y_min;
    let mut y_max = settings.y_max;

    for value in channels.iter().flatten().flatten().copied() {
        if y_min.is_none_or(|min| value < min) {
            y_min = Some(value);
        }
        if y_max.is_none_or(|max| value > max) {
            y_max = Some(value);
        }
    }

    let (mut min, mut max) = match (y_min, y_max) {
        (None, None) => (0.0, 0.0),
        (Some(min), None) => (min, min),
        (None, Some(max)) => (max, max),
        (Some(min), Some(max)) => (min, max),
    };

    if let Some(diff_min) = settings.y_diff_min {
        if max - min < diff_min {
            let center = min + (max - min) / 2.0;
            let widened_min = (center - diff_min / 2.0).floor();
            let widened_max = (center + diff_min / 2.0).ceil();

            if widened_min < 0.0 && min >= 0.0 {
                min = 0.0;
                max = diff_min;
            } else {
                min = widened_min;
                max = widened_max;
            }
        }
    }

    YRange { min, max }
}
