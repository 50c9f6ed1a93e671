// Configuration loading - config/dashboard.toml plus WARP_ environment overrides
use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::application::feature_feed::FeatureSettings;
use crate::application::price_feed::PriceSettings;
use crate::application::rolling_buffer::{BufferSettings, DEFAULT_CAPACITY, DEFAULT_MERGE_THRESHOLD};
use crate::domain::frame::{ChartView, YAxisSettings};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub device: DeviceConfig,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub features: Vec<FeatureConfig>,
    #[serde(default)]
    pub prices: Option<PriceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    pub base_url: String,
    #[serde(default = "default_events_path")]
    pub events_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: usize,
    #[serde(default = "default_history_merge_threshold")]
    pub history_merge_threshold: usize,
    #[serde(default = "default_history_interval_minutes")]
    pub history_interval_minutes: f64,
    #[serde(default = "default_bootstrap_retry_ms")]
    pub bootstrap_retry_ms: u64,
    #[serde(default = "default_true")]
    pub initially_visible: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            merge_threshold: default_merge_threshold(),
            history_merge_threshold: default_history_merge_threshold(),
            history_interval_minutes: default_history_interval_minutes(),
            bootstrap_retry_ms: default_bootstrap_retry_ms(),
            initially_visible: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeatureConfig {
    pub name: String,
    pub labels: Vec<String>,
    #[serde(default = "default_view")]
    pub default_view: ChartView,
    pub capacity: Option<usize>,
    pub merge_threshold: Option<usize>,
    pub history_interval_minutes: Option<f64>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub y_diff_min: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PriceConfig {
    #[serde(default = "default_price_label")]
    pub label: String,
    pub y_diff_min: Option<f64>,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_events_path() -> String {
    "/events".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_merge_threshold() -> usize {
    DEFAULT_MERGE_THRESHOLD
}

fn default_history_merge_threshold() -> usize {
    1
}

fn default_history_interval_minutes() -> f64 {
    4.0
}

fn default_bootstrap_retry_ms() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_view() -> ChartView {
    ChartView::History
}

fn default_price_label() -> String {
    "Electricity price".to_string()
}

/// Load `<path>.toml` (optional) and apply `WARP_` overrides,
/// e.g. `WARP_DEVICE__BASE_URL=http://10.0.0.7`.
pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("WARP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to read configuration from {path}"))?;

    let config: AppConfig = settings
        .try_deserialize()
        .context("Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.buffers.capacity == 0 {
            bail!("buffers.capacity must be at least 1");
        }
        if self.buffers.merge_threshold == 0 || self.buffers.history_merge_threshold == 0 {
            bail!("merge thresholds must be at least 1");
        }
        if self.buffers.history_interval_minutes <= 0.0 {
            bail!("buffers.history_interval_minutes must be positive");
        }

        let mut names = HashSet::new();
        for feature in &self.features {
            if !names.insert(feature.name.as_str()) {
                bail!("feature {} is configured twice", feature.name);
            }
            if feature.labels.is_empty() {
                bail!("feature {} needs at least one channel label", feature.name);
            }
            if feature.default_view == ChartView::Prices {
                bail!("feature {} cannot default to the prices view", feature.name);
            }
            if feature.capacity == Some(0) || feature.merge_threshold == Some(0) {
                bail!("feature {} has a zero capacity or merge threshold", feature.name);
            }
        }
        Ok(())
    }

    pub fn feature_settings(&self) -> Vec<FeatureSettings> {
        let buffers = &self.buffers;

        self.features
            .iter()
            .map(|feature| {
                let capacity = feature.capacity.unwrap_or(buffers.capacity);
                FeatureSettings {
                    name: feature.name.clone(),
                    labels: feature.labels.clone(),
                    live: BufferSettings {
                        capacity,
                        merge_threshold: feature.merge_threshold.unwrap_or(buffers.merge_threshold),
                    },
                    history: BufferSettings {
                        capacity,
                        merge_threshold: buffers.history_merge_threshold,
                    },
                    history_interval_minutes: feature
                        .history_interval_minutes
                        .unwrap_or(buffers.history_interval_minutes),
                    bootstrap_retry: Duration::from_millis(buffers.bootstrap_retry_ms),
                    default_view: feature.default_view,
                    initially_visible: buffers.initially_visible,
                    y_axis: YAxisSettings {
                        y_min: feature.y_min,
                        y_max: feature.y_max,
                        y_diff_min: feature.y_diff_min,
                    },
                }
            })
            .collect()
    }

    pub fn price_settings(&self) -> Option<PriceSettings> {
        let prices = self.prices.as_ref()?;
        Some(PriceSettings {
            label: prices.label.clone(),
            capacity: self.buffers.capacity,
            bootstrap_retry: Duration::from_millis(self.buffers.bootstrap_retry_ms),
            initially_visible: self.buffers.initially_visible,
            y_axis: YAxisSettings {
                y_min: None,
                y_max: None,
                y_diff_min: prices.y_diff_min,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> anyhow::Result<AppConfig> {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse(
            r#"
            [device]
            base_url = "http://warp.local"

            [[features]]
            name = "soc"
            labels = ["State of charge"]
            "#,
        )
        .unwrap();

        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.device.events_path, "/events");
        assert!(config.prices.is_none());

        let settings = &config.feature_settings()[0];
        assert_eq!(settings.live.capacity, 720);
        assert_eq!(settings.live.merge_threshold, 5);
        assert_eq!(settings.history.merge_threshold, 1);
        assert_eq!(settings.history_interval_minutes, 4.0);
        assert_eq!(settings.bootstrap_retry, Duration::from_millis(100));
        assert_eq!(settings.default_view, ChartView::History);
        assert!(settings.initially_visible);
    }

    #[test]
    fn test_feature_overrides() {
        let config = parse(
            r#"
            [device]
            base_url = "http://warp.local"

            [buffers]
            capacity = 100

            [[features]]
            name = "phase_switcher"
            labels = ["Available", "Consumption"]
            default_view = "live"
            merge_threshold = 2
            y_diff_min = 1000.0

            [prices]
            y_diff_min = 5.0
            "#,
        )
        .unwrap();

        let settings = &config.feature_settings()[0];
        assert_eq!(settings.live, BufferSettings { capacity: 100, merge_threshold: 2 });
        assert_eq!(settings.default_view, ChartView::Live);
        assert_eq!(settings.y_axis.y_diff_min, Some(1000.0));

        let prices = config.price_settings().unwrap();
        assert_eq!(prices.label, "Electricity price");
        assert_eq!(prices.capacity, 100);
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let duplicate = r#"
            [device]
            base_url = "http://warp.local"

            [[features]]
            name = "soc"
            labels = ["a"]

            [[features]]
            name = "soc"
            labels = ["b"]
            "#;
        assert!(parse(duplicate).is_err());

        let zero_capacity = r#"
            [device]
            base_url = "http://warp.local"

            [buffers]
            capacity = 0
            "#;
        assert!(parse(zero_capacity).is_err());

        let no_labels = r#"
            [device]
            base_url = "http://warp.local"

            [[features]]
            name = "heating"
            labels = []
            "#;
        assert!(parse(no_labels).is_err());
    }
}
