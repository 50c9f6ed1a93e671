// Price feed - day-ahead electricity price chart
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::{AbortHandle, JoinHandle};

use crate::application::bootstrap::fetch_until_ok;
use crate::application::chart_feed::{ChartFeed, ChartSink, FrameSource};
use crate::application::device_api::DeviceApi;
use crate::application::dispatcher::EventDispatcher;
use crate::application::feature_feed::FeedPhase;
use crate::domain::error::FeedError;
use crate::domain::frame::{ChartView, RenderFrame, YAxisSettings};
use crate::domain::prices::{DayAheadPrices, PriceSurcharges};
use crate::domain::series::RollingSeries;

pub const PRICES_FEATURE: &str = "day_ahead_prices";

#[derive(Debug, Clone)]
pub struct PriceSettings {
    pub label: String,
    pub capacity: usize,
    pub bootstrap_retry: Duration,
    pub initially_visible: bool,
    pub y_axis: YAxisSettings,
}

struct PriceData {
    labels: Vec<String>,
    y_axis: YAxisSettings,
    capacity: usize,
    prices: Option<DayAheadPrices>,
    surcharges: PriceSurcharges,
    series: Option<RollingSeries>,
}

impl PriceData {
    fn rebuild(&mut self) -> Result<(), FeedError> {
        let Some(prices) = &self.prices else {
            return Ok(());
        };
        let mut series = prices.to_series(&self.surcharges)?;
        if series.is_empty() {
            tracing::debug!("{} carries no prices", PRICES_FEATURE);
        }
        series.keep_last(self.capacity);
        self.series = Some(series);
        Ok(())
    }
}

impl FrameSource for PriceData {
    fn frame(&self, view: ChartView) -> Option<RenderFrame> {
        let series = self.series.as_ref()?;
        Some(RenderFrame::from_series(PRICES_FEATURE, view, series, &self.labels, &self.y_axis))
    }
}

struct PriceState {
    data: PriceData,
    chart: ChartFeed,
    loading: bool,
    listeners: Vec<AbortHandle>,
}

impl Drop for PriceState {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

impl PriceState {
    fn update_prices(&mut self, prices: DayAheadPrices) -> Result<(), FeedError> {
        let previous = self.data.prices.replace(prices);
        if let Err(e) = self.data.rebuild() {
            self.data.prices = previous;
            return Err(e);
        }
        self.loading = false;
        self.chart.render_if_active(ChartView::Prices, &self.data);
        Ok(())
    }

    fn update_surcharges(&mut self, surcharges: PriceSurcharges) -> Result<(), FeedError> {
        self.data.surcharges = surcharges;
        self.data.rebuild()?;
        self.chart.render_if_active(ChartView::Prices, &self.data);
        Ok(())
    }
}

/// Chart of the day-ahead price list. Every push replaces the whole series.
#[derive(Clone)]
pub struct PriceFeed {
    state: Arc<Mutex<PriceState>>,
    api: Arc<dyn DeviceApi>,
    retry: Duration,
}

fn lock(state: &Mutex<PriceState>) -> MutexGuard<'_, PriceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PriceFeed {
    pub fn new(settings: PriceSettings, api: Arc<dyn DeviceApi>, sink: Box<dyn ChartSink>) -> Self {
        let chart = ChartFeed::new(&[ChartView::Prices], ChartView::Prices, settings.initially_visible, sink);
        let state = PriceState {
            data: PriceData {
                labels: vec![settings.label],
                y_axis: settings.y_axis,
                capacity: settings.capacity.max(1),
                prices: None,
                surcharges: PriceSurcharges::default(),
                series: None,
            },
            chart,
            loading: false,
            listeners: Vec::new(),
        };

        Self {
            state: Arc::new(Mutex::new(state)),
            api,
            retry: settings.bootstrap_retry,
        }
    }

    /// Follow price and config pushes, and load the current prices once.
    pub fn attach(&self, dispatcher: &EventDispatcher) -> Vec<JoinHandle<()>> {
        let topics = [
            (format!("{PRICES_FEATURE}/prices"), true),
            (format!("{PRICES_FEATURE}/config"), false),
        ];

        let handles: Vec<JoinHandle<()>> = topics
            .into_iter()
            .map(|(topic, is_prices)| {
                let mut subscription = dispatcher.subscribe(&topic);
                let weak = Arc::downgrade(&self.state);
                let api = self.api.clone();
                let retry = self.retry;

                tokio::spawn(async move {
                    while let Some(payload) = subscription.recv().await {
                        let Some(state) = weak.upgrade() else {
                            break;
                        };
                        let feed = PriceFeed { state, api: api.clone(), retry };
                        if is_prices {
                            feed.on_prices(&payload);
                        } else {
                            feed.on_config(&payload);
                        }
                    }
                })
            })
            .collect();

        lock(&self.state)
            .listeners
            .extend(handles.iter().map(JoinHandle::abort_handle));

        if let Some(config) = dispatcher.latest(&format!("{PRICES_FEATURE}/config")) {
            self.on_config(&config);
        }
        self.ensure_bootstrap();

        handles
    }

    pub fn on_prices(&self, payload: &Value) {
        let result = DayAheadPrices::from_payload(payload).and_then(|prices| lock(&self.state).update_prices(prices));
        if let Err(e) = result {
            tracing::warn!("Dropping {}/prices update: {}", PRICES_FEATURE, e);
        }
    }

    pub fn on_config(&self, payload: &Value) {
        let result = PriceSurcharges::from_payload(payload).and_then(|s| lock(&self.state).update_surcharges(s));
        if let Err(e) = result {
            tracing::warn!("Ignoring {}/config update: {}", PRICES_FEATURE, e);
        }
    }

    pub fn ensure_bootstrap(&self) {
        {
            let mut state = lock(&self.state);
            if state.loading || state.data.prices.is_some() {
                return;
            }
            state.loading = true;
        }

        let weak = Arc::downgrade(&self.state);
        let api = self.api.clone();
        let retry = self.retry;
        let key = format!("{PRICES_FEATURE}/prices");

        tokio::spawn(async move {
            fetch_until_ok(&key, retry, || weak.strong_count() > 0, || {
                let api = api.clone();
                let weak = weak.clone();
                let key = key.clone();

                async move {
                    let payload = api
                        .get_state(&key)
                        .await
                        .map_err(|e| FeedError::Transport(format!("{e:#}")))?;
                    let prices = DayAheadPrices::from_payload(&payload)?;

                    let Some(state) = weak.upgrade() else {
                        return Ok(());
                    };
                    lock(&state).update_prices(prices)?;
                    Ok(())
                }
            })
            .await;
        });
    }

    pub fn select_view(&self, view: ChartView) -> Result<(), FeedError> {
        let mut state = lock(&self.state);
        let state = &mut *state;
        state.chart.select_view(view, &state.data)
    }

    pub fn notify_visibility(&self, view: ChartView, visible: bool) -> Result<(), FeedError> {
        lock(&self.state).chart.notify_visibility(view, visible)
    }

    pub fn read(&self) -> Option<RollingSeries> {
        lock(&self.state).data.series.clone()
    }

    pub fn phase(&self) -> FeedPhase {
        let state = lock(&self.state);
        if state.data.series.is_some() {
            FeedPhase::Ready {
                visible: state.chart.is_visible(ChartView::Prices),
            }
        } else if state.loading {
            FeedPhase::Loading
        } else {
            FeedPhase::Uninitialized
        }
    }

    pub fn labels(&self) -> Vec<String> {
        lock(&self.state).data.labels.clone()
    }
}
