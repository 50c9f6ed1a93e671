// Feature feed - live and history charts of one device feature
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::task::{AbortHandle, JoinHandle};

use crate::application::bootstrap::fetch_until_ok;
use crate::application::chart_feed::{ChartFeed, ChartSink, FrameSource};
use crate::application::clock::Clock;
use crate::application::device_api::DeviceApi;
use crate::application::dispatcher::EventDispatcher;
use crate::application::rolling_buffer::{AppendOutcome, BufferSettings, RollingBuffer};
use crate::domain::error::FeedError;
use crate::domain::frame::{ChartView, RenderFrame, YAxisSettings};
use crate::domain::samples::{Delta, SampleBatch};
use crate::domain::series::{RollingSeries, Timebase};

#[derive(Debug, Clone)]
pub struct FeatureSettings {
    /// API prefix, e.g. `soc` or `phase_switcher`.
    pub name: String,
    pub labels: Vec<String>,
    pub live: BufferSettings,
    pub history: BufferSettings,
    pub history_interval_minutes: f64,
    pub bootstrap_retry: Duration,
    pub default_view: ChartView,
    pub initially_visible: bool,
    pub y_axis: YAxisSettings,
}

/// Lifecycle of one chart view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum FeedPhase {
    Uninitialized,
    Loading,
    Ready { visible: bool },
}

struct ViewState {
    buffer: RollingBuffer,
    loading: bool,
    /// Bumped on invalidate; snapshots fetched for an older generation are dropped.
    generation: u64,
}

struct Buffers {
    feature: String,
    labels: Vec<String>,
    y_axis: YAxisSettings,
    views: HashMap<ChartView, ViewState>,
}

impl FrameSource for Buffers {
    fn frame(&self, view: ChartView) -> Option<RenderFrame> {
        let series = self.views.get(&view)?.buffer.read()?;
        Some(RenderFrame::from_series(&self.feature, view, series, &self.labels, &self.y_axis))
    }
}

struct FeedState {
    buffers: Buffers,
    chart: ChartFeed,
    listeners: Vec<AbortHandle>,
}

impl Drop for FeedState {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

impl FeedState {
    fn view_mut(&mut self, view: ChartView) -> Result<&mut ViewState, FeedError> {
        self.buffers.views.get_mut(&view).ok_or(FeedError::UnknownView(view))
    }

    fn is_current(&self, view: ChartView, generation: u64) -> bool {
        self.buffers
            .views
            .get(&view)
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Returns `false` when the snapshot was requested before the last invalidate.
    fn hydrate(&mut self, view: ChartView, generation: u64, batch: SampleBatch, now_ms: i64) -> Result<bool, FeedError> {
        let slot = self.view_mut(view)?;
        if slot.generation != generation {
            return Ok(false);
        }
        slot.buffer.hydrate(batch, now_ms)?;
        slot.loading = false;
        self.chart.render_if_active(view, &self.buffers);
        Ok(true)
    }

    fn append(&mut self, view: ChartView, delta: Delta, now_ms: i64) -> Result<AppendOutcome, FeedError> {
        let outcome = self.view_mut(view)?.buffer.append(delta, now_ms)?;
        if outcome == AppendOutcome::Merged {
            self.chart.render_if_active(view, &self.buffers);
        }
        Ok(outcome)
    }
}

/// Owns the live and history buffers of one feature and keeps its chart fed.
///
/// Clones share the same state. Background tasks only hold weak references,
/// so once the last handle is dropped nothing writes into the buffers anymore.
#[derive(Clone)]
pub struct FeatureFeed {
    name: Arc<str>,
    state: Arc<Mutex<FeedState>>,
    api: Arc<dyn DeviceApi>,
    clock: Arc<dyn Clock>,
    retry: Duration,
}

fn lock(state: &Mutex<FeedState>) -> MutexGuard<'_, FeedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

const VIEWS: [ChartView; 2] = [ChartView::Live, ChartView::History];

impl FeatureFeed {
    pub fn new(
        settings: FeatureSettings,
        api: Arc<dyn DeviceApi>,
        clock: Arc<dyn Clock>,
        sink: Box<dyn ChartSink>,
    ) -> Self {
        let channel_count = settings.labels.len();
        let history_timebase = Timebase::History {
            interval_minutes: settings.history_interval_minutes,
        };

        let mut views = HashMap::new();
        views.insert(
            ChartView::Live,
            ViewState {
                buffer: RollingBuffer::new(Timebase::Live, channel_count, settings.live),
                loading: false,
                generation: 0,
            },
        );
        views.insert(
            ChartView::History,
            ViewState {
                buffer: RollingBuffer::new(history_timebase, channel_count, settings.history),
                loading: false,
                generation: 0,
            },
        );

        let chart = ChartFeed::new(&VIEWS, settings.default_view, settings.initially_visible, sink);
        let state = FeedState {
            buffers: Buffers {
                feature: settings.name.clone(),
                labels: settings.labels,
                y_axis: settings.y_axis,
                views,
            },
            chart,
            listeners: Vec::new(),
        };

        Self {
            name: settings.name.into(),
            state: Arc::new(Mutex::new(state)),
            api,
            clock,
            retry: settings.bootstrap_retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> Vec<String> {
        lock(&self.state).buffers.labels.clone()
    }

    /// Subscribe to the delta topics of this feature and start both bootstraps.
    /// The listeners are aborted when the last handle of the feed is dropped.
    pub fn attach(&self, dispatcher: &EventDispatcher) -> Vec<JoinHandle<()>> {
        let handles: Vec<JoinHandle<()>> = VIEWS
            .iter()
            .map(|&view| {
                let topic = format!("{}/{}", self.name, view.delta_event());
                let mut subscription = dispatcher.subscribe(&topic);
                let weak = self.downgrade();

                tokio::spawn(async move {
                    while let Some(payload) = subscription.recv().await {
                        let Some(feed) = weak.upgrade() else {
                            break;
                        };
                        feed.on_delta(view, &payload);
                    }
                    tracing::debug!("Listener for {} stopped", subscription.topic());
                })
            })
            .collect();

        lock(&self.state)
            .listeners
            .extend(handles.iter().map(JoinHandle::abort_handle));

        for view in VIEWS {
            self.ensure_bootstrap(view);
        }

        handles
    }

    /// Handle one pushed delta for `view`. Never fails; problems are logged.
    pub fn on_delta(&self, view: ChartView, payload: &Value) {
        let delta = match Delta::from_payload(payload) {
            Ok(delta) => delta,
            Err(e) => {
                tracing::warn!("Dropping malformed {}/{} delta: {}", self.name, view.delta_event(), e);
                return;
            }
        };

        tracing::trace!("{}/{} carries {} samples", self.name, view.delta_event(), delta.sample_count());
        let now_ms = self.clock.now_ms();
        let outcome = lock(&self.state).append(view, delta, now_ms);

        match outcome {
            Ok(AppendOutcome::Uninitialized) => {
                tracing::debug!("{}/{} arrived before bootstrap, fetching", self.name, view.delta_event());
                self.ensure_bootstrap(view);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Dropping {}/{} delta: {}", self.name, view.delta_event(), e);
            }
        }
    }

    /// Start a bootstrap fetch for `view` unless one is already running.
    pub fn ensure_bootstrap(&self, view: ChartView) {
        let generation = {
            let mut state = lock(&self.state);
            let Ok(slot) = state.view_mut(view) else {
                return;
            };
            if slot.loading {
                return;
            }
            slot.loading = true;
            slot.generation
        };

        let weak = Arc::downgrade(&self.state);
        let api = self.api.clone();
        let clock = self.clock.clone();
        let retry = self.retry;
        let path = format!("{}/{}", self.name, view.bootstrap_suffix());

        tokio::spawn(async move {
            let alive = || weak.upgrade().is_some_and(|state| lock(&state).is_current(view, generation));

            fetch_until_ok(&path, retry, alive, || {
                let api = api.clone();
                let clock = clock.clone();
                let weak = weak.clone();
                let path = path.clone();

                async move {
                    let body = api
                        .fetch_bootstrap(&path)
                        .await
                        .map_err(|e| FeedError::Transport(format!("{e:#}")))?;
                    let batch = SampleBatch::from_json(&body)?;
                    let count = batch.sample_count();

                    let Some(state) = weak.upgrade() else {
                        return Ok(());
                    };
                    if lock(&state).hydrate(view, generation, batch, clock.now_ms())? {
                        tracing::info!("Loaded {} ({} samples)", path, count);
                    } else {
                        tracing::debug!("Discarding {} requested before invalidation", path);
                    }
                    Ok(())
                }
            })
            .await;
        });
    }

    /// Drop buffered data of every view and fetch fresh snapshots.
    /// Fetches still in flight are superseded and their results ignored.
    pub fn invalidate(&self) {
        {
            let mut state = lock(&self.state);
            for slot in state.buffers.views.values_mut() {
                slot.buffer.reset();
                slot.loading = false;
                slot.generation += 1;
            }
        }
        for view in VIEWS {
            self.ensure_bootstrap(view);
        }
    }

    pub fn select_view(&self, view: ChartView) -> Result<(), FeedError> {
        let mut state = lock(&self.state);
        let state = &mut *state;
        state.chart.select_view(view, &state.buffers)
    }

    pub fn notify_visibility(&self, view: ChartView, visible: bool) -> Result<(), FeedError> {
        lock(&self.state).chart.notify_visibility(view, visible)
    }

    pub fn active_view(&self) -> ChartView {
        lock(&self.state).chart.active_view()
    }

    /// Copy of the series behind `view`, `None` until it was hydrated.
    pub fn read(&self, view: ChartView) -> Option<RollingSeries> {
        lock(&self.state)
            .buffers
            .views
            .get(&view)
            .and_then(|slot| slot.buffer.read().cloned())
    }

    pub fn phase(&self, view: ChartView) -> FeedPhase {
        let state = lock(&self.state);
        match state.buffers.views.get(&view) {
            Some(slot) if slot.buffer.is_initialized() => FeedPhase::Ready {
                visible: state.chart.is_visible(view),
            },
            Some(slot) if slot.loading => FeedPhase::Loading,
            _ => FeedPhase::Uninitialized,
        }
    }

    fn downgrade(&self) -> WeakFeatureFeed {
        WeakFeatureFeed {
            name: self.name.clone(),
            state: Arc::downgrade(&self.state),
            api: self.api.clone(),
            clock: self.clock.clone(),
            retry: self.retry,
        }
    }
}

/// Non-owning handle held by background listeners.
struct WeakFeatureFeed {
    name: Arc<str>,
    state: Weak<Mutex<FeedState>>,
    api: Arc<dyn DeviceApi>,
    clock: Arc<dyn Clock>,
    retry: Duration,
}

impl WeakFeatureFeed {
    fn upgrade(&self) -> Option<FeatureFeed> {
        Some(FeatureFeed {
            name: self.name.clone(),
            state: self.state.upgrade()?,
            api: self.api.clone(),
            clock: self.clock.clone(),
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::chart_feed::testing::RecordingSink;
    use crate::application::clock::testing::ManualClock;
    use crate::application::device_api::testing::FakeDeviceApi;
    use crate::domain::event::EventFrame;
    use serde_json::json;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn settings(labels: &[&str]) -> FeatureSettings {
        FeatureSettings {
            name: "soc".to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            live: BufferSettings::default(),
            history: BufferSettings {
                capacity: 720,
                merge_threshold: 1,
            },
            history_interval_minutes: 4.0,
            bootstrap_retry: Duration::from_millis(1),
            default_view: ChartView::Live,
            initially_visible: true,
            y_axis: YAxisSettings::default(),
        }
    }

    fn feed_with(api: Arc<FakeDeviceApi>, labels: &[&str]) -> (FeatureFeed, RecordingSink, Arc<ManualClock>) {
        let sink = RecordingSink::default();
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let feed = FeatureFeed::new(settings(labels), api, clock.clone(), Box::new(sink.clone()));
        (feed, sink, clock)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    fn live_delta(value: f64) -> Value {
        json!({"samples_per_second": 1.0, "samples": [[value]]})
    }

    #[tokio::test]
    async fn test_bootstrap_hydrates_and_renders() {
        let api = Arc::new(
            FakeDeviceApi::new().with_body("soc/live", r#"{"offset":2000,"samples_per_second":1,"samples":[[50,51,52]]}"#),
        );
        let (feed, sink, _) = feed_with(api, &["State of charge"]);
        assert_eq!(feed.phase(ChartView::Live), FeedPhase::Uninitialized);

        feed.ensure_bootstrap(ChartView::Live);
        wait_for(|| feed.read(ChartView::Live).is_some()).await;

        let series = feed.read(ChartView::Live).unwrap();
        assert_eq!(series.timestamps, vec![1_699_999_996.0, 1_699_999_997.0, 1_699_999_998.0]);
        assert_eq!(feed.phase(ChartView::Live), FeedPhase::Ready { visible: true });

        let frame = sink.last().unwrap();
        assert_eq!(frame.view, ChartView::Live);
        assert_eq!(frame.channels[0].label, "State of charge");
        assert_eq!(frame.channels[0].values, vec![Some(50.0), Some(51.0), Some(52.0)]);
    }

    #[tokio::test]
    async fn test_bootstrap_retries_silently() {
        let api = Arc::new(
            FakeDeviceApi::new()
                .with_body("soc/history", r#"{"offset":0,"samples":[[1,2]]}"#)
                .failing(3),
        );
        let (feed, _, _) = feed_with(api.clone(), &["soc"]);

        feed.ensure_bootstrap(ChartView::History);
        wait_for(|| feed.read(ChartView::History).is_some()).await;

        assert_eq!(api.fetch_count(), 4);
        let series = feed.read(ChartView::History).unwrap();
        assert_eq!(series.timestamps[1] - series.timestamps[0], 240.0);
    }

    #[tokio::test]
    async fn test_malformed_bootstrap_is_retried() {
        let api = Arc::new(FakeDeviceApi::new().with_body("soc/live", r#"{"offset":0,"samples":[[1,2],[3]]}"#));
        let (feed, _, _) = feed_with(api.clone(), &["a", "b"]);

        feed.ensure_bootstrap(ChartView::Live);
        wait_for(|| api.fetch_count() >= 2).await;
        assert!(feed.read(ChartView::Live).is_none());
        assert_eq!(feed.phase(ChartView::Live), FeedPhase::Loading);

        api.set_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[1,2],[3,4]]}"#);
        wait_for(|| feed.read(ChartView::Live).is_some()).await;
        assert_eq!(feed.read(ChartView::Live).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delta_before_bootstrap_is_dropped() {
        let body = r#"{"offset":0,"samples_per_second":1,"samples":[[10,20,30],[1,2,3],null]}"#;
        let api = Arc::new(FakeDeviceApi::new().with_body("soc/live", body).gated());
        let (feed, _, _) = feed_with(api.clone(), &["a", "b", "c"]);

        feed.on_delta(ChartView::Live, &json!({"samples_per_second": 1.0, "samples": [[99], [99], [99]]}));
        assert_eq!(feed.phase(ChartView::Live), FeedPhase::Loading);

        // a second early delta must not start another fetch
        feed.on_delta(ChartView::Live, &json!({"samples_per_second": 1.0, "samples": [[98], [98], [98]]}));
        wait_for(|| api.fetch_count() == 1).await;

        api.release(1);
        wait_for(|| feed.read(ChartView::Live).is_some()).await;

        let series = feed.read(ChartView::Live).unwrap();
        assert_eq!(series.channel(0), &[Some(10.0), Some(20.0), Some(30.0)]);
        assert_eq!(series.channel(1), &[Some(1.0), Some(2.0), Some(3.0)]);
        assert!(series.channel(2).is_empty());
        assert_eq!(series.timestamps, vec![1_699_999_998.0, 1_699_999_999.0, 1_700_000_000.0]);
        assert_eq!(api.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_live_deltas_merge_in_batches() {
        let api = Arc::new(FakeDeviceApi::new().with_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[0]]}"#));
        let (feed, sink, clock) = feed_with(api, &["soc"]);
        feed.ensure_bootstrap(ChartView::Live);
        wait_for(|| feed.read(ChartView::Live).is_some()).await;
        let renders = sink.count();

        for i in 1..=4 {
            clock.advance(1000);
            feed.on_delta(ChartView::Live, &live_delta(i as f64));
            assert_eq!(feed.read(ChartView::Live).unwrap().len(), 1);
        }
        assert_eq!(sink.count(), renders);

        clock.advance(1000);
        feed.on_delta(ChartView::Live, &live_delta(5.0));
        assert_eq!(feed.read(ChartView::Live).unwrap().len(), 6);
        assert_eq!(sink.count(), renders + 1);
    }

    #[tokio::test]
    async fn test_malformed_delta_leaves_buffer_alone() {
        let api = Arc::new(FakeDeviceApi::new().with_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[0],[0]]}"#));
        let (feed, _, _) = feed_with(api.clone(), &["a", "b"]);
        feed.ensure_bootstrap(ChartView::Live);
        wait_for(|| feed.read(ChartView::Live).is_some()).await;
        let before = feed.read(ChartView::Live).unwrap();

        feed.on_delta(ChartView::Live, &json!({"samples": "garbage"}));
        feed.on_delta(ChartView::Live, &json!({"samples": [[1, 2], [3]]}));
        feed.on_delta(ChartView::Live, &json!({"samples": [[1], [2], [3]]}));

        assert_eq!(feed.read(ChartView::Live).unwrap(), before);
        assert_eq!(api.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_hidden_view_renders_once_when_shown() {
        let api = Arc::new(FakeDeviceApi::new().with_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[0]]}"#));
        let (feed, sink, clock) = feed_with(api, &["soc"]);
        feed.ensure_bootstrap(ChartView::Live);
        wait_for(|| feed.read(ChartView::Live).is_some()).await;

        feed.notify_visibility(ChartView::Live, false).unwrap();
        let renders = sink.count();
        for i in 1..=15 {
            clock.advance(1000);
            feed.on_delta(ChartView::Live, &live_delta(i as f64));
        }
        assert_eq!(sink.count(), renders);

        feed.notify_visibility(ChartView::Live, true).unwrap();
        assert_eq!(sink.count(), renders + 1);
        let frame = sink.last().unwrap();
        assert_eq!(frame.timestamps.len(), 16);
        assert_eq!(frame.channels[0].values.last(), Some(&Some(15.0)));
    }

    #[tokio::test]
    async fn test_select_view_uses_buffered_data() {
        let api = Arc::new(
            FakeDeviceApi::new()
                .with_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[1]]}"#)
                .with_body("soc/history", r#"{"offset":0,"samples":[[7,8,9]]}"#),
        );
        let (feed, sink, _) = feed_with(api, &["soc"]);
        feed.ensure_bootstrap(ChartView::Live);
        feed.ensure_bootstrap(ChartView::History);
        wait_for(|| feed.read(ChartView::Live).is_some() && feed.read(ChartView::History).is_some()).await;

        feed.select_view(ChartView::History).unwrap();
        assert_eq!(feed.active_view(), ChartView::History);
        let frame = sink.last().unwrap();
        assert_eq!(frame.view, ChartView::History);
        assert_eq!(frame.timestamps.len(), 3);
    }

    #[tokio::test]
    async fn test_attach_routes_pushed_events() {
        let api = Arc::new(
            FakeDeviceApi::new()
                .with_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[1]]}"#)
                .with_body("soc/history", r#"{"offset":0,"samples":[[1]]}"#),
        );
        let (feed, _, clock) = feed_with(api, &["soc"]);
        let dispatcher = EventDispatcher::new();
        let handles = feed.attach(&dispatcher);
        assert_eq!(handles.len(), 2);
        wait_for(|| feed.read(ChartView::History).is_some()).await;

        clock.advance(240_000);
        dispatcher.publish(EventFrame::new("soc/history_samples", json!({"samples": [[2]]})));
        wait_for(|| feed.read(ChartView::History).is_some_and(|s| s.len() == 2)).await;

        assert_eq!(
            feed.read(ChartView::History).unwrap().channel(0),
            &[Some(1.0), Some(2.0)]
        );
    }

    #[tokio::test]
    async fn test_dropped_feed_is_not_written() {
        let api = Arc::new(FakeDeviceApi::new().with_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[1]]}"#).gated());
        let (feed, sink, _) = feed_with(api.clone(), &["soc"]);
        let dispatcher = EventDispatcher::new();
        let handles = feed.attach(&dispatcher);
        wait_for(|| api.fetch_count() >= 1).await;

        drop(feed);
        api.release(10);
        dispatcher.publish(EventFrame::new("soc/live_samples", live_delta(1.0)));

        for handle in handles {
            handle.await.unwrap_or(());
        }
        assert_eq!(sink.count(), 0);
        assert_eq!(dispatcher.subscriber_count("soc/live_samples"), 0);
    }

    #[tokio::test]
    async fn test_invalidate_refetches() {
        let api = Arc::new(
            FakeDeviceApi::new()
                .with_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[1]]}"#)
                .with_body("soc/history", r#"{"offset":0,"samples":[[1]]}"#),
        );
        let (feed, _, _) = feed_with(api.clone(), &["soc"]);
        feed.invalidate();
        wait_for(|| feed.read(ChartView::Live).is_some() && feed.read(ChartView::History).is_some()).await;
        assert_eq!(api.fetch_count(), 2);

        api.set_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[5,6]]}"#);
        feed.invalidate();
        wait_for(|| feed.read(ChartView::Live).is_some_and(|s| s.len() == 2)).await;
    }

    #[tokio::test]
    async fn test_invalidate_supersedes_fetch_in_flight() {
        let api = Arc::new(
            FakeDeviceApi::new()
                .with_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[1]]}"#)
                .with_body("soc/history", r#"{"offset":0,"samples":[[1]]}"#)
                .gated(),
        );
        let (feed, _, _) = feed_with(api.clone(), &["soc"]);
        feed.ensure_bootstrap(ChartView::Live);
        wait_for(|| api.fetch_count() == 1).await;

        api.set_body("soc/live", r#"{"offset":0,"samples_per_second":1,"samples":[[5,6]]}"#);
        feed.invalidate();
        wait_for(|| api.fetch_count() == 3).await;

        // the first waiter is the request made before the invalidate
        api.release(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(feed.read(ChartView::Live).is_none());
        assert_eq!(feed.phase(ChartView::Live), FeedPhase::Loading);

        api.release(10);
        wait_for(|| feed.read(ChartView::Live).is_some()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(feed.read(ChartView::Live).unwrap().channel(0), &[Some(5.0), Some(6.0)]);
        assert_eq!(api.fetch_count(), 3);
    }
}
