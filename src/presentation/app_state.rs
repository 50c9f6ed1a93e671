// Application state for HTTP handlers
use std::collections::BTreeMap;

use tokio::sync::watch;

use crate::application::command_service::CommandService;
use crate::application::dispatcher::EventDispatcher;
use crate::application::feature_feed::{FeatureFeed, FeedPhase};
use crate::application::price_feed::PriceFeed;
use crate::domain::error::FeedError;
use crate::domain::frame::{ChartView, RenderFrame};

#[derive(Clone)]
pub enum ChartFeedHandle {
    Feature(FeatureFeed),
    Prices(PriceFeed),
}

impl ChartFeedHandle {
    pub fn labels(&self) -> Vec<String> {
        match self {
            ChartFeedHandle::Feature(feed) => feed.labels(),
            ChartFeedHandle::Prices(feed) => feed.labels(),
        }
    }

    pub fn views(&self) -> &'static [ChartView] {
        match self {
            ChartFeedHandle::Feature(_) => &[ChartView::Live, ChartView::History],
            ChartFeedHandle::Prices(_) => &[ChartView::Prices],
        }
    }

    pub fn active_view(&self) -> ChartView {
        match self {
            ChartFeedHandle::Feature(feed) => feed.active_view(),
            ChartFeedHandle::Prices(_) => ChartView::Prices,
        }
    }

    pub fn phase(&self, view: ChartView) -> FeedPhase {
        match self {
            ChartFeedHandle::Feature(feed) => feed.phase(view),
            ChartFeedHandle::Prices(feed) => feed.phase(),
        }
    }

    pub fn select_view(&self, view: ChartView) -> Result<(), FeedError> {
        match self {
            ChartFeedHandle::Feature(feed) => feed.select_view(view),
            ChartFeedHandle::Prices(feed) => feed.select_view(view),
        }
    }

    pub fn notify_visibility(&self, view: ChartView, visible: bool) -> Result<(), FeedError> {
        match self {
            ChartFeedHandle::Feature(feed) => feed.notify_visibility(view, visible),
            ChartFeedHandle::Prices(feed) => feed.notify_visibility(view, visible),
        }
    }
}

/// One chart as seen by the HTTP surface: the feed plus the frames it renders.
#[derive(Clone)]
pub struct ChartEntry {
    pub feed: ChartFeedHandle,
    pub frames: watch::Receiver<Option<RenderFrame>>,
}

impl ChartEntry {
    /// Last rendered frame, as long as it belongs to the active view.
    pub fn current_frame(&self) -> Option<RenderFrame> {
        let active = self.feed.active_view();
        self.frames.borrow().clone().filter(|frame| frame.view == active)
    }
}

pub struct AppState {
    pub charts: BTreeMap<String, ChartEntry>,
    pub dispatcher: EventDispatcher,
    pub commands: CommandService,
}
