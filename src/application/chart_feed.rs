// Chart feed synchronizer: decides when buffered data reaches the chart
use std::collections::HashMap;

use crate::domain::error::FeedError;
use crate::domain::frame::{ChartView, RenderFrame};

/// Receives frames to draw. Implemented by whatever hosts the chart widget.
pub trait ChartSink: Send {
    fn set_data(&mut self, frame: RenderFrame);
}

/// Produces the current frame of a view, `None` while it has no data yet.
pub trait FrameSource {
    fn frame(&self, view: ChartView) -> Option<RenderFrame>;
}

#[derive(Debug, Default)]
struct ViewSlot {
    visible: bool,
    pending: Option<RenderFrame>,
}

/// Tracks the active view and per-view visibility of one chart.
///
/// Frames for the active view go straight to the sink while the view is
/// visible. While it is hidden the newest frame is parked and drawn on the
/// next visible transition.
pub struct ChartFeed {
    active: ChartView,
    views: HashMap<ChartView, ViewSlot>,
    sink: Box<dyn ChartSink>,
}

impl ChartFeed {
    pub fn new(views: &[ChartView], active: ChartView, initially_visible: bool, sink: Box<dyn ChartSink>) -> Self {
        let views = views
            .iter()
            .chain(std::iter::once(&active))
            .map(|&view| {
                (
                    view,
                    ViewSlot {
                        visible: initially_visible,
                        pending: None,
                    },
                )
            })
            .collect();

        Self { active, views, sink }
    }

    pub fn active_view(&self) -> ChartView {
        self.active
    }

    pub fn is_visible(&self, view: ChartView) -> bool {
        self.views.get(&view).is_some_and(|slot| slot.visible)
    }

    #[cfg(test)]
    pub fn has_pending(&self, view: ChartView) -> bool {
        self.views.get(&view).is_some_and(|slot| slot.pending.is_some())
    }

    /// Make `view` the active one and draw whatever is already buffered for it.
    pub fn select_view(&mut self, view: ChartView, source: &dyn FrameSource) -> Result<(), FeedError> {
        if !self.views.contains_key(&view) {
            return Err(FeedError::UnknownView(view));
        }

        // a frame parked for the view being left would be stale once it is shown again
        if let Some(slot) = self.views.get_mut(&self.active) {
            slot.pending = None;
        }

        self.active = view;
        self.render_if_active(view, source);
        Ok(())
    }

    /// Called by the host when the container of `view` is shown or hidden.
    pub fn notify_visibility(&mut self, view: ChartView, visible: bool) -> Result<(), FeedError> {
        let slot = self.views.get_mut(&view).ok_or(FeedError::UnknownView(view))?;
        slot.visible = visible;

        if visible && view == self.active {
            if let Some(frame) = slot.pending.take() {
                self.sink.set_data(frame);
            }
        }
        Ok(())
    }

    /// Run after every buffer mutation. Returns true if the sink was called.
    pub fn render_if_active(&mut self, view: ChartView, source: &dyn FrameSource) -> bool {
        if view != self.active {
            return false;
        }

        let Some(slot) = self.views.get_mut(&view) else {
            return false;
        };
        let Some(frame) = source.frame(view) else {
            return false;
        };

        if slot.visible {
            slot.pending = None;
            self.sink.set_data(frame);
            true
        } else {
            slot.pending = Some(frame);
            false
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink that records every frame it is handed.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub frames: Arc<Mutex<Vec<RenderFrame>>>,
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }

        pub fn last(&self) -> Option<RenderFrame> {
            self.frames.lock().unwrap().last().cloned()
        }
    }

    impl ChartSink for RecordingSink {
        fn set_data(&mut self, frame: RenderFrame) {
            self.frames.lock().unwrap().push(frame);
        }
    }
}
