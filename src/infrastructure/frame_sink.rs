// Frame sink - publishes rendered frames to HTTP readers through a watch channel
use tokio::sync::watch;

use crate::application::chart_feed::ChartSink;
use crate::domain::frame::RenderFrame;

/// Keeps only the newest frame; readers that lag simply skip intermediate ones.
pub struct WatchSink {
    tx: watch::Sender<Option<RenderFrame>>,
}

impl WatchSink {
    pub fn channel() -> (Self, watch::Receiver<Option<RenderFrame>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl ChartSink for WatchSink {
    fn set_data(&mut self, frame: RenderFrame) {
        tracing::debug!("Rendering {} {} with {} points", frame.feature, frame.view, frame.timestamps.len());
        // send_replace keeps the value even while nobody is subscribed
        self.tx.send_replace(Some(frame));
    }
}
