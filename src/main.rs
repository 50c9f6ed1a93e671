// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::collections::BTreeMap;
use std::time::Duration;
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::clock::{Clock, SystemClock};
use crate::application::command_service::CommandService;
use crate::application::device_api::DeviceApi;
use crate::application::dispatcher::EventDispatcher;
use crate::application::feature_feed::FeatureFeed;
use crate::application::price_feed::{PriceFeed, PRICES_FEATURE};
use crate::infrastructure::config::load_config;
use crate::infrastructure::event_stream::run_event_stream;
use crate::infrastructure::frame_sink::WatchSink;
use crate::infrastructure::http_device::HttpDeviceApi;
use crate::presentation::app_state::{AppState, ChartEntry, ChartFeedHandle};
use crate::presentation::handlers::{
    get_chart, get_state, health_check, list_features, notify_visibility, run_action, save_config, select_view,
    stream_chart,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config_path = std::env::var("WARP_CONFIG").unwrap_or_else(|_| "config/dashboard".to_string());
    let config = load_config(&config_path)?;

    // Device access (infrastructure layer)
    let device = HttpDeviceApi::new(
        &config.device.base_url,
        &config.device.events_path,
        Duration::from_millis(config.device.request_timeout_ms),
    )?;
    let api: Arc<dyn DeviceApi> = Arc::new(device.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher = EventDispatcher::new();

    // Feeds (application layer)
    let mut charts = BTreeMap::new();
    let mut feature_feeds = Vec::new();

    for settings in config.feature_settings() {
        let (sink, frames) = WatchSink::channel();
        let feed = FeatureFeed::new(settings, api.clone(), clock.clone(), Box::new(sink));
        feed.attach(&dispatcher);
        tracing::info!("Feeding charts of {} ({} channels)", feed.name(), feed.labels().len());

        charts.insert(
            feed.name().to_string(),
            ChartEntry {
                feed: ChartFeedHandle::Feature(feed.clone()),
                frames,
            },
        );
        feature_feeds.push(feed);
    }

    if let Some(settings) = config.price_settings() {
        let (sink, frames) = WatchSink::channel();
        let feed = PriceFeed::new(settings, api.clone(), Box::new(sink));
        feed.attach(&dispatcher);

        charts.insert(
            PRICES_FEATURE.to_string(),
            ChartEntry {
                feed: ChartFeedHandle::Prices(feed),
                frames,
            },
        );
    }

    tokio::spawn(run_event_stream(
        device,
        dispatcher.clone(),
        Duration::from_millis(config.device.reconnect_delay_ms),
        move || {
            for feed in &feature_feeds {
                feed.invalidate();
            }
        },
    ));

    // Create application state
    let state = Arc::new(AppState {
        charts,
        dispatcher,
        commands: CommandService::new(api),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/features", get(list_features))
        .route("/charts/:feature", get(get_chart))
        .route("/charts/:feature/stream", get(stream_chart))
        .route("/charts/:feature/view", put(select_view))
        .route("/charts/:feature/visibility", put(notify_visibility))
        .route("/state/*key", get(get_state))
        .route("/commands/*key", post(save_config))
        .route("/actions/*key", post(run_action))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen))?;
    tracing::info!("Starting warp-chart-feed on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
