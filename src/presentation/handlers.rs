// HTTP request handlers
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::application::feature_feed::FeedPhase;
use crate::domain::frame::ChartView;
use crate::presentation::app_state::{AppState, ChartEntry};

#[derive(Debug, Serialize)]
pub struct ViewStatus {
    pub view: ChartView,
    #[serde(flatten)]
    pub phase: FeedPhase,
}

#[derive(Debug, Serialize)]
pub struct FeatureInfo {
    pub name: String,
    pub labels: Vec<String>,
    pub active_view: ChartView,
    pub views: Vec<ViewStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ViewRequest {
    pub view: ChartView,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub view: ChartView,
    pub visible: bool,
}

fn find_chart<'a>(state: &'a AppState, feature: &str) -> Result<&'a ChartEntry, Response> {
    state.charts.get(feature).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown feature {feature}")})),
        )
            .into_response()
    })
}

fn bad_request(error: impl ToString) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": error.to_string()}))).into_response()
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Configured charts with their labels and per-view status
pub async fn list_features(State(state): State<Arc<AppState>>) -> Json<Vec<FeatureInfo>> {
    let features = state
        .charts
        .iter()
        .map(|(name, entry)| FeatureInfo {
            name: name.clone(),
            labels: entry.feed.labels(),
            active_view: entry.feed.active_view(),
            views: entry
                .feed
                .views()
                .iter()
                .map(|&view| ViewStatus {
                    view,
                    phase: entry.feed.phase(view),
                })
                .collect(),
        })
        .collect();

    Json(features)
}

/// Latest rendered frame of the active view
pub async fn get_chart(Path(feature): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let entry = match find_chart(&state, &feature) {
        Ok(entry) => entry,
        Err(response) => return response,
    };

    match entry.current_frame() {
        Some(frame) => Json(frame).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "loading"}))).into_response(),
    }
}

/// Server-sent events, one per rendered frame
pub async fn stream_chart(
    Path(feature): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    let entry = find_chart(&state, &feature)?;

    let events = WatchStream::new(entry.frames.clone()).filter_map(|frame| {
        let frame = frame?;
        match Event::default().event("frame").json_data(&frame) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!("Could not encode frame of {}: {}", frame.feature, e);
                None
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub async fn select_view(
    Path(feature): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<ViewRequest>,
) -> Response {
    let entry = match find_chart(&state, &feature) {
        Ok(entry) => entry,
        Err(response) => return response,
    };

    match entry.feed.select_view(request.view) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => bad_request(e),
    }
}

pub async fn notify_visibility(
    Path(feature): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<VisibilityRequest>,
) -> Response {
    let entry = match find_chart(&state, &feature) {
        Ok(entry) => entry,
        Err(response) => return response,
    };

    match entry.feed.notify_visibility(request.view, request.visible) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => bad_request(e),
    }
}

/// Latest pushed payload of a topic such as `soc/state`
pub async fn get_state(Path(key): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let key = key.trim_start_matches('/');
    match state.dispatcher.latest(key) {
        Some(payload) => Json(payload.as_ref().clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Save a configuration object on the device
pub async fn save_config(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Response {
    let key = key.trim_start_matches('/');
    match state.commands.save(key, &payload, &format!("Saving {key} failed")).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}

/// Trigger a device action
pub async fn run_action(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Response {
    let key = key.trim_start_matches('/');
    match state.commands.call(key, &payload, &format!("{key} failed")).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}
