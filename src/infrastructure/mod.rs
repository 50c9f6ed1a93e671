// Infrastructure layer - Device HTTP client, push stream, config and sinks
pub mod config;
pub mod event_stream;
pub mod frame_sink;
pub mod http_device;
