// Application layer - Buffers, chart feeds and use cases
pub mod bootstrap;
pub mod chart_feed;
pub mod clock;
pub mod command_service;
pub mod device_api;
pub mod dispatcher;
pub mod feature_feed;
pub mod price_feed;
pub mod rolling_buffer;
