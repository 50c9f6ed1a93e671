// Domain layer - Sample shapes, rolling series and render frames
pub mod error;
pub mod event;
pub mod frame;
pub mod prices;
pub mod samples;
pub mod series;
pub mod units;
