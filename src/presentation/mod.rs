// Presentation layer - HTTP surface for chart hosts
pub mod app_state;
pub mod handlers;
