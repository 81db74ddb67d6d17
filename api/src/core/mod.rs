pub mod app_state;
pub mod events;
pub mod http;
