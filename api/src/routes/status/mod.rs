pub mod engine_status_route;
pub mod health_route;
