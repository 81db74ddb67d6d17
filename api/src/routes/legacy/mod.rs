pub mod bridge_routes;
