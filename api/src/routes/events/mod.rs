pub mod events_route;
