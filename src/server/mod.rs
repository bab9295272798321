//! HTTP server wiring: app state, middleware, routes and the builder that
//! assembles them into a running actix-web server.

pub mod builder;
pub mod middleware;
pub mod routes;
pub mod state;

pub use builder::run_server;
pub use state::AppState;
