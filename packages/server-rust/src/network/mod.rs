//! HTTP surface: configuration, request boundary, middleware, handlers,
//! and the server lifecycle.

pub mod boundary;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;

pub use boundary::{context_from_request, resolve_client_ip, ContextLayer, ContextService};
pub use config::NetworkConfig;
pub use handlers::AppState;
pub use module::NetworkModule;
