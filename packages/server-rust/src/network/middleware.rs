//! HTTP middleware stack for the Baton server.
//!
//! Layers are listed outermost first: the first layer sees the request
//! first on the way in and the response last on the way out.

use axum::http::{Method, StatusCode};
use baton_core::ContextCell;
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::boundary::ContextLayer;
use super::config::NetworkConfig;

/// The composed layer type produced by [`build_http_layers`], innermost
/// layer in the outermost `Stack`.
type HttpLayers = Stack<
    TimeoutLayer,
    Stack<
        CorsLayer,
        Stack<TraceLayer<SharedClassifier<ServerErrorsAsFailures>>, Stack<ContextLayer, Identity>>,
    >,
>;

/// Builds the HTTP-level middleware stack.
///
/// **Ordering (outermost to innermost):**
/// 1. `Context` -- installs the request context and echoes `X-Request-ID`,
///    so even timeout and CORS responses carry the id
/// 2. `Tracing` -- request/response spans, emitted with the context installed
/// 3. `CORS` -- allowed origins from the configuration
/// 4. `Timeout` -- maximum request processing duration
#[must_use]
pub fn build_http_layers(config: &NetworkConfig, cell: ContextCell) -> HttpLayers {
    ServiceBuilder::new()
        .layer(ContextLayer::new(cell))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .into_inner()
}

/// A wildcard `"*"` allows any origin; otherwise every parseable origin is
/// added to an allowlist.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn build_http_layers_with_defaults() {
        let _layers = build_http_layers(&NetworkConfig::default(), ContextCell::new());
    }

    #[test]
    fn build_http_layers_with_custom_timeout() {
        let config = NetworkConfig {
            request_timeout: Duration::from_secs(5),
            ..NetworkConfig::default()
        };
        let _layers = build_http_layers(&config, ContextCell::new());
    }

    #[test]
    fn build_cors_layer_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "not a header value\n".to_string(),
        ];
        let _cors = build_cors_layer(&origins);
    }
}
