//! Request boundary: builds a `SystemContext` from each HTTP request and
//! keeps it installed in the context cell while the request is handled.
//!
//! The record lives in a [`ContextScope`](baton_core::ContextScope) around
//! the inner service's future, so it is present on whichever runtime thread
//! polls the handler and is gone from that thread between polls. When the
//! response is ready the record is dropped with the scope; nothing is left
//! behind on the runtime threads, including when the handler fails.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use baton_core::{ContextCell, Snapshot, SystemContext};
use chrono::Utc;
use tower::{Layer, Service};
use tracing::{debug, info};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";

/// Headers consulted for the client address, most specific first. Proxies
/// disagree on naming, so several conventions are accepted.
const CLIENT_IP_HEADERS: [&str; 5] = [
    "x-forwarded-for",
    "proxy-client-ip",
    "wl-proxy-client-ip",
    "http_client_ip",
    "http_x_forwarded_for",
];

const UNKNOWN: &str = "unknown";

// ---------------------------------------------------------------------------
// ContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that installs a per-request context around the inner service.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextLayer {
    cell: ContextCell,
}

impl ContextLayer {
    #[must_use]
    pub fn new(cell: ContextCell) -> Self {
        Self { cell }
    }
}

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService {
            inner,
            cell: self.cell,
        }
    }
}

// ---------------------------------------------------------------------------
// ContextService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`ContextLayer`].
#[derive(Debug, Clone)]
pub struct ContextService<S> {
    inner: S,
    cell: ContextCell,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ContextService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + 'static,
    S::Future: Send + 'static,
    ReqBody: 'static,
    ResBody: 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut ctx = context_from_request(&req);
        let (request_id, generated) = ctx.request_id_or_generate();
        let request_id = request_id.to_owned();

        info!(
            request_id = %request_id,
            generated,
            client_ip = ctx.client_ip().unwrap_or(UNKNOWN),
            path = ctx.request_path().unwrap_or_default(),
            method = ctx.request_method().unwrap_or_default(),
            "Request context initialized"
        );

        // The inner call may already run request code (routing, extractors),
        // so the record is installed for it as well.
        let guard = Snapshot::new(self.cell, ctx).install();
        let fut = self.inner.call(req);
        let ctx = guard.finish().unwrap_or_else(SystemContext::create_default);
        let scoped = self.cell.scope(ctx, fut);

        Box::pin(async move {
            let result = scoped.await;
            debug!(request_id = %request_id, "Request context cleared");
            let mut response = result?;
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
            Ok(response)
        })
    }
}

// ---------------------------------------------------------------------------
// Record construction
// ---------------------------------------------------------------------------

/// Builds the context record for `req`. The request id is taken from the
/// `X-Request-ID` header when present and left unset otherwise.
#[must_use]
pub fn context_from_request<B>(req: &Request<B>) -> SystemContext {
    let headers = req.headers();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let mut ctx = SystemContext::create_default()
        .with_client_ip(resolve_client_ip(headers, peer.as_deref()))
        .with_request_path(req.uri().path())
        .with_request_method(req.method().as_str());
    ctx.set_request_time(Utc::now());

    if let Some(request_id) = header_str(headers, REQUEST_ID_HEADER) {
        ctx.set_request_id(request_id);
    }
    if let Some(user_agent) = header_str(headers, axum::http::header::USER_AGENT.as_str()) {
        ctx.set_user_agent(user_agent);
    }
    if let Some(user_id) = header_str(headers, USER_ID_HEADER) {
        ctx.set_user_id(user_id);
    }
    if let Some(username) = header_str(headers, USERNAME_HEADER) {
        ctx.set_username(username);
    }
    ctx
}

/// Resolves the client address from proxy headers, falling back to the
/// peer address and finally to `"unknown"`.
///
/// A header is skipped when blank or literally `unknown`. Comma-separated
/// lists (as appended by proxy chains) yield their first entry.
#[must_use]
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<&str>) -> String {
    let candidate = CLIENT_IP_HEADERS
        .iter()
        .filter_map(|name| header_str(headers, name))
        .chain(peer)
        .find(|value| !value.eq_ignore_ascii_case(UNKNOWN));

    match candidate {
        Some(value) => value
            .split(',')
            .next()
            .map(str::trim)
            .filter(|first| !first.is_empty())
            .unwrap_or(UNKNOWN)
            .to_owned(),
        None => UNKNOWN.to_owned(),
    }
}

/// Non-blank, trimmed value of a header, if it is valid text.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
