//! DNS-over-HTTPS pipeline (C8): buffers the request body, constructs an
//! internal request value, invokes the resolver, and streams the answer
//! back.
//!
//! Grounded on `servers/src/server_sql.rs`'s `axum` handler shape (state
//! extraction, body buffering, `IntoResponse` error mapping) generalised
//! from a JSON API to a binary DNS-message bridge.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::framing::{MAX_QUERY_LEN, MIN_QUERY_LEN};
use crate::health::{heartbeat, HeapSnapshotPolicy};
use crate::resolver::{Resolver, ResolverRequest};
use crate::stats::Stats;

/// The concrete status this front-end returns for an oversize DoT-over-HTTP
/// `POST` body (spec §4.8 step 2: "emit the DNS-over-HTTPS status code for
/// oversize").
pub const OVERSIZE_STATUS: StatusCode = StatusCode::PAYLOAD_TOO_LARGE;

/// Shared state for the `axum` DoH handler: the resolver black box, the
/// process-wide counters, and the heap-snapshot gate policy.
pub struct DohContext {
    pub resolver: Arc<dyn Resolver>,
    pub stats: Arc<Stats>,
    pub heap_policy: HeapSnapshotPolicy,
}

/// Brackets a raw IPv6 literal authority (`::1` -> `[::1]`); leaves
/// hostnames and already-bracketed literals untouched.
fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// Pulls the request authority out of the `:authority` pseudo-header
/// (HTTP/2, surfaced on the request `Uri` itself) or the `host` header
/// (HTTP/1.1), the way an `h2c`/`h1` auto-negotiating listener has to
/// since the two protocols disagree on where it lives.
fn authority_from_parts(uri: &http::Uri, headers: &HeaderMap) -> String {
    if let Some(authority) = uri.authority() {
        return authority.as_str().to_string();
    }
    headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default()
}

/// Builds the resolver's request URL from the connection's authority and
/// the request's path (plus query string, for DoH `GET`'s base64 `dns`
/// parameter).
fn build_url(host: &str, path_and_query: &str) -> http::Uri {
    let authority = bracket_ipv6(host);
    format!("https://{authority}{path_and_query}")
        .parse()
        .unwrap_or_else(|_| http::Uri::from_static("https://invalid.example/"))
}

/// The `axum` entry point, wired into the DoH/DoH-cleartext routers.
/// Delegates to `dispatch` for everything past extraction so the pipeline
/// logic is testable without booting a router.
pub async fn doh_handler(
    State(ctx): State<Arc<DohContext>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let host = authority_from_parts(&uri, &headers);
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    dispatch(&ctx, method, &host, path_and_query, headers, body).await
}

/// Core DoH pipeline logic (spec §4.8 steps 1-5).
pub async fn dispatch(
    ctx: &DohContext,
    method: Method,
    host: &str,
    path_and_query: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    heartbeat(&ctx.stats, ctx.heap_policy, ctx.stats.backpressure().max_conns, false, || {});

    if method == Method::POST {
        let len = body.len();
        if len < MIN_QUERY_LEN as usize || len > MAX_QUERY_LEN as usize {
            return OVERSIZE_STATUS.into_response();
        }
    }

    let url = build_url(host, path_and_query);
    let rxid = Uuid::new_v4().to_string();
    let mut fwd_headers = headers;
    fwd_headers.insert(
        "x-rxid",
        http::HeaderValue::from_str(&rxid).unwrap_or_else(|_| http::HeaderValue::from_static("-")),
    );

    let request = ResolverRequest {
        method: method.clone(),
        url,
        headers: fwd_headers,
        body: if method == Method::POST {
            body
        } else {
            Bytes::new()
        },
    };

    let response = ctx.resolver.handle(request).await;

    let mut builder = Response::builder().status(response.status);
    if let Some(hm) = builder.headers_mut() {
        *hm = response.headers;
    }
    if response.body.is_empty() {
        builder
            .body(axum::body::Body::empty())
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    } else {
        builder
            .body(axum::body::Body::from(response.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::HeaderMap as HMap;

    struct EchoResolver;

    #[async_trait]
    impl Resolver for EchoResolver {
        async fn handle(&self, query: ResolverRequest) -> crate::resolver::ResolverResponse {
            crate::resolver::ResolverResponse {
                status: StatusCode::OK,
                headers: HMap::new(),
                body: query.body,
            }
        }
    }

    fn ctx() -> DohContext {
        DohContext {
            resolver: Arc::new(EchoResolver),
            stats: Arc::new(Stats::new()),
            heap_policy: HeapSnapshotPolicy {
                measure_heap: false,
                on_local: true,
                multiplier: 1,
            },
        }
    }

    /// Scenario S4: DoH POST of a 28-byte query to `/flagX`.
    #[tokio::test]
    async fn post_dispatches_with_path_and_body() {
        let c = ctx();
        let body = Bytes::from(vec![1u8; 28]);
        let resp = dispatch(&c, Method::POST, "example.com", "/flagX", HMap::new(), body.clone())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversize_post_is_rejected() {
        let c = ctx();
        let body = Bytes::from(vec![1u8; 5]);
        let resp = dispatch(&c, Method::POST, "example.com", "/flagX", HMap::new(), body).await;
        assert_eq!(resp.status(), OVERSIZE_STATUS);
    }

    #[tokio::test]
    async fn get_forwards_with_empty_body() {
        let c = ctx();
        let resp = dispatch(
            &c,
            Method::GET,
            "example.com",
            "/dns-query?dns=abc",
            HMap::new(),
            Bytes::new(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn ipv6_authority_is_bracketed() {
        let url = build_url("::1", "/flag");
        assert!(url.to_string().starts_with("https://[::1]/flag"));
    }

    #[test]
    fn hostname_authority_is_untouched() {
        let url = build_url("example.com", "/flag");
        assert!(url.to_string().starts_with("https://example.com/flag"));
    }
}
