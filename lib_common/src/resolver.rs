//! The external resolver contract (A4): the recursive resolver, caching,
//! blocklist evaluation, and upstream transport selection are all out of
//! scope for this crate and live behind this trait. `Resolver` is a black
//! box request/response function over an HTTP-like value, exactly as spec
//! §1/§6 describes it.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};

/// An internal request value bridged from either the DoT pipeline (C7,
/// synthesised as a `POST` to `https://<host>/<flag>`) or the DoH pipeline
/// (C8, carrying the client's actual method/headers/body).
#[derive(Debug, Clone)]
pub struct ResolverRequest {
    /// `POST` for DoT and DoH bodies; forwarded unchanged for DoH `GET`.
    pub method: Method,
    /// `https://<host>/<flag-or-path>`.
    pub url: Uri,
    /// Non-pseudo headers, plus `x-rxid` and (for DoT) `content-length`.
    pub headers: HeaderMap,
    /// The raw DNS query bytes, or empty for DoH `GET`.
    pub body: Bytes,
}

/// An internal response value the resolver hands back: a status code,
/// headers, and an answer body.
#[derive(Debug, Clone)]
pub struct ResolverResponse {
    /// Forwarded verbatim to the DoH client; re-synthesised to a DoT
    /// wire answer for DoT clients (the status itself is not part of the
    /// DoT wire format).
    pub status: StatusCode,
    /// Forwarded verbatim to the DoH client.
    pub headers: HeaderMap,
    /// The DNS answer bytes. An empty body on a DoT request is replaced
    /// by a locally-synthesised SERVFAIL (see `synthesize_servfail`).
    pub body: Bytes,
}

/// The resolver black box: recursive resolution, caching, blocklists, and
/// upstream transport selection all live on the other side of this call.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Handles one request and returns a response. Implementations should
    /// not panic; a resolver error should be surfaced as a non-2xx
    /// `ResolverResponse` rather than an `Err`, since there is no error
    /// channel in the wire contract this trait models.
    async fn handle(&self, query: ResolverRequest) -> ResolverResponse;
}

/// Builds a minimal SERVFAIL answer for `query_id` (the first two bytes
/// of the original DNS query, echoed back), used when the resolver
/// returns an empty body for a DoT request (spec §4.7/§6).
///
/// Produces a 12-byte DNS header: id, flags (QR=1, RA=1, RCODE=2/SERVFAIL),
/// zero counts.
pub fn synthesize_servfail(query: &[u8]) -> Bytes {
    let mut header = [0u8; 12];
    if query.len() >= 2 {
        header[0] = query[0];
        header[1] = query[1];
    }
    header[2] = 0x81; // QR=1, opcode echoed as 0, RD=1
    header[3] = 0x82; // RA=1, RCODE=2 (SERVFAIL)
    Bytes::copy_from_slice(&header)
}
