//! A minimal `Resolver` that always returns an empty body, letting the
//! DoT pipeline synthesise its own SERVFAIL and DoH clients see a bare
//! `200` with no payload. Recursive resolution, caching, and blocklists
//! are an external collaborator (`lib_common::resolver::Resolver`) this
//! binary does not implement; this stub exists only so `dns_frontend` is
//! runnable standalone.

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use lib_common::resolver::{Resolver, ResolverRequest, ResolverResponse};

pub struct StubResolver;

#[async_trait]
impl Resolver for StubResolver {
    async fn handle(&self, _query: ResolverRequest) -> ResolverResponse {
        ResolverResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: bytes::Bytes::new(),
        }
    }
}
