//! Connection front-end for a DNS-over-HTTPS / DNS-over-TLS resolver.
//!
//! This crate holds every piece that is independent of how a concrete
//! binary wires up sockets: stats (C1), the connection tracker (C2), the
//! DoT framing buffer (C3), the SNI matcher (C4), the PROXYv2 adapter
//! (C6), the DoT and DoH pipelines (C7/C8), the admission controller
//! (C9), the ticket-key rotator (C10), and the ambient config/lifecycle/
//! error/resolver-contract scaffolding around them. `servers` binds the
//! actual listeners using these pieces.

pub mod admission;
pub mod config;
pub mod dot;
pub mod doh;
pub mod error;
pub mod framing;
pub mod health;
pub mod lifecycle;
pub mod proxyproto;
pub mod resolver;
pub mod shutdown;
pub mod sni;
pub mod stats;
pub mod ticket;
pub mod tracker;
