//! Per-module error enums for the connection front-end.
//!
//! Socket I/O errors are logged and close the socket; they are deliberately
//! *not* propagated as `Result` out of the accept loops (see the design
//! notes on error handling). These types exist for the handful of seams
//! where a caller genuinely needs to distinguish failure modes: framing
//! violations, PROXYv2 parsing, and ticket-key rotation.

use thiserror::Error;

/// Failures from the DNS-over-TCP framing state machine (C3/C7).
#[derive(Debug, Error)]
pub enum FramingError {
    /// The 16-bit length prefix declared a size outside `[12, 65535]`.
    #[error("declared query length {0} is outside the allowed range")]
    InvalidLength(u16),

    /// The body buffer was asked to fill past its allocated size.
    #[error("write of {incoming} bytes would overflow a {allocated}-byte body buffer")]
    Overflow {
        /// Bytes the caller attempted to write.
        incoming: usize,
        /// Size the body buffer was allocated to.
        allocated: usize,
    },
}

/// Failures from the PROXYv2 header parser (C6).
#[derive(Debug, Error)]
pub enum ProxyProtoError {
    /// The signature bytes did not match the PROXYv2 magic.
    #[error("bad PROXYv2 signature")]
    BadSignature,

    /// The version/command nibble was not `0x2x`.
    #[error("unsupported PROXYv2 version/command byte {0:#04x}")]
    UnsupportedVersion(u8),

    /// The address family/transport byte was not one this adapter understands.
    #[error("unsupported PROXYv2 family/protocol byte {0:#04x}")]
    UnsupportedFamily(u8),

    /// The header declared more bytes than the protocol's 216-byte TLV cap.
    #[error("PROXYv2 header length {0} exceeds the maximum of 216 bytes")]
    HeaderTooLarge(u16),

    /// The client closed the connection before a full header arrived.
    #[error("connection closed before a complete PROXYv2 header was received")]
    Truncated,

    /// Writing the unwrapped bytes to the upstream DoT backend failed.
    #[error("upstream write failed: {0}")]
    UpstreamWrite(#[source] std::io::Error),
}

/// Failures from the connection tracker (C2).
#[derive(Debug, Error)]
pub enum TrackerError {
    /// `trackConn` was attempted on a socket with no remote endpoint
    /// (e.g. already disconnected), which is not itself fatal but means
    /// the caller must close the socket without a tracked id.
    #[error("socket has no remote address")]
    NoPeerAddr,
}

/// Failures from the ticket-key rotator (C10). These are logged at `warn!`
/// and never abort the rotation task.
#[derive(Debug, Error)]
pub enum TicketRotationError {
    /// The injected `TicketKeyDeriver` failed.
    #[error("ticket key derivation failed: {0}")]
    Derivation(#[source] anyhow::Error),

    /// Installing the derived key into a listener's TLS config failed.
    #[error("failed to install ticket key on listener {0}")]
    Install(String),
}
