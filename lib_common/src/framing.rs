//! Framing buffer (C3): per-connection DNS-over-TCP reassembly state.
//!
//! Implements the RFC 7766 2-byte length prefix followed by that many DNS
//! bytes. Grounded on `lib_common/src/core/memory_guard.rs`'s plain struct
//! + explicit method style for small mutable per-connection state.

use crate::error::FramingError;

/// Minimum valid DNS message size: a bare 12-byte header.
pub const MIN_QUERY_LEN: u16 = 12;

/// Maximum valid DNS-over-TCP message size.
pub const MAX_QUERY_LEN: u16 = 65535;

/// Validates a declared query length against the RFC 7766 bounds.
pub fn validate_size(qlen: u16) -> Result<(), FramingError> {
    if qlen < MIN_QUERY_LEN {
        return Err(FramingError::InvalidLength(qlen));
    }
    Ok(())
}

/// Per-connection reassembly state for pipelined DNS-over-TCP queries.
///
/// Lifecycle: created at connection accept; `qlen_buf` resets on every
/// completed query; `qbody` is freed on reset and reallocated on the next
/// length prefix.
#[derive(Debug, Default)]
pub struct FramingBuffer {
    qlen_buf: [u8; 2],
    qlen_off: usize,
    qbody: Option<Vec<u8>>,
    qbody_off: usize,
}

/// Outcome of feeding one chunk of bytes into a `FramingBuffer`.
pub enum FillOutcome {
    /// More data is needed before a query completes.
    NeedMore,
    /// One complete query body, plus whatever tail bytes (if any) of the
    /// input chunk were not consumed — belonging to the next query and to
    /// be re-fed recursively.
    Complete { body: Vec<u8>, tail: Vec<u8> },
}

impl FramingBuffer {
    /// A freshly reset buffer, ready to receive a length prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `qbody` to exactly `sz` bytes, once. A no-op if already
    /// allocated (idempotent per spec's `allocOnce`).
    fn alloc_once(&mut self, sz: usize) {
        if self.qbody.is_none() {
            self.qbody = Some(vec![0u8; sz]);
            self.qbody_off = 0;
        }
    }

    /// Returns the completed body, clears `qbody` and both offsets. After
    /// this call `qlen_off == 0 && qbody.is_none()`.
    pub fn reset(&mut self) -> Vec<u8> {
        self.qlen_off = 0;
        self.qbody_off = 0;
        self.qbody.take().unwrap_or_default()
    }

    /// Feeds one chunk through the fill/parse/alloc/fill/tail algorithm
    /// (spec §4.7 steps 1-5). The caller is responsible for re-invoking
    /// this with the returned tail to handle pipelined queries, and for
    /// closing the socket on `Err`.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<FillOutcome, FramingError> {
        let mut cursor = 0usize;

        // Step 1: fill length prefix.
        if self.qlen_off < 2 {
            let need = 2 - self.qlen_off;
            let take = need.min(chunk.len() - cursor);
            self.qlen_buf[self.qlen_off..self.qlen_off + take]
                .copy_from_slice(&chunk[cursor..cursor + take]);
            self.qlen_off += take;
            cursor += take;
            if self.qlen_off < 2 {
                return Ok(FillOutcome::NeedMore);
            }
        }

        // Step 2: parse length.
        let qlen = u16::from_be_bytes(self.qlen_buf);
        validate_size(qlen)?;

        // Step 3: allocate body (once).
        self.alloc_once(qlen as usize);
        let body_len = qlen as usize;

        // Step 4: fill body.
        let remaining_in_chunk = chunk.len().saturating_sub(cursor);
        let need = body_len - self.qbody_off;
        let take = need.min(remaining_in_chunk);
        if take > 0 {
            let body = self.qbody.as_mut().expect("allocated above");
            body[self.qbody_off..self.qbody_off + take]
                .copy_from_slice(&chunk[cursor..cursor + take]);
            self.qbody_off += take;
            cursor += take;
        }

        if self.qbody_off < body_len {
            return Ok(FillOutcome::NeedMore);
        }

        let body = self.reset();
        // Step 5: any bytes beyond the body are the next query's head.
        let tail = chunk[cursor..].to_vec();
        Ok(FillOutcome::Complete { body, tail })
    }
}
