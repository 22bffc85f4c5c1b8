//! The 17-byte-prefixed frame used on both the Request and Response GATT
//! characteristics.
//!
//! Layout on the wire:
//! `[correlation id: 16 bytes] + [flags: 1 byte] + [payload: variable]`
//!
//! A flat prefix lets a central and the proxy multiplex many concurrent
//! HTTP requests over a single characteristic while remaining stateless at
//! the transport layer: routing is a 16-byte key lookup, nothing more.

use bytes::Bytes;
use thiserror::Error;

/// Length of the correlation ID in bytes.
pub const ID_LEN: usize = 16;

/// Length of the frame header (correlation ID + flags byte).
pub const HEADER_LEN: usize = ID_LEN + 1;

/// Floor applied to the computed payload budget so that even a connection
/// stuck at the BLE baseline MTU (23) can still make forward progress.
///
/// At `ATT_MTU = 23` the naive computation (`23 - 3 - 17 = 3`) would leave
/// too little payload to be useful; the transport honors this floor rather
/// than emit near-empty chunks.
pub const MIN_PAYLOAD: usize = 6;

/// A 16-byte opaque identifier chosen by the central and echoed verbatim in
/// every frame of a request and of its response.
///
/// Treated as opaque bytes throughout the proxy; it is never parsed as text.
pub type CorrelationId = [u8; ID_LEN];

/// Errors from encoding or decoding a [`Frame`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer is shorter than the 17-byte header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum required length.
        expected: usize,
        /// Actual length supplied.
        actual: usize,
    },

    /// A reserved flag bit (anything outside FIRST/LAST) was set.
    #[error("reserved flag bits set: {bits:#04x}")]
    ReservedBitsSet {
        /// The raw flags byte that failed validation.
        bits: u8,
    },

    /// Encoding would exceed the negotiated ATT MTU.
    #[error("frame too large: {size} bytes exceeds budget of {max} for ATT_MTU {att_mtu}")]
    FrameTooLarge {
        /// Total encoded size that was attempted.
        size: usize,
        /// Maximum permitted size under the current MTU.
        max: usize,
        /// The ATT MTU the budget was computed from.
        att_mtu: u16,
    },
}

/// Flags carried in byte 16 of a frame.
///
/// Only bits 0 (FIRST) and 1 (LAST) are defined; all other bits are
/// reserved and must be zero. A single-chunk message sets both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Marks the first frame of a request or response.
    pub const FIRST: u8 = 0x01;
    /// Marks the last frame of a request or response.
    pub const LAST: u8 = 0x02;
    /// Bits outside FIRST/LAST; must be zero on the wire.
    const RESERVED_MASK: u8 = !(Self::FIRST | Self::LAST);

    /// Construct flags from FIRST/LAST booleans.
    #[must_use]
    pub fn new(first: bool, last: bool) -> Self {
        let mut bits = 0u8;
        if first {
            bits |= Self::FIRST;
        }
        if last {
            bits |= Self::LAST;
        }
        Self(bits)
    }

    /// Parse a raw flags byte, rejecting reserved bits.
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        if byte & Self::RESERVED_MASK != 0 {
            return Err(FrameError::ReservedBitsSet { bits: byte });
        }
        Ok(Self(byte))
    }

    /// The raw flags byte.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// Whether this frame opens a new reassembly entry.
    #[must_use]
    pub fn is_first(self) -> bool {
        self.0 & Self::FIRST != 0
    }

    /// Whether this frame completes a reassembly entry.
    #[must_use]
    pub fn is_last(self) -> bool {
        self.0 & Self::LAST != 0
    }
}

/// A single decoded frame: correlation id, flags, and payload chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id this frame belongs to.
    pub id: CorrelationId,
    /// FIRST/LAST flags.
    pub flags: FrameFlags,
    /// Payload chunk (may be empty).
    pub payload: Bytes,
}

impl Frame {
    /// Payload budget in bytes for a given negotiated ATT MTU.
    ///
    /// `ATT_MTU - 3 (ATT header) - 17 (frame header)`, floored at
    /// [`MIN_PAYLOAD`] so the proxy always makes forward progress even at
    /// the BLE baseline MTU of 23.
    #[must_use]
    pub fn mtu_payload(att_mtu: u16) -> usize {
        let overhead = 3 + HEADER_LEN;
        let raw = (att_mtu as isize) - (overhead as isize);
        if raw < MIN_PAYLOAD as isize { MIN_PAYLOAD } else { raw as usize }
    }

    /// Construct a frame, without validating it against an MTU budget.
    #[must_use]
    pub fn new(id: CorrelationId, flags: FrameFlags, payload: impl Into<Bytes>) -> Self {
        Self { id, flags, payload: payload.into() }
    }

    /// Encode a frame, failing if it would exceed the ATT MTU budget.
    ///
    /// The budget is [`Frame::mtu_payload`], the same floored figure the
    /// chunker sizes its payloads against, so anything the chunker produces
    /// for a given `att_mtu` is guaranteed to encode under that same MTU —
    /// including the `MIN_PAYLOAD` floor at the BLE baseline MTU of 23.
    pub fn encode(&self, att_mtu: u16) -> Result<Bytes, FrameError> {
        let budget = Self::mtu_payload(att_mtu);
        let total = HEADER_LEN + self.payload.len();
        let max = HEADER_LEN + budget;

        if self.payload.len() > budget {
            return Err(FrameError::FrameTooLarge { size: total, max, att_mtu });
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&self.id);
        out.push(self.flags.to_byte());
        out.extend_from_slice(&self.payload);
        Ok(Bytes::from(out))
    }

    /// Decode a frame from raw bytes (a single GATT write value).
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::FrameTooShort { expected: HEADER_LEN, actual: bytes.len() });
        }

        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&bytes[..ID_LEN]);

        let flags = FrameFlags::from_byte(bytes[ID_LEN])?;
        let payload = Bytes::copy_from_slice(&bytes[HEADER_LEN..]);

        Ok(Self { id, flags, payload })
    }
}
