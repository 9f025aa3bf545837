//! Front-end callbacks the engine consumes.
//!
//! The engine never reaches into the front-end; everything it needs to say
//! travels through these shapes: deferred-operation completion, stat lines,
//! and binary-protocol response packets for engine-specific commands.

use crate::cookie::Cookie;
use crate::status::Status;

/// Services the front-end provides to the engine at creation time.
pub trait ServerApi: Send + Sync {
    /// Complete a previously deferred operation.
    ///
    /// Called exactly once, from an engine thread, for every operation that
    /// returned [`Status::WouldBlock`] and was not cancelled. The front-end
    /// re-drives the original request afterwards.
    fn notify_io_complete(&self, cookie: Cookie, status: Status);
}

/// Callback shape for emitting one statistic.
///
/// Arguments are the stat key, the ASCII value, and the requesting cookie.
pub type AddStat<'a> = dyn FnMut(&[u8], &[u8], Cookie) + 'a;

/// One response packet in the binary-protocol shape.
#[derive(Debug, Clone, Copy)]
pub struct Response<'a> {
    /// Key to echo in the response.
    pub key: &'a [u8],
    /// Extended field contents.
    pub extras: &'a [u8],
    /// Response body.
    pub body: &'a [u8],
    /// Data type. Currently unused, set to 0.
    pub data_type: u8,
    /// Response status code.
    pub status: u16,
    /// CAS value for the return packet.
    pub cas: u64,
}

/// Callback shape for transmitting one response packet.
pub type AddResponse<'a> = dyn FnMut(&Response<'_>, Cookie) + 'a;

/// Fixed header of a binary-protocol request, as handed to
/// engine-specific command handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryRequestHeader {
    /// Magic byte identifying the packet direction.
    pub magic: u8,
    /// Command opcode.
    pub opcode: u8,
    /// Length of the key, in bytes.
    pub key_len: u16,
    /// Length of the extras field, in bytes.
    pub extras_len: u8,
    /// Data type. Currently unused, set to 0.
    pub data_type: u8,
    /// Virtual bucket or status field.
    pub vbucket: u16,
    /// Total body length, in bytes.
    pub body_len: u32,
    /// Opaque value echoed back in the response.
    pub opaque: u32,
    /// CAS value from the request.
    pub cas: u64,
}
