//! The client-facing request model: destinations, completion callbacks and
//!  the queue entries built from them.

use crate::buffers::FixedBuf;
use crate::error::ScpError;

/// Where on the SpiNNaker fabric a request is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    /// The chip to address, packed as `x << 8 | y`.
    pub chip: u16,
    /// The CPU number on that chip.
    pub cpu: u8,
}

/// The decoded header fields of a single-command response. The response
///  payload is returned in the request's buffer, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScpResponse {
    pub cmd_rc: u16,
    /// The number of arguments actually decoded; arguments beyond this count
    ///  are zero.
    pub n_args: u8,
    pub arg1: u32,
    pub arg2: u32,
    pub arg3: u32,
}

/// Completion callback of a single-command request. Receives the outcome and
///  the request's buffer; on success the buffer holds the response payload,
///  on failure its contents are unspecified.
pub type SingleCallback = Box<dyn FnOnce(Result<ScpResponse, ScpError>, FixedBuf) + Send + 'static>;

/// Completion callback of a bulk read or write. Receives the outcome and the
///  original buffer; for reads the buffer holds the received bytes on
///  success.
pub type BulkCallback = Box<dyn FnOnce(Result<(), ScpError>, FixedBuf) + Send + 'static>;

/// Callback invoked once connection teardown has fully completed.
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Distinguishes the two bulk directions; fragments only belong to the same
///  bulk request if both the direction and the id match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BulkKind {
    Read,
    Write,
}

/// An entry in the request queue.
///
/// Bulk entries carry a moving cursor `(address, offset, remaining)` which
///  the fragmenter advances in place while the entry sits at the queue head;
///  the bulk buffer itself lives in the connection's bulk table, keyed by
///  `id`.
pub(crate) enum Request {
    Single {
        dest: Destination,
        cmd: u16,
        n_args_send: u8,
        n_args_recv: u8,
        args: [u32; 3],
        data: FixedBuf,
        callback: SingleCallback,
    },
    Bulk {
        kind: BulkKind,
        dest: Destination,
        id: u64,
        address: u32,
        offset: usize,
        remaining: usize,
    },
}
