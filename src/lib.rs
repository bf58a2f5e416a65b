//! A high-throughput, reliable transport for the SpiNNaker Command Protocol
//!  (SCP), layered on top of unreliable UDP datagrams.
//!
//! One [`Connection`] addresses a single remote endpoint and multiplexes many
//!  outstanding requests over a single UDP socket. Three kinds of request can
//!  be submitted:
//! * a single arbitrary SCP command ([`Connection::send_scp`])
//! * a bulk read of a large byte range ([`Connection::read`])
//! * a bulk write of a large byte range ([`Connection::write`])
//!
//! Bulk reads and writes are transparently split into a stream of
//!  fixed-capacity SCP packets and reassembled; every request completes with
//!  exactly one callback reporting success, a protocol failure or a transport
//!  timeout.
//!
//! ## Design goals
//!
//! * Keep a configurable window of packets in flight at all times so that the
//!   round-trip latency of a single request does not bound throughput
//!   * the window unit is an *outstanding slot*; the slot table has a fixed
//!     width chosen at connection creation
//! * Requests beyond the window wait in an ordered queue that grows in
//!   geometrically-doubling blocks and never shrinks
//! * Responses are matched to slots by a 16-bit sequence number assigned when
//!   a request is bound to a slot; retransmissions reuse the packet bytes and
//!   sequence number of the first attempt
//! * Per-attempt timeouts with a bounded number of attempts; a request that
//!   exhausts its attempts fails with [`ScpError::Timeout`]
//! * A protocol error on any packet of a bulk request cancels the entire bulk
//!   request, including sibling in-flight packets and the queued remainder
//! * Teardown is asynchronous and orderly: it waits for the I/O substrate to
//!   release every in-flight send before resources are reclaimed
//!
//! The engine is single-threaded in the cooperative sense: all state
//!  transitions happen between event dispatches on the runtime driving the
//!  connection, and user callbacks are invoked outside the engine lock so
//!  that they may re-enter the API.
//!
//! ## Wire format
//!
//! Each datagram carries one SCP packet wrapped in an SDP header, all fields
//!  little-endian. An optional two-byte zero framing prefix precedes the SDP
//!  header when the remote's dialect requires it (see
//!  [`ConnectionConfig::frame_padding`]).
//!
//! ```ascii
//! 0:  flags (u8) - always 0x87 outbound, a reply is required
//! 1:  tag (u8) - always 0xFF
//! 2:  dest_port_cpu (u8) - destination CPU number in the low 5 bits
//! 3:  srce_port_cpu (u8) - always 0xFF
//! 4:  dest_addr (u16) - destination chip, x << 8 | y
//! 6:  srce_addr (u16) - always 0
//! 8:  cmd_rc (u16) - command on the way out, return code on the way back
//! 10: seq_num (u16) - the response match key
//! 12: arg1..arg3 (u32 each) - only the first n_args are present; the space
//!      of absent arguments is reclaimed for payload
//! *:  payload - up to the connection's configured data field length
//! ```

pub mod buffers;
pub mod config;
mod connection;
pub mod error;
mod request;
mod request_queue;
pub mod send_socket;
mod slot;
#[cfg(test)]
mod test_util;
pub mod wire;

pub use buffers::FixedBuf;
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use error::ScpError;
pub use request::{BulkCallback, CloseCallback, Destination, ScpResponse, SingleCallback};
