//! Packing and unpacking of SCP packets (wrapped in SDP headers) to and from
//!  raw datagram bytes, plus the command constants the transport itself needs.
//!
//! All multi-byte fields are little-endian on the wire. These functions do
//!  not allocate and do not validate beyond what their callers guarantee
//!  about buffer lengths.

use bytes::{Buf, BufMut};

/// Number of bytes in an SDP packet header.
pub const SDP_HEADER_LEN: usize = 8;

/// Number of bytes in an SCP packet header carrying `n_args` arguments.
pub const fn scp_header_len(n_args: usize) -> usize {
    4 + 4 * n_args
}

/// Number of bytes consumed by a complete SCP packet wrapped in an SDP
///  packet.
pub const fn scp_packet_len(n_args: usize, data_len: usize) -> usize {
    SDP_HEADER_LEN + scp_header_len(n_args) + data_len
}

/// The shortest well-formed packet: SDP header plus an argument-less SCP
///  header.
pub const MIN_PACKET_LEN: usize = scp_packet_len(0, 0);

/// Read a block of memory from the remote.
pub const CMD_READ: u16 = 2;
/// Write a block of memory on the remote.
pub const CMD_WRITE: u16 = 3;
/// The return code signalling success.
pub const RC_OK: u16 = 0x80;

/// Transfer unit of a CMD_READ/CMD_WRITE packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwUnit {
    Byte = 0,
    Short = 1,
    Word = 2,
}

/// Select the largest transfer unit suitable for a read/write of `length`
///  bytes starting at `address`.
pub fn rw_unit(address: u32, length: u32) -> RwUnit {
    if address % 4 == 0 && length % 4 == 0 {
        RwUnit::Word
    } else if address % 2 == 0 && length % 2 == 0 {
        RwUnit::Short
    } else {
        RwUnit::Byte
    }
}

/// Pack an SCP packet into `buf`.
///
/// Only the first `n_args` arguments are placed on the wire; the payload
///  follows immediately after them and is truncated to `scp_data_len` bytes.
pub fn pack_packet(
    buf: &mut impl BufMut,
    scp_data_len: usize,
    dest_addr: u16,
    dest_cpu: u8,
    cmd_rc: u16,
    seq_num: u16,
    n_args: u8,
    args: [u32; 3],
    payload: &[u8],
) {
    debug_assert!(n_args <= 3);

    // SDP header
    buf.put_u8(0x87); // flags: always require a reply
    buf.put_u8(0xFF); // tag
    buf.put_u8(dest_cpu & 0x1F); // port zero
    buf.put_u8(0xFF); // srce_port_cpu
    buf.put_u16_le(dest_addr);
    buf.put_u16_le(0); // srce_addr: (0, 0)

    // SCP header
    buf.put_u16_le(cmd_rc);
    buf.put_u16_le(seq_num);
    for arg in args.iter().take(n_args as usize) {
        buf.put_u32_le(*arg);
    }

    let len = payload.len().min(scp_data_len);
    buf.put_slice(&payload[..len]);
}

/// Extract the sequence number from a packed SCP packet.
///
/// The caller must have checked that `packet` is at least [`MIN_PACKET_LEN`]
///  bytes long.
pub fn unpack_seq(packet: &[u8]) -> u16 {
    (&packet[10..12]).get_u16_le()
}

/// The decoded fields of an SCP packet; the payload borrows from the packet
///  buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Unpacked<'a> {
    pub cmd_rc: u16,
    pub seq_num: u16,
    pub n_args: u8,
    pub args: [u32; 3],
    pub payload: &'a [u8],
}

/// Unpack an SCP packet.
///
/// `n_args_wanted` is the ideal number of arguments to decode; it is clamped
///  down to what the packet length permits, and the clamped count is returned
///  in the result. Arguments beyond the clamped count are zero. The caller
///  must have checked that `packet` is at least [`MIN_PACKET_LEN`] bytes
///  long.
pub fn unpack_packet(packet: &[u8], n_args_wanted: u8) -> Unpacked<'_> {
    debug_assert!(n_args_wanted <= 3);
    debug_assert!(packet.len() >= MIN_PACKET_LEN);

    let mut header = &packet[SDP_HEADER_LEN..];
    let cmd_rc = header.get_u16_le();
    let seq_num = header.get_u16_le();

    // only arguments that are fully present in the packet count
    let max_args = ((packet.len() - MIN_PACKET_LEN) / 4).min(3) as u8;
    let n_args = n_args_wanted.min(max_args);

    let mut args = [0u32; 3];
    for arg in args.iter_mut().take(n_args as usize) {
        *arg = header.get_u32_le();
    }

    Unpacked {
        cmd_rc,
        seq_num,
        n_args,
        args,
        payload: &packet[scp_packet_len(n_args as usize, 0)..],
    }
}
