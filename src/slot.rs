//! The outstanding-slot table's element type.
//!
//! A slot holds the full in-flight state of one packet: the frozen wire
//!  image (reused byte-for-byte on retransmission), the retry counter, the
//!  timeout timer and the request bookkeeping needed to complete or cancel
//!  it. Slots are created once at connection creation and reused for many
//!  packets; `active` is the membership predicate of the table.

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::buffers::FixedBuf;
use crate::request::{BulkKind, SingleCallback};

pub(crate) struct Slot {
    /// True iff the slot holds an in-flight packet.
    pub active: bool,
    /// Latched when cancellation had to be deferred because a send was still
    ///  pending; the send-completion handler performs the flip to inactive.
    pub cancelled: bool,
    /// True while the I/O substrate owns a send for this slot. A slot with a
    ///  pending send must not be rebound even if it is no longer active.
    pub send_in_progress: bool,
    pub seq_num: u16,
    /// Transmission attempts made for the current packet, counting the
    ///  initial attempt.
    pub attempts: u32,
    /// The packed wire bytes (including any framing padding); every attempt
    ///  sends this same image.
    pub packet: Bytes,
    pub timer: Option<JoinHandle<()>>,
    pub kind: SlotKind,
}

pub(crate) enum SlotKind {
    /// The slot is not carrying request state (inactive, or already
    ///  cancelled with the callback taken).
    Vacant,
    Single {
        n_args_recv: u8,
        data: FixedBuf,
        callback: SingleCallback,
    },
    Bulk {
        kind: BulkKind,
        id: u64,
        /// The window of the bulk buffer this fragment covers.
        offset: usize,
        len: usize,
    },
}

impl Slot {
    pub fn new() -> Slot {
        Slot {
            active: false,
            cancelled: false,
            send_in_progress: false,
            seq_num: 0,
            attempts: 0,
            packet: Bytes::new(),
            timer: None,
            kind: SlotKind::Vacant,
        }
    }

    /// A slot can take a new packet only when it is inactive *and* the
    ///  substrate has returned its previous send.
    pub fn is_bindable(&self) -> bool {
        !self.active && !self.send_in_progress
    }

    /// The `(kind, id)` pair identifying the bulk request this slot belongs
    ///  to, if it carries a bulk fragment.
    pub fn bulk_ident(&self) -> Option<(BulkKind, u64)> {
        match self.kind {
            SlotKind::Bulk { kind, id, .. } => Some((kind, id)),
            _ => None,
        }
    }

    pub fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
