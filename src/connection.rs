//! The SCP connection engine: request scheduling, bulk fragmentation,
//!  response dispatch, retry/timeout handling and teardown.
//!
//! All mutable state lives in a single `ConnInner` behind one lock. Event
//!  handlers (API calls, send completions, timer expiries, datagram
//!  arrivals) lock the state, run to completion, and collect the user
//!  callbacks they triggered; the callbacks are fired only after the lock is
//!  released, so a callback may freely re-enter the API.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Weak};

use bytes::{BufMut, BytesMut};
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::buffers::FixedBuf;
use crate::config::ConnectionConfig;
use crate::error::ScpError;
use crate::request::{
    BulkCallback, BulkKind, CloseCallback, Destination, Request, ScpResponse, SingleCallback,
};
use crate::request_queue::RequestQueue;
use crate::send_socket::ScpSocket;
use crate::slot::{Slot, SlotKind};
use crate::wire;

/// A connection to a single SCP endpoint, multiplexing many outstanding
///  requests over one UDP socket.
///
/// Requests are submitted with [`send_scp`](Connection::send_scp),
///  [`read`](Connection::read) and [`write`](Connection::write); each
///  completes with exactly one callback. The connection parameters are
///  frozen at creation (see [`ConnectionConfig`]).
pub struct Connection {
    inner: Arc<Mutex<ConnInner>>,
    recv_task: JoinHandle<()>,
}

/// The buffer and one-shot completion callback of a bulk request, shared by
///  all of its fragments and keyed by bulk id in the connection.
struct BulkState {
    buffer: FixedBuf,
    callback: Option<BulkCallback>,
}

/// A user callback collected while the engine lock was held, to be fired
///  after it is released.
enum Completion {
    Single {
        callback: SingleCallback,
        result: Result<ScpResponse, ScpError>,
        data: FixedBuf,
    },
    Bulk {
        callback: BulkCallback,
        result: Result<(), ScpError>,
        data: FixedBuf,
    },
    Close {
        callback: CloseCallback,
    },
}

impl Completion {
    fn fire(self) {
        match self {
            Completion::Single {
                callback,
                result,
                data,
            } => callback(result, data),
            Completion::Bulk {
                callback,
                result,
                data,
            } => callback(result, data),
            Completion::Close { callback } => callback(),
        }
    }
}

struct ConnInner {
    config: ConnectionConfig,
    socket: Arc<dyn ScpSocket>,
    /// Self-reference handed to spawned send and timer tasks so their
    ///  completions can re-enter the engine.
    handle: Weak<Mutex<ConnInner>>,
    queue: RequestQueue<Request>,
    slots: Vec<Slot>,
    /// Buffers and callbacks of bulk requests with fragments in the queue or
    ///  in flight.
    bulks: FxHashMap<u64, BulkState>,
    next_seq_num: u16,
    next_bulk_id: u64,
    closing: bool,
    close_callback: Option<CloseCallback>,
}

impl Connection {
    /// Open a connection to `remote`.
    ///
    /// Binds a fresh local UDP socket of the matching address family and
    ///  starts the receive loop on the current tokio runtime.
    pub async fn open(remote: SocketAddr, config: ConnectionConfig) -> anyhow::Result<Connection> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        debug!(
            "opened SCP connection to {:?} from {:?}",
            remote,
            socket.local_addr()?
        );
        Self::with_socket(Arc::new(socket), config)
    }

    /// Create a connection over an already-connected socket (or any other
    ///  [`ScpSocket`] implementation). Must be called from within a tokio
    ///  runtime.
    pub fn with_socket(
        socket: Arc<dyn ScpSocket>,
        config: ConnectionConfig,
    ) -> anyhow::Result<Connection> {
        config.validate()?;

        let n_outstanding = config.n_outstanding;
        let padding = if config.frame_padding { 2 } else { 0 };
        let recv_buf_len = padding + wire::scp_packet_len(3, config.scp_data_len);

        let inner = Arc::new_cyclic(|handle: &Weak<Mutex<ConnInner>>| {
            Mutex::new(ConnInner {
                handle: handle.clone(),
                socket: socket.clone(),
                queue: RequestQueue::new(),
                slots: (0..n_outstanding).map(|_| Slot::new()).collect(),
                bulks: FxHashMap::default(),
                next_seq_num: 0,
                next_bulk_id: 0,
                closing: false,
                close_callback: None,
                config,
            })
        });

        let recv_task = tokio::spawn(recv_loop(Arc::downgrade(&inner), socket, recv_buf_len));
        Ok(Connection { inner, recv_task })
    }

    /// Queue up a single SCP command.
    ///
    /// The buffer's length is the request payload (silently truncated to the
    ///  configured data field length on the wire); its capacity bounds the
    ///  response payload, which is written into the buffer in place. At most
    ///  three arguments can be sent or received.
    ///
    /// Once teardown has begun the request is rejected: its callback is
    ///  invoked with [`ScpError::Closed`] (handing the buffer back) and the
    ///  same error is returned.
    pub async fn send_scp(
        &self,
        dest: Destination,
        cmd: u16,
        n_args_send: u8,
        n_args_recv: u8,
        args: [u32; 3],
        data: FixedBuf,
        callback: SingleCallback,
    ) -> Result<(), ScpError> {
        let mut completions = Vec::new();
        let result = {
            let mut inner = self.inner.lock().await;
            if inner.closing {
                completions.push(Completion::Single {
                    callback,
                    result: Err(ScpError::Closed),
                    data,
                });
                Err(ScpError::Closed)
            } else {
                inner.queue.insert(Request::Single {
                    dest,
                    cmd,
                    n_args_send: n_args_send.min(3),
                    n_args_recv: n_args_recv.min(3),
                    args,
                    data,
                    callback,
                });
                inner.process_queue(&mut completions);
                Ok(())
            }
        };
        for completion in completions {
            completion.fire();
        }
        result
    }

    /// Queue up a bulk write of `data` to `address` on the remote. The
    ///  buffer's length is the amount to write.
    pub async fn write(
        &self,
        dest: Destination,
        address: u32,
        data: FixedBuf,
        callback: BulkCallback,
    ) -> Result<(), ScpError> {
        self.submit_bulk(BulkKind::Write, dest, address, data, callback)
            .await
    }

    /// Queue up a bulk read from `address` on the remote. The buffer's
    ///  length determines how many bytes to read; the received bytes are
    ///  written into the buffer in place.
    pub async fn read(
        &self,
        dest: Destination,
        address: u32,
        data: FixedBuf,
        callback: BulkCallback,
    ) -> Result<(), ScpError> {
        self.submit_bulk(BulkKind::Read, dest, address, data, callback)
            .await
    }

    async fn submit_bulk(
        &self,
        kind: BulkKind,
        dest: Destination,
        address: u32,
        data: FixedBuf,
        callback: BulkCallback,
    ) -> Result<(), ScpError> {
        let mut completions = Vec::new();
        let result = {
            let mut inner = self.inner.lock().await;
            if inner.closing {
                completions.push(Completion::Bulk {
                    callback,
                    result: Err(ScpError::Closed),
                    data,
                });
                Err(ScpError::Closed)
            } else if data.is_empty() {
                // a zero-length transfer completes without touching the wire
                completions.push(Completion::Bulk {
                    callback,
                    result: Ok(()),
                    data,
                });
                Ok(())
            } else {
                let id = inner.next_bulk_id;
                inner.next_bulk_id += 1;
                let remaining = data.len();
                inner.bulks.insert(
                    id,
                    BulkState {
                        buffer: data,
                        callback: Some(callback),
                    },
                );
                inner.queue.insert(Request::Bulk {
                    kind,
                    dest,
                    id,
                    address,
                    offset: 0,
                    remaining,
                });
                inner.process_queue(&mut completions);
                Ok(())
            }
        };
        for completion in completions {
            completion.fire();
        }
        result
    }

    /// Tear the connection down.
    ///
    /// Every in-flight and queued request is cancelled with
    ///  [`ScpError::Closed`]; once the I/O substrate has released all
    ///  pending sends the connection's resources are reclaimed and
    ///  `callback` (if any) is invoked exactly once. Closing an
    ///  already-closing connection is harmless.
    pub async fn close(&self, callback: Option<CloseCallback>) {
        self.recv_task.abort();

        let mut completions = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            debug!(
                "closing SCP connection ({} queued requests)",
                inner.queue.len()
            );
            inner.closing = true;
            if let Some(callback) = callback {
                inner.close_callback = Some(callback);
            }
            for idx in 0..inner.slots.len() {
                inner.cancel_slot(idx, ScpError::Closed, &mut completions);
            }
            while let Some(request) = inner.queue.remove() {
                inner.cancel_queued(request, ScpError::Closed, &mut completions);
            }
            inner.try_finish_close(&mut completions);
        }
        for completion in completions {
            completion.fire();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn recv_loop(conn: Weak<Mutex<ConnInner>>, socket: Arc<dyn ScpSocket>, buf_len: usize) {
    let mut buf = vec![0u8; buf_len];
    loop {
        let num_read = match socket.recv_packet(&mut buf).await {
            Ok(num_read) => num_read,
            Err(e) => {
                error!("socket error: {}", e);
                continue;
            }
        };

        let Some(conn) = conn.upgrade() else {
            return;
        };
        let mut completions = Vec::new();
        conn.lock().await.on_datagram(&buf[..num_read], &mut completions);
        for completion in completions {
            completion.fire();
        }
    }
}

impl ConnInner {
    fn frame_padding_len(&self) -> usize {
        if self.config.frame_padding {
            2
        } else {
            0
        }
    }

    fn packet_capacity(&self) -> usize {
        self.frame_padding_len() + wire::scp_packet_len(3, self.config.scp_data_len)
    }

    fn alloc_seq_num(&mut self) -> u16 {
        let seq_num = self.next_seq_num;
        self.next_seq_num = self.next_seq_num.wrapping_add(1);
        seq_num
    }

    fn head_is_bulk(&self, kind: BulkKind, id: u64) -> bool {
        matches!(
            self.queue.peek(),
            Some(Request::Bulk { kind: k, id: i, .. }) if *k == kind && *i == id
        )
    }

    /// Bind queued requests to free slots and start their transmission until
    ///  either runs out. Invoked after every event that frees a slot or
    ///  inserts a request.
    fn process_queue(&mut self, completions: &mut Vec<Completion>) {
        if self.closing {
            return;
        }
        loop {
            let Some(idx) = self.slots.iter().position(Slot::is_bindable) else {
                return;
            };
            if self.queue.is_empty() {
                return;
            }

            if matches!(self.queue.peek(), Some(Request::Single { .. })) {
                let request = self.queue.remove().expect("peeked queue entry vanished");
                self.bind_single(idx, request);
            } else if self.bind_bulk_fragment(idx) {
                // that was the final fragment; the bulk leaves the queue
                self.queue.remove();
            }

            self.attempt_transmission(idx, completions);
        }
    }

    fn bind_single(&mut self, idx: usize, request: Request) {
        let Request::Single {
            dest,
            cmd,
            n_args_send,
            n_args_recv,
            args,
            data,
            callback,
        } = request
        else {
            unreachable!("bind_single called with a bulk request");
        };

        let seq_num = self.alloc_seq_num();
        trace!(
            "binding command {:#06x} for {:?} to slot {} with seq {}",
            cmd,
            dest,
            idx,
            seq_num
        );

        let mut packet = BytesMut::with_capacity(self.packet_capacity());
        packet.put_bytes(0, self.frame_padding_len());
        wire::pack_packet(
            &mut packet,
            self.config.scp_data_len,
            dest.chip,
            dest.cpu,
            cmd,
            seq_num,
            n_args_send,
            args,
            data.as_ref(),
        );

        let slot = &mut self.slots[idx];
        slot.active = true;
        slot.cancelled = false;
        slot.seq_num = seq_num;
        slot.attempts = 0;
        slot.packet = packet.freeze();
        slot.kind = SlotKind::Single {
            n_args_recv,
            data,
            callback,
        };
    }

    /// Slice the next fragment off the bulk request at the queue head and
    ///  bind it to slot `idx`. Returns true if this was the final fragment.
    fn bind_bulk_fragment(&mut self, idx: usize) -> bool {
        let scp_data_len = self.config.scp_data_len;

        let (kind, dest, id, frag_address, frag_offset, len, done) = {
            let Some(Request::Bulk {
                kind,
                dest,
                id,
                address,
                offset,
                remaining,
            }) = self.queue.peek_mut()
            else {
                unreachable!("bind_bulk_fragment without a bulk request at the queue head");
            };
            let len = (*remaining).min(scp_data_len);
            let frag_address = *address;
            let frag_offset = *offset;
            *address += len as u32;
            *offset += len;
            *remaining -= len;
            (*kind, *dest, *id, frag_address, frag_offset, len, *remaining == 0)
        };

        let seq_num = self.alloc_seq_num();
        let unit = wire::rw_unit(frag_address, len as u32);
        trace!(
            "binding {:?} fragment of bulk {} to slot {} with seq {} (address {:#010x}, {} bytes)",
            kind,
            id,
            idx,
            seq_num,
            frag_address,
            len
        );

        let mut packet = BytesMut::with_capacity(self.packet_capacity());
        packet.put_bytes(0, self.frame_padding_len());
        let args = [frag_address, len as u32, unit as u32];
        match kind {
            BulkKind::Read => wire::pack_packet(
                &mut packet,
                scp_data_len,
                dest.chip,
                dest.cpu,
                wire::CMD_READ,
                seq_num,
                3,
                args,
                &[],
            ),
            BulkKind::Write => {
                let bulk = self
                    .bulks
                    .get(&id)
                    .expect("bulk state missing for a queued write");
                wire::pack_packet(
                    &mut packet,
                    scp_data_len,
                    dest.chip,
                    dest.cpu,
                    wire::CMD_WRITE,
                    seq_num,
                    3,
                    args,
                    &bulk.buffer.as_ref()[frag_offset..frag_offset + len],
                );
            }
        }

        let slot = &mut self.slots[idx];
        slot.active = true;
        slot.cancelled = false;
        slot.seq_num = seq_num;
        slot.attempts = 0;
        slot.packet = packet.freeze();
        slot.kind = SlotKind::Bulk {
            kind,
            id,
            offset: frag_offset,
            len,
        };
        done
    }

    /// Attempt (re-)transmission of the packet bound to slot `idx`, giving
    ///  up with a timeout once the configured attempts are used up.
    fn attempt_transmission(&mut self, idx: usize, completions: &mut Vec<Completion>) {
        {
            let slot = &mut self.slots[idx];
            if !slot.active || slot.cancelled {
                // cancelled in the meantime; callbacks have been dealt with
                return;
            }
            slot.attempts += 1;
        }

        let attempts = self.slots[idx].attempts;
        let seq_num = self.slots[idx].seq_num;
        if attempts > self.config.n_attempts {
            debug!(
                "seq {}: no response after {} attempts - giving up",
                seq_num, self.config.n_attempts
            );
            self.cancel_slot(idx, ScpError::Timeout, completions);
            return;
        }

        trace!(
            "seq {}: transmission attempt {}/{}",
            seq_num,
            attempts,
            self.config.n_attempts
        );
        self.slots[idx].send_in_progress = true;

        let packet = self.slots[idx].packet.clone();
        let socket = self.socket.clone();
        let Some(conn) = self.handle.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let status = socket.send_packet(&packet).await;
            let mut completions = Vec::new();
            conn.lock().await.on_send_complete(idx, status, &mut completions);
            for completion in completions {
                completion.fire();
            }
        });
    }

    /// The UDP send for slot `idx` completed (successfully or not).
    fn on_send_complete(
        &mut self,
        idx: usize,
        status: io::Result<()>,
        completions: &mut Vec<Completion>,
    ) {
        let Some(slot) = self.slots.get_mut(idx) else {
            return;
        };
        slot.send_in_progress = false;

        if self.closing {
            // teardown is waiting for pending sends to drain
            self.try_finish_close(completions);
            return;
        }

        if self.slots[idx].active && self.slots[idx].cancelled {
            // deferred cancellation: the callback already ran when the slot
            //  was cancelled, this send just kept the slot occupied
            self.slots[idx].active = false;
            self.slots[idx].cancelled = false;
            self.process_queue(completions);
            return;
        }

        if !self.slots[idx].active {
            // a response completed the slot while the send was pending; the
            //  slot only now becomes reusable
            self.process_queue(completions);
            return;
        }

        match status {
            Err(e) => {
                debug!(
                    "seq {}: send failed ({}) - cancelling request",
                    self.slots[idx].seq_num, e
                );
                self.cancel_slot(idx, ScpError::from(&e), completions);
            }
            Ok(()) => self.arm_timer(idx),
        }
    }

    /// Arm the per-attempt response timer for slot `idx`.
    fn arm_timer(&mut self, idx: usize) {
        let seq_num = self.slots[idx].seq_num;
        let timeout = self.config.timeout;
        let conn = self.handle.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(conn) = conn.upgrade() else {
                return;
            };
            let mut completions = Vec::new();
            conn.lock().await.on_timer_expired(idx, seq_num, &mut completions);
            for completion in completions {
                completion.fire();
            }
        });
        self.slots[idx].timer = Some(timer);
    }

    /// The response timer for `seq_num` on slot `idx` ran out: retransmit.
    fn on_timer_expired(&mut self, idx: usize, seq_num: u16, completions: &mut Vec<Completion>) {
        let Some(slot) = self.slots.get_mut(idx) else {
            return;
        };
        if !slot.active || slot.cancelled || slot.seq_num != seq_num {
            // stale timer; the slot has moved on
            return;
        }
        slot.timer = None;
        self.attempt_transmission(idx, completions);
    }

    /// A datagram arrived: match it to a slot by sequence number and
    ///  dispatch it. Unmatched or runt datagrams are dropped.
    fn on_datagram(&mut self, datagram: &[u8], completions: &mut Vec<Completion>) {
        let padding = self.frame_padding_len();
        if datagram.len() < padding + wire::MIN_PACKET_LEN {
            debug!("received runt datagram ({} bytes) - dropping", datagram.len());
            return;
        }
        let packet = &datagram[padding..];

        let seq_num = wire::unpack_seq(packet);
        let Some(idx) = self
            .slots
            .iter()
            .position(|s| s.active && !s.cancelled && s.seq_num == seq_num)
        else {
            trace!("received response with unmatched seq {} - dropping", seq_num);
            return;
        };

        self.slots[idx].stop_timer();

        if matches!(self.slots[idx].kind, SlotKind::Single { .. }) {
            self.dispatch_single_response(idx, packet, completions);
        } else {
            self.dispatch_bulk_response(idx, packet, completions);
        }
    }

    fn dispatch_single_response(
        &mut self,
        idx: usize,
        packet: &[u8],
        completions: &mut Vec<Completion>,
    ) {
        let seq_num = self.slots[idx].seq_num;
        let SlotKind::Single {
            n_args_recv,
            mut data,
            callback,
        } = mem::replace(&mut self.slots[idx].kind, SlotKind::Vacant)
        else {
            unreachable!("single dispatch on a non-single slot");
        };

        let unpacked = wire::unpack_packet(packet, n_args_recv);

        // copy the payload into the caller's buffer, truncating to its
        //  capacity
        let len = data.capacity().min(unpacked.payload.len());
        data.set_len(len);
        data.as_mut().copy_from_slice(&unpacked.payload[..len]);

        trace!(
            "seq {}: response delivered (cmd_rc {:#06x}, {} payload bytes)",
            seq_num,
            unpacked.cmd_rc,
            len
        );
        completions.push(Completion::Single {
            callback,
            result: Ok(ScpResponse {
                cmd_rc: unpacked.cmd_rc,
                n_args: unpacked.n_args,
                arg1: unpacked.args[0],
                arg2: unpacked.args[1],
                arg3: unpacked.args[2],
            }),
            data,
        });

        self.slots[idx].active = false;
        self.process_queue(completions);
    }

    fn dispatch_bulk_response(
        &mut self,
        idx: usize,
        packet: &[u8],
        completions: &mut Vec<Completion>,
    ) {
        let &SlotKind::Bulk {
            kind,
            id,
            offset,
            len,
        } = &self.slots[idx].kind
        else {
            unreachable!("bulk dispatch on a non-bulk slot");
        };

        let unpacked = wire::unpack_packet(packet, 0);
        if unpacked.cmd_rc != wire::RC_OK {
            debug!(
                "bulk {}: response carried bad return code {:#06x} - cancelling",
                id, unpacked.cmd_rc
            );
            self.cancel_slot(
                idx,
                ScpError::BadReturnCode {
                    cmd_rc: unpacked.cmd_rc,
                },
                completions,
            );
            return;
        }

        if kind == BulkKind::Read {
            // the copy target is keyed by this fragment's offset, so
            //  out-of-order responses land in the right place
            if let Some(bulk) = self.bulks.get_mut(&id) {
                let n = len.min(unpacked.payload.len());
                bulk.buffer.as_mut()[offset..offset + n].copy_from_slice(&unpacked.payload[..n]);
            }
        }

        // the bulk completes on the last surviving fragment: no other active
        //  slot shares its identity and the queue head is not a continuation
        let last = !self
            .slots
            .iter()
            .enumerate()
            .any(|(i, s)| i != idx && s.active && s.bulk_ident() == Some((kind, id)))
            && !self.head_is_bulk(kind, id);
        if last {
            if let Some(bulk) = self.bulks.remove(&id) {
                if let Some(callback) = bulk.callback {
                    trace!("bulk {} complete", id);
                    completions.push(Completion::Bulk {
                        callback,
                        result: Ok(()),
                        data: bulk.buffer,
                    });
                }
            }
        }

        let slot = &mut self.slots[idx];
        slot.active = false;
        slot.kind = SlotKind::Vacant;
        self.process_queue(completions);
    }

    /// Cancel the in-flight packet in slot `idx`, delivering `error` to its
    ///  request. For bulk fragments the cancellation cascades to sibling
    ///  slots and the queued remainder of the same request; only the last
    ///  sibling to be cancelled raises the user callback.
    fn cancel_slot(&mut self, idx: usize, error: ScpError, completions: &mut Vec<Completion>) {
        {
            let slot = &mut self.slots[idx];
            if !slot.active || slot.cancelled {
                return;
            }
            if slot.send_in_progress {
                // the substrate still owns this slot's send; defer the flip
                //  to inactive until the send completion arrives
                slot.cancelled = true;
            } else {
                slot.active = false;
            }
            slot.stop_timer();
        }
        debug!("cancelling slot {} ({})", idx, error.name());

        match mem::replace(&mut self.slots[idx].kind, SlotKind::Vacant) {
            SlotKind::Vacant => {}
            SlotKind::Single { data, callback, .. } => {
                completions.push(Completion::Single {
                    callback,
                    result: Err(error),
                    data,
                });
            }
            SlotKind::Bulk { kind, id, .. } => {
                let siblings: Vec<usize> = self
                    .slots
                    .iter()
                    .enumerate()
                    .filter(|(i, s)| {
                        *i != idx
                            && s.active
                            && !s.cancelled
                            && s.bulk_ident() == Some((kind, id))
                    })
                    .map(|(i, _)| i)
                    .collect();

                if siblings.is_empty() {
                    if let Some(bulk) = self.bulks.remove(&id) {
                        if let Some(callback) = bulk.callback {
                            completions.push(Completion::Bulk {
                                callback,
                                result: Err(error),
                                data: bulk.buffer,
                            });
                        }
                    }
                }
                for sibling in siblings {
                    self.cancel_slot(sibling, error, completions);
                }

                // stop further fragments of the failed bulk from being
                //  scheduled
                if self.head_is_bulk(kind, id) {
                    self.queue.remove();
                }
            }
        }

        // a slot may have been freed
        self.process_queue(completions);
    }

    /// Deliver a terminal error to a request that never left the queue.
    fn cancel_queued(
        &mut self,
        request: Request,
        error: ScpError,
        completions: &mut Vec<Completion>,
    ) {
        match request {
            Request::Single { data, callback, .. } => completions.push(Completion::Single {
                callback,
                result: Err(error),
                data,
            }),
            Request::Bulk { id, .. } => {
                // if in-flight fragments were cancelled first, the callback
                //  was already taken along with the bulk state
                if let Some(bulk) = self.bulks.remove(&id) {
                    if let Some(callback) = bulk.callback {
                        completions.push(Completion::Bulk {
                            callback,
                            result: Err(error),
                            data: bulk.buffer,
                        });
                    }
                }
            }
        }
    }

    /// Teardown completes only once the substrate has returned every pending
    ///  send; whichever send completion makes that true re-runs this test.
    fn try_finish_close(&mut self, completions: &mut Vec<Completion>) {
        if !self.closing {
            return;
        }
        if self.slots.iter().any(|s| s.send_in_progress) {
            return;
        }

        // release everything the connection holds; the close callback fires
        //  exactly once, after the state is gone
        self.slots.clear();
        self.bulks.clear();
        while self.queue.remove().is_some() {}

        if let Some(callback) = self.close_callback.take() {
            completions.push(Completion::Close { callback });
        }
    }
}
