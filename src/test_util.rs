//! Test doubles for the I/O substrate.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::send_socket::ScpSocket;

/// A channel-backed stand-in for the UDP socket: outbound packets land in an
///  inspection channel, inbound packets are injected by the test. The
///  receive side blocks like a real socket would, which is what expectation
///  mocks cannot express.
pub(crate) struct ChannelSocket {
    sent_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    /// When present, every send must acquire a permit before it completes,
    ///  letting tests deliberately hold sends "in flight".
    send_gate: Option<Arc<Semaphore>>,
    send_errors: std::sync::Mutex<VecDeque<io::ErrorKind>>,
}

/// The test-side ends of a [`ChannelSocket`].
pub(crate) struct ChannelSocketHandle {
    pub sent: mpsc::UnboundedReceiver<Vec<u8>>,
    pub inbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSocket {
    pub fn new() -> (Arc<ChannelSocket>, ChannelSocketHandle) {
        Self::with_gate(None)
    }

    pub fn gated(gate: Arc<Semaphore>) -> (Arc<ChannelSocket>, ChannelSocketHandle) {
        Self::with_gate(Some(gate))
    }

    fn with_gate(send_gate: Option<Arc<Semaphore>>) -> (Arc<ChannelSocket>, ChannelSocketHandle) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Arc::new(ChannelSocket {
                sent_tx,
                inbound: Mutex::new(inbound_rx),
                send_gate,
                send_errors: std::sync::Mutex::new(VecDeque::new()),
            }),
            ChannelSocketHandle {
                sent: sent_rx,
                inbound: inbound_tx,
            },
        )
    }

    /// Make the next send fail with the given error kind.
    pub fn fail_next_send(&self, kind: io::ErrorKind) {
        self.send_errors.lock().unwrap().push_back(kind);
    }
}

#[async_trait]
impl ScpSocket for ChannelSocket {
    async fn send_packet(&self, packet: &[u8]) -> io::Result<()> {
        if let Some(gate) = &self.send_gate {
            gate.acquire().await.expect("send gate closed").forget();
        }
        if let Some(kind) = self.send_errors.lock().unwrap().pop_front() {
            return Err(kind.into());
        }
        self.sent_tx.send(packet.to_vec()).ok();
        Ok(())
    }

    async fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.lock().await.recv().await {
            Some(packet) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            // the test side hung up; behave like a socket that never
            //  receives anything again
            None => std::future::pending().await,
        }
    }
}
