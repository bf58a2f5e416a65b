//! Abstraction over the UDP substrate a connection drives.
//!
//! The engine only needs two operations on an already-connected datagram
//!  socket; putting them behind a trait keeps the I/O part swappable in
//!  tests, where channel-backed fakes stand in for the kernel.

use async_trait::async_trait;
use std::io;
use tokio::net::UdpSocket;

#[async_trait]
pub trait ScpSocket: Send + Sync + 'static {
    /// Send one datagram to the connection's remote endpoint.
    async fn send_packet(&self, packet: &[u8]) -> io::Result<()>;

    /// Receive one datagram, returning the number of bytes written into
    ///  `buf`.
    async fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl ScpSocket for UdpSocket {
    async fn send_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.send(packet).await.map(|_| ())
    }

    async fn recv_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf).await
    }
}
