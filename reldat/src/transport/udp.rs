use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use super::Transport;
use crate::error::{Error, Result};

/// UDP transport bound to an ephemeral local port and addressed to one peer.
///
/// The socket is left unconnected so that a peer replying from a different
/// local interface is still heard; datagrams from any other address are
/// dropped.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Binds an ephemeral socket of the peer's address family.
    pub async fn bind(peer: SocketAddr) -> Result<Self> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        debug!("udp transport {} -> {}", socket.local_addr()?, peer);

        Ok(Self::from_socket(socket, peer))
    }

    /// Wraps an already bound socket.
    pub fn from_socket(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket: Some(socket),
            peer,
        }
    }

    /// Returns the socket, if still open, for reuse with another peer.
    pub fn into_socket(self) -> Option<UdpSocket> {
        self.socket
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket()?.local_addr()?)
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket.as_ref().ok_or(Error::TransportClosed)
    }
}

impl Transport for UdpTransport {
    async fn send(&mut self, datagram: &[u8]) -> Result<()> {
        self.socket()?.send_to(datagram, self.peer).await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>> {
        let socket = self.socket()?;
        let deadline = Instant::now() + wait;

        loop {
            match timeout_at(deadline, socket.recv_from(buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok((len, from))) if from == self.peer => return Ok(Some(len)),
                Ok(Ok((_, from))) => debug!("ignoring datagram from {}", from),
                Ok(Err(err)) => return Err(err.into()),
            }
        }
    }

    fn close(&mut self) {
        self.socket = None;
    }
}
