//! Transport layer abstraction.
//!
//! The protocol engine only ever needs three things from the network: put
//! one datagram on the wire, wait a bounded time for one datagram, and let
//! go of the endpoint. The `Transport` trait captures exactly that, so the
//! same engine runs over a UDP socket or an in-process pair.
//!
//! # Implementations
//!
//! - `UdpTransport`: a tokio UDP socket talking to one peer address
//! - `MemoryTransport`: an in-memory datagram pair for tests and simulations

mod memory;
mod udp;

use std::time::Duration;

use log::{debug, trace};

use crate::MAX_FRAME_SIZE;
use crate::core::Frame;
use crate::error::{Error, Result};

pub use memory::MemoryTransport;
pub use udp::UdpTransport;

/// Datagram transport used by a connection.
///
/// Datagrams may be lost, duplicated or reordered; the engine tolerates
/// all three.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Sends one datagram to the peer.
    async fn send(&mut self, datagram: &[u8]) -> Result<()>;

    /// Waits up to `wait` for one datagram from the peer.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    async fn recv(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>>;

    /// Releases the endpoint. Later calls fail with [`Error::TransportClosed`].
    fn close(&mut self);
}

/// Outcome of one bounded inbound poll.
#[derive(Debug)]
pub enum Inbound {
    /// A frame whose checksums verified.
    Frame(Frame),

    /// A datagram arrived but failed verification.
    Corrupted(Error),

    /// Nothing arrived before the wait elapsed.
    Silent,
}

/// Encodes and sends one frame.
pub async fn send_frame<T: Transport>(transport: &mut T, frame: &Frame) -> Result<()> {
    let bytes = frame.encode()?;
    trace!(
        "-> {:?} seq={} ack={} len={}",
        frame.flags,
        frame.sequence,
        frame.ack,
        frame.payload.len()
    );
    transport.send(&bytes).await
}

/// Polls the transport once and decodes whatever arrived.
///
/// Corruption never escapes as an error: it is reported as
/// [`Inbound::Corrupted`] so callers can drop the datagram.
pub async fn recv_frame<T: Transport>(transport: &mut T, wait: Duration) -> Result<Inbound> {
    let mut buf = [0u8; MAX_FRAME_SIZE];

    let Some(len) = transport.recv(&mut buf, wait).await? else {
        return Ok(Inbound::Silent);
    };

    match Frame::decode(&buf[..len]) {
        Ok(frame) => {
            trace!(
                "<- {:?} seq={} ack={} len={}",
                frame.flags,
                frame.sequence,
                frame.ack,
                frame.payload.len()
            );
            Ok(Inbound::Frame(frame))
        }
        Err(err) if err.is_corruption() => {
            debug!("dropping datagram of {} bytes: {}", len, err);
            Ok(Inbound::Corrupted(err))
        }
        Err(err) => Err(err),
    }
}
