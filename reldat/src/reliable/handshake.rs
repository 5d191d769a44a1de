//! Connection open (3-way) and close (4-way) handshakes.
//!
//! ```text
//!   open                               close
//!   ----                               -----
//!   OPEN(window)       ->              CLOSE               ->
//!                 <- OPEN|ACK(window)                 <- CLOSE|ACK
//!   ACK                ->                             <- CLOSE
//!                                      CLOSE|ACK           ->
//! ```
//!
//! Every wait is bounded by the configured timeout. A timeout resends the
//! request and uses up one retry; a corrupted reply resends without using
//! one. Valid frames that are not the awaited reply are ignored.

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::config::Config;
use crate::core::{Frame, SequenceCounter};
use crate::error::{Error, Result, Stage};
use crate::protocol::{ConnectionState, ProtocolStats};
use crate::transport::{Inbound, Transport, recv_frame, send_frame};

/// What the open handshake learned about the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    /// Window size advertised in the peer's OPEN|ACK.
    pub peer_window: u32,

    /// Sequence number of the peer's OPEN|ACK.
    pub peer_sequence: u32,
}

/// Sends a frame and accounts for it.
pub async fn transmit<T: Transport>(
    transport: &mut T,
    stats: &mut ProtocolStats,
    frame: &Frame,
) -> Result<()> {
    send_frame(transport, frame).await?;
    stats.record_sent(frame);
    Ok(())
}

/// Waits for the first frame accepted by `wanted`.
///
/// `resend` is put back on the wire after every timeout and every corrupted
/// datagram. Fails with [`Error::Unreachable`] once `max_retransmissions`
/// timeouts have elapsed.
pub async fn await_reply<T, F>(
    transport: &mut T,
    config: &Config,
    stats: &mut ProtocolStats,
    resend: Option<&Frame>,
    stage: Stage,
    mut wanted: F,
) -> Result<Frame>
where
    T: Transport,
    F: FnMut(&Frame) -> bool,
{
    let mut timeouts = 0;
    let mut deadline = Instant::now() + config.timeout;

    loop {
        let wait = deadline.saturating_duration_since(Instant::now());

        match recv_frame(transport, wait).await? {
            Inbound::Frame(frame) => {
                stats.record_received(&frame);
                if wanted(&frame) {
                    return Ok(frame);
                }
                debug!("{}: ignoring {:?} seq={}", stage, frame.flags, frame.sequence);
            }
            Inbound::Corrupted(_) => {
                stats.corrupted_frames += 1;
                if let Some(frame) = resend {
                    transmit(transport, stats, frame).await?;
                }
                deadline = Instant::now() + config.timeout;
            }
            Inbound::Silent => {
                timeouts += 1;
                if timeouts >= config.max_retransmissions {
                    warn!("{}: no reply after {} timeouts", stage, timeouts);
                    return Err(Error::Unreachable(stage));
                }
                if let Some(frame) = resend {
                    debug!("{}: resending, attempt {}", stage, timeouts);
                    transmit(transport, stats, frame).await?;
                    stats.retransmissions += 1;
                }
                deadline = Instant::now() + config.timeout;
            }
        }
    }
}

/// Runs the open handshake as the initiating side.
pub async fn open<T: Transport>(
    transport: &mut T,
    config: &Config,
    stats: &mut ProtocolStats,
    sequence: &mut SequenceCounter,
    local_window: u32,
) -> Result<Opened> {
    let request = Frame::open(sequence.next(), local_window);
    transmit(transport, stats, &request).await?;

    let reply = await_reply(transport, config, stats, Some(&request), Stage::Open, |f| {
        f.is_open() && f.is_ack()
    })
    .await?;

    let peer_window = reply.window_size()?;
    transmit(transport, stats, &Frame::ack(reply.sequence)).await?;

    info!("connection open, peer window {}", peer_window);
    Ok(Opened {
        peer_window,
        peer_sequence: reply.sequence,
    })
}

/// Runs the close handshake as the initiating side.
///
/// On success the transport has been closed. On failure it is left open so
/// the caller can try again.
pub async fn close<T: Transport>(
    transport: &mut T,
    config: &Config,
    stats: &mut ProtocolStats,
    sequence: &mut SequenceCounter,
    state: &mut ConnectionState,
) -> Result<()> {
    let request = Frame::close(sequence.next());
    transmit(transport, stats, &request).await?;
    *state = ConnectionState::CloseSent;

    // The peer's own CLOSE may overtake its CLOSE|ACK.
    let mut early_close = None;
    await_reply(transport, config, stats, Some(&request), Stage::CloseAck, |f| {
        if f.is_close() && !f.is_ack() {
            early_close = Some(f.sequence);
        }
        f.is_close() && f.is_ack()
    })
    .await?;
    *state = ConnectionState::PeerCloseAwaited;

    let peer_sequence = match early_close {
        Some(seq) => seq,
        None => {
            await_reply(transport, config, stats, None, Stage::PeerClose, |f| {
                f.is_close() && !f.is_ack()
            })
            .await?
            .sequence
        }
    };

    transmit(transport, stats, &Frame::close_ack(peer_sequence)).await?;
    transport.close();
    *state = ConnectionState::Closed;

    info!("connection closed");
    Ok(())
}
