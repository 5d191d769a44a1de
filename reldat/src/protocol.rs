//! Connection state machine and main API.
//!
//! A [`Connection`] is driven by a single task. All three operations
//! (open, exchange, close) suspend only inside bounded inbound polls, and
//! those polls double as the clock tick for retransmission timers.

use std::net::SocketAddr;

use log::{debug, info, trace, warn};
use tokio::time::Instant;

use crate::buffer::{AckOutcome, SendWindow};
use crate::config::Config;
use crate::core::{Frame, SequenceCounter};
use crate::error::{Error, Result, Stage};
use crate::reliable::handshake::{self, transmit};
use crate::reliable::{Accepted, Reassembler};
use crate::transport::{Inbound, Transport, UdpTransport, recv_frame};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, nothing sent.
    Init,

    /// OPEN sent, waiting for OPEN|ACK.
    SynSent,

    /// Handshake complete; exchanges allowed.
    Established,

    /// CLOSE sent, waiting for CLOSE|ACK.
    CloseSent,

    /// Our CLOSE acknowledged, waiting for the peer's CLOSE.
    PeerCloseAwaited,

    /// Torn down; the transport is closed.
    Closed,

    /// A retry budget ran out.
    Failed,
}

/// Counters describing what a connection has done so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolStats {
    /// Frames put on the wire, retransmissions included.
    pub frames_sent: u64,

    /// Frames received with valid checksums.
    pub frames_received: u64,

    /// Payload bytes sent.
    pub bytes_sent: u64,

    /// Payload bytes received.
    pub bytes_received: u64,

    /// Frames resent after a timeout.
    pub retransmissions: u64,

    /// Datagrams dropped for failing verification.
    pub corrupted_frames: u64,

    /// Data frames already buffered or flushed when they arrived.
    pub duplicates: u64,

    /// Data frames that landed beyond the receive window.
    pub protocol_violations: u64,
}

impl ProtocolStats {
    /// Accounts for an outbound frame.
    pub fn record_sent(&mut self, frame: &Frame) {
        self.frames_sent += 1;
        self.bytes_sent += frame.payload.len() as u64;
    }

    /// Accounts for an inbound frame.
    pub fn record_received(&mut self, frame: &Frame) {
        self.frames_received += 1;
        self.bytes_received += frame.payload.len() as u64;
    }
}

/// Per-exchange phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangePhase {
    SendingAndReceiving,
    Draining,
}

/// A client connection to a RELDAT peer.
///
/// # Example
///
/// ```rust,ignore
/// use reldat::{Config, Connection};
///
/// let mut conn = Connection::open(peer, 8, Config::default()).await?;
/// let reply = conn.exchange(b"hello").await?;
/// assert_eq!(reply, b"HELLO");
/// conn.close().await?;
/// ```
#[derive(Debug)]
pub struct Connection<T: Transport = UdpTransport> {
    transport: T,
    config: Config,
    local_window: u32,
    peer_window: u32,
    sequence: SequenceCounter,
    /// Sequence the peer's next data will start at.
    peer_next: u32,
    /// Sequence of the peer's OPEN|ACK, re-acknowledged if it shows up again.
    peer_open: u32,
    state: ConnectionState,
    stats: ProtocolStats,
}

impl Connection<UdpTransport> {
    /// Opens a connection to `peer` over UDP.
    pub async fn open(peer: SocketAddr, local_window: u32, config: Config) -> Result<Self> {
        config.validate()?;
        let transport = UdpTransport::bind(peer).await?;
        info!("connecting to {}", peer);
        Self::open_with(transport, local_window, config).await
    }
}

impl<T: Transport> Connection<T> {
    /// Opens a connection over an existing transport.
    pub async fn open_with(transport: T, local_window: u32, config: Config) -> Result<Self> {
        config.validate()?;
        if local_window == 0 {
            return Err(Error::InvalidWindowSize);
        }

        let mut conn = Self {
            transport,
            config,
            local_window,
            peer_window: 0,
            sequence: SequenceCounter::new(),
            peer_next: 0,
            peer_open: 0,
            state: ConnectionState::Init,
            stats: ProtocolStats::default(),
        };

        conn.state = ConnectionState::SynSent;
        let opened = match handshake::open(
            &mut conn.transport,
            &conn.config,
            &mut conn.stats,
            &mut conn.sequence,
            local_window,
        )
        .await
        {
            Ok(opened) => opened,
            Err(err) => {
                conn.state = ConnectionState::Failed;
                return Err(err);
            }
        };

        conn.peer_window = opened.peer_window;
        conn.peer_open = opened.peer_sequence;
        conn.peer_next = opened.peer_sequence.wrapping_add(1);
        conn.state = ConnectionState::Established;
        Ok(conn)
    }

    /// Sends `payload` and returns everything the peer sent back before its
    /// end-of-data.
    pub async fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if self.state != ConnectionState::Established {
            return Err(Error::InvalidState(self.state));
        }

        let mut window = SendWindow::new(
            self.peer_window,
            self.config.timeout,
            self.config.max_retransmissions,
        );
        for chunk in payload.chunks(self.config.max_payload_size()) {
            window.push(Frame::data(self.sequence.next(), chunk));
        }

        let first_expected = self.peer_next;
        let mut reassembler = Reassembler::new(self.local_window, first_expected);

        info!(
            "exchange: {} bytes in {} frames, peer window {}",
            payload.len(),
            window.len(),
            self.peer_window
        );

        match self
            .run_exchange(&mut window, &mut reassembler, first_expected)
            .await
        {
            Ok(()) => {
                reassembler.flush();
                let output = reassembler.take_output();
                info!("exchange complete: received {} bytes", output.len());
                Ok(output)
            }
            Err(err) => {
                if self.state == ConnectionState::Established {
                    self.state = ConnectionState::Failed;
                }
                warn!("exchange failed: {}", err);
                Err(err)
            }
        }
    }

    async fn run_exchange(
        &mut self,
        window: &mut SendWindow,
        reassembler: &mut Reassembler,
        first_expected: u32,
    ) -> Result<()> {
        let mut phase = ExchangePhase::SendingAndReceiving;
        let mut silent_polls = 0;

        while phase == ExchangePhase::SendingAndReceiving {
            let now = Instant::now();

            while let Some(frame) = window.next_transmission(now) {
                self.send(&frame).await?;
            }

            for frame in window.retransmissions(now)? {
                debug!("retransmitting {}", frame.sequence);
                self.send(&frame).await?;
                self.stats.retransmissions += 1;
            }

            if window.ready_for_eod() {
                let eod = Frame::eod(self.sequence.next());
                debug!("all data delivered, sending end-of-data {}", eod.sequence);
                self.send(&eod).await?;
                window.send_eod(eod, now);
            }

            let wait = window
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .map_or(self.config.timeout, |left| left.min(self.config.timeout));

            match recv_frame(&mut self.transport, wait).await? {
                Inbound::Silent => {
                    if window.is_idle() {
                        silent_polls += 1;
                        if silent_polls > self.config.max_retransmissions {
                            warn!("peer silent for {} polls", silent_polls);
                            return Err(Error::Unreachable(Stage::Exchange));
                        }
                    }
                }
                Inbound::Corrupted(_) => self.stats.corrupted_frames += 1,
                Inbound::Frame(frame) => {
                    silent_polls = 0;
                    self.stats.record_received(&frame);
                    phase = self
                        .route(frame, window, reassembler, first_expected)
                        .await?;
                }
            }
        }

        // Our last acknowledgment may still be in flight.
        match recv_frame(&mut self.transport, self.config.timeout).await? {
            Inbound::Frame(frame) => {
                self.stats.record_received(&frame);
                self.route(frame, window, reassembler, first_expected)
                    .await?;
            }
            Inbound::Corrupted(_) => self.stats.corrupted_frames += 1,
            Inbound::Silent => {}
        }

        Ok(())
    }

    async fn route(
        &mut self,
        frame: Frame,
        window: &mut SendWindow,
        reassembler: &mut Reassembler,
        first_expected: u32,
    ) -> Result<ExchangePhase> {
        if frame.is_open() {
            self.reopen(&frame).await?;
            return Ok(ExchangePhase::SendingAndReceiving);
        }

        if frame.is_close() {
            if !frame.is_ack() {
                self.peer_teardown(&frame).await?;
                return Err(Error::PeerClosed);
            }
            debug!("ignoring stray CLOSE|ACK");
            return Ok(ExchangePhase::SendingAndReceiving);
        }

        if frame.is_ack() {
            match window.acknowledge(frame.ack) {
                AckOutcome::Unmatched => trace!("late ack {}", frame.ack),
                outcome => trace!("ack {}: {:?}", frame.ack, outcome),
            }
            return Ok(ExchangePhase::SendingAndReceiving);
        }

        if frame.is_data() {
            // Below `peer_next` the data was already delivered: either in an
            // earlier exchange or before this exchange's end-of-data.
            let accepted = if frame.sequence < self.peer_next {
                Ok(Accepted::Stale)
            } else {
                reassembler.accept(frame.sequence, &frame.payload)
            };

            match accepted {
                Ok(Accepted::Stored) => {}
                Ok(Accepted::Duplicate) | Ok(Accepted::Stale) => {
                    debug!("duplicate data {}", frame.sequence);
                    self.stats.duplicates += 1;
                }
                Ok(Accepted::Skipped) => {
                    warn!(
                        "protocol violation: data {} arrived after its slot was flushed",
                        frame.sequence
                    );
                    self.stats.protocol_violations += 1;
                    return Ok(ExchangePhase::SendingAndReceiving);
                }
                Err(err @ Error::WindowOverrun { .. }) => {
                    warn!("protocol violation: {}", err);
                    self.stats.protocol_violations += 1;
                    return Ok(ExchangePhase::SendingAndReceiving);
                }
                Err(err) => return Err(err),
            }
            self.send(&Frame::ack(frame.sequence)).await?;
            return Ok(ExchangePhase::SendingAndReceiving);
        }

        if frame.is_eod() {
            self.send(&Frame::eod_ack(frame.sequence)).await?;

            if frame.sequence < first_expected {
                debug!("stale end-of-data {}", frame.sequence);
                return Ok(ExchangePhase::SendingAndReceiving);
            }

            reassembler.flush();
            self.peer_next = frame.sequence.wrapping_add(1);
            debug!("peer end-of-data {}", frame.sequence);
            return Ok(ExchangePhase::Draining);
        }

        if frame.is_nudge() {
            self.send(&Frame::nudge_ack(frame.sequence)).await?;
            return Ok(ExchangePhase::SendingAndReceiving);
        }

        debug!("ignoring {:?} seq={}", frame.flags, frame.sequence);
        Ok(ExchangePhase::SendingAndReceiving)
    }

    /// Answers peer traffic between exchanges.
    ///
    /// Performs one bounded poll. NUDGE probes are answered, late
    /// retransmissions are re-acknowledged and a peer CLOSE is accepted.
    pub async fn service_idle(&mut self) -> Result<()> {
        if self.state != ConnectionState::Established {
            return Err(Error::InvalidState(self.state));
        }

        let frame = match recv_frame(&mut self.transport, self.config.timeout).await? {
            Inbound::Frame(frame) => frame,
            Inbound::Corrupted(_) => {
                self.stats.corrupted_frames += 1;
                return Ok(());
            }
            Inbound::Silent => return Ok(()),
        };
        self.stats.record_received(&frame);

        if frame.is_open() {
            self.reopen(&frame).await
        } else if frame.is_close() && !frame.is_ack() {
            self.peer_teardown(&frame).await?;
            Err(Error::PeerClosed)
        } else if frame.is_ack() {
            trace!("late ack {}", frame.ack);
            Ok(())
        } else if frame.is_data() {
            self.stats.duplicates += 1;
            self.send(&Frame::ack(frame.sequence)).await
        } else if frame.is_eod() {
            self.send(&Frame::eod_ack(frame.sequence)).await
        } else if frame.is_nudge() {
            debug!("answering nudge");
            self.send(&Frame::nudge_ack(frame.sequence)).await
        } else {
            Ok(())
        }
    }

    /// Tears the connection down with the four-way close.
    ///
    /// A failed close leaves the transport open and may be retried.
    pub async fn close(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ConnectionState::Established | ConnectionState::Failed
        ) {
            return Err(Error::InvalidState(self.state));
        }

        info!("closing connection");
        let result = handshake::close(
            &mut self.transport,
            &self.config,
            &mut self.stats,
            &mut self.sequence,
            &mut self.state,
        )
        .await;

        if result.is_err() {
            self.state = ConnectionState::Failed;
        }
        result
    }

    /// A repeated OPEN|ACK means our handshake ACK was lost.
    async fn reopen(&mut self, frame: &Frame) -> Result<()> {
        if frame.is_ack() && frame.sequence == self.peer_open {
            debug!("re-acknowledging OPEN|ACK {}", frame.sequence);
            self.send(&Frame::ack(frame.sequence)).await?;
        }
        Ok(())
    }

    async fn peer_teardown(&mut self, frame: &Frame) -> Result<()> {
        info!("peer closed the connection");
        self.send(&Frame::close_ack(frame.sequence)).await?;
        self.transport.close();
        self.state = ConnectionState::Closed;
        Ok(())
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        transmit(&mut self.transport, &mut self.stats, frame).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Counters accumulated since the connection was opened.
    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    /// Window size advertised by the peer.
    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    /// Window size advertised to the peer.
    pub fn local_window(&self) -> u32 {
        self.local_window
    }

    /// Sequence number the next outbound frame will carry.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.peek()
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
