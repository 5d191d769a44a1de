//! Serving one client: the responding side of the RELDAT handshakes and the
//! peer role of the exchange loop.
//!
//! Every block the reassembler flushes is uppercased and streamed straight
//! back, so the reply is pipelined with the request.

use std::io;
use std::net::SocketAddr;

use log::{debug, info, trace, warn};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use reldat::buffer::{AckOutcome, SendWindow};
use reldat::reliable::handshake::{await_reply, transmit};
use reldat::reliable::{Accepted, Reassembler};
use reldat::transport::{Inbound, recv_frame};
use reldat::{
    Config, Error, Frame, MAX_FRAME_SIZE, ProtocolStats, Result, SequenceCounter, Stage, Transport,
};

/// Waits for an OPEN from any address.
pub async fn accept(socket: &UdpSocket) -> io::Result<(SocketAddr, Frame)> {
    let mut buf = [0u8; MAX_FRAME_SIZE];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        match Frame::decode(&buf[..len]) {
            Ok(frame) if frame.is_open() && !frame.is_ack() => return Ok((from, frame)),
            Ok(frame) => debug!("ignoring {:?} from {} while idle", frame.flags, from),
            Err(err) => debug!("ignoring datagram from {}: {}", from, err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Closed,
}

/// Per-exchange state.
struct Exchange {
    reassembler: Reassembler,
    window: SendWindow,
    first_expected: u32,
    client_eod: Option<u32>,
}

/// A connection to one client.
pub struct Session<T: Transport> {
    transport: T,
    config: Config,
    local_window: u32,
    client_window: u32,
    sequence: SequenceCounter,
    stats: ProtocolStats,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, local_window: u32, config: Config) -> Self {
        Self {
            transport,
            config,
            local_window,
            client_window: 1,
            sequence: SequenceCounter::new(),
            stats: ProtocolStats::default(),
        }
    }

    /// Serves the client that sent `open` until it closes or goes away.
    pub async fn run(&mut self, open: &Frame) -> Result<()> {
        let (reply, mut pending) = self.accept_open(open).await?;
        let mut exchange = self.new_exchange(open.sequence.wrapping_add(1));
        let mut silent_polls = 0;

        loop {
            let now = Instant::now();

            while let Some(frame) = exchange.window.next_transmission(now) {
                self.send(&frame).await?;
            }

            for frame in exchange.window.retransmissions(now)? {
                self.send(&frame).await?;
                self.stats.retransmissions += 1;
            }

            if exchange.client_eod.is_some() && exchange.window.ready_for_eod() {
                let eod = Frame::eod(self.sequence.next());
                debug!("reply complete, sending end-of-data {}", eod.sequence);
                self.send(&eod).await?;
                exchange.window.send_eod(eod, now);
            }

            let frame = match pending.take() {
                Some(frame) => frame,
                None => {
                    let wait = exchange
                        .window
                        .next_deadline()
                        .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                        .map_or(self.config.timeout, |left| left.min(self.config.timeout));

                    match recv_frame(&mut self.transport, wait).await? {
                        Inbound::Frame(frame) => {
                            self.stats.record_received(&frame);
                            frame
                        }
                        Inbound::Corrupted(_) => {
                            self.stats.corrupted_frames += 1;
                            continue;
                        }
                        Inbound::Silent => {
                            if exchange.window.is_idle() {
                                silent_polls += 1;
                                self.on_silence(silent_polls).await?;
                            }
                            continue;
                        }
                    }
                }
            };

            silent_polls = 0;
            if self.route(frame, &mut exchange, &reply).await? == Step::Closed {
                return Ok(());
            }
        }
    }

    /// Answers OPEN and waits for the handshake ACK. The client's first data
    /// (or a CLOSE) also completes the handshake and is handed back.
    async fn accept_open(&mut self, open: &Frame) -> Result<(Frame, Option<Frame>)> {
        self.client_window = open.window_size()?;

        let reply = Frame::open_ack(self.sequence.next(), open.sequence, self.local_window);
        self.send(&reply).await?;

        let first = await_reply(
            &mut self.transport,
            &self.config,
            &mut self.stats,
            Some(&reply),
            Stage::Open,
            |f| f.acknowledges(reply.sequence) || f.is_data() || f.is_eod() || f.is_close(),
        )
        .await?;

        info!("client connected, window {}", self.client_window);
        let pending = (!first.acknowledges(reply.sequence)).then_some(first);
        Ok((reply, pending))
    }

    fn new_exchange(&self, first_expected: u32) -> Exchange {
        Exchange {
            reassembler: Reassembler::new(self.local_window, first_expected),
            window: SendWindow::new(
                self.client_window,
                self.config.timeout,
                self.config.max_retransmissions,
            ),
            first_expected,
            client_eod: None,
        }
    }

    async fn on_silence(&mut self, polls: u32) -> Result<()> {
        let limit = self.config.max_retransmissions;
        if polls >= limit.saturating_mul(2) {
            warn!("client silent for {} polls", polls);
            return Err(Error::Unreachable(Stage::Exchange));
        }
        if polls >= limit {
            debug!("nudging client");
            self.send(&Frame::nudge()).await?;
        }
        Ok(())
    }

    async fn route(
        &mut self,
        frame: Frame,
        exchange: &mut Exchange,
        reply: &Frame,
    ) -> Result<Step> {
        if frame.is_open() {
            if !frame.is_ack() {
                debug!("client repeated OPEN");
                self.send(reply).await?;
            }
            return Ok(Step::Continue);
        }

        if frame.is_close() {
            if frame.is_ack() {
                return Ok(Step::Continue);
            }
            self.teardown(frame.sequence).await?;
            return Ok(Step::Closed);
        }

        if frame.is_nudge() {
            if !frame.is_ack() {
                self.send(&Frame::nudge_ack(frame.sequence)).await?;
            }
            return Ok(Step::Continue);
        }

        if frame.is_ack() {
            if exchange.window.acknowledge(frame.ack) == AckOutcome::EndOfData {
                self.finish(exchange);
            }
            return Ok(Step::Continue);
        }

        if frame.is_data() {
            // New data after our end-of-data means the client has it,
            // even if its ACK|EOD got lost.
            if let Some(eod) = exchange.client_eod {
                if frame.sequence > eod && exchange.window.eod_sent() {
                    self.finish(exchange);
                }
            }
            self.receive_data(frame, exchange).await?;
            return Ok(Step::Continue);
        }

        if frame.is_eod() {
            self.send(&Frame::eod_ack(frame.sequence)).await?;

            if frame.sequence < exchange.first_expected || exchange.client_eod.is_some() {
                debug!("repeated end-of-data {}", frame.sequence);
                return Ok(Step::Continue);
            }

            debug!("client end-of-data {}", frame.sequence);
            exchange.reassembler.flush();
            exchange.client_eod = Some(frame.sequence);
            self.queue_reply(exchange);
            return Ok(Step::Continue);
        }

        trace!("ignoring {:?}", frame.flags);
        Ok(Step::Continue)
    }

    async fn receive_data(&mut self, frame: Frame, exchange: &mut Exchange) -> Result<()> {
        let delivered = exchange
            .client_eod
            .is_some_and(|eod| frame.sequence < eod);

        let accepted = if delivered {
            Ok(Accepted::Stale)
        } else {
            exchange.reassembler.accept(frame.sequence, &frame.payload)
        };

        match accepted {
            Ok(Accepted::Stored) => {}
            Ok(Accepted::Duplicate) | Ok(Accepted::Stale) => self.stats.duplicates += 1,
            Ok(Accepted::Skipped) => {
                warn!(
                    "protocol violation: data {} arrived after its slot was flushed",
                    frame.sequence
                );
                self.stats.protocol_violations += 1;
                return Ok(());
            }
            Err(err @ Error::WindowOverrun { .. }) => {
                warn!("protocol violation: {}", err);
                self.stats.protocol_violations += 1;
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        self.send(&Frame::ack(frame.sequence)).await?;
        self.queue_reply(exchange);
        Ok(())
    }

    /// Uppercases whatever the reassembler has flushed and queues it.
    fn queue_reply(&mut self, exchange: &mut Exchange) {
        let block = exchange.reassembler.take_output();
        if block.is_empty() {
            return;
        }

        let upper = block.to_ascii_uppercase();
        for chunk in upper.chunks(self.config.max_payload_size()) {
            exchange
                .window
                .push(Frame::data(self.sequence.next(), chunk));
        }
        trace!("queued {} reply bytes", upper.len());
    }

    fn finish(&mut self, exchange: &mut Exchange) {
        let next = exchange
            .client_eod
            .map_or(exchange.first_expected, |eod| eod.wrapping_add(1));
        info!(
            "exchange complete: {} frames sent, {} received",
            self.stats.frames_sent, self.stats.frames_received
        );
        *exchange = self.new_exchange(next);
    }

    /// Answers the client's CLOSE and runs our half of the close.
    async fn teardown(&mut self, client_close: u32) -> Result<()> {
        self.send(&Frame::close_ack(client_close)).await?;

        let own = Frame::close(self.sequence.next());
        self.send(&own).await?;

        loop {
            let frame = await_reply(
                &mut self.transport,
                &self.config,
                &mut self.stats,
                Some(&own),
                Stage::CloseAck,
                |f| f.is_close(),
            )
            .await?;

            if frame.acknowledges(own.sequence) {
                info!("client disconnected");
                return Ok(());
            }
            if !frame.is_ack() {
                // Our CLOSE|ACK was lost.
                self.send(&Frame::close_ack(frame.sequence)).await?;
            }
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        transmit(&mut self.transport, &mut self.stats, frame).await
    }

    pub fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}
