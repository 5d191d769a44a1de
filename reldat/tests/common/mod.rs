//! Scripted peer used by the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use reldat::{Config, Frame, MAX_FRAME_SIZE, MemoryTransport, SequenceCounter, Transport};

/// How long a scripted peer waits for the connection under test.
pub const PEER_WAIT: Duration = Duration::from_secs(30);

/// The far end of a [`MemoryTransport`] pair, driven by hand.
pub struct Peer {
    pub transport: MemoryTransport,
    pub sequence: SequenceCounter,
}

impl Peer {
    pub fn new(transport: MemoryTransport) -> Self {
        Self {
            transport,
            sequence: SequenceCounter::new(),
        }
    }

    /// Receives and decodes the next frame, failing the test on silence.
    pub async fn recv(&mut self) -> Frame {
        self.try_recv(PEER_WAIT)
            .await
            .expect("peer timed out waiting for a frame")
    }

    pub async fn try_recv(&mut self, wait: Duration) -> Option<Frame> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = self.transport.recv(&mut buf, wait).await.unwrap()?;
        Some(Frame::decode(&buf[..len]).expect("connection sent a damaged frame"))
    }

    /// Everything already queued for the peer.
    pub async fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.try_recv(Duration::ZERO).await {
            frames.push(frame);
        }
        frames
    }

    pub async fn send(&mut self, frame: &Frame) {
        self.transport.send(&frame.encode().unwrap()).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.transport.send(bytes).await.unwrap();
    }

    /// Plays the responding side of the open handshake.
    pub async fn accept_open(mut self, window: u32) -> Self {
        let open = self.recv().await;
        assert!(open.is_open() && !open.is_ack());

        let reply = Frame::open_ack(self.sequence.next(), open.sequence, window);
        self.send(&reply).await;

        let ack = self.recv().await;
        assert!(ack.is_ack() && ack.acknowledges(reply.sequence));
        self
    }

    /// Acknowledges DATA until the connection's EOD arrives, returning the
    /// payload it sent.
    pub async fn receive_message(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        loop {
            let frame = self.recv().await;
            if frame.is_data() {
                data.extend_from_slice(&frame.payload);
                self.send(&Frame::ack(frame.sequence)).await;
            } else if frame.is_eod() {
                self.send(&Frame::eod_ack(frame.sequence)).await;
                return data;
            }
        }
    }

    /// Sends `data` one frame at a time, each acknowledged before the next,
    /// then an EOD.
    pub async fn send_message(&mut self, data: &[u8]) {
        for chunk in data.chunks(reldat::MAX_PAYLOAD_SIZE) {
            let frame = Frame::data(self.sequence.next(), chunk);
            self.send(&frame).await;
            self.await_ack(frame.sequence).await;
        }

        let eod = Frame::eod(self.sequence.next());
        self.send(&eod).await;
        self.await_ack(eod.sequence).await;
    }

    pub async fn await_ack(&mut self, sequence: u32) -> Frame {
        loop {
            let frame = self.recv().await;
            if frame.acknowledges(sequence) {
                return frame;
            }
        }
    }
}

pub fn config() -> Config {
    Config::default()
}
