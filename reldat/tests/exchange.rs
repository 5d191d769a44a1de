//! Bulk exchanges against a scripted peer.

mod common;

use std::time::Duration;

use common::{Peer, config};
use reldat::{Connection, ConnectionState, Error, Frame, MemoryTransport, Stage};
use tokio::time::Instant;

async fn established(
    local_window: u32,
    peer_window: u32,
) -> (Connection<MemoryTransport>, Peer) {
    let (client, server) = MemoryTransport::pair();
    let peer = tokio::spawn(Peer::new(server).accept_open(peer_window));
    let conn = Connection::open_with(client, local_window, config())
        .await
        .unwrap();
    (conn, peer.await.unwrap())
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test(start_paused = true)]
async fn test_exchange_3000_bytes() {
    let (mut conn, mut peer) = established(8, 4).await;
    let payload = sample(3000);
    let expected = payload.clone();

    let peer = tokio::spawn(async move {
        let mut sizes = Vec::new();
        let mut received = Vec::new();
        for _ in 0..4 {
            let frame = peer.recv().await;
            assert!(frame.is_data() && !frame.is_retransmit());
            sizes.push(frame.payload.len());
            received.extend_from_slice(&frame.payload);
            peer.send(&Frame::ack(frame.sequence)).await;
        }
        assert_eq!(sizes, vec![955, 955, 955, 135]);

        let eod = peer.recv().await;
        assert!(eod.is_eod());
        assert_eq!(eod.sequence, 5);
        peer.send(&Frame::eod_ack(eod.sequence)).await;

        peer.send_message(&received).await;
        received
    });

    let output = conn.exchange(&payload).await.unwrap();
    let echoed = peer.await.unwrap();

    assert_eq!(echoed, expected);
    assert_eq!(output, expected);
    assert_eq!(conn.state(), ConnectionState::Established);
    assert_eq!(conn.stats().retransmissions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_window_bounds_pipelining() {
    let (mut conn, mut peer) = established(8, 2).await;
    let payload = sample(955 * 5);

    let peer = tokio::spawn(async move {
        // Only two frames fit in the window until the oldest is acked.
        let first = peer.recv().await;
        let second = peer.recv().await;
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert!(peer.try_recv(Duration::from_millis(300)).await.is_none());

        peer.send(&Frame::ack(second.sequence)).await;
        assert!(peer.try_recv(Duration::from_millis(300)).await.is_none());

        peer.send(&Frame::ack(first.sequence)).await;
        let third = peer.recv().await;
        assert_eq!(third.sequence, 3);
        peer.send(&Frame::ack(third.sequence)).await;

        let rest = peer.receive_message().await;
        assert_eq!(rest.len(), 955 * 2);
        peer.send_message(b"done").await;
    });

    let output = conn.exchange(&payload).await.unwrap();
    peer.await.unwrap();
    assert_eq!(output, b"done");
}

#[tokio::test(start_paused = true)]
async fn test_exchange_retransmit_exhaustion() {
    let (mut conn, mut peer) = established(8, 4).await;

    let start = Instant::now();
    let result = conn.exchange(b"never acknowledged").await;

    match result {
        Err(Error::RetransmitExhausted {
            sequence: 1,
            retransmissions: 3,
        }) => {}
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(conn.state(), ConnectionState::Failed);
    assert!(start.elapsed() >= Duration::from_secs(4));

    let frames = peer.drain().await;
    assert_eq!(frames.len(), 4);
    assert!(!frames[0].is_retransmit());
    assert!(frames[1..].iter().all(|f| f.is_data() && f.is_retransmit()));
    assert!(frames.iter().all(|f| f.sequence == 1));
    assert_eq!(conn.stats().retransmissions, 3);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_duplicate_acked_twice() {
    let (mut conn, mut peer) = established(4, 4).await;

    let data = Frame::data(peer.sequence.next(), b"abc".to_vec());
    let mut copy = data.retransmission();
    copy.payload = b"zzz".to_vec();

    let peer = tokio::spawn(async move {
        peer.send(&data).await;
        peer.send(&copy).await;

        let mut acks = 0;
        let mut client_eod = None;
        while acks < 2 || client_eod.is_none() {
            let frame = peer.recv().await;
            if frame.is_eod() {
                client_eod = Some(frame.sequence);
            } else if frame.acknowledges(data.sequence) {
                acks += 1;
            }
        }
        peer.send(&Frame::eod_ack(client_eod.unwrap())).await;

        let eod = Frame::eod(peer.sequence.next());
        peer.send(&eod).await;
        peer.await_ack(eod.sequence).await;
    });

    let output = conn.exchange(b"").await.unwrap();
    peer.await.unwrap();

    assert_eq!(output, b"abc");
    assert_eq!(conn.stats().duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_reordered_reply() {
    let (mut conn, mut peer) = established(3, 4).await;

    let peer = tokio::spawn(async move {
        assert_eq!(peer.receive_message().await, b"go");

        // Five frames sent in scrambled order across two receive windows.
        let frames: Vec<Frame> = [b"a", b"b", b"c", b"d", b"e"]
            .iter()
            .map(|chunk| Frame::data(peer.sequence.next(), chunk.to_vec()))
            .collect();
        for index in [1, 0, 2, 4, 3] {
            peer.send(&frames[index]).await;
        }
        let mut unacked: Vec<u32> = frames.iter().map(|f| f.sequence).collect();
        while !unacked.is_empty() {
            let frame = peer.recv().await;
            if frame.is_ack() {
                unacked.retain(|&seq| seq != frame.ack);
            }
        }

        let eod = Frame::eod(peer.sequence.next());
        peer.send(&eod).await;
        peer.await_ack(eod.sequence).await;
    });

    let output = conn.exchange(b"go").await.unwrap();
    peer.await.unwrap();
    assert_eq!(output, b"abcde");
}

#[tokio::test(start_paused = true)]
async fn test_exchange_overrun_not_acked() {
    let (mut conn, mut peer) = established(2, 4).await;

    let peer = tokio::spawn(async move {
        peer.receive_message().await;

        // Four past the base of a two-slot window.
        let stray = Frame::data(peer.sequence.peek() + 4, b"x".to_vec());
        peer.send(&stray).await;
        assert!(peer.try_recv(Duration::from_millis(500)).await.is_none());

        peer.send_message(b"ok").await;
    });

    let output = conn.exchange(b"hi").await.unwrap();
    peer.await.unwrap();

    assert_eq!(output, b"ok");
    assert_eq!(conn.stats().protocol_violations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_late_frames_for_flushed_holes_not_acked() {
    let (mut conn, mut peer) = established(3, 4).await;

    let peer = tokio::spawn(async move {
        peer.receive_message().await;

        // The frame from the next window overtakes the middle of this one.
        let base = peer.sequence.peek();
        for (offset, byte) in [(0, b'a'), (3, b'd'), (1, b'b'), (2, b'c')] {
            peer.send(&Frame::data(base + offset, vec![byte])).await;
        }

        let mut acked = Vec::new();
        while let Some(frame) = peer.try_recv(Duration::from_millis(500)).await {
            if let Some(offset) = (0..4).find(|&o| frame.acknowledges(base + o)) {
                acked.push(offset);
            }
        }
        assert_eq!(acked, vec![0, 3]);

        let close = Frame::close(base + 4);
        peer.send(&close).await;
        let reply = peer.recv().await;
        assert!(reply.is_close() && reply.acknowledges(close.sequence));
    });

    let result = conn.exchange(b"hi").await;
    peer.await.unwrap();

    assert!(matches!(result, Err(Error::PeerClosed)));
    assert_eq!(conn.stats().protocol_violations, 2);
    assert_eq!(conn.stats().duplicates, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_corrupted_data_dropped() {
    let (mut conn, mut peer) = established(4, 4).await;

    let peer = tokio::spawn(async move {
        peer.receive_message().await;

        let frame = Frame::data(peer.sequence.next(), b"payload".to_vec());
        let mut damaged = frame.encode().unwrap();
        damaged[50] ^= 0x01;
        peer.send_raw(&damaged).await;
        assert!(peer.try_recv(Duration::from_millis(500)).await.is_none());

        peer.send(&frame.retransmission()).await;
        peer.await_ack(frame.sequence).await;

        let eod = Frame::eod(peer.sequence.next());
        peer.send(&eod).await;
        peer.await_ack(eod.sequence).await;
    });

    let output = conn.exchange(b"hi").await.unwrap();
    peer.await.unwrap();

    assert_eq!(output, b"payload");
    assert_eq!(conn.stats().corrupted_frames, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_answers_nudge() {
    let (mut conn, mut peer) = established(4, 4).await;

    let peer = tokio::spawn(async move {
        peer.receive_message().await;

        peer.send(&Frame::nudge()).await;
        let reply = peer.recv().await;
        assert!(reply.is_nudge() && reply.is_ack());

        peer.send_message(b"pong").await;
    });

    let output = conn.exchange(b"ping").await.unwrap();
    peer.await.unwrap();
    assert_eq!(output, b"pong");
}

#[tokio::test(start_paused = true)]
async fn test_exchange_silent_peer() {
    let (mut conn, mut peer) = established(4, 4).await;

    let peer = tokio::spawn(async move {
        assert_eq!(peer.receive_message().await, b"hello");
        peer
    });

    let result = conn.exchange(b"hello").await;
    let _peer = peer.await.unwrap();

    assert!(matches!(result, Err(Error::Unreachable(Stage::Exchange))));
    assert_eq!(conn.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_exchange_peer_close() {
    let (mut conn, mut peer) = established(4, 4).await;

    let peer = tokio::spawn(async move {
        peer.receive_message().await;
        let close = Frame::close(peer.sequence.next());
        peer.send(&close).await;
        let reply = peer.recv().await;
        assert!(reply.is_close() && reply.acknowledges(close.sequence));
    });

    let result = conn.exchange(b"bye").await;
    peer.await.unwrap();

    assert!(matches!(result, Err(Error::PeerClosed)));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(conn.exchange(b"more").await, Err(Error::InvalidState(_))));
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_exchanges_share_counters() {
    let (mut conn, mut peer) = established(4, 4).await;

    let peer = tokio::spawn(async move {
        assert_eq!(peer.receive_message().await, b"one");
        peer.send_message(b"ONE").await;
        let last_eod = peer.sequence.peek() - 1;

        let second = peer.recv().await;
        assert!(second.is_data());
        // Sequence numbers keep counting across exchanges.
        assert_eq!(second.sequence, 3);
        peer.send(&Frame::ack(second.sequence)).await;

        // Our ACK|EOD was "lost", so the old EOD shows up again.
        peer.send(&Frame::eod(last_eod).retransmission()).await;

        let mut reacked = false;
        let mut client_eod = None;
        while !reacked || client_eod.is_none() {
            let frame = peer.recv().await;
            if frame.is_eod() && frame.acknowledges(last_eod) {
                reacked = true;
            } else if frame.is_eod() && !frame.is_ack() {
                client_eod = Some(frame.sequence);
            }
        }
        peer.send(&Frame::eod_ack(client_eod.unwrap())).await;

        peer.send_message(b"TWO").await;
    });

    assert_eq!(conn.exchange(b"one").await.unwrap(), b"ONE");
    assert_eq!(conn.exchange(b"two").await.unwrap(), b"TWO");
    peer.await.unwrap();
}
