use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::{Instant, sleep_until, timeout_at};

use super::Transport;
use crate::error::{Error, Result};

/// One end of an in-memory datagram link.
///
/// Delivery is lossless and ordered; tests that need loss, duplication or
/// corruption script it on the peer side. A peer that has gone away looks
/// like a silent peer, the same as over UDP.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Option<UnboundedSender<Vec<u8>>>,
    rx: UnboundedReceiver<Vec<u8>>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = unbounded_channel();
        let (b_tx, a_rx) = unbounded_channel();

        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }

    /// Returns true once [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl Transport for MemoryTransport {
    async fn send(&mut self, datagram: &[u8]) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::TransportClosed)?;
        // A vanished peer drops datagrams silently.
        let _ = tx.send(datagram.to_vec());
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>> {
        if self.tx.is_none() {
            return Err(Error::TransportClosed);
        }

        let deadline = Instant::now() + wait;
        match timeout_at(deadline, self.rx.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(datagram)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(Some(len))
            }
            Ok(None) => {
                sleep_until(deadline).await;
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}
