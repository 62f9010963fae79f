//! In-memory transport for unit tests.

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::transport;
use crate::transport::Transport;

/// Messages sent on one end appear on the other end's `recv`.
pub struct DuplexChannelTransport {
    tx: SyncMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl DuplexChannelTransport {
    /// Creates a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            tx: SyncMutex::new(Some(tx_a)),
            rx: Arc::new(Mutex::new(rx_b)),
        };
        let b = Self {
            tx: SyncMutex::new(Some(tx_b)),
            rx: Arc::new(Mutex::new(rx_a)),
        };
        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| transport::Error::ConnectionLost("closed locally".into()))?;
        tx.send(payload.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn close(&self) {
        self.tx.lock().take();
    }
}
