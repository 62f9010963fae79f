//! # Secure Channel
//!
//! An authenticated, encrypted frame pipe over TCP, produced by the handshake.
//!
//! ## Format
//!
//! `[Len: 4b LE][ChaCha20-Poly1305 ciphertext: Len]`, one AEAD message per
//! frame. Each direction has its own key and a 64-bit counter used as the
//! nonce, so frames cannot be replayed, reordered or reflected.
//!
//! ## Invariants
//!
//! - **Idle Timeout**: `recv` fails with `Timeout` when nothing arrives within
//!   the idle window, measured on the monotonic clock.
//! - **Fail Closed**: before every frame in either direction the peer's chain
//!   is re-authorized against the live whitelist. Revocation or expiry ends
//!   the session on the next message.

use std::sync::Arc;
use std::time::Duration;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::aead::KeyInit;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::Key;
use chacha20poly1305::Nonce;
use tetherrpc::EndpointAddress;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::warn;

use super::certificate::Certificate;
use super::unix_now;
use super::whitelist::Whitelist;
use super::Fingerprint;
use crate::transport;
use crate::transport::Transport;

/// Largest frame either side will accept.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Who is on the other end of an authenticated channel.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    /// The listening endpoint the peer claimed during the handshake.
    pub endpoint: EndpointAddress,
    /// The peer's chain, leaf first.
    pub chain: Vec<Certificate>,
    /// The whitelisted key the chain was accepted through.
    pub anchor: Fingerprint,
}

pub(crate) struct SendHalf {
    stream: OwnedWriteHalf,
    cipher: ChaCha20Poly1305,
    counter: u64,
}

impl SendHalf {
    pub(crate) fn new(stream: OwnedWriteHalf, key: &[u8; 32]) -> Self {
        Self { stream, cipher: ChaCha20Poly1305::new(Key::from_slice(key)), counter: 0 }
    }

    pub(crate) async fn send_frame(&mut self, payload: &[u8]) -> transport::Result<()> {
        let nonce = nonce_for(self.counter)?;
        self.counter += 1;
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|_| transport::Error::Io("encryption failed".into()))?;
        write_frame(&mut self.stream, &sealed).await
    }
}

pub(crate) struct RecvHalf {
    stream: OwnedReadHalf,
    cipher: ChaCha20Poly1305,
    counter: u64,
}

impl RecvHalf {
    pub(crate) fn new(stream: OwnedReadHalf, key: &[u8; 32]) -> Self {
        Self { stream, cipher: ChaCha20Poly1305::new(Key::from_slice(key)), counter: 0 }
    }

    pub(crate) async fn recv_frame(&mut self) -> transport::Result<Option<Vec<u8>>> {
        let Some(sealed) = read_frame(&mut self.stream).await? else {
            return Ok(None);
        };
        let nonce = nonce_for(self.counter)?;
        self.counter += 1;
        self.cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map(Some)
            .map_err(|_| transport::Error::ConnectionLost("frame failed authentication".into()))
    }
}

pub struct SecureChannel {
    reader: Mutex<RecvHalf>,
    writer: Mutex<Option<SendHalf>>,
    peer: PeerIdentity,
    whitelist: Arc<Whitelist>,
    idle_timeout: Duration,
}

impl SecureChannel {
    pub(crate) fn new(
        reader: RecvHalf,
        writer: SendHalf,
        peer: PeerIdentity,
        whitelist: Arc<Whitelist>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            peer,
            whitelist,
            idle_timeout,
        }
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    fn check_trust(&self) -> transport::Result<()> {
        match self.whitelist.authorize(&self.peer.chain, unix_now()) {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!(peer = %self.peer.endpoint, "peer credentials no longer trusted");
                Err(transport::Error::ConnectionLost("peer credentials revoked".into()))
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for SecureChannel {
    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        if payload.len() > MAX_FRAME {
            return Err(transport::Error::PayloadTooLarge(payload.len()));
        }
        self.check_trust()?;
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| transport::Error::ConnectionLost("closed locally".into()))?;
        writer.send_frame(payload).await
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;
        let frame = tokio::time::timeout(self.idle_timeout, reader.recv_frame())
            .await
            .map_err(|_| transport::Error::Timeout)??;
        if frame.is_some() {
            self.check_trust()?;
        }
        Ok(frame)
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.stream.shutdown().await;
        }
    }
}

fn nonce_for(counter: u64) -> transport::Result<[u8; 12]> {
    if counter == u64::MAX {
        return Err(transport::Error::ConnectionLost("nonce space exhausted".into()));
    }
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    Ok(nonce)
}

/// Writes one length-prefixed frame.
pub(crate) async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> transport::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| transport::Error::PayloadTooLarge(payload.len()))?;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame, `None` on a clean end of stream.
pub(crate) async fn read_frame<R>(stream: &mut R) -> transport::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(header) as usize;
    // sealed frames carry a 16-byte tag on top of the payload
    if len > MAX_FRAME + 16 {
        return Err(transport::Error::PayloadTooLarge(len));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}
