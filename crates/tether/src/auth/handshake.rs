//! # Mutual Handshake
//!
//! Turns a connected TCP stream into a `SecureChannel`.
//!
//! 1. Both sides exchange a plaintext hello: an ephemeral X25519 public key
//!    and a random nonce. The initiator speaks first.
//! 2. The transcript hash is SHA-256 over a fixed label and both hellos.
//!    HKDF-SHA256, salted with the transcript, turns the X25519 shared secret
//!    into one key per direction.
//! 3. Each side sends an encrypted `auth` message: its claimed listening
//!    endpoint, its certificate chain, and an ed25519 signature over the
//!    transcript and its role. The responder verifies first and simply hangs
//!    up on failure, so the initiator learns nothing beyond "rejected".
//!
//! Every failure in here is `Error::Rejected`.

use std::sync::Arc;
use std::time::Duration;

use curve25519_dalek::montgomery::MontgomeryPoint;
use ed25519_dalek::Signature;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;
use tetherpack::Reader;
use tetherpack::Writer;
use tetherrpc::EndpointAddress;
use tokio::net::TcpStream;
use tracing::debug;
use zeroize::Zeroizing;

use super::certificate::decode_chain;
use super::certificate::encode_chain;
use super::channel::read_frame;
use super::channel::write_frame;
use super::channel::PeerIdentity;
use super::channel::RecvHalf;
use super::channel::SecureChannel;
use super::channel::SendHalf;
use super::keystore::Keystore;
use super::unix_now;
use super::whitelist::Whitelist;
use super::Error;
use super::Result;

const TRANSCRIPT_LABEL: &[u8] = b"tether-handshake-v1";
const INITIATOR: &[u8] = b"initiator";
const RESPONDER: &[u8] = b"responder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

impl Role {
    fn label(self) -> &'static [u8] {
        match self {
            Self::Initiator => INITIATOR,
            Self::Responder => RESPONDER,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

/// What this side proves and what it accepts.
#[derive(Clone)]
pub struct Credentials {
    pub keystore: Arc<Keystore>,
    pub endpoint: EndpointAddress,
    pub whitelist: Arc<Whitelist>,
    /// Bounds the handshake itself and becomes the channel's idle timeout.
    pub idle_timeout: Duration,
}

/// Runs the handshake as the connecting side.
pub async fn initiate(stream: TcpStream, credentials: &Credentials) -> Result<SecureChannel> {
    run(stream, credentials, Role::Initiator).await
}

/// Runs the handshake as the accepting side.
pub async fn accept(stream: TcpStream, credentials: &Credentials) -> Result<SecureChannel> {
    run(stream, credentials, Role::Responder).await
}

async fn run(stream: TcpStream, credentials: &Credentials, role: Role) -> Result<SecureChannel> {
    match tokio::time::timeout(credentials.idle_timeout, exchange(stream, credentials, role)).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(e)) => {
            debug!(?role, error = %e, "handshake failed");
            Err(Error::Rejected)
        }
        Err(_) => {
            debug!(?role, "handshake timed out");
            Err(Error::Rejected)
        }
    }
}

async fn exchange(stream: TcpStream, credentials: &Credentials, role: Role) -> Result<SecureChannel> {
    let _ = stream.set_nodelay(true);
    let (mut rd, mut wr) = stream.into_split();

    let mut secret = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(secret.as_mut_slice());
    let public = MontgomeryPoint::mul_base_clamped(*secret).to_bytes();
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);
    let mine = encode_hello(&public, &nonce)?;

    let theirs = match role {
        Role::Initiator => {
            write_frame(&mut wr, &mine).await.map_err(|_| Error::Rejected)?;
            read_required(&mut rd).await?
        }
        Role::Responder => {
            let theirs = read_required(&mut rd).await?;
            write_frame(&mut wr, &mine).await.map_err(|_| Error::Rejected)?;
            theirs
        }
    };
    let their_public = decode_hello(&theirs)?;

    let (first, second) = match role {
        Role::Initiator => (&mine, &theirs),
        Role::Responder => (&theirs, &mine),
    };
    let mut hasher = Sha256::new();
    hasher.update(TRANSCRIPT_LABEL);
    hasher.update(first);
    hasher.update(second);
    let transcript: [u8; 32] = hasher.finalize().into();

    let shared = Zeroizing::new(MontgomeryPoint(their_public).mul_clamped(*secret).to_bytes());
    if shared.iter().all(|b| *b == 0) {
        return Err(Error::Rejected);
    }
    let hk = Hkdf::<Sha256>::new(Some(&transcript), shared.as_slice());
    let mut i2r = Zeroizing::new([0u8; 32]);
    let mut r2i = Zeroizing::new([0u8; 32]);
    hk.expand(b"tether i2r", i2r.as_mut_slice()).map_err(|_| Error::Rejected)?;
    hk.expand(b"tether r2i", r2i.as_mut_slice()).map_err(|_| Error::Rejected)?;
    let (send_key, recv_key) = match role {
        Role::Initiator => (&i2r, &r2i),
        Role::Responder => (&r2i, &i2r),
    };
    let mut send = SendHalf::new(wr, send_key);
    let mut recv = RecvHalf::new(rd, recv_key);

    let mut signed = transcript.to_vec();
    signed.extend_from_slice(role.label());
    let signature = credentials.keystore.sign(&signed);
    let auth = encode_auth(&credentials.endpoint, credentials.keystore.chain(), &signature)?;

    let peer = match role {
        Role::Initiator => {
            send.send_frame(&auth).await.map_err(|_| Error::Rejected)?;
            let reply = recv.recv_frame().await.map_err(|_| Error::Rejected)?;
            let reply = reply.ok_or(Error::Rejected)?;
            verify_auth(&reply, &transcript, role.other(), &credentials.whitelist)?
        }
        Role::Responder => {
            let offer = recv.recv_frame().await.map_err(|_| Error::Rejected)?;
            let offer = offer.ok_or(Error::Rejected)?;
            let peer = verify_auth(&offer, &transcript, role.other(), &credentials.whitelist)?;
            send.send_frame(&auth).await.map_err(|_| Error::Rejected)?;
            peer
        }
    };

    debug!(peer = %peer.endpoint, anchor = %peer.anchor, "channel authenticated");
    Ok(SecureChannel::new(
        recv,
        send,
        peer,
        credentials.whitelist.clone(),
        credentials.idle_timeout,
    ))
}

async fn read_required(rd: &mut tokio::net::tcp::OwnedReadHalf) -> Result<Vec<u8>> {
    match read_frame(rd).await {
        Ok(Some(frame)) if frame.len() <= 1024 => Ok(frame),
        _ => Err(Error::Rejected),
    }
}

fn encode_hello(public: &[u8; 32], nonce: &[u8; 16]) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.tagged_begin("hello")?;
    w.bytes(public)?;
    w.bytes(nonce)?;
    w.tagged_end()?;
    Ok(w.finish()?)
}

fn decode_hello(bytes: &[u8]) -> Result<[u8; 32]> {
    let mut r = Reader::new(bytes);
    let (name, mut body) = r.tagged()?;
    if name != "hello" {
        return Err(Error::Rejected);
    }
    let public = body.byte_array::<32>()?;
    let _nonce = body.byte_array::<16>()?;
    body.finish()?;
    r.finish()?;
    Ok(public)
}

fn encode_auth(
    endpoint: &EndpointAddress,
    chain: &[super::certificate::Certificate],
    signature: &Signature,
) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.tagged_begin("auth")?;
    w.str(&endpoint.to_string())?;
    encode_chain(&mut w, chain)?;
    w.bytes(&signature.to_bytes())?;
    w.tagged_end()?;
    Ok(w.finish()?)
}

fn verify_auth(bytes: &[u8], transcript: &[u8; 32], role: Role, whitelist: &Whitelist) -> Result<PeerIdentity> {
    let mut r = Reader::new(bytes);
    let (name, mut body) = r.tagged()?;
    if name != "auth" {
        return Err(Error::Rejected);
    }
    let endpoint: EndpointAddress = body.str()?.parse().map_err(|_| Error::Rejected)?;
    let chain = decode_chain(&mut body)?;
    let signature = Signature::from_bytes(&body.byte_array::<64>()?);
    body.finish()?;
    r.finish()?;

    let leaf = chain.first().ok_or(Error::Rejected)?;
    let mut signed = transcript.to_vec();
    signed.extend_from_slice(role.label());
    let proof = leaf.verifying_key()?.verify_strict(&signed, &signature).is_ok();

    let anchor = whitelist.authorize(&chain, unix_now());
    match (proof, anchor) {
        (true, Ok(anchor)) => Ok(PeerIdentity { endpoint, chain, anchor }),
        _ => Err(Error::Rejected),
    }
}
