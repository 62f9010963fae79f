//! # Authentication
//!
//! Everything that decides whether two endpoints may talk at all.
//!
//! ## Philosophy
//!
//! - **Whitelist Only**: a certificate carries no trust of its own. A chain is
//!   accepted only when it reaches a key present in the local whitelist.
//! - **Uniform Rejection**: a malformed chain, a bad signature, an expired
//!   certificate and a valid-but-unlisted certificate all produce the same
//!   `Error::Rejected`, and the remote side sees the same closed socket.
//! - **Secrets Are Scrubbed**: passwords and key material are overwritten as
//!   soon as they have been used.

pub mod certificate;
pub mod channel;
pub mod escape;
pub mod handshake;
pub mod keystore;
pub mod password;
pub mod whitelist;


use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use sha2::Digest;
use sha2::Sha256;

pub use certificate::Certificate;
pub use channel::SecureChannel;
pub use keystore::Keystore;
pub use password::Password;
pub use whitelist::Whitelist;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer could not be authenticated. Deliberately carries no detail.
    Rejected,
    /// A keystore could not be opened, decrypted or written.
    Keystore(String),
    /// A password file could not be read or holds an unusable password.
    Password(String),
    /// A certificate or handshake message could not be decoded.
    Malformed(String),
    /// A human-readable name has an invalid escape sequence.
    BadName(String),
    /// Local I/O failed before any peer was involved.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "authentication failed"),
            Self::Keystore(msg) => write!(f, "keystore error: {}", msg),
            Self::Password(msg) => write!(f, "password error: {}", msg),
            Self::Malformed(msg) => write!(f, "malformed credential: {}", msg),
            Self::BadName(msg) => write!(f, "bad name: {}", msg),
            Self::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<tetherpack::Error> for Error {
    fn from(e: tetherpack::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// SHA-256 of an ed25519 public key. Whitelist entries are keyed by it.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn of_key(public_key: &[u8; 32]) -> Self {
        Self(Sha256::digest(public_key).into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.is_ascii() {
            return Err(Error::Malformed(format!("fingerprint '{}' is not 64 hex digits", s)));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|_| Error::Malformed(format!("bad hex in fingerprint '{}'", s)))?;
        }
        Ok(Self(out))
    }
}

/// Wall-clock seconds since the epoch. Certificates are dated in wall time;
/// timeouts and leases never use this.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
