//! # Keystore
//!
//! An endpoint's private key, its certificate chain, and the certificates it
//! trusts, stored on disk with the key sealed under a password.
//!
//! ## File Format
//!
//! A tetherpack `tether-keystore` scope holding: version, escaped name,
//! salt, nonce, the ChaCha20-Poly1305-sealed 32-byte key seed, the chain
//! (leaf first) and the trusted certificates. The sealing key is
//! HKDF-SHA256(salt, password). The password is scrubbed right after the key
//! is derived, whether or not the rest of the operation succeeds.

use std::path::Path;
use std::time::Duration;

use chacha20poly1305::aead::Aead;
use chacha20poly1305::aead::KeyInit;
use chacha20poly1305::aead::Payload;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::Key;
use chacha20poly1305::Nonce;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tetherpack::Reader;
use tetherpack::Writer;
use zeroize::Zeroize;
use zeroize::Zeroizing;

use super::certificate::decode_chain;
use super::certificate::encode_chain;
use super::certificate::Certificate;
use super::escape::escape_name;
use super::escape::unescape_name;
use super::password::Password;
use super::unix_now;
use super::Error;
use super::Result;

const VERSION: u64 = 1;
const SEAL_INFO: &[u8] = b"tether-keystore-v1";

/// Allowance for clock skew between the enrolling host and its peers.
const BACKDATE_SECS: u64 = 300;

pub struct Keystore {
    name: String,
    signing: SigningKey,
    chain: Vec<Certificate>,
    trusted: Vec<Certificate>,
}

impl Keystore {
    /// Creates a fresh identity with a self-signed certificate and the
    /// password that will protect it at rest.
    pub fn enroll(name: &str, validity: Duration) -> Result<(Self, Password)> {
        let signing = SigningKey::generate(&mut OsRng);
        let (not_before, not_after) = window(validity);
        let leaf = Certificate::issue(
            &signing,
            name,
            signing.verifying_key().to_bytes(),
            not_before,
            not_after,
        )?;
        let store = Self {
            name: name.to_string(),
            signing,
            chain: vec![leaf],
            trusted: Vec::new(),
        };
        Ok((store, Password::generate()))
    }

    /// Creates a fresh identity whose certificate is issued by `issuer`.
    /// Peers that whitelist the issuer accept it transitively.
    pub fn enroll_under(issuer: &Keystore, name: &str, validity: Duration) -> Result<(Self, Password)> {
        let signing = SigningKey::generate(&mut OsRng);
        let leaf = issuer.issue(name, signing.verifying_key().to_bytes(), validity)?;
        let mut chain = vec![leaf];
        chain.extend(issuer.chain.iter().cloned());
        let store = Self {
            name: name.to_string(),
            signing,
            chain,
            trusted: Vec::new(),
        };
        Ok((store, Password::generate()))
    }

    /// Signs a certificate for another key with this identity.
    pub fn issue(&self, name: &str, public_key: [u8; 32], validity: Duration) -> Result<Certificate> {
        let (not_before, not_after) = window(validity);
        Certificate::issue(&self.signing, name, public_key, not_before, not_after)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub fn trusted(&self) -> &[Certificate] {
        &self.trusted
    }

    /// The leaf certificate, for distribution to peers.
    pub fn export_certificate(&self) -> Certificate {
        self.chain[0].clone()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Adds a certificate to the trusted set. Duplicate keys are ignored.
    pub fn trust(&mut self, certificate: Certificate) {
        if !self.trusted.iter().any(|c| c.public_key == certificate.public_key) {
            self.trusted.push(certificate);
        }
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    pub fn save(&self, path: &Path, password: &mut Password) -> Result<()> {
        let mut salt = [0u8; 16];
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let cipher = sealing_cipher(&salt, password)?;
        let escaped = escape_name(&self.name);
        let seed = Zeroizing::new(self.signing.to_bytes());
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: seed.as_slice(), aad: escaped.as_bytes() })
            .map_err(|_| Error::Keystore("sealing failed".into()))?;

        let mut w = Writer::new();
        w.tagged_begin("tether-keystore")?;
        w.u64(VERSION);
        w.str(&escaped)?;
        w.bytes(&salt)?;
        w.bytes(&nonce)?;
        w.bytes(&sealed)?;
        encode_chain(&mut w, &self.chain)?;
        encode_chain(&mut w, &self.trusted)?;
        w.tagged_end()?;
        let bytes = w.finish()?;

        std::fs::write(path, bytes)
            .map_err(|e| Error::Keystore(format!("writing {}: {}", path.display(), e)))
    }

    pub fn load(path: &Path, password: &mut Password) -> Result<Self> {
        let sealed = match Sealed::read(path) {
            Ok(sealed) => sealed,
            Err(e) => {
                password.scrub();
                return Err(e);
            }
        };

        let cipher = sealing_cipher(&sealed.salt, password)?;
        let mut seed = cipher
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload { msg: &sealed.sealed, aad: sealed.escaped.as_bytes() },
            )
            .map_err(|_| Error::Keystore("wrong password or corrupt keystore".into()))?;
        let seed_array: Result<[u8; 32]> = seed
            .as_slice()
            .try_into()
            .map_err(|_| Error::Keystore("sealed key has the wrong length".into()));
        seed.zeroize();
        let seed_array = Zeroizing::new(seed_array?);
        let signing = SigningKey::from_bytes(&seed_array);

        let leaf = sealed
            .chain
            .first()
            .ok_or_else(|| Error::Keystore("keystore has no certificate".into()))?;
        if leaf.public_key != signing.verifying_key().to_bytes() {
            return Err(Error::Keystore("certificate does not match the private key".into()));
        }

        Ok(Self {
            name: unescape_name(&sealed.escaped)?,
            signing,
            chain: sealed.chain,
            trusted: sealed.trusted,
        })
    }
}

/// The on-disk form before the password is applied.
struct Sealed {
    escaped: String,
    salt: [u8; 16],
    nonce: [u8; 12],
    sealed: Vec<u8>,
    chain: Vec<Certificate>,
    trusted: Vec<Certificate>,
}

impl Sealed {
    fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Keystore(format!("reading {}: {}", path.display(), e)))?;
        let mut r = Reader::new(&bytes);
        let (kind, mut body) = r.tagged()?;
        if kind != "tether-keystore" {
            return Err(Error::Keystore(format!("{} is not a keystore", path.display())));
        }
        let version = body.u64()?;
        if version != VERSION {
            return Err(Error::Keystore(format!("unsupported keystore version {}", version)));
        }
        let sealed = Self {
            escaped: body.str()?.to_string(),
            salt: body.byte_array()?,
            nonce: body.byte_array()?,
            sealed: body.bytes()?.to_vec(),
            chain: decode_chain(&mut body)?,
            trusted: decode_chain(&mut body)?,
        };
        body.finish()?;
        r.finish()?;
        Ok(sealed)
    }
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("name", &self.name)
            .field("chain", &self.chain.len())
            .field("trusted", &self.trusted.len())
            .finish()
    }
}

/// Derives the sealing cipher and scrubs the password.
fn sealing_cipher(salt: &[u8], password: &mut Password) -> Result<ChaCha20Poly1305> {
    if password.is_scrubbed() || password.is_empty() {
        password.scrub();
        return Err(Error::Password("password has already been used".into()));
    }
    let hk = Hkdf::<Sha256>::new(Some(salt), password.as_bytes());
    password.scrub();
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(SEAL_INFO, key.as_mut_slice())
        .map_err(|_| Error::Keystore("key derivation failed".into()))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(key.as_slice())))
}

fn window(validity: Duration) -> (u64, u64) {
    let now = unix_now();
    (now.saturating_sub(BACKDATE_SECS), now.saturating_add(validity.as_secs()))
}
