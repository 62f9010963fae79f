//! Endpoint certificates.
//!
//! A certificate binds an escaped subject name and a validity window to an
//! ed25519 public key, and is signed by its issuer's key. A self-signed
//! certificate has `issuer_key == public_key`.
//!
//! The signed bytes are the tetherpack encoding of every field except the
//! signature, so the encoding is canonical by construction.

use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use tetherpack::Reader;
use tetherpack::Writer;

use super::escape::escape_name;
use super::escape::unescape_name;
use super::Error;
use super::Fingerprint;
use super::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Escaped human-readable name.
    pub subject: String,
    pub public_key: [u8; 32],
    pub issuer_key: [u8; 32],
    /// Unix seconds.
    pub not_before: u64,
    /// Unix seconds.
    pub not_after: u64,
    pub signature: [u8; 64],
}

impl Certificate {
    /// Issues a certificate for `public_key`, signed by `issuer`.
    pub fn issue(
        issuer: &SigningKey,
        name: &str,
        public_key: [u8; 32],
        not_before: u64,
        not_after: u64,
    ) -> Result<Self> {
        let mut cert = Self {
            subject: escape_name(name),
            public_key,
            issuer_key: issuer.verifying_key().to_bytes(),
            not_before,
            not_after,
            signature: [0u8; 64],
        };
        let tbs = cert.signed_bytes()?;
        cert.signature = issuer.sign(&tbs).to_bytes();
        Ok(cert)
    }

    /// The human-readable subject name, unescaped.
    pub fn name(&self) -> Result<String> {
        unescape_name(&self.subject)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_key(&self.public_key)
    }

    pub fn is_self_signed(&self) -> bool {
        self.public_key == self.issuer_key
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// True if the signature verifies under `issuer_key`.
    pub fn verify_signature(&self) -> bool {
        let Ok(issuer) = VerifyingKey::from_bytes(&self.issuer_key) else {
            return false;
        };
        let Ok(tbs) = self.signed_bytes() else {
            return false;
        };
        let signature = Signature::from_bytes(&self.signature);
        issuer.verify_strict(&tbs, &signature).is_ok()
    }

    /// The ed25519 key this certificate vouches for.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.public_key).map_err(|_| Error::Rejected)
    }

    fn signed_bytes(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        w.tagged_begin("tether-cert-v1")?;
        self.encode_fields(&mut w)?;
        w.tagged_end()?;
        Ok(w.finish()?)
    }

    fn encode_fields(&self, w: &mut Writer) -> Result<()> {
        w.str(&self.subject)?;
        w.bytes(&self.public_key)?;
        w.bytes(&self.issuer_key)?;
        w.u64(self.not_before);
        w.u64(self.not_after);
        Ok(())
    }

    pub fn encode(&self, w: &mut Writer) -> Result<()> {
        w.tagged_begin("cert")?;
        self.encode_fields(w)?;
        w.bytes(&self.signature)?;
        w.tagged_end()?;
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let (name, mut body) = r.tagged()?;
        if name != "cert" {
            return Err(Error::Malformed(format!("expected certificate, found '{}'", name)));
        }
        let cert = Self {
            subject: body.str()?.to_string(),
            public_key: body.byte_array()?,
            issuer_key: body.byte_array()?,
            not_before: body.u64()?,
            not_after: body.u64()?,
            signature: body.byte_array()?,
        };
        body.finish()?;
        Ok(cert)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        self.encode(&mut w)?;
        Ok(w.finish()?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let cert = Self::decode(&mut r)?;
        r.finish()?;
        Ok(cert)
    }
}

/// Encodes a chain, leaf first.
pub fn encode_chain(w: &mut Writer, chain: &[Certificate]) -> Result<()> {
    w.list_begin();
    for cert in chain {
        cert.encode(w)?;
    }
    w.list_end()?;
    Ok(())
}

pub fn decode_chain(r: &mut Reader<'_>) -> Result<Vec<Certificate>> {
    let mut list = r.list()?;
    let mut chain = Vec::new();
    while !list.is_empty() {
        chain.push(Certificate::decode(&mut list)?);
    }
    Ok(chain)
}
