//! The set of certificates an endpoint trusts.
//!
//! Entries are never mutated, only enrolled and revoked. `authorize` is
//! consulted at channel establishment and again for every frame, so a
//! revocation takes effect on the next message of an open session.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::certificate::Certificate;
use super::Error;
use super::Fingerprint;
use super::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub certificate: Certificate,
    /// Unescaped human-readable name.
    pub name: String,
    pub not_before: u64,
    pub not_after: u64,
}

#[derive(Default)]
pub struct Whitelist {
    entries: RwLock<HashMap<Fingerprint, WhitelistEntry>>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_certificates<'a>(certs: impl IntoIterator<Item = &'a Certificate>) -> Result<Self> {
        let list = Self::new();
        for cert in certs {
            list.enroll(cert.clone())?;
        }
        Ok(list)
    }

    /// Adds a certificate. Re-enrolling the same key replaces the entry.
    pub fn enroll(&self, certificate: Certificate) -> Result<Fingerprint> {
        let name = certificate.name()?;
        let fingerprint = certificate.fingerprint();
        let entry = WhitelistEntry {
            name,
            not_before: certificate.not_before,
            not_after: certificate.not_after,
            certificate,
        };
        self.entries.write().insert(fingerprint, entry);
        Ok(fingerprint)
    }

    /// Removes an entry. Returns false if it was not present.
    pub fn revoke(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.write().remove(fingerprint).is_some()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.read().contains_key(fingerprint)
    }

    pub fn entry(&self, fingerprint: &Fingerprint) -> Option<WhitelistEntry> {
        self.entries.read().get(fingerprint).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Checks a chain (leaf first) and returns the whitelisted key it reaches.
    ///
    /// Every certificate must be within its validity window and correctly
    /// signed by its issuer, and each link must be issued by the next. The
    /// chain is accepted if any certificate in it, or the issuer of any
    /// certificate in it, is listed and currently valid. All structural checks
    /// run before membership is consulted; every failure is `Rejected`.
    pub fn authorize(&self, chain: &[Certificate], now: u64) -> Result<Fingerprint> {
        let mut sound = !chain.is_empty();
        for (i, cert) in chain.iter().enumerate() {
            sound &= cert.is_valid_at(now);
            sound &= cert.verify_signature();
            if let Some(next) = chain.get(i + 1) {
                sound &= next.public_key == cert.issuer_key;
            }
        }
        if !sound {
            return Err(Error::Rejected);
        }

        let entries = self.entries.read();
        let listed = |key: &[u8; 32]| {
            let fp = Fingerprint::of_key(key);
            entries
                .get(&fp)
                .filter(|e| e.not_before <= now && now <= e.not_after)
                .map(|_| fp)
        };
        chain
            .iter()
            .find_map(|cert| listed(&cert.public_key).or_else(|| listed(&cert.issuer_key)))
            .ok_or(Error::Rejected)
    }
}
