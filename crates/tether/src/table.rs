//! # Local Object Table
//!
//! The owner-side record of which holders have claims on which exported
//! objects. It is the only thing keeping an exported object alive on behalf
//! of other processes.
//!
//! ## Lease State Machine
//!
//! Per `(object, holder)`:
//!
//! - **Leased**: set by export, acquire and renew.
//! - **Renewing**: a sweep found the lease past its midpoint with no renewal.
//! - **Expired/Released**: a sweep found it past expiry, or releases brought
//!   its count to zero. The holder entry is removed.
//!
//! An entry with no holders is removed by the next sweep. The object itself
//! lives on if the application still holds its `ObjectRef`.
//!
//! All times are `Instant`s: lease arithmetic never sees wall-clock jumps.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use tetherrpc::EndpointAddress;
use tetherrpc::ObjectId;

use crate::object::LocalRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Leased,
    Renewing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Deliveries to this holder not yet released.
    pub count: u64,
    pub expiry: Instant,
    pub state: LeaseState,
}

struct Exported {
    object: LocalRef,
    holders: HashMap<EndpointAddress, Lease>,
}

/// Outcome of one sweep.
#[derive(Default)]
pub struct Swept {
    /// Objects whose last claim ended. Dropped by the caller, outside the lock.
    pub reclaimed: Vec<LocalRef>,
    /// Holder claims that expired without release.
    pub expired: usize,
}

pub struct ObjectTable {
    lease_timeout: Duration,
    entries: Mutex<HashMap<ObjectId, Exported>>,
}

impl ObjectTable {
    pub fn new(lease_timeout: Duration) -> Self {
        Self { lease_timeout, entries: Mutex::new(HashMap::new()) }
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    /// Records one delivery of `object` to `holder`.
    pub fn export(&self, object: &LocalRef, holder: &EndpointAddress, now: Instant) {
        let expiry = now + self.lease_timeout;
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(object.id())
            .or_insert_with(|| Exported { object: object.clone(), holders: HashMap::new() });
        let lease = entry
            .holders
            .entry(holder.clone())
            .or_insert(Lease { count: 0, expiry, state: LeaseState::Leased });
        lease.count += 1;
        lease.expiry = lease.expiry.max(expiry);
        lease.state = LeaseState::Leased;
    }

    /// Records deliveries made by a third party. Fails without changing
    /// anything if any id is not exported.
    pub fn acquire(&self, holder: &EndpointAddress, ids: &[ObjectId], now: Instant) -> Result<(), ObjectId> {
        let expiry = now + self.lease_timeout;
        let mut entries = self.entries.lock();
        if let Some(missing) = ids.iter().find(|id| !entries.contains_key(id)) {
            return Err(*missing);
        }
        for id in ids {
            if let Some(entry) = entries.get_mut(id) {
                let lease = entry
                    .holders
                    .entry(holder.clone())
                    .or_insert(Lease { count: 0, expiry, state: LeaseState::Leased });
                lease.count += 1;
                lease.expiry = lease.expiry.max(expiry);
                lease.state = LeaseState::Leased;
            }
        }
        Ok(())
    }

    pub fn lookup(&self, id: ObjectId) -> Option<LocalRef> {
        self.entries.lock().get(&id).map(|e| e.object.clone())
    }

    /// Extends the holder's leases. Returns how many were found.
    pub fn renew(&self, holder: &EndpointAddress, ids: &[ObjectId], now: Instant) -> usize {
        let expiry = now + self.lease_timeout;
        let mut entries = self.entries.lock();
        let mut renewed = 0;
        for id in ids {
            let Some(lease) = entries.get_mut(id).and_then(|e| e.holders.get_mut(holder)) else {
                continue;
            };
            lease.expiry = lease.expiry.max(expiry);
            lease.state = LeaseState::Leased;
            renewed += 1;
        }
        renewed
    }

    /// Subtracts released deliveries. Returns true if the holder's claim ended.
    pub fn release(&self, holder: &EndpointAddress, id: ObjectId, count: u64) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        let Some(lease) = entry.holders.get_mut(holder) else {
            return false;
        };
        lease.count = lease.count.saturating_sub(count);
        if lease.count == 0 {
            entry.holders.remove(holder);
            true
        } else {
            false
        }
    }

    /// Expires stale leases and removes entries nobody holds.
    pub fn sweep(&self, now: Instant) -> Swept {
        let half = self.lease_timeout / 2;
        let mut swept = Swept::default();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| {
            let before = entry.holders.len();
            entry.holders.retain(|_, lease| lease.expiry > now);
            swept.expired += before - entry.holders.len();
            for lease in entry.holders.values_mut() {
                if lease.expiry.saturating_duration_since(now) < half {
                    lease.state = LeaseState::Renewing;
                }
            }
            if entry.holders.is_empty() {
                swept.reclaimed.push(entry.object.clone());
                false
            } else {
                true
            }
        });
        swept
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn holders(&self, id: ObjectId) -> Vec<(EndpointAddress, Lease)> {
        self.entries
            .lock()
            .get(&id)
            .map(|e| e.holders.iter().map(|(h, l)| (h.clone(), l.clone())).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
