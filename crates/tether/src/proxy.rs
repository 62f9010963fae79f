//! # Proxies
//!
//! The local stand-in for an object owned elsewhere. Every operation is sent
//! to the owner as an `Invoke` and the caller waits for the matching `Result`.
//!
//! ## Lifecycle
//!
//! One `ProxyInner` exists per imported `{owner, id}` per communicator. Each
//! time the reference is delivered again it is absorbed into the same proxy
//! and the delivery is counted. When the last handle drops, the communicator
//! is told synchronously and reports all counted deliveries to the owner in a
//! release message. Lease expiry at the owner covers a release that never
//! arrives.

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use tetherrpc::GlobalId;
use tetherrpc::LongReference;
use tetherrpc::Target;

use crate::communicator::Shared;
use crate::error::Error;
use crate::error::Result;
use crate::value::Value;

pub(crate) struct ProxyInner {
    reference: LongReference,
    communicator: Weak<Shared>,
    /// Deliveries of this reference absorbed so far.
    received: AtomicU64,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if let Some(shared) = self.communicator.upgrade() {
            shared.proxy_dropped(&self.reference, self.received.load(Ordering::Acquire));
        }
    }
}

#[derive(Clone)]
pub struct Proxy(pub(crate) Arc<ProxyInner>);

impl Proxy {
    pub(crate) fn new(reference: LongReference, communicator: Weak<Shared>) -> Self {
        Self(Arc::new(ProxyInner { reference, communicator, received: AtomicU64::new(1) }))
    }

    pub(crate) fn from_inner(inner: Arc<ProxyInner>) -> Self {
        Self(inner)
    }

    /// Counts one more delivery of the same reference.
    pub(crate) fn absorb(&self) {
        self.0.received.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn downgrade(&self) -> Weak<ProxyInner> {
        Arc::downgrade(&self.0)
    }

    pub fn reference(&self) -> &LongReference {
        &self.0.reference
    }

    pub fn global_id(&self) -> GlobalId {
        self.0.reference.global_id()
    }

    /// How many times this reference has been delivered to this process.
    pub fn deliveries(&self) -> u64 {
        self.0.received.load(Ordering::Acquire)
    }

    pub async fn invoke(&self, selector: &str, args: Vec<Value>) -> Result<Value> {
        let reference = &self.0.reference;
        let context = format!("invoking {} on {}", selector, reference.global_id());
        let shared = self.0.communicator.upgrade().ok_or_else(|| Error::closed(context.clone()))?;
        shared
            .call(&reference.owner, Target::Object(reference.id), selector, &args)
            .await
            .map_err(|e| e.within(context))
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.global_id() == other.global_id()
    }
}

impl Eq for Proxy {}

impl Hash for Proxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.global_id().hash(state);
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy({} {})", self.0.reference.interface, self.global_id())
    }
}
