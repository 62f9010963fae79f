//! # Objects
//!
//! Things that stay home. A `RemoteObject` is adopted by a communicator and
//! from then on is handled through an `ObjectRef`, which is either the local
//! handle or a proxy, and behaves the same either way at the call site.
//!
//! ## Invariants
//!
//! - An adopted object gets its `ObjectId` once, from its home communicator,
//!   and keeps it for life. Re-exporting after reclamation reuses the id.
//! - Two `ObjectRef`s are equal iff they name the same `{owner, id}`,
//!   whether each is a local handle or a proxy.

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::Weak;

use tetherrpc::Capability;
use tetherrpc::EndpointAddress;
use tetherrpc::Failure;
use tetherrpc::FailureKind;
use tetherrpc::GlobalId;
use tetherrpc::ObjectId;

use crate::communicator::Communicator;
use crate::communicator::Shared;
use crate::error::Cause;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::proxy::Proxy;
use crate::value::Value;

/// An object that can be invoked from other processes.
///
/// Implementations dispatch on `selector` and return `NoSuchMethod` for
/// anything they do not understand.
#[async_trait::async_trait]
pub trait RemoteObject: Send + Sync + 'static {
    /// Declared interface name, carried in every long reference.
    fn interface(&self) -> &str;

    /// `NonCopiable` unless the type must never change home.
    fn capability(&self) -> Capability {
        Capability::NonCopiable
    }

    async fn invoke(
        &self,
        ctx: &Communicator,
        selector: &str,
        args: Vec<Value>,
    ) -> std::result::Result<Value, InvokeError>;
}

/// How a `RemoteObject` operation failed.
#[derive(Debug)]
pub enum InvokeError {
    /// A domain error, re-raised on the caller with the same kind.
    Application { kind: String, message: String },
    NoSuchMethod(String),
    BadArguments(String),
    /// A nested call made while serving this one failed.
    Nested(Box<Error>),
}

impl InvokeError {
    pub fn application(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application { kind: kind.into(), message: message.into() }
    }

    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::BadArguments(message.into())
    }

    /// The failure payload sent back in a Result frame.
    pub fn into_failure(self) -> Failure {
        match self {
            Self::Application { kind, message } => Failure::new(FailureKind::Application(kind), message),
            Self::NoSuchMethod(selector) => Failure::new(FailureKind::NoSuchMethod, selector),
            Self::BadArguments(message) => Failure::new(FailureKind::BadArguments, message),
            Self::Nested(e) => match e.failure() {
                Some(failure) => failure.clone(),
                None => {
                    let kind = match e.kind() {
                        ErrorKind::Marshal => FailureKind::Marshal,
                        _ => FailureKind::Unavailable,
                    };
                    Failure::new(kind, e.to_string())
                }
            },
        }
    }
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application { kind, message } => write!(f, "{}: {}", kind, message),
            Self::NoSuchMethod(selector) => write!(f, "no such method '{}'", selector),
            Self::BadArguments(message) => write!(f, "bad arguments: {}", message),
            Self::Nested(e) => write!(f, "nested call failed: {}", e),
        }
    }
}

impl std::error::Error for InvokeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Nested(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<Error> for InvokeError {
    fn from(e: Error) -> Self {
        Self::Nested(Box::new(e))
    }
}

pub(crate) struct LocalEntry {
    pub(crate) object: Arc<dyn RemoteObject>,
    pub(crate) id: ObjectId,
    pub(crate) home: EndpointAddress,
    pub(crate) interface: String,
    pub(crate) capability: Capability,
    pub(crate) communicator: Weak<Shared>,
}

/// The home-side handle of an adopted object.
#[derive(Clone)]
pub struct LocalRef(pub(crate) Arc<LocalEntry>);

impl LocalRef {
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn global_id(&self) -> GlobalId {
        GlobalId { owner: self.0.home.clone(), id: self.0.id }
    }

    pub fn object(&self) -> &Arc<dyn RemoteObject> {
        &self.0.object
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.0.communicator.as_ptr(), Arc::as_ptr(shared))
    }

    pub(crate) fn downgrade(&self) -> Weak<LocalEntry> {
        Arc::downgrade(&self.0)
    }

    async fn invoke(&self, selector: &str, args: Vec<Value>) -> Result<Value> {
        let context = format!("invoking {} on local {}", selector, self.0.id);
        let shared = self.0.communicator.upgrade().ok_or_else(|| Error::closed(context.clone()))?;
        let ctx = Communicator::from_shared(shared);
        self.0
            .object
            .invoke(&ctx, selector, args)
            .await
            .map_err(|e| Error::new(context, Cause::Failed(e.into_failure())))
    }
}

/// A location-transparent handle: the object itself, or a proxy to it.
#[derive(Clone)]
pub enum ObjectRef {
    Local(LocalRef),
    Remote(Proxy),
}

impl ObjectRef {
    /// Invokes an operation, locally or over the wire.
    pub async fn invoke(&self, selector: &str, args: Vec<Value>) -> Result<Value> {
        match self {
            Self::Local(local) => local.invoke(selector, args).await,
            Self::Remote(proxy) => proxy.invoke(selector, args).await,
        }
    }

    pub fn global_id(&self) -> GlobalId {
        match self {
            Self::Local(local) => local.global_id(),
            Self::Remote(proxy) => proxy.global_id(),
        }
    }

    pub fn owner(&self) -> &EndpointAddress {
        match self {
            Self::Local(local) => &local.0.home,
            Self::Remote(proxy) => &proxy.reference().owner,
        }
    }

    pub fn interface(&self) -> &str {
        match self {
            Self::Local(local) => &local.0.interface,
            Self::Remote(proxy) => &proxy.reference().interface,
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Local(local) => local.0.capability,
            Self::Remote(proxy) => proxy.reference().capability,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// The real object when it lives in this process.
    pub fn local_object(&self) -> Option<&Arc<dyn RemoteObject>> {
        match self {
            Self::Local(local) => Some(local.object()),
            Self::Remote(_) => None,
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.global_id() == other.global_id()
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.global_id().hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let place = if self.is_local() { "local" } else { "proxy" };
        write!(f, "{}({} @ {})", self.interface(), place, self.global_id())
    }
}
