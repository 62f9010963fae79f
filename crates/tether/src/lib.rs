//! # Tether
//!
//! Remote objects that look local. A `Communicator` owns one listening
//! endpoint, authenticates every channel against a certificate whitelist,
//! and decides for every value crossing a process boundary whether it travels
//! as a copy or as a long reference back to its home.
//!
//! ## Philosophy
//!
//! - **Explicit Service**: there is no global communicator. Handles are passed
//!   to whatever needs to open channels or register objects.
//! - **Type-Level Capabilities**: `Copiable`, `NonCopiable` and `NonMigratable`
//!   are attached to types (via the `TypeCatalog` or `RemoteObject::capability`),
//!   never to instances.
//! - **Leases Are Authoritative**: explicit release messages make reclamation
//!   prompt, lease expiry makes it certain.

pub mod args;
pub mod auth;
pub mod catalog;
pub mod communicator;
pub mod config;
pub mod error;
pub mod gc;
pub mod marshal;
pub mod object;
pub mod peer;
pub mod proxy;
pub mod table;
pub mod task;
pub mod transport;
pub mod value;

#[cfg(test)]
mod mock_transport;
#[cfg(test)]
mod tests;

pub use catalog::TypeCatalog;
pub use communicator::Communicator;
pub use communicator::CommunicatorBuilder;
pub use config::CommunicatorConfig;
pub use config::EndpointConfig;
pub use error::Error;
pub use error::ErrorKind;
pub use error::Result;
pub use marshal::MarshalError;
pub use object::InvokeError;
pub use object::ObjectRef;
pub use object::RemoteObject;
pub use task::Task;
pub use value::Record;
pub use value::WeakRecord;
pub use value::Value;

pub use tetherrpc::Capability;
pub use tetherrpc::EndpointAddress;
pub use tetherrpc::Failure;
pub use tetherrpc::FailureKind;
pub use tetherrpc::GlobalId;
pub use tetherrpc::ObjectId;
