//! # Tetherrpc
//!
//! The wire model of the tether object system: endpoint identity, capability
//! tags, long references, marshalled values, and the Invoke / Result frames
//! that carry remote calls.
//!
//! Raw bytes are produced by `tetherpack`; this crate only decides what goes
//! into them.

mod codec;
mod endpoint;
mod error;
mod frame;
mod value;


pub use codec::decode_value;
pub use codec::encode_value;
pub use codec::value_from_bytes;
pub use codec::value_to_bytes;
pub use codec::MAX_DEPTH;
pub use endpoint::EndpointAddress;
pub use endpoint::TransportKind;
pub use error::Error;
pub use error::Failure;
pub use error::FailureKind;
pub use error::Result;
pub use frame::peek_request_id;
pub use frame::Frame;
pub use frame::Target;
pub use value::Capability;
pub use value::GlobalId;
pub use value::LongReference;
pub use value::ObjectId;
pub use value::WireValue;
