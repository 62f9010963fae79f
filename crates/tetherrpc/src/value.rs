//! # Wire Values
//!
//! The marshalled form of everything that crosses a process boundary.
//!
//! ## Invariants
//!
//! - A `Record` slot number is assigned the first time a record identity is
//!   met during one marshal operation; every later occurrence of that identity
//!   is a `Backref` to the slot. Cycles therefore terminate.
//! - A `Reference` never carries object state, only where the object lives.

use std::fmt;

use crate::endpoint::EndpointAddress;

/// Capability tag attached to a type.
///
/// Exactly one of `Copiable` / `NonCopiable` applies to a type;
/// `NonMigratable` implies `NonCopiable`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Capability {
    Copiable,
    NonCopiable,
    NonMigratable,
}

impl Capability {
    /// True if values of this capability cross boundaries as long references.
    pub fn is_referenced(self) -> bool {
        !matches!(self, Self::Copiable)
    }

    /// True if the owning endpoint may never change.
    pub fn forbids_migration(self) -> bool {
        matches!(self, Self::NonMigratable)
    }

    pub(crate) fn wire_name(self) -> &'static str {
        match self {
            Self::Copiable => "copy",
            Self::NonCopiable => "ref",
            Self::NonMigratable => "pinned",
        }
    }

    pub(crate) fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "copy" => Some(Self::Copiable),
            "ref" => Some(Self::NonCopiable),
            "pinned" => Some(Self::NonMigratable),
            _ => None,
        }
    }
}

/// Process-unique identity of an exported object, assigned by its owner.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// Identity of an object across the whole system.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct GlobalId {
    pub owner: EndpointAddress,
    pub id: ObjectId,
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.id)
    }
}

/// Placeholder for an object that stays resident on its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongReference {
    pub owner: EndpointAddress,
    pub id: ObjectId,
    /// Declared interface of the referenced object.
    pub interface: String,
    pub capability: Capability,
}

impl LongReference {
    pub fn global_id(&self) -> GlobalId {
        GlobalId { owner: self.owner.clone(), id: self.id }
    }
}

/// A marshalled value.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    /// First occurrence of a copied record identity.
    Record {
        slot: u32,
        type_name: String,
        fields: Vec<(String, WireValue)>,
    },
    /// Later occurrence of a record already sent in this operation.
    Backref(u32),
    Reference(LongReference),
}

impl WireValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Collects every long reference contained in this value.
    pub fn references(&self) -> Vec<&LongReference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a LongReference>) {
        match self {
            Self::Reference(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Self::Record { fields, .. } => {
                fields.iter().for_each(|(_, v)| v.collect_references(out))
            }
            _ => {}
        }
    }
}
