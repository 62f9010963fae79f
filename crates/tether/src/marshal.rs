//! # Marshaller
//!
//! Decides, value by value, what crosses a process boundary as a copy and
//! what stays home behind a long reference.
//!
//! ## Rules
//!
//! 1. Scalars, text, bytes and lists are copied.
//! 2. A record whose type is `Copiable` is copied field by field with these
//!    same rules, so a non-copiable field inside it becomes a reference.
//! 3. A `NonCopiable` or `NonMigratable` record, and every object, becomes a
//!    `LongReference`. The object is registered in the local table under the
//!    destination's holder set first.
//! 4. A `NonMigratable` object adopted by a different communicator cannot be
//!    re-homed here: that is a `HomeChanged` error, never a silent copy.
//! 5. Record identities are memoized for one marshal operation. The first
//!    occurrence gets a slot, later ones a back-reference, so sharing and
//!    cycles survive the trip.
//!
//! Exports and pins are collected while marshalling and registered by
//! `commit`, so a marshal that fails halfway leaves no claims behind. An
//! object adopted by another communicator is exported under one id however
//! often it is sent. Every copy the unmarshaller builds is a single record
//! graph.
//!
//! Forwarding a proxy to a third endpoint pins it here for one lease period;
//! the receiver acquires its own lease from the owner before the value
//! reaches application code.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tetherrpc::Capability;
use tetherrpc::EndpointAddress;
use tetherrpc::GlobalId;
use tetherrpc::LongReference;
use tetherrpc::ObjectId;
use tetherrpc::WireValue;
use tetherrpc::MAX_DEPTH;

use crate::args;
use crate::catalog::CatalogError;
use crate::communicator::Communicator;
use crate::communicator::Shared;
use crate::object::InvokeError;
use crate::object::LocalRef;
use crate::object::ObjectRef;
use crate::object::RemoteObject;
use crate::proxy::Proxy;
use crate::value::Record;
use crate::value::RecordKey;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// A record type with no declared capability.
    Untagged(String),
    /// A `NonMigratable` object would change its home endpoint.
    HomeChanged { interface: String, home: EndpointAddress },
    TooDeep,
    UnknownBackref(u32),
    DuplicateSlot(u32),
    /// A reference to one of our own objects that is no longer alive.
    StaleReference(GlobalId),
    Catalog(CatalogError),
    /// A third-party reference could not be registered with its owner.
    Acquire { owner: EndpointAddress, reason: String },
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untagged(ty) => write!(f, "type '{}' has no capability tag", ty),
            Self::HomeChanged { interface, home } => {
                write!(f, "non-migratable '{}' cannot leave its home {}", interface, home)
            }
            Self::TooDeep => write!(f, "value nesting exceeds {}", MAX_DEPTH),
            Self::UnknownBackref(slot) => write!(f, "back-reference to unknown slot {}", slot),
            Self::DuplicateSlot(slot) => write!(f, "slot {} defined twice", slot),
            Self::StaleReference(id) => write!(f, "stale reference to {}", id),
            Self::Catalog(e) => write!(f, "{}", e),
            Self::Acquire { owner, reason } => {
                write!(f, "could not acquire reference from {}: {}", owner, reason)
            }
        }
    }
}

impl std::error::Error for MarshalError {}

impl From<CatalogError> for MarshalError {
    fn from(e: CatalogError) -> Self {
        Self::Catalog(e)
    }
}

/// Serves a non-copiable record to other processes.
pub(crate) struct RecordObject {
    record: Record,
    capability: Capability,
}

impl RecordObject {
    pub(crate) fn new(record: Record, capability: Capability) -> Self {
        Self { record, capability }
    }
}

#[async_trait::async_trait]
impl RemoteObject for RecordObject {
    fn interface(&self) -> &str {
        self.record.type_name()
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    async fn invoke(&self, _ctx: &Communicator, selector: &str, args: Vec<Value>) -> Result<Value, InvokeError> {
        match selector {
            "get" => {
                args::expect_len(&args, 1)?;
                let name = args::expect_text(&args, 0)?;
                self.record
                    .get(name)
                    .ok_or_else(|| InvokeError::application("NoSuchField", name))
            }
            "set" => {
                args::expect_len(&args, 2)?;
                let name = args::expect_text(&args, 0)?.to_string();
                let mut args = args;
                let value = args.pop().unwrap_or(Value::Unit);
                self.record.set(name, value);
                Ok(Value::Unit)
            }
            "fields" => {
                args::expect_len(&args, 0)?;
                Ok(Value::List(self.record.field_names().into_iter().map(Value::Text).collect()))
            }
            other => Err(InvokeError::NoSuchMethod(other.to_string())),
        }
    }
}

/// One marshal operation towards one destination.
pub struct Marshaller<'a> {
    shared: &'a Arc<Shared>,
    destination: &'a EndpointAddress,
    now: Instant,
    memo: HashMap<RecordKey, u32>,
    /// Keeps memoized records alive so their identities cannot be reused
    /// before the operation ends.
    held: Vec<Record>,
    exports: Vec<LocalRef>,
    pins: Vec<Proxy>,
}

impl<'a> Marshaller<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, destination: &'a EndpointAddress) -> Self {
        Self {
            shared,
            destination,
            now: Instant::now(),
            memo: HashMap::new(),
            held: Vec::new(),
            exports: Vec::new(),
            pins: Vec::new(),
        }
    }

    pub fn marshal(&mut self, value: &Value) -> Result<WireValue, MarshalError> {
        self.marshal_at(value, 0)
    }

    /// Marshals every value and commits, or fails having registered nothing.
    pub(crate) fn marshal_all(mut self, values: &[Value]) -> Result<Vec<WireValue>, MarshalError> {
        let wire = values.iter().map(|value| self.marshal(value)).collect::<Result<Vec<_>, _>>()?;
        self.commit();
        Ok(wire)
    }

    /// Registers the destination as holder of everything exported, and pins
    /// every forwarded proxy. Call once the whole operation has succeeded and
    /// before the bytes are sent.
    pub(crate) fn commit(self) {
        let table = self.shared.table();
        for local in &self.exports {
            table.export(local, self.destination, self.now);
        }
        for proxy in self.pins {
            self.shared.pin(proxy, self.now);
        }
    }

    fn marshal_at(&mut self, value: &Value, depth: usize) -> Result<WireValue, MarshalError> {
        if depth > MAX_DEPTH {
            return Err(MarshalError::TooDeep);
        }
        Ok(match value {
            Value::Unit => WireValue::Unit,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Int(i) => WireValue::Int(*i),
            Value::Float(x) => WireValue::Float(*x),
            Value::Text(s) => WireValue::Text(s.clone()),
            Value::Bytes(b) => WireValue::Bytes(b.clone()),
            Value::List(items) => WireValue::List(
                items
                    .iter()
                    .map(|item| self.marshal_at(item, depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Record(record) => self.marshal_record(record, depth)?,
            Value::Object(object) => self.marshal_object(object)?,
        })
    }

    fn marshal_record(&mut self, record: &Record, depth: usize) -> Result<WireValue, MarshalError> {
        if let Some(slot) = self.memo.get(&record.identity()) {
            return Ok(WireValue::Backref(*slot));
        }
        let capability = self
            .shared
            .catalog()
            .capability_of(record.type_name())
            .ok_or_else(|| MarshalError::Untagged(record.type_name().to_string()))?;
        if capability.is_referenced() {
            let local = self.shared.record_object(record, capability)?;
            return Ok(self.export(&local));
        }

        let slot = u32::try_from(self.memo.len()).map_err(|_| MarshalError::TooDeep)?;
        self.memo.insert(record.identity(), slot);
        self.held.push(record.clone());

        let mut fields = Vec::with_capacity(record.len());
        for (name, value) in record.fields() {
            let wire = self.marshal_at(&value, depth + 1)?;
            fields.push((name, wire));
        }
        Ok(WireValue::Record { slot, type_name: record.type_name().to_string(), fields })
    }

    fn marshal_object(&mut self, object: &ObjectRef) -> Result<WireValue, MarshalError> {
        match object {
            ObjectRef::Local(local) => {
                let local = if local.belongs_to(self.shared) {
                    local.clone()
                } else if local.0.capability.forbids_migration() {
                    return Err(MarshalError::HomeChanged {
                        interface: local.0.interface.clone(),
                        home: local.0.home.clone(),
                    });
                } else {
                    self.shared.adopt_migrant(local.object())?
                };
                Ok(self.export(&local))
            }
            ObjectRef::Remote(proxy) => {
                let reference = proxy.reference().clone();
                if &reference.owner != self.destination {
                    self.pins.push(proxy.clone());
                }
                Ok(WireValue::Reference(reference))
            }
        }
    }

    fn export(&mut self, local: &LocalRef) -> WireValue {
        let home = self.shared.address();
        if self.destination != home {
            self.exports.push(local.clone());
        }
        WireValue::Reference(LongReference {
            owner: home.clone(),
            id: local.id(),
            interface: local.0.interface.clone(),
            capability: local.0.capability,
        })
    }
}

/// One unmarshal operation from one source.
pub struct Unmarshaller<'a> {
    shared: &'a Arc<Shared>,
    slots: HashMap<u32, Record>,
    /// The first record built; every later one joins its graph.
    graph: Option<Record>,
}

impl<'a> Unmarshaller<'a> {
    /// Rebuilds values received from `source`, after acquiring any
    /// references that `source` forwarded on behalf of a third endpoint.
    pub(crate) async fn unmarshal_all(
        shared: &'a Arc<Shared>,
        source: &EndpointAddress,
        wire: &[WireValue],
    ) -> Result<Vec<Value>, MarshalError> {
        acquire_third_party(shared, source, wire).await?;
        let mut u = Self { shared, slots: HashMap::new(), graph: None };
        wire.iter().map(|w| u.build(w)).collect()
    }

    pub(crate) async fn unmarshal(
        shared: &'a Arc<Shared>,
        source: &EndpointAddress,
        wire: &WireValue,
    ) -> Result<Value, MarshalError> {
        acquire_third_party(shared, source, std::slice::from_ref(wire)).await?;
        Self { shared, slots: HashMap::new(), graph: None }.build(wire)
    }

    fn build(&mut self, wire: &WireValue) -> Result<Value, MarshalError> {
        Ok(match wire {
            WireValue::Unit => Value::Unit,
            WireValue::Bool(b) => Value::Bool(*b),
            WireValue::Int(i) => Value::Int(*i),
            WireValue::Float(x) => Value::Float(*x),
            WireValue::Text(s) => Value::Text(s.clone()),
            WireValue::Bytes(b) => Value::Bytes(b.clone()),
            WireValue::List(items) => {
                Value::List(items.iter().map(|item| self.build(item)).collect::<Result<_, _>>()?)
            }
            WireValue::Record { slot, type_name, fields } => {
                if self.slots.contains_key(slot) {
                    return Err(MarshalError::DuplicateSlot(*slot));
                }
                // registered before its fields so back-references inside resolve
                let record = match &self.graph {
                    Some(first) => first.sibling(type_name.clone()),
                    None => {
                        let first = Record::new(type_name.clone());
                        self.graph = Some(first.clone());
                        first
                    }
                };
                self.slots.insert(*slot, record.clone());
                for (name, field) in fields {
                    let value = self.build(field)?;
                    record.set(name.clone(), value);
                }
                Value::Record(record)
            }
            WireValue::Backref(slot) => self
                .slots
                .get(slot)
                .cloned()
                .map(Value::Record)
                .ok_or(MarshalError::UnknownBackref(*slot))?,
            WireValue::Reference(reference) => {
                if &reference.owner == self.shared.address() {
                    let local = self
                        .shared
                        .lookup_own(reference.id)
                        .ok_or_else(|| MarshalError::StaleReference(reference.global_id()))?;
                    Value::Object(ObjectRef::Local(local))
                } else {
                    Value::Object(ObjectRef::Remote(self.shared.import(reference)))
                }
            }
        })
    }
}

async fn acquire_third_party(
    shared: &Arc<Shared>,
    source: &EndpointAddress,
    wire: &[WireValue],
) -> Result<(), MarshalError> {
    let mut by_owner: BTreeMap<EndpointAddress, Vec<ObjectId>> = BTreeMap::new();
    for value in wire {
        for reference in value.references() {
            if &reference.owner != shared.address() && &reference.owner != source {
                by_owner.entry(reference.owner.clone()).or_default().push(reference.id);
            }
        }
    }
    for (owner, ids) in by_owner {
        shared
            .acquire(&owner, &ids)
            .await
            .map_err(|e| MarshalError::Acquire { owner: owner.clone(), reason: e.to_string() })?;
    }
    Ok(())
}
