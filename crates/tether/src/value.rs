//! # Values
//!
//! What application code passes to and receives from remote objects.
//!
//! Scalars, text, bytes and lists are plain values. A `Record` is a shared,
//! mutable bag of named fields with identity: clones alias the same record,
//! and the marshaller uses that identity to preserve sharing and cycles. An
//! `Object` is a handle to something that never leaves its home process.
//!
//! ## Record Graphs
//!
//! Records live in graphs: arenas of nodes addressed by index. A field that
//! points at a record of the same graph is stored as that index, so cycles
//! inside a graph are lookups, never ownership. A graph is freed when the
//! last handle to any of its records drops. Every copy the unmarshaller
//! builds is one graph; `Record::sibling` adds to an existing one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;

use crate::object::ObjectRef;

#[derive(Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Record(Record),
    Object(ObjectRef),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Record(r) => r.type_name(),
            Self::Object(o) => o.interface(),
        }
    }
}

/// Records compare by identity, objects by global identity, everything else
/// by value.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Record(r) => write!(f, "{:?}", r),
            Self::Object(o) => write!(f, "{:?}", o),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self { Self::Unit }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Self::Int(i) }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self { Self::Float(x) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::Text(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self { Self::Bytes(b) }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self { Self::List(items) }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self { Self::Record(r) }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self { Self::Object(o) }
}

/// Identity of a record: its graph and its index there.
pub(crate) type RecordKey = (usize, usize);

/// A field as stored in its graph.
enum Stored {
    Value(Value),
    /// A record of the same graph.
    Link(usize),
    List(Vec<Stored>),
}

struct Node {
    type_name: Arc<str>,
    fields: BTreeMap<String, Stored>,
}

/// Nodes are only ever appended, so an index stays valid for the life of
/// the graph.
struct Graph {
    nodes: Mutex<Vec<Node>>,
}

impl Graph {
    fn add(&self, type_name: Arc<str>) -> usize {
        let mut nodes = self.nodes.lock();
        nodes.push(Node { type_name, fields: BTreeMap::new() });
        nodes.len() - 1
    }
}

/// A shared, mutable, typed field bag.
///
/// Its capability comes from the communicator's `TypeCatalog`. Records built
/// with `sibling` share a graph and may point at each other freely; records
/// in different graphs hold each other strongly.
#[derive(Clone)]
pub struct Record {
    graph: Arc<Graph>,
    index: usize,
    type_name: Arc<str>,
}

impl Record {
    /// A record in a graph of its own.
    pub fn new(type_name: impl Into<String>) -> Self {
        let graph = Arc::new(Graph { nodes: Mutex::new(Vec::new()) });
        Self::add_to(graph, type_name)
    }

    /// A new record in this record's graph. Use it for structures that point
    /// back at each other. Its node lives as long as the graph does.
    pub fn sibling(&self, type_name: impl Into<String>) -> Self {
        Self::add_to(self.graph.clone(), type_name)
    }

    fn add_to(graph: Arc<Graph>, type_name: impl Into<String>) -> Self {
        let type_name: Arc<str> = type_name.into().into();
        let index = graph.add(type_name.clone());
        Self { graph, index, type_name }
    }

    /// Builder-style `set`.
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let nodes = self.graph.nodes.lock();
        nodes[self.index].fields.get(name).map(|stored| self.load(&nodes, stored))
    }

    /// Sets a field, returning the previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let stored = self.stow(value.into());
        let (previous, old) = {
            let mut nodes = self.graph.nodes.lock();
            let old = nodes[self.index].fields.insert(name.into(), stored);
            (old.as_ref().map(|old| self.load(&nodes, old)), old)
        };
        // may release other graphs; not under our lock
        drop(old);
        previous
    }

    pub fn field_names(&self) -> Vec<String> {
        self.graph.nodes.lock()[self.index].fields.keys().cloned().collect()
    }

    /// A snapshot of all fields, in name order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        let nodes = self.graph.nodes.lock();
        nodes[self.index]
            .fields
            .iter()
            .map(|(name, stored)| (name.clone(), self.load(&nodes, stored)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.nodes.lock()[self.index].fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every field.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut self.graph.nodes.lock()[self.index].fields);
        drop(drained);
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph) && self.index == other.index
    }

    /// A handle that does not keep the record's graph alive.
    pub fn downgrade(&self) -> WeakRecord {
        WeakRecord { graph: Arc::downgrade(&self.graph), index: self.index, type_name: self.type_name.clone() }
    }

    /// Identity key, stable for as long as the record is alive.
    pub(crate) fn identity(&self) -> RecordKey {
        (Arc::as_ptr(&self.graph) as usize, self.index)
    }

    fn stow(&self, value: Value) -> Stored {
        match value {
            Value::Record(record) if Arc::ptr_eq(&record.graph, &self.graph) => Stored::Link(record.index),
            Value::List(items) => Stored::List(items.into_iter().map(|item| self.stow(item)).collect()),
            other => Stored::Value(other),
        }
    }

    fn load(&self, nodes: &[Node], stored: &Stored) -> Value {
        match stored {
            Stored::Value(value) => value.clone(),
            Stored::Link(index) => Value::Record(Record {
                graph: self.graph.clone(),
                index: *index,
                type_name: nodes[*index].type_name.clone(),
            }),
            Stored::List(items) => Value::List(items.iter().map(|item| self.load(nodes, item)).collect()),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // field names only: records may be cyclic
        write!(f, "{} {{ {} }}", self.type_name(), self.field_names().join(", "))
    }
}

/// A record handle that does not keep its graph alive.
#[derive(Clone)]
pub struct WeakRecord {
    graph: Weak<Graph>,
    index: usize,
    type_name: Arc<str>,
}

impl WeakRecord {
    pub fn upgrade(&self) -> Option<Record> {
        let graph = self.graph.upgrade()?;
        Some(Record { graph, index: self.index, type_name: self.type_name.clone() })
    }
}
