//! Unit tests for the object table, catalog, configuration, peer pump and
//! marshaller.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::watch;

use tetherrpc::Failure;
use tetherrpc::FailureKind;
use tetherrpc::Frame;
use tetherrpc::LongReference;
use tetherrpc::Target;
use tetherrpc::WireValue;

use crate::auth::Keystore;
use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::marshal::Marshaller;
use crate::marshal::Unmarshaller;
use crate::mock_transport::DuplexChannelTransport;
use crate::object::LocalEntry;
use crate::object::LocalRef;
use crate::peer;
use crate::peer::Dispatch;
use crate::peer::Peer;
use crate::table::LeaseState;
use crate::table::ObjectTable;
use crate::transport::Transport;
use crate::*;

struct Counter {
    value: AtomicI64,
}

impl Counter {
    fn new() -> Self {
        Self { value: AtomicI64::new(0) }
    }
}

#[async_trait::async_trait]
impl RemoteObject for Counter {
    fn interface(&self) -> &str {
        "Counter"
    }

    async fn invoke(&self, _ctx: &Communicator, selector: &str, args: Vec<Value>) -> std::result::Result<Value, InvokeError> {
        match selector {
            "increment" => {
                args::expect_len(&args, 0)?;
                Ok(Value::Int(self.value.fetch_add(1, Ordering::SeqCst) + 1))
            }
            "get" => Ok(Value::Int(self.value.load(Ordering::SeqCst))),
            other => Err(InvokeError::NoSuchMethod(other.into())),
        }
    }
}

struct Pinned;

#[async_trait::async_trait]
impl RemoteObject for Pinned {
    fn interface(&self) -> &str {
        "Pinned"
    }

    fn capability(&self) -> Capability {
        Capability::NonMigratable
    }

    async fn invoke(&self, _ctx: &Communicator, selector: &str, _args: Vec<Value>) -> std::result::Result<Value, InvokeError> {
        Err(InvokeError::NoSuchMethod(selector.into()))
    }
}

struct Snapshot;

#[async_trait::async_trait]
impl RemoteObject for Snapshot {
    fn interface(&self) -> &str {
        "Snapshot"
    }

    fn capability(&self) -> Capability {
        Capability::Copiable
    }

    async fn invoke(&self, _ctx: &Communicator, selector: &str, _args: Vec<Value>) -> std::result::Result<Value, InvokeError> {
        Err(InvokeError::NoSuchMethod(selector.into()))
    }
}

fn detached(id: u64) -> LocalRef {
    LocalRef(Arc::new(LocalEntry {
        object: Arc::new(Counter::new()),
        id: ObjectId(id),
        home: EndpointAddress::tls("127.0.0.1", 1),
        interface: "Counter".into(),
        capability: Capability::NonCopiable,
        communicator: Weak::new(),
    }))
}

fn holder(port: u16) -> EndpointAddress {
    EndpointAddress::tls("127.0.0.1", port)
}

async fn start() -> Communicator {
    let (keystore, _) = Keystore::enroll("unit", Duration::from_secs(3600)).expect("enroll");
    Communicator::builder(CommunicatorConfig::default())
        .identity(keystore)
        .start()
        .await
        .expect("start")
}

/// Two communicators that trust each other.
async fn start_pair(config: CommunicatorConfig) -> (Communicator, Communicator) {
    let (mut a, _) = Keystore::enroll("unit a", Duration::from_secs(3600)).expect("enroll");
    let (mut b, _) = Keystore::enroll("unit b", Duration::from_secs(3600)).expect("enroll");
    let (for_a, for_b) = (b.export_certificate(), a.export_certificate());
    a.trust(for_a);
    b.trust(for_b);
    let a = Communicator::builder(config.clone()).identity(a).start().await.expect("start");
    let b = Communicator::builder(config).identity(b).start().await.expect("start");
    (a, b)
}

/// Accepts connections and never answers on them.
async fn blackhole() -> EndpointAddress {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    holder(port)
}

fn counter_reference(owner: &EndpointAddress, id: u64) -> LongReference {
    LongReference {
        owner: owner.clone(),
        id: ObjectId(id),
        interface: "Counter".into(),
        capability: Capability::NonCopiable,
    }
}

// ============================================================================
//  OBJECT TABLE
// ============================================================================

#[test]
fn test_table_counts_deliveries_per_holder() {
    let table = ObjectTable::new(Duration::from_secs(10));
    let now = Instant::now();
    let object = detached(1);
    let (a, b) = (holder(10), holder(11));

    table.export(&object, &a, now);
    table.export(&object, &a, now);
    table.export(&object, &b, now);
    assert_eq!(table.len(), 1);

    let holders = table.holders(ObjectId(1));
    let count_of = |h: &EndpointAddress| holders.iter().find(|(x, _)| x == h).map(|(_, l)| l.count);
    assert_eq!(count_of(&a), Some(2));
    assert_eq!(count_of(&b), Some(1));

    assert!(!table.release(&a, ObjectId(1), 1));
    assert!(table.release(&a, ObjectId(1), 1));
    assert!(table.release(&b, ObjectId(1), 5));
    assert!(table.holders(ObjectId(1)).is_empty());

    // the empty entry goes at the next sweep
    assert!(table.contains(ObjectId(1)));
    let swept = table.sweep(now);
    assert_eq!(swept.reclaimed.len(), 1);
    assert!(table.is_empty());
}

#[test]
fn test_table_lease_expiry_and_renewal() {
    let lease = Duration::from_secs(10);
    let table = ObjectTable::new(lease);
    let start = Instant::now();
    let (a, b) = (holder(10), holder(11));
    let object = detached(7);

    table.export(&object, &a, start);
    table.export(&object, &b, start);

    // past the midpoint the lease is marked for renewal
    let swept = table.sweep(start + Duration::from_secs(6));
    assert_eq!(swept.expired, 0);
    assert!(table.holders(ObjectId(7)).iter().all(|(_, l)| l.state == LeaseState::Renewing));

    assert_eq!(table.renew(&a, &[ObjectId(7), ObjectId(99)], start + Duration::from_secs(8)), 1);

    let swept = table.sweep(start + Duration::from_secs(12));
    assert_eq!(swept.expired, 1);
    assert!(swept.reclaimed.is_empty());
    let holders = table.holders(ObjectId(7));
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].0, a);
    assert_eq!(holders[0].1.state, LeaseState::Leased);

    let swept = table.sweep(start + Duration::from_secs(30));
    assert_eq!(swept.expired, 1);
    assert_eq!(swept.reclaimed.len(), 1);
    assert!(table.lookup(ObjectId(7)).is_none());
}

#[test]
fn test_table_acquire_is_all_or_nothing() {
    let table = ObjectTable::new(Duration::from_secs(10));
    let now = Instant::now();
    table.export(&detached(1), &holder(10), now);

    assert_eq!(table.acquire(&holder(20), &[ObjectId(1), ObjectId(2)], now), Err(ObjectId(2)));
    assert_eq!(table.holders(ObjectId(1)).len(), 1);

    assert_eq!(table.acquire(&holder(20), &[ObjectId(1)], now), Ok(()));
    assert_eq!(table.holders(ObjectId(1)).len(), 2);
}

// ============================================================================
//  CATALOG & CONFIG
// ============================================================================

#[test]
fn test_catalog_conflicts() {
    let catalog = TypeCatalog::new();
    catalog.declare("Point", Capability::Copiable).expect("declare");
    catalog.declare("Point", Capability::Copiable).expect("redeclare");
    assert!(matches!(
        catalog.declare("Point", Capability::NonCopiable),
        Err(CatalogError::Conflict { .. })
    ));

    catalog.declare("Account", Capability::NonCopiable).expect("declare");
    catalog.declare("Account", Capability::NonMigratable).expect("narrow");
    assert_eq!(catalog.capability_of("Account"), Some(Capability::NonMigratable));
    assert_eq!(catalog.capability_of("Unknown"), None);
}

#[test]
fn test_endpoint_config_parse() {
    let text = "type=tls; keystore=/etc/node.ks; password_file=/dev/stdin; host=10.0.0.5; port=7400";
    let config: EndpointConfig = text.parse().expect("parse");
    assert_eq!(config.address(), EndpointAddress::tls("10.0.0.5", 7400));
    assert_eq!(config.password_file.to_str(), Some("/dev/stdin"));
    assert_eq!(config.to_string().parse::<EndpointConfig>(), Ok(config));

    assert!(matches!(
        "type=tls; keystore=k; password_file=p; host=h".parse::<EndpointConfig>(),
        Err(ConfigError::MissingKey("port"))
    ));
    assert!(matches!(
        "type=tls; type=tls".parse::<EndpointConfig>(),
        Err(ConfigError::DuplicateKey(_))
    ));
    assert!(matches!(
        "type=tls; colour=blue".parse::<EndpointConfig>(),
        Err(ConfigError::UnknownKey(_))
    ));
    assert!(matches!(
        "type=tls; keystore=k; password_file=p; host=h; port=http".parse::<EndpointConfig>(),
        Err(ConfigError::BadValue { key: "port", .. })
    ));
    assert!(matches!("nonsense".parse::<EndpointConfig>(), Err(ConfigError::Malformed(_))));
}

#[test]
fn test_communicator_config_validation() {
    assert!(CommunicatorConfig::default().validate().is_ok());
    let config = CommunicatorConfig {
        renew_interval: Duration::from_secs(30),
        lease_timeout: Duration::from_secs(30),
        ..CommunicatorConfig::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));

    // renewals need room to finish within the lease
    let config = CommunicatorConfig {
        renew_interval: Duration::from_secs(20),
        lease_timeout: Duration::from_secs(30),
        ..CommunicatorConfig::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));
    assert_eq!(CommunicatorConfig::default().renewal_timeout(), Duration::from_secs(10));
}

// ============================================================================
//  VALUES
// ============================================================================

#[test]
fn test_record_identity_and_equality() {
    let a = Record::new("Point").with("x", 1i64);
    let b = Record::new("Point").with("x", 1i64);
    assert_eq!(Value::Record(a.clone()), Value::Record(a.clone()));
    assert_ne!(Value::Record(a.clone()), Value::Record(b));
    assert_eq!(a.set("x", 2i64), Some(Value::Int(1)));
    assert_eq!(a.field_names(), vec!["x".to_string()]);
    a.clear();
    assert!(a.is_empty());
}

#[test]
fn test_record_graph_cycle_is_freed() {
    let a = Record::new("Node").with("name", "a");
    let b = a.sibling("Node").with("name", "b").with("next", a.clone());
    a.set("next", Value::List(vec![Value::Record(b.clone())]));

    let around = a.get("next").expect("next");
    let b_again = around.as_list().expect("list")[0].as_record().expect("record").clone();
    assert!(b_again.ptr_eq(&b));
    assert!(b.get("next").expect("next").as_record().expect("record").ptr_eq(&a));
    drop(around);
    drop(b_again);

    let watch = a.downgrade();
    drop(a);
    // b still reaches a
    let a = watch.upgrade().expect("alive through b");
    assert_eq!(a.get("name"), Some(Value::text("a")));
    drop(a);
    drop(b);
    assert!(watch.upgrade().is_none());
}

// ============================================================================
//  PEER
// ============================================================================

/// Echoes the first argument back; `fail` answers with a domain error and
/// `hang` never answers.
#[derive(Default)]
struct EchoDispatch {
    served: AtomicUsize,
    disconnects: AtomicUsize,
}

#[async_trait::async_trait]
impl Dispatch for EchoDispatch {
    async fn dispatch(
        &self,
        _from: &EndpointAddress,
        _target: Target,
        selector: String,
        args: Vec<WireValue>,
    ) -> std::result::Result<WireValue, Failure> {
        self.served.fetch_add(1, Ordering::SeqCst);
        match selector.as_str() {
            "fail" => Err(Failure::new(FailureKind::Application("Boom".into()), "it broke")),
            "hang" => futures::future::pending().await,
            _ => Ok(args.into_iter().next().unwrap_or(WireValue::Unit)),
        }
    }

    fn disconnected(&self, _remote: &EndpointAddress) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

fn peer_over(transport: DuplexChannelTransport, dispatch: Arc<EchoDispatch>, stop: &watch::Sender<bool>) -> Arc<Peer> {
    Peer::new(holder(1), Arc::new(transport), dispatch, Duration::from_secs(5), stop.subscribe())
}

#[tokio::test]
async fn test_peer_roundtrip_and_failure() {
    let (stop, _) = watch::channel(false);
    let (a, b) = DuplexChannelTransport::pair();
    let server = Arc::new(EchoDispatch::default());
    let client = peer_over(a, Arc::new(EchoDispatch::default()), &stop);
    let _server = peer_over(b, server.clone(), &stop);

    let reply = client
        .call(Target::Object(ObjectId(1)), "echo", vec![WireValue::text("hi")])
        .await
        .expect("call");
    assert_eq!(reply, WireValue::text("hi"));

    let failed = client.call(Target::Object(ObjectId(1)), "fail", vec![]).await;
    match failed {
        Err(peer::Error::Failed(failure)) => {
            assert_eq!(failure.kind, FailureKind::Application("Boom".into()));
            assert_eq!(failure.message, "it broke");
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    assert_eq!(server.served.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_peer_calls_are_concurrent() {
    let (stop, _) = watch::channel(false);
    let (a, b) = DuplexChannelTransport::pair();
    let client = peer_over(a, Arc::new(EchoDispatch::default()), &stop);
    let _server = peer_over(b, Arc::new(EchoDispatch::default()), &stop);

    // a hung call must not block the ones after it
    let hung = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Target::Collector, "hang", vec![]).await })
    };
    for i in 0..10 {
        let reply = client.call(Target::Collector, "echo", vec![WireValue::Int(i)]).await.expect("call");
        assert_eq!(reply, WireValue::Int(i));
    }

    client.close().await;
    assert!(matches!(hung.await.expect("join"), Err(peer::Error::Closed)));
    assert!(matches!(client.call(Target::Collector, "echo", vec![]).await, Err(peer::Error::Closed)));
}

#[tokio::test]
async fn test_peer_remote_hangup_fails_pending() {
    let (stop, _) = watch::channel(false);
    let (a, b) = DuplexChannelTransport::pair();
    let client = peer_over(a, Arc::new(EchoDispatch::default()), &stop);
    let server = peer_over(b, Arc::new(EchoDispatch::default()), &stop);

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Target::Collector, "hang", vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.close().await;

    assert!(matches!(pending.await.expect("join"), Err(peer::Error::Transport(_))));
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_peer_shutdown_signal_stops_pump() {
    let (stop, _) = watch::channel(false);
    let (a, b) = DuplexChannelTransport::pair();
    let dispatch = Arc::new(EchoDispatch::default());
    let client = peer_over(a, dispatch.clone(), &stop);
    let _server = peer_over(b, Arc::new(EchoDispatch::default()), &stop);

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call(Target::Collector, "hang", vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.send_replace(true);

    assert!(matches!(pending.await.expect("join"), Err(peer::Error::Closed)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatch.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_peer_drops_duplicate_invokes() {
    let (stop, _) = watch::channel(false);
    let (raw, b) = DuplexChannelTransport::pair();
    let server = Arc::new(EchoDispatch::default());
    let _server = peer_over(b, server.clone(), &stop);

    let invoke = |request_id, n| Frame::Invoke {
        request_id,
        target: Target::Collector,
        selector: "echo".into(),
        args: vec![WireValue::Int(n)],
    };
    raw.send(&invoke(7, 1).to_bytes().expect("encode")).await.expect("send");
    raw.send(&invoke(7, 2).to_bytes().expect("encode")).await.expect("send");
    raw.send(&invoke(8, 3).to_bytes().expect("encode")).await.expect("send");

    let mut replies = Vec::new();
    for _ in 0..2 {
        let bytes = raw.recv().await.expect("recv").expect("open");
        replies.push(Frame::from_bytes(&bytes).expect("decode"));
    }
    replies.sort_by_key(|f| f.request_id());
    assert_eq!(replies[0], Frame::Result { request_id: 7, outcome: Ok(WireValue::Int(1)) });
    assert_eq!(replies[1], Frame::Result { request_id: 8, outcome: Ok(WireValue::Int(3)) });
    assert_eq!(server.served.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_peer_undecodable_frame_tears_down() {
    let (stop, _) = watch::channel(false);
    let (raw, b) = DuplexChannelTransport::pair();
    let dispatch = Arc::new(EchoDispatch::default());
    let server = peer_over(b, dispatch.clone(), &stop);

    raw.send(b"\xffgarbage").await.expect("send");
    assert_eq!(raw.recv().await.expect("recv"), None);
    assert!(server.is_closed());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatch.disconnects.load(Ordering::SeqCst), 1);
}

// ============================================================================
//  MARSHALLER
// ============================================================================

#[tokio::test]
async fn test_marshal_copiable_record_preserves_sharing_and_cycles() {
    let comm = start().await;
    let shared = comm.shared();
    let remote = holder(9);
    comm.catalog().declare("Node", Capability::Copiable).expect("declare");

    let a = Record::new("Node").with("name", "a");
    let b = a.sibling("Node").with("name", "b").with("next", a.clone());
    a.set("next", b.clone());

    let value = Value::List(vec![Value::Record(a.clone()), Value::Record(a.clone())]);
    let wire = Marshaller::new(shared, &remote).marshal(&value).expect("marshal");
    match &wire {
        WireValue::List(items) => assert_eq!(items[1], WireValue::Backref(0)),
        other => panic!("unexpected {:?}", other),
    }

    let back = Unmarshaller::unmarshal(shared, &remote, &wire).await.expect("unmarshal");
    let copy = {
        let items = back.as_list().expect("list");
        let first = items[0].as_record().expect("record");
        let second = items[1].as_record().expect("record");
        assert!(first.ptr_eq(second));
        assert!(!first.ptr_eq(&a));

        let next = first.get("next").expect("next");
        let next = next.as_record().expect("record");
        assert_eq!(next.get("name"), Some(Value::text("b")));
        let around = next.get("next").expect("cycle");
        assert!(around.as_record().expect("record").ptr_eq(first));

        // copies are independent of the original
        a.set("name", "changed");
        assert_eq!(first.get("name"), Some(Value::text("a")));
        first.downgrade()
    };

    // the copy's cycle is not an ownership cycle
    drop(back);
    assert!(copy.upgrade().is_none());
    comm.shutdown().await;
}

#[tokio::test]
async fn test_marshal_untagged_record_fails() {
    let comm = start().await;
    let remote = holder(9);
    let value = Value::Record(Record::new("Mystery"));
    let err = Marshaller::new(comm.shared(), &remote).marshal(&value).expect_err("untagged");
    assert_eq!(err, MarshalError::Untagged("Mystery".into()));
    comm.shutdown().await;
}

#[tokio::test]
async fn test_marshal_noncopiable_record_stays_home() {
    let comm = start().await;
    let shared = comm.shared();
    let remote = holder(9);
    comm.catalog().declare("Account", Capability::NonCopiable).expect("declare");

    let account = Record::new("Account").with("balance", 10i64);
    let value = Value::Record(account.clone());
    let first = Marshaller::new(shared, &remote).marshal_all(std::slice::from_ref(&value)).expect("marshal");
    let second = Marshaller::new(shared, &remote).marshal_all(std::slice::from_ref(&value)).expect("marshal");
    let (first, second) = (first[0].clone(), second[0].clone());

    let WireValue::Reference(reference) = &first else {
        panic!("expected a reference, got {:?}", first);
    };
    assert_eq!(first, second);
    assert_eq!(&reference.owner, comm.local_address());
    assert_eq!(reference.interface, "Account");
    assert!(comm.is_exported(reference.id));
    assert_eq!(comm.holders(reference.id)[0].1.count, 2);

    // coming home, the reference resolves to the adapter serving the record
    let back = Unmarshaller::unmarshal(shared, &remote, &first).await.expect("unmarshal");
    let object = back.as_object().expect("object");
    assert!(object.is_local());
    assert_eq!(object.invoke("get", vec![Value::text("balance")]).await.expect("get"), Value::Int(10));
    object.invoke("set", vec![Value::text("balance"), Value::Int(5)]).await.expect("set");
    assert_eq!(account.get("balance"), Some(Value::Int(5)));
    comm.shutdown().await;
}

#[tokio::test]
async fn test_marshal_objects_and_home_rules() {
    let home = start().await;
    let other = start().await;
    let remote = holder(9);

    let counter = home.adopt(Counter::new()).expect("adopt");
    let wire = Marshaller::new(home.shared(), &remote)
        .marshal_all(&[Value::Object(counter.clone())])
        .expect("marshal");
    let WireValue::Reference(reference) = &wire[0] else {
        panic!("expected a reference, got {:?}", wire);
    };
    assert_eq!(reference.global_id(), counter.global_id());
    assert_eq!(reference.capability, Capability::NonCopiable);

    // marshalling to ourselves registers no holder
    let here = home.local_address().clone();
    Marshaller::new(home.shared(), &here).marshal(&Value::Object(counter.clone())).expect("marshal");
    assert_eq!(home.holders(counter.global_id().id).len(), 1);

    let pinned = home.adopt(Pinned).expect("adopt");
    let err = Marshaller::new(other.shared(), &remote)
        .marshal(&Value::Object(pinned))
        .expect_err("non-migratable");
    assert!(matches!(err, MarshalError::HomeChanged { .. }));

    let err = home.adopt(Snapshot).expect_err("copiable object");
    assert_eq!(err.kind(), ErrorKind::Configuration);

    home.shutdown().await;
    other.shutdown().await;
}

#[tokio::test]
async fn test_unmarshal_proxies_absorb_deliveries() {
    let comm = start().await;
    let shared = comm.shared();
    let owner = holder(9);
    let reference = WireValue::Reference(LongReference {
        owner: owner.clone(),
        id: ObjectId(3),
        interface: "Counter".into(),
        capability: Capability::NonCopiable,
    });

    let first = Unmarshaller::unmarshal(shared, &owner, &reference).await.expect("unmarshal");
    let second = Unmarshaller::unmarshal(shared, &owner, &reference).await.expect("unmarshal");
    assert_eq!(first, second);
    let Some(ObjectRef::Remote(proxy)) = first.as_object() else {
        panic!("expected a proxy");
    };
    assert_eq!(proxy.deliveries(), 2);
    assert_eq!(comm.import_count(), 1);

    let stale = WireValue::Reference(LongReference {
        owner: comm.local_address().clone(),
        id: ObjectId(4242),
        interface: "Counter".into(),
        capability: Capability::NonCopiable,
    });
    let err = Unmarshaller::unmarshal(shared, &owner, &stale).await.expect_err("stale");
    assert!(matches!(err, MarshalError::StaleReference(_)));

    let bad = WireValue::List(vec![WireValue::Backref(5)]);
    let err = Unmarshaller::unmarshal(shared, &owner, &bad).await.expect_err("backref");
    assert_eq!(err, MarshalError::UnknownBackref(5));

    drop(first);
    drop(second);
    comm.shutdown().await;
}

#[tokio::test]
async fn test_marshal_migrated_object_keeps_one_identity() {
    let home = start().await;
    let other = start().await;
    let remote = holder(9);

    let counter = home.adopt(Counter::new()).expect("adopt");
    let value = Value::Object(counter.clone());
    let first = Marshaller::new(other.shared(), &remote).marshal_all(std::slice::from_ref(&value)).expect("marshal");
    let second = Marshaller::new(other.shared(), &remote).marshal_all(std::slice::from_ref(&value)).expect("marshal");
    assert_eq!(first, second);

    let WireValue::Reference(reference) = &first[0] else {
        panic!("expected a reference, got {:?}", first);
    };
    assert_eq!(&reference.owner, other.local_address());
    assert_eq!(other.exported_count(), 1);
    assert_eq!(other.holders(reference.id)[0].1.count, 2);

    home.shutdown().await;
    other.shutdown().await;
}

#[tokio::test]
async fn test_failed_marshal_registers_nothing() {
    let comm = start().await;
    let remote = holder(9);
    let counter = comm.adopt(Counter::new()).expect("adopt");

    let args = vec![Value::Object(counter.clone()), Value::Record(Record::new("Mystery"))];
    let err = Marshaller::new(comm.shared(), &remote).marshal_all(&args).expect_err("untagged");
    assert_eq!(err, MarshalError::Untagged("Mystery".into()));
    assert!(!comm.is_exported(counter.global_id().id));
    assert_eq!(comm.exported_count(), 0);
    comm.shutdown().await;
}

// ============================================================================
//  COLLECTOR
// ============================================================================

#[tokio::test]
async fn test_third_party_acquire_failure() {
    let (receiver, owner) = start_pair(CommunicatorConfig::default()).await;
    let forwarder = holder(9);

    let counter = owner.adopt(Counter::new()).expect("adopt");
    let known = Marshaller::new(owner.shared(), &forwarder)
        .marshal_all(&[Value::Object(counter.clone())])
        .expect("marshal");
    let WireValue::Reference(known) = known[0].clone() else {
        panic!("expected a reference");
    };
    let unknown = counter_reference(owner.local_address(), 4242);

    // one unknown id fails the whole acquire
    let wire = WireValue::List(vec![WireValue::Reference(known.clone()), WireValue::Reference(unknown)]);
    let err = Unmarshaller::unmarshal(receiver.shared(), &forwarder, &wire).await.expect_err("acquire");
    match err {
        MarshalError::Acquire { owner: at, reason } => {
            assert_eq!(&at, owner.local_address());
            assert!(reason.contains("NoSuchObject"), "{}", reason);
        }
        other => panic!("expected an acquire failure, got {:?}", other),
    }
    assert_eq!(receiver.import_count(), 0);
    let holds = |node: &Communicator| owner.holders(known.id).iter().any(|(h, _)| h == node.local_address());
    assert!(!holds(&receiver));

    let value = Unmarshaller::unmarshal(receiver.shared(), &forwarder, &WireValue::Reference(known.clone()))
        .await
        .expect("acquire");
    assert!(value.as_object().expect("object").is_remote());
    assert!(holds(&receiver));

    receiver.shutdown().await;
    owner.shutdown().await;
}

#[tokio::test]
async fn test_renewal_survives_an_unresponsive_owner() {
    let config = CommunicatorConfig {
        lease_timeout: Duration::from_millis(800),
        renew_interval: Duration::from_millis(200),
        sweep_interval: Duration::from_millis(100),
        ..CommunicatorConfig::default()
    };
    let (holder_node, owner) = start_pair(config).await;
    let silent = blackhole().await;

    let counter = owner.adopt(Counter::new()).expect("adopt");
    let id = counter.global_id().id;
    let wire = Marshaller::new(owner.shared(), holder_node.local_address())
        .marshal_all(&[Value::Object(counter)])
        .expect("marshal");
    let live = Unmarshaller::unmarshal(holder_node.shared(), owner.local_address(), &wire[0])
        .await
        .expect("unmarshal");

    // an owner that accepts the connection and never answers
    let stuck = holder_node.shared().import(&counter_reference(&silent, 1));
    assert_eq!(holder_node.import_count(), 2);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(owner.is_exported(id));
    let live = live.as_object().expect("object").clone();
    assert_eq!(live.invoke("increment", vec![]).await.expect("call"), Value::Int(1));

    holder_node.shutdown().await;
    owner.shutdown().await;
    drop(stuck);
}
