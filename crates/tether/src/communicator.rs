//! # Communicator
//!
//! The per-process service behind every remote interaction. It listens on
//! one authenticated endpoint, keeps one channel per peer, owns the local
//! object table and the import table, and runs the collector's background
//! tasks.
//!
//! A `Communicator` is a cheap handle. Everything lives in `Shared`, which
//! background tasks and proxies reference weakly so that dropping the last
//! handle after `shutdown` frees it.
//!
//! ## Invariants
//!
//! - At most one proxy per imported `{owner, id}` is alive at a time.
//! - Own references always resolve to the real local handle, never a proxy.
//! - After `shutdown` every pending call has failed and no new channel opens.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use tetherrpc::Capability;
use tetherrpc::EndpointAddress;
use tetherrpc::Failure;
use tetherrpc::FailureKind;
use tetherrpc::GlobalId;
use tetherrpc::LongReference;
use tetherrpc::ObjectId;
use tetherrpc::Target;
use tetherrpc::WireValue;

use crate::auth::handshake;
use crate::auth::handshake::Credentials;
use crate::auth::Certificate;
use crate::auth::Fingerprint;
use crate::auth::Keystore;
use crate::auth::SecureChannel;
use crate::auth::Whitelist;
use crate::catalog::CatalogError;
use crate::catalog::TypeCatalog;
use crate::config::CommunicatorConfig;
use crate::config::ConfigError;
use crate::error::Cause;
use crate::error::Error;
use crate::error::Result;
use crate::gc;
use crate::gc::GcMessage;
use crate::marshal::Marshaller;
use crate::marshal::RecordObject;
use crate::marshal::Unmarshaller;
use crate::object::InvokeError;
use crate::object::LocalEntry;
use crate::object::LocalRef;
use crate::object::ObjectRef;
use crate::object::RemoteObject;
use crate::peer::Dispatch;
use crate::peer::Peer;
use crate::proxy::Proxy;
use crate::proxy::ProxyInner;
use crate::table::Lease;
use crate::table::ObjectTable;
use crate::task;
use crate::task::Task;
use crate::task::TaskRegistry;
use crate::value::Record;
use crate::value::RecordKey;
use crate::value::Value;

pub(crate) struct Shared {
    config: CommunicatorConfig,
    address: EndpointAddress,
    keystore: Arc<Keystore>,
    whitelist: Arc<Whitelist>,
    catalog: TypeCatalog,
    table: ObjectTable,
    tasks: TaskRegistry,
    /// Every adopted object still alive, for resolving own references.
    locals: DashMap<ObjectId, Weak<LocalEntry>>,
    /// Exported non-copiable records, by record identity.
    records: DashMap<RecordKey, Weak<LocalEntry>>,
    /// Objects adopted by another communicator and exported from here, by
    /// object identity.
    migrated: DashMap<usize, Weak<LocalEntry>>,
    imports: DashMap<GlobalId, Weak<ProxyInner>>,
    peers: DashMap<EndpointAddress, Arc<Peer>>,
    /// One dial at a time per address.
    connecting: DashMap<EndpointAddress, Arc<tokio::sync::Mutex<()>>>,
    next_object: AtomicU64,
    /// Proxies forwarded to a third endpoint, held until it has acquired.
    pins: parking_lot::Mutex<Vec<(Instant, Proxy)>>,
    gc_queue: mpsc::UnboundedSender<GcMessage>,
    shutdown: watch::Sender<bool>,
    me: Weak<Shared>,
}

impl Shared {
    pub(crate) fn address(&self) -> &EndpointAddress {
        &self.address
    }

    pub(crate) fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub(crate) fn table(&self) -> &ObjectTable {
        &self.table
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            keystore: self.keystore.clone(),
            endpoint: self.address.clone(),
            whitelist: self.whitelist.clone(),
            idle_timeout: self.config.idle_timeout,
        }
    }

    fn dispatch(&self) -> Arc<dyn Dispatch> {
        Arc::new(DispatchHandle(self.me.clone()))
    }

    /// Gives an object its id and home here.
    pub(crate) fn adopt_arc(&self, object: Arc<dyn RemoteObject>) -> std::result::Result<LocalRef, CatalogError> {
        let capability = object.capability();
        if !capability.is_referenced() {
            return Err(CatalogError::CopiableObject(object.interface().to_string()));
        }
        let id = ObjectId(self.next_object.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(LocalEntry {
            interface: object.interface().to_string(),
            object,
            id,
            home: self.address.clone(),
            capability,
            communicator: self.me.clone(),
        });
        self.locals.insert(id, Arc::downgrade(&entry));
        Ok(LocalRef(entry))
    }

    /// The object serving `record` to other processes, created on first use.
    pub(crate) fn record_object(
        &self,
        record: &Record,
        capability: Capability,
    ) -> std::result::Result<LocalRef, CatalogError> {
        match self.records.entry(record.identity()) {
            Entry::Occupied(mut slot) => {
                if let Some(entry) = slot.get().upgrade() {
                    return Ok(LocalRef(entry));
                }
                let local = self.adopt_arc(Arc::new(RecordObject::new(record.clone(), capability)))?;
                slot.insert(local.downgrade());
                Ok(local)
            }
            Entry::Vacant(slot) => {
                let local = self.adopt_arc(Arc::new(RecordObject::new(record.clone(), capability)))?;
                slot.insert(local.downgrade());
                Ok(local)
            }
        }
    }

    /// The local handle exporting `object` from here, when it was adopted
    /// by another communicator. Created on first use, so every delivery of
    /// the same object carries the same id.
    pub(crate) fn adopt_migrant(
        &self,
        object: &Arc<dyn RemoteObject>,
    ) -> std::result::Result<LocalRef, CatalogError> {
        let key = Arc::as_ptr(object) as *const () as usize;
        match self.migrated.entry(key) {
            Entry::Occupied(mut slot) => {
                if let Some(entry) = slot.get().upgrade() {
                    return Ok(LocalRef(entry));
                }
                let local = self.adopt_arc(object.clone())?;
                slot.insert(local.downgrade());
                Ok(local)
            }
            Entry::Vacant(slot) => {
                let local = self.adopt_arc(object.clone())?;
                slot.insert(local.downgrade());
                Ok(local)
            }
        }
    }

    pub(crate) fn lookup_own(&self, id: ObjectId) -> Option<LocalRef> {
        self.locals.get(&id).and_then(|entry| entry.upgrade()).map(LocalRef)
    }

    /// The proxy for `reference`, absorbing the delivery into an existing
    /// one when possible.
    pub(crate) fn import(&self, reference: &LongReference) -> Proxy {
        match self.imports.entry(reference.global_id()) {
            Entry::Occupied(mut slot) => {
                if let Some(inner) = slot.get().upgrade() {
                    let proxy = Proxy::from_inner(inner);
                    proxy.absorb();
                    return proxy;
                }
                let proxy = Proxy::new(reference.clone(), self.me.clone());
                slot.insert(proxy.downgrade());
                proxy
            }
            Entry::Vacant(slot) => {
                let proxy = Proxy::new(reference.clone(), self.me.clone());
                slot.insert(proxy.downgrade());
                proxy
            }
        }
    }

    pub(crate) fn pin(&self, proxy: Proxy, now: Instant) {
        self.pins.lock().push((now + self.table.lease_timeout(), proxy));
    }

    /// Called synchronously when the last handle to a proxy drops.
    pub(crate) fn proxy_dropped(&self, reference: &LongReference, count: u64) {
        self.imports.remove_if(&reference.global_id(), |_, weak| weak.strong_count() == 0);
        if self.config.release_on_drop && !self.is_shut_down() {
            let _ = self.gc_queue.send(GcMessage::Release {
                owner: reference.owner.clone(),
                id: reference.id,
                count,
            });
        }
    }

    fn live_peer(&self, remote: &EndpointAddress) -> Option<Arc<Peer>> {
        self.peers.get(remote).map(|p| p.value().clone()).filter(|p| !p.is_closed())
    }

    /// The open channel to `remote`, connecting if there is none.
    pub(crate) async fn peer_for(self: &Arc<Self>, remote: &EndpointAddress) -> Result<Arc<Peer>> {
        let context = format!("connecting to {}", remote);
        if self.is_shut_down() {
            return Err(Error::closed(context));
        }
        if let Some(peer) = self.live_peer(remote) {
            return Ok(peer);
        }

        let lock = self.connecting.entry(remote.clone()).or_default().clone();
        let _connecting = lock.lock().await;
        if let Some(peer) = self.live_peer(remote) {
            return Ok(peer);
        }

        let stream = match tokio::time::timeout(self.config.call_timeout, TcpStream::connect(remote.socket_target())).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::new(context, Cause::Io(e))),
            Err(_) => return Err(Error::new(context, Cause::Timeout)),
        };
        let channel = handshake::initiate(stream, &self.credentials())
            .await
            .map_err(|e| Error::new(context.clone(), Cause::Auth(e)))?;
        if &channel.peer().endpoint != remote {
            warn!(dialed = %remote, claimed = %channel.peer().endpoint, "peer claims a different endpoint");
        }

        let peer = Peer::new(
            remote.clone(),
            Arc::new(channel),
            self.dispatch(),
            self.config.call_timeout,
            self.shutdown.subscribe(),
        );
        self.peers.insert(remote.clone(), peer.clone());
        if self.retract_after_shutdown(remote, &peer).await {
            return Err(Error::closed(context));
        }
        info!(peer = %remote, "channel opened");
        Ok(peer)
    }

    async fn register_inbound(&self, channel: SecureChannel) {
        let remote = channel.peer().endpoint.clone();
        let peer = Peer::new(
            remote.clone(),
            Arc::new(channel),
            self.dispatch(),
            self.config.call_timeout,
            self.shutdown.subscribe(),
        );
        match self.peers.entry(remote.clone()) {
            Entry::Occupied(mut slot) => {
                // an unrouted peer keeps serving through its pump
                if slot.get().is_closed() {
                    slot.insert(peer.clone());
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(peer.clone());
            }
        }
        if self.retract_after_shutdown(&remote, &peer).await {
            return;
        }
        info!(peer = %remote, "channel accepted");
    }

    /// Closes `peer` if shutdown began while its handshake ran. `shutdown`
    /// raises the flag before it collects the peers, so a peer installed
    /// before this check is either collected there or caught here.
    async fn retract_after_shutdown(&self, remote: &EndpointAddress, peer: &Arc<Peer>) -> bool {
        if !self.is_shut_down() {
            return false;
        }
        self.peers.remove_if(remote, |_, installed| Arc::ptr_eq(installed, peer));
        peer.close().await;
        debug!(peer = %remote, "channel opened during shutdown closed");
        true
    }

    pub(crate) async fn call_wire(
        self: &Arc<Self>,
        owner: &EndpointAddress,
        target: Target,
        selector: &str,
        args: Vec<WireValue>,
    ) -> Result<WireValue> {
        let peer = self.peer_for(owner).await?;
        peer.call(target, selector, args)
            .await
            .map_err(|e| Error::new(format!("calling {} on {}", selector, owner), e.into()))
    }

    /// Marshals `args` for `owner`, invokes, and unmarshals the reply.
    pub(crate) async fn call(
        self: &Arc<Self>,
        owner: &EndpointAddress,
        target: Target,
        selector: &str,
        args: &[Value],
    ) -> Result<Value> {
        let context = format!("calling {} on {}", selector, owner);
        let wire_args = Marshaller::new(self, owner)
            .marshal_all(args)
            .map_err(|e| Error::new(context.clone(), Cause::Marshal(e)))?;
        let reply = self.call_wire(owner, target, selector, wire_args).await?;
        Unmarshaller::unmarshal(self, owner, &reply)
            .await
            .map_err(|e| Error::new(context, Cause::Marshal(e)))
    }

    /// Opens leases at `owner` for references forwarded to us by someone else.
    pub(crate) async fn acquire(self: &Arc<Self>, owner: &EndpointAddress, ids: &[ObjectId]) -> Result<()> {
        self.call_wire(owner, Target::Collector, gc::ACQUIRE, gc::ids_arg(ids)).await.map(|_| ())
    }

    pub(crate) async fn send_release(self: &Arc<Self>, owner: &EndpointAddress, items: &[(ObjectId, u64)]) {
        match self.call_wire(owner, Target::Collector, gc::RELEASE, gc::release_arg(items)).await {
            Ok(_) => trace!(owner = %owner, count = items.len(), "releases sent"),
            Err(e) => debug!(owner = %owner, error = %e, "releases not delivered; leases will expire"),
        }
    }

    /// Renews every live import, all owners at once. Each owner gets at most
    /// `renewal_timeout`, so one unresponsive owner cannot starve the rest.
    pub(crate) async fn renew_all(self: &Arc<Self>) {
        let mut by_owner: BTreeMap<EndpointAddress, Vec<ObjectId>> = BTreeMap::new();
        for import in self.imports.iter() {
            if import.value().strong_count() > 0 {
                by_owner.entry(import.key().owner.clone()).or_default().push(import.key().id);
            }
        }
        let limit = self.config.renewal_timeout();
        let renewals = by_owner.into_iter().map(|(owner, ids)| async move {
            let renewal = self.call_wire(&owner, Target::Collector, gc::RENEW, gc::ids_arg(&ids));
            match tokio::time::timeout(limit, renewal).await {
                Ok(Ok(WireValue::Int(n))) if n as usize == ids.len() => {
                    trace!(owner = %owner, count = ids.len(), "leases renewed")
                }
                Ok(Ok(answer)) => {
                    warn!(owner = %owner, asked = ids.len(), ?answer, "owner no longer knows some references")
                }
                Ok(Err(e)) => debug!(owner = %owner, error = %e, "renewal failed"),
                Err(_) => debug!(owner = %owner, ?limit, "renewal timed out"),
            }
        });
        futures::future::join_all(renewals).await;
    }

    /// One sweep of the table, expired pins and dead bookkeeping. Returns the
    /// number of table entries reclaimed.
    pub(crate) fn sweep(&self, now: Instant) -> usize {
        let swept = self.table.sweep(now);
        let reclaimed = swept.reclaimed.len();
        if reclaimed > 0 || swept.expired > 0 {
            debug!(reclaimed, expired = swept.expired, "sweep");
        }
        drop(swept);

        let expired_pins: Vec<(Instant, Proxy)> = {
            let mut pins = self.pins.lock();
            let (keep, expired) = pins.drain(..).partition(|(until, _)| *until > now);
            *pins = keep;
            expired
        };
        drop(expired_pins);

        self.locals.retain(|_, entry| entry.strong_count() > 0);
        self.records.retain(|_, entry| entry.strong_count() > 0);
        self.migrated.retain(|_, entry| entry.strong_count() > 0);
        self.imports.retain(|_, proxy| proxy.strong_count() > 0);
        self.connecting.retain(|_, lock| Arc::strong_count(lock) > 1);
        reclaimed
    }

    async fn unmarshal_args(
        self: &Arc<Self>,
        from: &EndpointAddress,
        args: &[WireValue],
    ) -> std::result::Result<Vec<Value>, Failure> {
        Unmarshaller::unmarshal_all(self, from, args)
            .await
            .map_err(|e| Failure::new(FailureKind::Marshal, e.to_string()))
    }

    fn marshal_reply(self: &Arc<Self>, to: &EndpointAddress, value: &Value) -> std::result::Result<WireValue, Failure> {
        let mut marshaller = Marshaller::new(self, to);
        let wire = marshaller.marshal(value).map_err(|e| Failure::new(FailureKind::Marshal, e.to_string()))?;
        marshaller.commit();
        Ok(wire)
    }

    /// Serves one inbound Invoke.
    async fn serve(
        self: &Arc<Self>,
        from: &EndpointAddress,
        target: Target,
        selector: String,
        args: Vec<WireValue>,
    ) -> std::result::Result<WireValue, Failure> {
        match target {
            Target::Collector => gc::serve(self, from, &selector, &args),
            Target::Object(id) => {
                let local = self
                    .table
                    .lookup(id)
                    .ok_or_else(|| Failure::new(FailureKind::NoSuchObject, id.to_string()))?;
                let args = self.unmarshal_args(from, &args).await?;
                let ctx = Communicator::from_shared(self.clone());
                let value = local
                    .object()
                    .invoke(&ctx, &selector, args)
                    .await
                    .map_err(InvokeError::into_failure)?;
                self.marshal_reply(from, &value)
            }
            Target::Task(name) => {
                if selector != task::RUN {
                    return Err(Failure::new(FailureKind::NoSuchMethod, selector));
                }
                let run = self
                    .tasks
                    .get(&name)
                    .ok_or_else(|| Failure::new(FailureKind::NoSuchTask, name.clone()))?;
                let captures = self.unmarshal_args(from, &args).await?;
                debug!(task = %name, caller = %from, "running task");
                let value = (*run)(Communicator::from_shared(self.clone()), captures)
                    .await
                    .map_err(InvokeError::into_failure)?;
                self.marshal_reply(from, &value)
            }
        }
    }
}

struct DispatchHandle(Weak<Shared>);

#[async_trait::async_trait]
impl Dispatch for DispatchHandle {
    async fn dispatch(
        &self,
        from: &EndpointAddress,
        target: Target,
        selector: String,
        args: Vec<WireValue>,
    ) -> std::result::Result<WireValue, Failure> {
        let Some(shared) = self.0.upgrade() else {
            return Err(Failure::new(FailureKind::Unavailable, "communicator is shut down"));
        };
        shared.serve(from, target, selector, args).await
    }

    fn disconnected(&self, remote: &EndpointAddress) {
        if let Some(shared) = self.0.upgrade() {
            if shared.peers.remove_if(remote, |_, peer| peer.is_closed()).is_some() {
                info!(peer = %remote, "channel closed");
            }
        }
    }
}

async fn accept_loop(shared: Weak<Shared>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };
        let Some(credentials) = shared.upgrade().map(|s| s.credentials()) else {
            break;
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            match handshake::accept(stream, &credentials).await {
                Ok(channel) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.register_inbound(channel).await;
                    }
                }
                Err(_) => debug!(%remote, "inbound channel rejected"),
            }
        });
    }
    debug!("listener stopped");
}

/// Handle to a running communicator. Clones share the same endpoint.
#[derive(Clone)]
pub struct Communicator {
    shared: Arc<Shared>,
}

pub struct CommunicatorBuilder {
    config: CommunicatorConfig,
    identity: Option<Keystore>,
}

impl CommunicatorBuilder {
    /// The credentials this endpoint presents and the certificates it trusts.
    pub fn identity(mut self, keystore: Keystore) -> Self {
        self.identity = Some(keystore);
        self
    }

    /// Binds the listener and starts the background tasks.
    pub async fn start(self) -> Result<Communicator> {
        let context = "starting communicator";
        let config = self.config;
        config.validate().map_err(|e| Error::new(context, Cause::Config(e)))?;
        let keystore = self
            .identity
            .ok_or_else(|| Error::new(context, Cause::Config(ConfigError::MissingKey("keystore"))))?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| Error::new(context, Cause::Io(e)))?;
        let port = listener.local_addr().map_err(|e| Error::new(context, Cause::Io(e)))?.port();
        let address = EndpointAddress::tls(config.host.clone(), port);

        let whitelist = Whitelist::from_certificates(keystore.trusted().iter().chain(keystore.chain().first()))
            .map_err(|e| Error::new(context, Cause::Auth(e)))?;

        let (gc_queue, gc_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new_cyclic(|me| Shared {
            table: ObjectTable::new(config.lease_timeout),
            config,
            address,
            keystore: Arc::new(keystore),
            whitelist: Arc::new(whitelist),
            catalog: TypeCatalog::new(),
            tasks: TaskRegistry::default(),
            locals: DashMap::new(),
            records: DashMap::new(),
            migrated: DashMap::new(),
            imports: DashMap::new(),
            peers: DashMap::new(),
            connecting: DashMap::new(),
            next_object: AtomicU64::new(1),
            pins: parking_lot::Mutex::new(Vec::new()),
            gc_queue,
            shutdown,
            me: me.clone(),
        });

        let weak = Arc::downgrade(&shared);
        tokio::spawn(accept_loop(weak.clone(), listener, shared.shutdown.subscribe()));
        tokio::spawn(gc::renewer(weak.clone(), shared.config.renew_interval, shared.shutdown.subscribe()));
        tokio::spawn(gc::sweeper(weak.clone(), shared.config.sweep_interval, shared.shutdown.subscribe()));
        tokio::spawn(gc::release_pump(weak, gc_rx, shared.shutdown.subscribe()));

        info!(address = %shared.address, name = shared.keystore.name(), "communicator started");
        Ok(Communicator { shared })
    }
}

impl Communicator {
    pub fn builder(config: CommunicatorConfig) -> CommunicatorBuilder {
        CommunicatorBuilder { config, identity: None }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// The endpoint other processes reach this one at.
    pub fn local_address(&self) -> &EndpointAddress {
        &self.shared.address
    }

    pub fn config(&self) -> &CommunicatorConfig {
        &self.shared.config
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.shared.catalog
    }

    /// Makes `object` resident here and returns its handle. Copiable types
    /// cannot be adopted; they travel by value.
    pub fn adopt(&self, object: impl RemoteObject) -> Result<ObjectRef> {
        self.adopt_arc(Arc::new(object))
    }

    pub fn adopt_arc(&self, object: Arc<dyn RemoteObject>) -> Result<ObjectRef> {
        self.shared
            .adopt_arc(object)
            .map(ObjectRef::Local)
            .map_err(|e| Error::new("adopting object", Cause::Catalog(e)))
    }

    /// Registers the body of a task other endpoints may ship here by name.
    pub fn register_task<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(Communicator, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, InvokeError>> + Send + 'static,
    {
        self.shared.tasks.register(name, f);
    }

    /// Runs `task` on `destination` and returns its marshalled result.
    /// Runs in place when `destination` is this endpoint.
    pub async fn run_remotely(&self, task: Task, destination: &EndpointAddress) -> Result<Value> {
        let context = format!("running task {} on {}", task.name, destination);
        if destination == self.local_address() {
            let run = self.shared.tasks.get(&task.name).ok_or_else(|| {
                Error::new(context.clone(), Cause::Failed(Failure::new(FailureKind::NoSuchTask, task.name.clone())))
            })?;
            return (*run)(self.clone(), task.captures)
                .await
                .map_err(|e| Error::new(context, Cause::Failed(e.into_failure())));
        }
        self.shared
            .call(destination, Target::Task(task.name), task::RUN, &task.captures)
            .await
            .map_err(|e| e.within(context))
    }

    /// Opens (or reuses) the authenticated channel to `remote`.
    pub async fn connect(&self, remote: &EndpointAddress) -> Result<()> {
        self.shared.peer_for(remote).await.map(|_| ())
    }

    /// Whether a live channel to `remote` exists.
    pub fn is_connected(&self, remote: &EndpointAddress) -> bool {
        self.shared.live_peer(remote).is_some()
    }

    /// Removes a certificate from the whitelist. Open channels anchored on it
    /// fail on their next message.
    pub fn revoke(&self, fingerprint: &Fingerprint) -> bool {
        let revoked = self.shared.whitelist.revoke(fingerprint);
        if revoked {
            info!(%fingerprint, "certificate revoked");
        }
        revoked
    }

    pub fn trust(&self, certificate: Certificate) -> Result<Fingerprint> {
        let fingerprint = self
            .shared
            .whitelist
            .enroll(certificate)
            .map_err(|e| Error::new("trusting certificate", Cause::Auth(e)))?;
        info!(%fingerprint, "certificate trusted");
        Ok(fingerprint)
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.shared.whitelist
    }

    pub fn certificate(&self) -> Certificate {
        self.shared.keystore.export_certificate()
    }

    /// Objects currently held on behalf of other processes.
    pub fn exported_count(&self) -> usize {
        self.shared.table.len()
    }

    pub fn is_exported(&self, id: ObjectId) -> bool {
        self.shared.table.contains(id)
    }

    pub fn holders(&self, id: ObjectId) -> Vec<(EndpointAddress, Lease)> {
        self.shared.table.holders(id)
    }

    /// Live proxies held by this process.
    pub fn import_count(&self) -> usize {
        self.shared.imports.iter().filter(|e| e.value().strong_count() > 0).count()
    }

    /// Sends every queued release now, then sweeps once.
    pub async fn collect(&self) -> usize {
        let (ack, done) = oneshot::channel();
        if self.shared.gc_queue.send(GcMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
        self.shared.sweep(Instant::now())
    }

    /// Renews every live import now instead of waiting for the renewer.
    pub async fn renew(&self) {
        self.shared.renew_all().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    /// Stops listening, closes every channel and fails every pending call.
    pub async fn shutdown(&self) {
        if self.shared.shutdown.send_replace(true) {
            return;
        }
        let peers: Vec<Arc<Peer>> = self.shared.peers.iter().map(|p| p.value().clone()).collect();
        self.shared.peers.clear();
        for peer in peers {
            debug!(peer = %peer.remote(), "closing channel");
            peer.close().await;
        }
        let pins = std::mem::take(&mut *self.shared.pins.lock());
        drop(pins);
        info!(address = %self.shared.address, "communicator shut down");
    }
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("address", &self.shared.address)
            .field("exported", &self.shared.table.len())
            .finish()
    }
}
