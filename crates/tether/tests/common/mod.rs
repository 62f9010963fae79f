//! Shared fixtures: communicators that trust each other, demo objects and
//! the tasks they ship.

#![allow(dead_code)]

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;

use tether::args;
use tether::auth::Keystore;
use tether::Capability;
use tether::Communicator;
use tether::CommunicatorConfig;
use tether::InvokeError;
use tether::RemoteObject;
use tether::Value;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timings so lease expiry is observable within a test.
pub fn fast_config() -> CommunicatorConfig {
    CommunicatorConfig {
        host: "127.0.0.1".into(),
        port: 0,
        lease_timeout: Duration::from_millis(800),
        renew_interval: Duration::from_millis(200),
        sweep_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_secs(30),
        call_timeout: Duration::from_secs(5),
        release_on_drop: true,
    }
}

/// Starts `n` communicators that all trust each other.
pub async fn mesh(n: usize, config: CommunicatorConfig) -> Vec<Communicator> {
    init_tracing();
    let mut stores: Vec<Keystore> = (0..n)
        .map(|i| Keystore::enroll(&format!("node {}", i), DAY).expect("enroll").0)
        .collect();
    let certificates: Vec<_> = stores.iter().map(|s| s.export_certificate()).collect();
    for (i, store) in stores.iter_mut().enumerate() {
        for (j, certificate) in certificates.iter().enumerate() {
            if i != j {
                store.trust(certificate.clone());
            }
        }
    }

    let mut nodes = Vec::with_capacity(n);
    for store in stores {
        let node = Communicator::builder(config.clone())
            .identity(store)
            .start()
            .await
            .expect("start");
        install(&node);
        nodes.push(node);
    }
    nodes
}

/// A communicator trusted by nobody.
pub async fn stranger() -> Communicator {
    let (store, _) = Keystore::enroll("stranger", DAY).expect("enroll");
    Communicator::builder(fast_config()).identity(store).start().await.expect("start")
}

pub async fn shutdown_all(nodes: &[Communicator]) {
    for node in nodes {
        node.shutdown().await;
    }
}

/// Types and tasks every test node knows about.
pub fn install(node: &Communicator) {
    let catalog = node.catalog();
    catalog.declare("Point", Capability::Copiable).expect("declare");
    catalog.declare("Node", Capability::Copiable).expect("declare");
    catalog.declare("Account", Capability::NonCopiable).expect("declare");
    catalog.declare("Vault", Capability::NonMigratable).expect("declare");

    node.register_task("echo", |_ctx, captures| async move { Ok(Value::List(captures)) });

    node.register_task("same", |_ctx, captures| async move {
        args::expect_len(&captures, 2)?;
        Ok(Value::Bool(captures[0] == captures[1]))
    });

    node.register_task("counter.new", |ctx, _captures| async move {
        let counter = ctx.adopt(Counter::new())?;
        Ok(Value::Object(counter))
    });

    node.register_task("counter.pair", |ctx, _captures| async move {
        let counter = ctx.adopt(Counter::new())?;
        Ok(Value::List(vec![Value::Object(counter.clone()), Value::Object(counter)]))
    });

    node.register_task("holder.new", |ctx, _captures| async move {
        let holder = ctx.adopt(Holder::default())?;
        Ok(Value::Object(holder))
    });

    // invokes `selector` on the captured object, calling back into its home
    node.register_task("poke", |_ctx, captures| async move {
        let target = args::expect_object(&captures, 0)?;
        let selector = args::expect_text(&captures, 1)?;
        let rest = captures[2..].to_vec();
        Ok(target.invoke(selector, rest).await?)
    });

    node.register_task("sleep", |_ctx, _captures| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Value::Unit)
    });
}

pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new() -> Self {
        Self { value: AtomicI64::new(0) }
    }
}

#[async_trait::async_trait]
impl RemoteObject for Counter {
    fn interface(&self) -> &str {
        "Counter"
    }

    async fn invoke(&self, _ctx: &Communicator, selector: &str, args: Vec<Value>) -> Result<Value, InvokeError> {
        match selector {
            "increment" => Ok(Value::Int(self.value.fetch_add(1, Ordering::SeqCst) + 1)),
            "add" => {
                let n = args::expect_int(&args, 0)?;
                Ok(Value::Int(self.value.fetch_add(n, Ordering::SeqCst) + n))
            }
            "get" => Ok(Value::Int(self.value.load(Ordering::SeqCst))),
            "withdraw" => Err(InvokeError::application("Overdrawn", "counter cannot go below zero")),
            other => Err(InvokeError::NoSuchMethod(other.into())),
        }
    }
}

/// Holds one value and forwards calls to it.
#[derive(Default)]
pub struct Holder {
    held: Mutex<Option<Value>>,
}

#[async_trait::async_trait]
impl RemoteObject for Holder {
    fn interface(&self) -> &str {
        "Holder"
    }

    async fn invoke(&self, _ctx: &Communicator, selector: &str, args: Vec<Value>) -> Result<Value, InvokeError> {
        match selector {
            "put" => {
                let value = args::arg(&args, 0)?.clone();
                *self.held.lock() = Some(value);
                Ok(Value::Unit)
            }
            "take" => Ok(self.held.lock().take().unwrap_or(Value::Unit)),
            "forward" => {
                let held = self.held.lock().clone();
                let Some(Value::Object(target)) = held else {
                    return Err(InvokeError::application("Empty", "holding no object"));
                };
                let selector = args::expect_text(&args, 0)?;
                Ok(target.invoke(selector, args[1..].to_vec()).await?)
            }
            other => Err(InvokeError::NoSuchMethod(other.into())),
        }
    }
}

/// An object that must never leave home.
pub struct Safe;

#[async_trait::async_trait]
impl RemoteObject for Safe {
    fn interface(&self) -> &str {
        "Safe"
    }

    fn capability(&self) -> Capability {
        Capability::NonMigratable
    }

    async fn invoke(&self, _ctx: &Communicator, selector: &str, _args: Vec<Value>) -> Result<Value, InvokeError> {
        match selector {
            "open" => Ok(Value::text("opened")),
            other => Err(InvokeError::NoSuchMethod(other.into())),
        }
    }
}
