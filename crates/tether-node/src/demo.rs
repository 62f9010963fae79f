//! Demo objects and tasks a served node offers.
//!
//! - `echo`: returns its captures as a list.
//! - `counter.new`: adopts a fresh `Counter` and returns a reference to it.
//! - `counter.add`: adds to a captured counter, wherever it lives.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use tether::args;
use tether::Capability;
use tether::Communicator;
use tether::InvokeError;
use tether::RemoteObject;
use tether::Value;

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
            "increment" => {
                args::expect_len(&args, 0)?;
                Ok(Value::Int(self.value.fetch_add(1, Ordering::SeqCst) + 1))
            }
            "add" => {
                args::expect_len(&args, 1)?;
                let n = args::expect_int(&args, 0)?;
                Ok(Value::Int(self.value.fetch_add(n, Ordering::SeqCst) + n))
            }
            "get" => Ok(Value::Int(self.value.load(Ordering::SeqCst))),
            other => Err(InvokeError::NoSuchMethod(other.into())),
        }
    }
}

/// Registers the demo tasks and record types on `node`.
pub fn install(node: &Communicator) -> tether::Result<()> {
    node.catalog()
        .declare("Point", Capability::Copiable)
        .map_err(|e| tether::Error::new("declaring demo types", tether::error::Cause::Catalog(e)))?;

    node.register_task("echo", |_ctx, captures| async move { Ok(Value::List(captures)) });

    node.register_task("counter.new", |ctx, _captures| async move {
        let counter = ctx.adopt(Counter::new())?;
        Ok(Value::Object(counter))
    });

    node.register_task("counter.add", |_ctx, captures| async move {
        args::expect_len(&captures, 2)?;
        let counter = args::expect_object(&captures, 0)?;
        let n = args::expect_int(&captures, 1)?;
        Ok(counter.invoke("add", vec![Value::Int(n)]).await?)
    });
    Ok(())
}
