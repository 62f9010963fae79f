//! # Remote Execution
//!
//! A `Task` is code shipped by name. The function body is registered under
//! that name on every endpoint that may run it, and the caller sends only the
//! name and the captured values. Captures go through the marshaller like any
//! other argument, so an object captured by the caller arrives as a proxy
//! back to it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;

use crate::communicator::Communicator;
use crate::object::InvokeError;
use crate::value::Value;

/// The selector every task invocation uses.
pub(crate) const RUN: &str = "run";

/// A registered function plus the values it closes over.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    pub captures: Vec<Value>,
}

impl Task {
    pub fn new(name: impl Into<String>, captures: Vec<Value>) -> Self {
        Self { name: name.into(), captures }
    }
}

pub(crate) type TaskFn =
    Arc<dyn Fn(Communicator, Vec<Value>) -> BoxFuture<'static, Result<Value, InvokeError>> + Send + Sync>;

#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskFn>>,
}

impl TaskRegistry {
    /// Registers `f` under `name`, replacing any earlier registration.
    pub(crate) fn register<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(Communicator, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, InvokeError>> + Send + 'static,
    {
        let f: TaskFn = Arc::new(move |ctx, captures| f(ctx, captures).boxed());
        self.tasks.write().insert(name.to_string(), f);
    }

    pub(crate) fn get(&self, name: &str) -> Option<TaskFn> {
        self.tasks.read().get(name).cloned()
    }
}
