//! Distributed collection: explicit release, renewal and lease expiry.

mod common;

use std::time::Duration;

use tether::Communicator;
use tether::ObjectId;
use tether::ObjectRef;
use tether::Task;
use tether::Value;

use common::*;

async fn remote_counter(from: &Communicator, owner: &Communicator) -> ObjectRef {
    let value = from
        .run_remotely(Task::new("counter.new", vec![]), owner.local_address())
        .await
        .expect("counter.new");
    value.as_object().expect("object").clone()
}

/// Waits until `cond` holds, checking every 50ms for at most `limit`.
async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

// --- Test 1: Release On Drop ---

#[tokio::test]
async fn test_dropped_proxy_releases_its_claim() {
    let nodes = mesh(2, fast_config()).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = remote_counter(b, a).await;
    let id = counter.global_id().id;
    assert!(a.is_exported(id));
    assert_eq!(a.holders(id).len(), 1);
    assert_eq!(b.import_count(), 1);

    drop(counter);
    assert_eq!(b.import_count(), 0);
    b.collect().await;

    assert!(a.holders(id).is_empty());
    a.collect().await;
    assert!(!a.is_exported(id));

    shutdown_all(&nodes).await;
}

#[tokio::test]
async fn test_absorbed_deliveries_are_released_together() {
    let nodes = mesh(2, fast_config()).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let pair = b
        .run_remotely(Task::new("counter.pair", vec![]), a.local_address())
        .await
        .expect("counter.pair");
    let items = pair.as_list().expect("list");
    let first = items[0].as_object().expect("object").clone();
    let id: ObjectId = first.global_id().id;

    let ObjectRef::Remote(proxy) = &first else {
        panic!("expected a proxy");
    };
    assert_eq!(proxy.deliveries(), 2);
    assert_eq!(a.holders(id)[0].1.count, 2);
    assert_eq!(b.import_count(), 1);

    drop(first);
    drop(pair);
    b.collect().await;
    assert!(a.holders(id).is_empty());
    a.collect().await;
    assert!(!a.is_exported(id));

    shutdown_all(&nodes).await;
}

// --- Test 2: Renewal ---

#[tokio::test]
async fn test_live_proxy_is_kept_alive_by_renewal() {
    let nodes = mesh(2, fast_config()).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = remote_counter(b, a).await;
    let id = counter.global_id().id;

    // several lease periods pass
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(a.is_exported(id));
    assert_eq!(counter.invoke("increment", vec![]).await.expect("increment"), Value::Int(1));

    shutdown_all(&nodes).await;
}

// --- Test 3: Lease Expiry ---

#[tokio::test]
async fn test_silent_holder_lease_expires() {
    let config = tether::CommunicatorConfig { release_on_drop: false, ..fast_config() };
    let nodes = mesh(2, config).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = remote_counter(b, a).await;
    let id = counter.global_id().id;
    drop(counter);
    b.collect().await;

    // no release was sent, so the claim lingers until it expires
    assert_eq!(a.holders(id).len(), 1);
    assert!(eventually(Duration::from_secs(5), || !a.is_exported(id)).await);

    shutdown_all(&nodes).await;
}

#[tokio::test]
async fn test_crashed_holder_lease_expires() {
    let nodes = mesh(2, fast_config()).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = remote_counter(b, a).await;
    let id = counter.global_id().id;

    // a holder that stops talking never releases and never renews
    b.shutdown().await;
    drop(counter);
    assert!(eventually(Duration::from_secs(5), || !a.is_exported(id)).await);

    shutdown_all(&nodes).await;
}

// --- Test 4: Locally Held Objects ---

#[tokio::test]
async fn test_reclaimed_entry_keeps_locally_held_object() {
    let nodes = mesh(2, fast_config()).await;
    let (a, b) = (&nodes[0], &nodes[1]);

    let counter = a.adopt(Counter::new()).expect("adopt");
    let id = counter.global_id().id;
    let captures = vec![Value::Object(counter.clone()), Value::Object(counter.clone())];
    a.run_remotely(Task::new("same", captures), b.local_address()).await.expect("same");

    b.collect().await;
    a.collect().await;
    assert!(!a.is_exported(id));

    // the table let go, the application did not
    assert_eq!(counter.invoke("increment", vec![]).await.expect("increment"), Value::Int(1));

    // exporting again reuses the identity
    let echoed = a
        .run_remotely(Task::new("echo", vec![Value::Object(counter.clone())]), b.local_address())
        .await
        .expect("echo");
    assert_eq!(echoed.as_list().expect("list")[0], Value::Object(counter));

    shutdown_all(&nodes).await;
}
