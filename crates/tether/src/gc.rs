//! # Distributed Garbage Collection
//!
//! Lease plus reference counting, split between the two sides of every
//! exported reference.
//!
//! ## Owner side
//!
//! The `Collector` target of every endpoint answers three selectors:
//!
//! - `renew [ids]` extends the caller's leases and answers how many it knew.
//! - `release [[id, count], ...]` subtracts reported deliveries.
//! - `acquire [ids]` opens leases for references a third party forwarded to
//!   the caller. It fails with `NoSuchObject` if any id is already gone.
//!
//! The sweeper expires leases nobody renewed and drops table entries with no
//! holders left.
//!
//! ## Holder side
//!
//! The renewer sends one `renew` per owner every renew interval, covering
//! every live proxy. Owners are renewed concurrently and each renewal is cut
//! off after the configured renewal timeout. The release pump batches
//! drop-driven releases per owner.
//! A holder that crashes simply stops renewing.

use std::collections::BTreeMap;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::trace;

use tetherrpc::EndpointAddress;
use tetherrpc::Failure;
use tetherrpc::FailureKind;
use tetherrpc::ObjectId;
use tetherrpc::WireValue;

use crate::communicator::Shared;

pub(crate) const RENEW: &str = "renew";
pub(crate) const RELEASE: &str = "release";
pub(crate) const ACQUIRE: &str = "acquire";

/// Work queued for the release pump.
pub(crate) enum GcMessage {
    Release { owner: EndpointAddress, id: ObjectId, count: u64 },
    /// Acknowledged once everything queued before it has been sent.
    Flush(oneshot::Sender<()>),
}

/// Answers a Collector invoke from `from`.
pub(crate) fn serve(
    shared: &Shared,
    from: &EndpointAddress,
    selector: &str,
    args: &[WireValue],
) -> Result<WireValue, Failure> {
    let now = Instant::now();
    match selector {
        RENEW => {
            let ids = id_list(args)?;
            let renewed = shared.table().renew(from, &ids, now);
            trace!(holder = %from, asked = ids.len(), renewed, "leases renewed");
            Ok(WireValue::Int(renewed as i64))
        }
        ACQUIRE => {
            let ids = id_list(args)?;
            shared
                .table()
                .acquire(from, &ids, now)
                .map_err(|id| Failure::new(FailureKind::NoSuchObject, id.to_string()))?;
            Ok(WireValue::Unit)
        }
        RELEASE => {
            for (id, count) in release_list(args)? {
                if shared.table().release(from, id, count) {
                    trace!(holder = %from, %id, "claim released");
                }
            }
            Ok(WireValue::Unit)
        }
        other => Err(Failure::new(FailureKind::NoSuchMethod, other)),
    }
}

fn bad(message: &str) -> Failure {
    Failure::new(FailureKind::BadArguments, message)
}

fn single_list(args: &[WireValue]) -> Result<&[WireValue], Failure> {
    match args {
        [WireValue::List(items)] => Ok(items),
        _ => Err(bad("expected a single list argument")),
    }
}

fn object_id(value: &WireValue) -> Result<ObjectId, Failure> {
    match value {
        WireValue::Int(i) if *i >= 0 => Ok(ObjectId(*i as u64)),
        _ => Err(bad("object ids are non-negative integers")),
    }
}

fn id_list(args: &[WireValue]) -> Result<Vec<ObjectId>, Failure> {
    single_list(args)?.iter().map(object_id).collect()
}

fn release_list(args: &[WireValue]) -> Result<Vec<(ObjectId, u64)>, Failure> {
    single_list(args)?
        .iter()
        .map(|pair| match pair {
            WireValue::List(pair) => match pair.as_slice() {
                [id, WireValue::Int(count)] if *count > 0 => Ok((object_id(id)?, *count as u64)),
                _ => Err(bad("release entries are [id, count > 0]")),
            },
            _ => Err(bad("release entries are lists")),
        })
        .collect()
}

pub(crate) fn ids_arg(ids: &[ObjectId]) -> Vec<WireValue> {
    vec![WireValue::List(ids.iter().map(|id| WireValue::Int(id.0 as i64)).collect())]
}

pub(crate) fn release_arg(items: &[(ObjectId, u64)]) -> Vec<WireValue> {
    vec![WireValue::List(
        items
            .iter()
            .map(|(id, count)| WireValue::List(vec![WireValue::Int(id.0 as i64), WireValue::Int(*count as i64)]))
            .collect(),
    )]
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Renews every live import once per `period`.
pub(crate) async fn renewer(shared: Weak<Shared>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.renew_all().await;
    }
    debug!("renewer stopped");
}

/// Reclaims expired leases once per `period`.
pub(crate) async fn sweeper(shared: Weak<Shared>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.sweep(Instant::now());
    }
    debug!("sweeper stopped");
}

/// Sends queued releases, batched per owner.
pub(crate) async fn release_pump(
    shared: Weak<Shared>,
    mut queue: mpsc::UnboundedReceiver<GcMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let first = tokio::select! {
            message = queue.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let mut batches: BTreeMap<EndpointAddress, Vec<(ObjectId, u64)>> = BTreeMap::new();
        let mut acks = Vec::new();
        let mut absorb = |message: GcMessage| match message {
            GcMessage::Release { owner, id, count } => batches.entry(owner).or_default().push((id, count)),
            GcMessage::Flush(ack) => acks.push(ack),
        };
        absorb(first);
        while let Ok(message) = queue.try_recv() {
            absorb(message);
        }

        if let Some(shared) = shared.upgrade() {
            let sends = batches.iter().map(|(owner, items)| shared.send_release(owner, items));
            futures::future::join_all(sends).await;
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
    debug!("release pump stopped");
}
