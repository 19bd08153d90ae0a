//! The delegate worker (spec §4.3): a server process with a single mailbox
//! that receives coalesced invocations, applies them to its own node's
//! share of the target list in order, and serves the distributed monitor
//! protocol (spec §4.4).
//!
//! Modeled on `fantoch::run::task::executor_task`'s single-mailbox
//! `tokio::select!` loop: one task owns all of its state (the monitors
//! table), nothing here is ever behind a `Mutex` because nothing outside
//! this task ever touches it directly.

use crate::error::Result;
use crate::id::{NodeId, Pid};
use crate::operation::{Operation, Registry, Symbolic};
use crate::outcome::{Failure, Outcome};
use crate::transport::{EndpointReceiver, NativeSubscription, Transport};
use crate::HashMap;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

/// Wire message kinds a delegate's mailbox accepts.
#[derive(Debug, Serialize, Deserialize)]
pub enum DelegateMessage {
    /// Coalesced invocation: `groups` maps every peer node referenced by
    /// the caller to its target list, but a given delegate only ever looks
    /// at its own node's entry (spec §4.3).
    Invoke {
        operation: Symbolic,
        groups: HashMap<NodeId, Vec<Pid>>,
    },
    Monitor {
        observer: Pid,
        observer_node: NodeId,
        observer_endpoint: String,
        watched: Pid,
    },
    Demonitor {
        observer: Pid,
        watched: Pid,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeReply {
    pub outcomes: Vec<Outcome>,
}

/// A down-notification cast to an observer's own ephemeral endpoint,
/// shaped after spec §4.4's `(down, (delegate_name, watched), process,
/// watched, info)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownNotification {
    pub delegate: String,
    pub watched: Pid,
    pub reason: String,
}

/// A registered observer of a watched pid, kept in the delegate's monitors
/// table.
struct ObserverEndpoint {
    node: NodeId,
    endpoint: String,
}

struct MonitorEntry {
    observers: HashMap<Pid, ObserverEndpoint>,
}

type DeathFuture = Pin<Box<dyn std::future::Future<Output = (Pid, String)> + Send>>;

fn death_future(mut sub: NativeSubscription) -> DeathFuture {
    Box::pin(async move {
        let info = sub.recv().await;
        (info.watched, info.reason)
    })
}

/// A lightweight reference to a spawned delegate, used by [`crate::pool`]
/// for bookkeeping. Talking to the delegate itself always goes through
/// [`Transport`] addressed by `name`, exactly as a remote caller would.
#[derive(Debug, Clone)]
pub struct DelegateHandle {
    pub node: NodeId,
    pub name: String,
}

/// Spawns a delegate worker on `node` under `name`, registering its
/// endpoint with `transport` before returning so that a `request` sent
/// immediately after this call can never race the registration. Fails if
/// `name` is already registered on `node` (spec §4.5: pool names are
/// assigned once at boot, never contended).
pub async fn spawn(
    transport: Arc<dyn Transport>,
    node: NodeId,
    name: String,
    registry: Arc<Registry>,
) -> Result<DelegateHandle> {
    let mailbox = transport.register_endpoint(node, &name).await?;
    let handle = DelegateHandle {
        node,
        name: name.clone(),
    };
    tokio::spawn(run(transport, node, name, mailbox, registry));
    Ok(handle)
}

async fn run(
    transport: Arc<dyn Transport>,
    node: NodeId,
    name: String,
    mut mailbox: EndpointReceiver,
    registry: Arc<Registry>,
) {
    let mut monitors: HashMap<Pid, MonitorEntry> = HashMap::default();
    let mut pending_deaths: FuturesUnordered<DeathFuture> = FuturesUnordered::new();

    loop {
        tokio::select! {
            envelope = mailbox.recv() => {
                let Some(envelope) = envelope else {
                    tracing::debug!(delegate = %name, "mailbox closed, worker stopping");
                    break;
                };
                let Ok(message) = bincode::deserialize::<DelegateMessage>(&envelope.body) else {
                    tracing::warn!(delegate = %name, "dropped undecodable message");
                    continue;
                };
                match message {
                    DelegateMessage::Invoke { operation, groups } => {
                        handle_invoke(&name, node, &registry, &operation, groups, envelope.reply_to).await;
                    }
                    DelegateMessage::Monitor { observer, observer_node, observer_endpoint, watched } => {
                        tracing::trace!(delegate = %name, %watched, %observer, "monitor");
                        handle_monitor(&transport, &mut monitors, &mut pending_deaths, observer, observer_node, observer_endpoint, watched).await;
                    }
                    DelegateMessage::Demonitor { observer, watched } => {
                        tracing::trace!(delegate = %name, %watched, %observer, "demonitor");
                        handle_demonitor(&mut monitors, observer, watched);
                    }
                }
            }
            Some((watched, reason)) = pending_deaths.next(), if !pending_deaths.is_empty() => {
                if let Some(entry) = monitors.remove(&watched) {
                    tracing::debug!(delegate = %name, %watched, %reason, observers = entry.observers.len(), "watched process down");
                    for (_, obs) in entry.observers {
                        let notification = DownNotification {
                            delegate: name.clone(),
                            watched,
                            reason: reason.clone(),
                        };
                        if let Ok(body) = bincode::serialize(&notification) {
                            transport.cast(obs.node, &obs.endpoint, body);
                        }
                    }
                }
            }
        }
    }
}

async fn handle_invoke(
    delegate_name: &str,
    node: NodeId,
    registry: &Registry,
    operation: &Symbolic,
    mut groups: HashMap<NodeId, Vec<Pid>>,
    reply_to: Option<tokio::sync::oneshot::Sender<Vec<u8>>>,
) {
    let targets = groups.remove(&node).unwrap_or_default();
    tracing::debug!(delegate = %delegate_name, targets = targets.len(), "invoking coalesced request");

    let mut outcomes = Vec::with_capacity(targets.len());
    let op = Operation::Symbolic(operation.clone());
    for target in targets {
        let outcome = apply_one(&op, target, registry);
        outcomes.push(outcome);
    }

    if let Some(reply_to) = reply_to {
        let reply = InvokeReply { outcomes };
        if let Ok(body) = bincode::serialize(&reply) {
            let _ = reply_to.send(body);
        }
    }
    // cast-mode invoke (reply_to is None): errors are discarded per spec §4.3.
}

fn apply_one(operation: &Operation, target: Pid, registry: &Registry) -> Outcome {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| operation.apply(target, registry)));
    match result {
        Ok(value) => Outcome::Success(target, value),
        Err(payload) => Outcome::Failure(target, Failure::from_panic(payload)),
    }
}

async fn handle_monitor(
    transport: &Arc<dyn Transport>,
    monitors: &mut HashMap<Pid, MonitorEntry>,
    pending_deaths: &mut FuturesUnordered<DeathFuture>,
    observer: Pid,
    observer_node: NodeId,
    observer_endpoint: String,
    watched: Pid,
) {
    match monitors.get_mut(&watched) {
        Some(entry) => {
            entry.observers.insert(
                observer,
                ObserverEndpoint {
                    node: observer_node,
                    endpoint: observer_endpoint,
                },
            );
        }
        None => {
            let subscription = transport.monitor_process(watched).await;
            pending_deaths.push(death_future(subscription));
            let mut observers = HashMap::default();
            observers.insert(
                observer,
                ObserverEndpoint {
                    node: observer_node,
                    endpoint: observer_endpoint,
                },
            );
            monitors.insert(watched, MonitorEntry { observers });
        }
    }
}

fn handle_demonitor(monitors: &mut HashMap<Pid, MonitorEntry>, observer: Pid, watched: Pid) {
    if let Some(entry) = monitors.get_mut(&watched) {
        entry.observers.remove(&observer);
        if entry.observers.is_empty() {
            // dropping the entry drops its `NativeSubscription`'s future
            // out of `pending_deaths` the next time it's polled and out
            // of existence once the `FuturesUnordered` drops it; the
            // broadcast receiver inside unsubscribes on drop.
            monitors.remove(&watched);
        }
    }
}

/// Sends a one-way `(invoke, operation, groups)` cast to `endpoint` on
/// `node` — the delegate side of [`crate::fanout`]'s fire-and-forget path.
pub fn cast_invoke(
    transport: &Arc<dyn Transport>,
    node: NodeId,
    endpoint: &str,
    operation: Symbolic,
    groups: HashMap<NodeId, Vec<Pid>>,
) -> Result<()> {
    let message = DelegateMessage::Invoke { operation, groups };
    let body = bincode::serialize(&message).expect("DelegateMessage always serializes");
    transport.cast(node, endpoint, body);
    Ok(())
}

/// Serializes an `(invoke, operation, groups)` request/reply body for
/// [`Transport::request`]/[`Transport::multi_request`].
pub fn encode_invoke(operation: &Symbolic, groups: &HashMap<NodeId, Vec<Pid>>) -> Vec<u8> {
    let message = DelegateMessage::Invoke {
        operation: operation.clone(),
        groups: groups.clone(),
    };
    bincode::serialize(&message).expect("DelegateMessage always serializes")
}

pub fn decode_invoke_reply(body: &[u8]) -> Result<InvokeReply> {
    bincode::deserialize(body).map_err(|e| crate::error::Error::Decode(e.to_string()))
}

pub fn encode_monitor(
    observer: Pid,
    observer_node: NodeId,
    observer_endpoint: String,
    watched: Pid,
) -> Vec<u8> {
    let message = DelegateMessage::Monitor {
        observer,
        observer_node,
        observer_endpoint,
        watched,
    };
    bincode::serialize(&message).expect("DelegateMessage always serializes")
}

pub fn encode_demonitor(observer: Pid, watched: Pid) -> Vec<u8> {
    let message = DelegateMessage::Demonitor { observer, watched };
    bincode::serialize(&message).expect("DelegateMessage always serializes")
}

pub fn decode_down_notification(body: &[u8]) -> Result<DownNotification> {
    bincode::deserialize(body).map_err(|e| crate::error::Error::Decode(e.to_string()))
}
