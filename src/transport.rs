//! The transport façade: a thin abstraction over the message-passing
//! substrate the rest of this crate assumes (spec §2, "Transport façade").
//!
//! [`Transport`] only states the four operations the fan-out core and the
//! monitor registry actually need — unicast request/reply with an infinite
//! timeout, a multi-endpoint request collecting per-node replies alongside
//! the set of nodes that turned out unreachable, a best-effort cast, and a
//! native per-process liveness subscription. A production implementation
//! backed by real sockets and cluster membership is an external
//! collaborator this crate doesn't provide (spec §1); [`LocalCluster`] is
//! the in-process stand-in used by the delegate worker's own tests and the
//! demo binary, modeled on `fantoch::run::task`'s channel plumbing with the
//! TCP connection setup stripped out.

use crate::id::{NodeId, Pid};
use crate::HashMap;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

/// A message delivered to a registered endpoint. `reply_to` is `Some` for a
/// request/reply call and `None` for a cast.
#[derive(Debug)]
pub struct Envelope {
    pub from: NodeId,
    pub body: Vec<u8>,
    pub reply_to: Option<oneshot::Sender<Vec<u8>>>,
}

pub type EndpointReceiver = mpsc::Receiver<Envelope>;

/// A liveness notification for a watched process.
#[derive(Debug, Clone)]
pub struct DownInfo {
    pub watched: Pid,
    pub reason: String,
}

/// A handle to a native (substrate-level) liveness subscription. Many of
/// these can exist for the same watched pid — collapsing them onto one is
/// exactly the job of [`crate::monitor`], one layer up.
pub struct NativeSubscription {
    pub watched: Pid,
    pub(crate) id: u64,
    pub(crate) receiver: broadcast::Receiver<DownInfo>,
}

impl NativeSubscription {
    /// Waits for the down-notification. Resolves immediately if the watched
    /// process had already died before this subscription was created.
    pub async fn recv(&mut self) -> DownInfo {
        match self.receiver.recv().await {
            Ok(info) => info,
            Err(_) => DownInfo {
                watched: self.watched,
                reason: "already down".to_string(),
            },
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Unicast synchronous request to a named endpoint on `node`, infinite
    /// timeout. Resolves to the endpoint's reply, or `Err(NodeDown)` if
    /// `node` is unreachable.
    async fn request(
        &self,
        node: NodeId,
        endpoint: &str,
        body: Vec<u8>,
    ) -> crate::error::Result<Vec<u8>>;

    /// Multi-endpoint synchronous request: `bodies` is one coalesced
    /// payload per peer node, sent to `endpoint` on each. Returns every
    /// reply received alongside the set of nodes that were unreachable.
    /// Infinite timeout — the caller suspends until every reachable node
    /// has replied (spec §4.2: "An infinite timeout is mandatory").
    async fn multi_request(
        &self,
        endpoint: &str,
        bodies: HashMap<NodeId, Vec<u8>>,
    ) -> (HashMap<NodeId, Vec<u8>>, Vec<NodeId>);

    /// Best-effort fire-and-forget delivery to a named endpoint on `node`.
    /// Silently dropped if `node` is unreachable.
    fn cast(&self, node: NodeId, endpoint: &str, body: Vec<u8>);

    /// Registers a named endpoint on `node`, returning the receiving end of
    /// its mailbox. Used once per delegate worker at pool start. Fails with
    /// [`crate::error::Error::DuplicateDelegate`] if `name` is already
    /// registered on `node`.
    async fn register_endpoint(
        &self,
        node: NodeId,
        name: &str,
    ) -> crate::error::Result<EndpointReceiver>;

    /// Opens a native liveness subscription on `watched`. Many independent
    /// subscriptions to the same pid are allowed; each gets its own
    /// down-notification when the process dies.
    async fn monitor_process(&self, watched: Pid) -> NativeSubscription;
}

struct NodeState {
    alive: AtomicBool,
    /// Plain (non-async) mutex, deliberately: [`LocalCluster::cast`] must be
    /// able to look up an endpoint's sender and enqueue an envelope entirely
    /// synchronously, without crossing an `.await` point, so that a cast
    /// issued right before a synchronous `request`/`call` by the same
    /// caller is physically in the channel before that request is ever
    /// sent — see the doc comment on `cast` below.
    endpoints: StdMutex<HashMap<String, mpsc::Sender<Envelope>>>,
}

/// An in-process substrate simulating a cluster of nodes inside a single
/// OS process, for tests and the demo binary. Node-down is simulated via
/// [`LocalCluster::kill_node`]; process death via [`LocalCluster::kill_process`].
#[derive(Clone)]
pub struct LocalCluster {
    nodes: Arc<StdMutex<HashMap<NodeId, Arc<NodeState>>>>,
    watchers: Arc<Mutex<HashMap<Pid, broadcast::Sender<DownInfo>>>>,
    next_sub_id: Arc<AtomicU64>,
    /// Count of inter-node envelopes delivered (request or cast), exposed
    /// for tests asserting the "one message per peer node, not one per
    /// target" coalescing property (spec §8) rather than wiring up a
    /// separate mock transport just to count sends.
    message_count: Arc<AtomicU64>,
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCluster {
    pub fn new() -> Self {
        LocalCluster {
            nodes: Arc::new(StdMutex::new(HashMap::default())),
            watchers: Arc::new(Mutex::new(HashMap::default())),
            next_sub_id: Arc::new(AtomicU64::new(0)),
            message_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total number of inter-node envelopes delivered so far (requests plus
    /// casts), used by tests as a transport spy.
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::SeqCst)
    }

    /// Synchronous by design (see [`NodeState::endpoints`]'s doc comment):
    /// every call site either already holds no other lock or only needs the
    /// `Arc<NodeState>` clone, so there is no reason to make this `async`
    /// and no reason for `cast` (which must stay fully synchronous) to work
    /// around one that was.
    fn node(&self, id: NodeId) -> Arc<NodeState> {
        let mut nodes = self.nodes.lock().expect("LocalCluster nodes mutex poisoned");
        nodes
            .entry(id)
            .or_insert_with(|| {
                Arc::new(NodeState {
                    alive: AtomicBool::new(true),
                    endpoints: StdMutex::new(HashMap::default()),
                })
            })
            .clone()
    }

    /// Marks `node` unreachable. Existing endpoint receivers are left
    /// alone (mirroring a real substrate: the process doesn't disappear,
    /// only the network path to it does); new requests to it fail.
    pub async fn kill_node(&self, node: NodeId) {
        let state = self.node(node);
        state.alive.store(false, Ordering::SeqCst);
    }

    pub async fn revive_node(&self, node: NodeId) {
        let state = self.node(node);
        state.alive.store(true, Ordering::SeqCst);
    }

    /// Delivers a down-notification to every native subscription on `pid`
    /// and removes the watcher entry, mirroring the substrate's own
    /// liveness machinery.
    pub async fn kill_process(&self, pid: Pid, reason: impl Into<String>) {
        let mut watchers = self.watchers.lock().await;
        if let Some(tx) = watchers.remove(&pid) {
            let _ = tx.send(DownInfo {
                watched: pid,
                reason: reason.into(),
            });
        }
    }
}

#[async_trait]
impl Transport for LocalCluster {
    async fn request(
        &self,
        node: NodeId,
        endpoint: &str,
        body: Vec<u8>,
    ) -> crate::error::Result<Vec<u8>> {
        let state = self.node(node);
        if !state.alive.load(Ordering::SeqCst) {
            return Err(crate::error::Error::NodeDown(node));
        }
        let sender = {
            let endpoints = state.endpoints.lock().expect("LocalCluster endpoints mutex poisoned");
            endpoints
                .get(endpoint)
                .cloned()
                .ok_or_else(|| crate::error::Error::UnknownDelegate(endpoint.to_string()))?
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Envelope {
                from: node,
                body,
                reply_to: Some(reply_tx),
            })
            .await
            .map_err(|_| crate::error::Error::NodeDown(node))?;
        self.message_count.fetch_add(1, Ordering::SeqCst);
        reply_rx
            .await
            .map_err(|_| crate::error::Error::NodeDown(node))
    }

    async fn multi_request(
        &self,
        endpoint: &str,
        bodies: HashMap<NodeId, Vec<u8>>,
    ) -> (HashMap<NodeId, Vec<u8>>, Vec<NodeId>) {
        use futures::stream::{FuturesUnordered, StreamExt};

        let mut futures = FuturesUnordered::new();
        for (node, body) in bodies {
            let this = self.clone();
            let endpoint = endpoint.to_string();
            futures.push(async move {
                let result = this.request(node, &endpoint, body).await;
                (node, result)
            });
        }

        let mut replies = HashMap::default();
        let mut unreachable = Vec::new();
        while let Some((node, result)) = futures.next().await {
            match result {
                Ok(reply) => {
                    replies.insert(node, reply);
                }
                Err(_) => unreachable.push(node),
            }
        }
        (replies, unreachable)
    }

    /// Enqueues the envelope synchronously, before returning — not spawned
    /// onto the scheduler. A cast from a given caller must physically be in
    /// the target endpoint's channel before that caller's next synchronous
    /// `request` (e.g. `cast(p, m1)` then `call(p, m2)`), or FIFO-per-caller
    /// ordering (spec §4.1, §5, §8) would depend on the scheduler happening
    /// to poll a spawned task before the inline `request` races ahead of
    /// it. `try_send` keeps this cast-like (no blocking, no `.await`); a
    /// full channel is treated the same as an unreachable node — dropped,
    /// per spec §4.2's "best-effort broadcast".
    fn cast(&self, node: NodeId, endpoint: &str, body: Vec<u8>) {
        let state = self.node(node);
        if !state.alive.load(Ordering::SeqCst) {
            return;
        }
        let sender = {
            let endpoints = state.endpoints.lock().expect("LocalCluster endpoints mutex poisoned");
            endpoints.get(endpoint).cloned()
        };
        if let Some(sender) = sender {
            if sender
                .try_send(Envelope {
                    from: node,
                    body,
                    reply_to: None,
                })
                .is_ok()
            {
                self.message_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn register_endpoint(
        &self,
        node: NodeId,
        name: &str,
    ) -> crate::error::Result<EndpointReceiver> {
        let (tx, rx) = mpsc::channel(1024);
        let state = self.node(node);
        let mut endpoints = state.endpoints.lock().expect("LocalCluster endpoints mutex poisoned");
        if endpoints.contains_key(name) {
            return Err(crate::error::Error::DuplicateDelegate(name.to_string()));
        }
        endpoints.insert(name.to_string(), tx);
        Ok(rx)
    }

    async fn monitor_process(&self, watched: Pid) -> NativeSubscription {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let mut watchers = self.watchers.lock().await;
        let sender = watchers
            .entry(watched)
            .or_insert_with(|| broadcast::channel(16).0);
        let receiver = sender.subscribe();
        NativeSubscription { watched, id, receiver }
    }
}
