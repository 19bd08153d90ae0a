//! The distributed monitor registry (spec §4.4): lets a local observer
//! watch a remote process through a delegate, multiplexing many local
//! observers onto a single underlying liveness subscription.
//!
//! The collapsing itself happens inside [`crate::delegate`]'s mailbox loop
//! (one monitors-table entry per watched pid, fan-out to every observer on
//! death); this module is the observer-side half: computing which delegate
//! owns a given watched pid and building/tearing down the subscription
//! handle.

use crate::delegate;
use crate::hash::stable_hash;
use crate::id::{NodeId, Pid};
use crate::pool::delegate_name;
use crate::transport::{NativeSubscription, Transport};
use std::sync::Arc;

/// A subscription handle is a discriminated union (design note in spec
/// §9): a native substrate handle for the local-target optimization, or a
/// composite `(delegate_name, watched)` for the remote protocol.
/// `demonitor` dispatches on the variant.
pub enum SubscriptionHandle {
    Native(NativeSubscription),
    Remote { delegate: String, watched: Pid },
}

impl SubscriptionHandle {
    pub fn watched(&self) -> Pid {
        match self {
            SubscriptionHandle::Native(sub) => sub.watched,
            SubscriptionHandle::Remote { watched, .. } => *watched,
        }
    }
}

/// Computes the delegate name for `watched`'s node, keyed on the **watched
/// pid** rather than the observer — the critical difference from
/// [`crate::routing`]'s caller-keyed routing, and the reason every observer
/// of the same watched pid collapses onto the same delegate (spec §4.4
/// step 1).
pub fn delegate_for_watched(watched: Pid, prefix: &str, pool_size: usize) -> String {
    let index = (stable_hash(&watched) % pool_size.max(1) as u64) as usize;
    delegate_name(prefix, index)
}

/// Establishes an observer→watched liveness subscription (spec §4.4).
///
/// If `watched` lives on `local_node`, falls through to the substrate's
/// native monitor directly (spec §4.4 "Local-target optimization"). Other
/// wise sends `(monitor, observer, watched)` to the delegate computed from
/// `watched` and returns immediately with a composite handle — the
/// observer does not wait for the delegate's acknowledgement, matching
/// spec §4.4 step 2 ("immediately returns").
///
/// `observer_endpoint` must already be registered with `transport` on
/// `local_node`; down-notifications are delivered there as a
/// [`delegate::DownNotification`] cast, decodable with
/// [`delegate::decode_down_notification`].
pub async fn monitor(
    transport: &Arc<dyn Transport>,
    local_node: NodeId,
    prefix: &str,
    pool_size: usize,
    observer: Pid,
    observer_endpoint: &str,
    watched: Pid,
) -> SubscriptionHandle {
    if watched.node() == local_node {
        let subscription = transport.monitor_process(watched).await;
        return SubscriptionHandle::Native(subscription);
    }

    let delegate_name = delegate_for_watched(watched, prefix, pool_size);
    let body = delegate::encode_monitor(
        observer,
        local_node,
        observer_endpoint.to_string(),
        watched,
    );
    transport.cast(watched.node(), &delegate_name, body);
    SubscriptionHandle::Remote {
        delegate: delegate_name,
        watched,
    }
}

/// Tears down a subscription (spec §4.4 step 5). A native subscription
/// simply drops (the broadcast receiver inside unsubscribes itself); a
/// composite handle sends `(demonitor, observer, watched)` to the owning
/// delegate.
pub fn demonitor(transport: &Arc<dyn Transport>, observer: Pid, handle: SubscriptionHandle) {
    match handle {
        SubscriptionHandle::Native(_subscription) => {}
        SubscriptionHandle::Remote { delegate, watched } => {
            let body = delegate::encode_demonitor(observer, watched);
            transport.cast(watched.node(), &delegate, body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_watched_pid_always_routes_to_same_delegate() {
        let watched = Pid::new(NodeId(2), 9);
        let a = delegate_for_watched(watched, "mon_", 8);
        let b = delegate_for_watched(watched, "mon_", 8);
        assert_eq!(a, b);
    }
}
