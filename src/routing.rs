//! The routing function (spec §4.1): maps `(caller, prefix, peer-node-set)`
//! to a single delegate name used on every referenced peer, memoized per
//! caller so that every future invocation from the same caller pins to the
//! same delegate index — the whole reason FIFO-per-endpoint gives this
//! crate ordered delivery between any (caller, target) pair.

use crate::hash::stable_hash;
use crate::id::{CallerId, NodeId};
use crate::pool::delegate_name;
use crate::HashMap;
use std::sync::Mutex;

/// Returns the common pool size visible across `peer_nodes` for `prefix`.
/// Per DESIGN.md's resolution of spec §9's open question, this crate
/// requires pool size to be cluster-uniform in normal operation (a rolling
/// upgrade that temporarily disagrees is the only expected exception); when
/// peers disagree it falls back to the minimum reported size and logs a
/// warning rather than silently routing different peers to different
/// indices under the same memoized name.
pub fn pool_size_for(sizes: impl IntoIterator<Item = (NodeId, usize)>) -> usize {
    let mut min = None;
    let mut uniform = true;
    for (_, size) in sizes {
        if let Some(m) = min {
            if m != size {
                uniform = false;
            }
        }
        min = Some(min.map_or(size, |m: usize| m.min(size)));
    }
    let min = min.unwrap_or(1);
    if !uniform {
        tracing::warn!(
            fallback = min,
            "peers reported non-uniform pool sizes; falling back to the minimum"
        );
    }
    min
}

/// Per-caller scratch state: the delegate name chosen on first use for a
/// given name prefix, reused for every subsequent invocation regardless of
/// which peer nodes are involved (spec §4.1's pinning invariant).
#[derive(Default)]
pub struct CallerMemo {
    chosen: Mutex<HashMap<String, String>>,
}

impl CallerMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delegate name for `prefix`, computing and memoizing it
    /// on first call via `stable_hash(caller) mod pool_size`. Subsequent
    /// calls for the same prefix return the memoized name unchanged, even
    /// if `pool_size` would differ for a new peer set.
    pub fn route(&self, caller: CallerId, prefix: &str, pool_size: usize) -> String {
        let mut chosen = self.chosen.lock().expect("CallerMemo mutex poisoned");
        if let Some(name) = chosen.get(prefix) {
            return name.clone();
        }
        let index = (stable_hash(&caller) % pool_size as u64) as usize;
        let name = delegate_name(prefix, index);
        chosen.insert(prefix.to_string(), name.clone());
        name
    }

    /// Clears the memo — called when the caller terminates (spec §3:
    /// "Cleared only when the caller terminates").
    pub fn clear(&self) {
        self.chosen.lock().expect("CallerMemo mutex poisoned").clear();
    }
}
