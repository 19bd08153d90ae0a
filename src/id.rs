//! Identity types: node identifiers, opaque target handles, and the caller
//! identity the routing function hashes on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A cluster node identifier. The substrate is assumed to hand these out;
/// this crate only ever compares and hashes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// An opaque process handle carrying enough information to determine its
/// home node. Analogous to an Erlang pid: a local sequence number scoped to
/// the node that created it, paired with that node's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pid {
    node: NodeId,
    local: u64,
}

impl Pid {
    pub fn new(node: NodeId, local: u64) -> Self {
        Pid { node, local }
    }

    /// The node this process lives on — the only thing the fan-out core
    /// needs to know about a target to route to it.
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}>", self.node.0, self.local)
    }
}

/// The identity of the process issuing an invocation. The routing function
/// hashes this — never the target — so that every invocation from the same
/// caller lands on the same delegate index on every peer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerId(pub u64);

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caller-{}", self.0)
    }
}
