//! The worker pool / registry (spec §4.5): a fixed-size set of delegate
//! workers per node, each addressable by a deterministic `prefix ++ index`
//! name, created once at node boot.

use crate::delegate::{self, DelegateHandle};
use crate::error::{Error, Result};
use crate::id::NodeId;
use crate::operation::Registry;
use crate::transport::Transport;
use std::sync::Arc;

/// The delegate names registered by [`WorkerPool::start`], in index order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    prefix: String,
    size: usize,
    handles: Vec<DelegateHandle>,
}

impl WorkerPool {
    /// Starts `size` delegate workers on `node`, named
    /// `prefix ++ 0 .. prefix ++ (size - 1)`. Mirrors `fantoch::run::task`'s
    /// worker-spawning loop, minus the TCP handshake: each worker registers
    /// its own endpoint with the transport and is then immediately ready.
    pub async fn start(
        transport: Arc<dyn Transport>,
        node: NodeId,
        prefix: impl Into<String>,
        size: usize,
        registry: Arc<Registry>,
    ) -> Result<Self> {
        let prefix = prefix.into();
        if size == 0 {
            return Err(Error::InvalidPoolSize { prefix, size });
        }

        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let name = delegate_name(&prefix, index);
            let handle =
                delegate::spawn(transport.clone(), node, name, registry.clone()).await?;
            handles.push(handle);
        }

        Ok(WorkerPool {
            prefix,
            size,
            handles,
        })
    }

    /// The effective pool size callers use to bound the routing hash
    /// (spec §4.1: `pool_size_for`). In this single-process implementation
    /// every node shares one `WorkerPool`'s size; a real cluster would look
    /// this up per peer node and apply the cluster-uniform rule described
    /// in DESIGN.md.
    pub fn count(&self) -> usize {
        self.size
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name_at(&self, index: usize) -> String {
        delegate_name(&self.prefix, index)
    }

    pub fn handle_at(&self, index: usize) -> &DelegateHandle {
        &self.handles[index]
    }
}

pub fn delegate_name(prefix: &str, index: usize) -> String {
    format!("{prefix}{index}")
}
