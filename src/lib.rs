//! `meshcast` is a cross-node invocation multiplexer.
//!
//! It sits between a broadcaster that fans a message out to thousands of
//! target processes and the per-process mailboxes that eventually receive
//! it, collapsing what would otherwise be one cross-node message per target
//! into a single coalesced message per remote node.
//!
//! The crate is organized leaves-first, mirroring the runtime's own data
//! flow: [`id`] and [`hash`] are the identity/routing primitives,
//! [`operation`] and [`outcome`] are the data model, [`transport`] is the
//! substrate façade, [`routing`] and [`pool`] pick and name delegates,
//! [`delegate`] and [`monitor`] are the worker side, and [`fanout`] is the
//! caller-facing core that ties everything together.

pub mod delegate;
pub mod error;
pub mod fanout;
pub mod hash;
pub mod id;
pub mod monitor;
pub mod operation;
pub mod outcome;
pub mod pool;
pub mod routing;
pub mod transport;

pub use error::Error;
pub use fanout::{call, call_single, cast, invoke, invoke_no_result, invoke_single, FanoutContext};
pub use id::{CallerId, NodeId, Pid};
pub use operation::Operation;
pub use outcome::{Failure, Outcome};
pub use pool::WorkerPool;
pub use transport::{LocalCluster, Transport};

/// Hasher used for every internal map in this crate. None of them are ever
/// iterated in an order-sensitive way, so we trade the stdlib's
/// DoS-resistant (and slower) default for `ahash`.
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type HashSet<T> = std::collections::HashSet<T, ahash::RandomState>;
