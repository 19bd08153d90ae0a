//! Per-target invocation outcomes: the sum type the fan-out core and the
//! delegate worker pass around internally, flattened to `(successes,
//! failures)` only at the API boundary (design note in spec §9: "prefer
//! this over pairs of parallel lists internally").

use crate::id::{NodeId, Pid};
use crate::operation::Value;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// A structured per-target failure, captured verbatim from wherever the
/// operation actually failed (locally, or at a remote delegate), or
/// synthesized by the caller when a peer node is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub error_class: String,
    pub reason: String,
    /// Best-effort and frequently empty: a platform stack trace rarely
    /// survives serialization across a node boundary intact.
    pub stack_trace: Vec<String>,
}

impl Failure {
    pub fn new(error_class: impl Into<String>, reason: impl Into<String>) -> Self {
        Failure {
            error_class: error_class.into(),
            reason: reason.into(),
            stack_trace: Vec::new(),
        }
    }

    /// `{exit, {node_down, node}, []}` from spec §3 — synthesized by the
    /// caller, never produced by a delegate.
    pub fn node_down(node: NodeId) -> Self {
        Failure {
            error_class: "exit".to_string(),
            reason: format!("node_down: {node}"),
            stack_trace: Vec::new(),
        }
    }

    /// Captures a panic payload caught via `catch_unwind` while applying an
    /// operation. Rust has no general catchable exception, so a panic is
    /// the analogue of the source's "operation raised".
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let reason = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Failure {
            error_class: "panic".to_string(),
            reason,
            stack_trace: Vec::new(),
        }
    }

    pub fn is_node_down(&self) -> bool {
        self.error_class == "exit" && self.reason.starts_with("node_down:")
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_class, self.reason)
    }
}

impl std::error::Error for Failure {}

/// The per-target outcome of applying an operation: success carries the
/// returned value, failure carries the structured payload above. Both
/// variants carry the target so outcomes from different nodes can be
/// merged and then split into the `(successes, failures)` contract shape
/// without losing track of which target they belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome {
    Success(Pid, Value),
    Failure(Pid, Failure),
}

impl Outcome {
    pub fn target(&self) -> Pid {
        match self {
            Outcome::Success(t, _) => *t,
            Outcome::Failure(t, _) => *t,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(..))
    }
}

/// Splits a list of outcomes into the `(successes, failures)` contract
/// shape described throughout spec §3/§6, without reordering within either
/// list.
pub fn partition(outcomes: Vec<Outcome>) -> (Vec<(Pid, Value)>, Vec<(Pid, Failure)>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Success(target, value) => successes.push((target, value)),
            Outcome::Failure(target, failure) => failures.push((target, failure)),
        }
    }
    (successes, failures)
}
