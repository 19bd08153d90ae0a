//! The operation data model: either a captured function applied inline (the
//! local-only fast path), or a symbolic `(module, function, extra-args)`
//! triple that can be serialized across the wire and resolved at the
//! target's node.

use crate::id::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// An argument bag carried alongside a symbolic operation. Kept as an
/// opaque serialized blob rather than a generic type parameter so that
/// `Operation` itself stays a plain enum that can be cloned and sent to any
/// node without the caller's call site leaking into the type signature.
pub type Args = Vec<u8>;

/// A value produced by applying an operation to a target, carried back to
/// the caller across the wire. Opaque for the same reason `Args` is.
pub type Value = Vec<u8>;

/// A symbolic, wire-serializable description of a function to apply to a
/// target: `function(target, extra_args...)` resolved by name at the node
/// that executes it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Symbolic {
    pub module: String,
    pub function: String,
    pub args: Args,
}

impl fmt::Debug for Symbolic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.module, self.function, self.args.len())
    }
}

/// A registry of symbolic operations resolvable by `(module, function)`
/// name, used to apply a [`Symbolic`] operation once it reaches a target's
/// node. A captured [`Operation::Captured`] closure needs no such registry
/// — it already carries its own code — but a `Symbolic` operation that
/// crossed the wire only carries a name, which must be resolved locally.
pub type Registry = crate::HashMap<(String, String), Arc<dyn Fn(Pid, &Args) -> Value + Send + Sync>>;

/// The operation applied to each target. Captures are the common local
/// case (closures composed at the call site, e.g. by `call`/`cast`);
/// symbolic operations are what actually cross the wire to a remote
/// delegate, since a closure cannot be serialized.
#[derive(Clone)]
pub enum Operation {
    /// A function applied to exactly one target at a time, never sent
    /// across the wire directly — only valid against local targets or
    /// already resolved inside a delegate from a `Symbolic`.
    Captured(Arc<dyn Fn(Pid) -> Value + Send + Sync>),
    /// A `(module, function, args)` triple, serializable and resolved via a
    /// [`Registry`] wherever it is applied.
    Symbolic(Symbolic),
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Captured(_) => write!(f, "Operation::Captured(..)"),
            Operation::Symbolic(s) => write!(f, "Operation::Symbolic({s:?})"),
        }
    }
}

impl Operation {
    pub fn captured<F>(f: F) -> Self
    where
        F: Fn(Pid) -> Value + Send + Sync + 'static,
    {
        Operation::Captured(Arc::new(f))
    }

    pub fn symbolic(module: impl Into<String>, function: impl Into<String>, args: Args) -> Self {
        Operation::Symbolic(Symbolic {
            module: module.into(),
            function: function.into(),
            args,
        })
    }

    /// Applies the operation to `target`, resolving a symbolic operation
    /// via `registry` if needed. Panics from the applied function are the
    /// caller's (delegate's) responsibility to catch — see
    /// [`crate::delegate`].
    pub fn apply(&self, target: Pid, registry: &Registry) -> Value {
        match self {
            Operation::Captured(f) => f(target),
            Operation::Symbolic(sym) => {
                let key = (sym.module.clone(), sym.function.clone());
                match registry.get(&key) {
                    Some(f) => f(target, &sym.args),
                    None => panic!("unregistered operation {}:{}", sym.module, sym.function),
                }
            }
        }
    }

    /// `true` for a `Symbolic` operation — the only shape safe to place
    /// inside a coalesced remote request. The fast paths in
    /// [`crate::fanout`] never need to serialize a `Captured` operation
    /// because they only ever take it down the all-local branch; the
    /// general remote path requires callers to build a `Symbolic`
    /// operation via [`Operation::symbolic`] (or the `call`/`cast`
    /// wrappers, which always build symbolic operations).
    pub fn is_wire_safe(&self) -> bool {
        matches!(self, Operation::Symbolic(_))
    }
}

/// Builds the operation behind `call(targets, message)`: a symbolic
/// "deliver this message synchronously" invocation. The actual delivery
/// function (`mailbox::send_sync` in the surrounding application) is
/// resolved via a [`Registry`] entry named `("mailbox", "send_sync")`.
pub fn send_sync(message: Value) -> Operation {
    Operation::symbolic("mailbox", "send_sync", message)
}

/// Builds the operation behind `cast(targets, message)`: a symbolic
/// "deliver this message asynchronously" invocation, resolved via
/// `("mailbox", "send_async")`.
pub fn send_async(message: Value) -> Operation {
    Operation::symbolic("mailbox", "send_async", message)
}
