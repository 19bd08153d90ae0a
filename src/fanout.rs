//! The fan-out core (spec §4.2): the caller-side library that splits a
//! target set into local and remote work, coalesces the remote part into
//! one message per peer node, and merges results back into the
//! `(successes, failures)` contract shape.
//!
//! Every function here takes a [`FanoutContext`] rather than a long
//! parameter list — the context bundles exactly the state spec §3 assigns
//! to the caller (the transport handle, this node's identity, the caller's
//! identity and memo, the delegate name prefix, and the cluster-uniform
//! pool size) so call sites read the way `fantoch::client::Client`'s
//! methods do: one `&self`-shaped thing, not a parameter explosion.

use crate::delegate;
use crate::id::{CallerId, NodeId, Pid};
use crate::operation::{self, Operation, Registry, Symbolic, Value};
use crate::outcome::{self, Failure, Outcome};
use crate::routing::CallerMemo;
use crate::transport::Transport;
use crate::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Everything the fan-out core needs to route and dispatch an invocation
/// from one particular caller. Long-lived: built once per caller and
/// reused across every `invoke`/`call`/`cast` it issues, exactly as spec §3
/// describes the caller-side memo's lifecycle.
pub struct FanoutContext {
    pub transport: Arc<dyn Transport>,
    pub local_node: NodeId,
    pub caller: CallerId,
    pub memo: CallerMemo,
    pub prefix: String,
    /// The cluster-uniform pool size used to bound the routing hash (see
    /// DESIGN.md's resolution of spec §9's open question).
    pub pool_size: usize,
    pub registry: Arc<Registry>,
}

impl FanoutContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        local_node: NodeId,
        caller: CallerId,
        prefix: impl Into<String>,
        pool_size: usize,
        registry: Arc<Registry>,
    ) -> Self {
        FanoutContext {
            transport,
            local_node,
            caller,
            memo: CallerMemo::new(),
            prefix: prefix.into(),
            pool_size,
            registry,
        }
    }
}

fn partition(local_node: NodeId, targets: &[Pid]) -> (Vec<Pid>, HashMap<NodeId, Vec<Pid>>) {
    let mut local = Vec::new();
    // Built with `Vec::push`, so each node's group is in caller-discovery
    // order rather than the reverse-of-discovery order a cons-list
    // accumulator would produce — callers still must not depend on
    // cross-target order within one node (spec §4.3), this is just a
    // different valid order, not a stronger guarantee.
    let mut groups: HashMap<NodeId, Vec<Pid>> = HashMap::default();
    for &target in targets {
        if target.node() == local_node {
            local.push(target);
        } else {
            groups.entry(target.node()).or_default().push(target);
        }
    }
    (local, groups)
}

fn apply_local(operation: &Operation, target: Pid, registry: &Registry) -> Result<Value, Failure> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| operation.apply(target, registry))) {
        Ok(value) => Ok(value),
        Err(payload) => Err(Failure::from_panic(payload)),
    }
}

fn require_symbolic(operation: &Operation) -> Result<Symbolic, Failure> {
    match operation {
        Operation::Symbolic(symbolic) => Ok(symbolic.clone()),
        Operation::Captured(_) => Err(Failure::new(
            "badarg",
            "captured operations cannot be sent to a remote target; build the operation with Operation::symbolic instead",
        )),
    }
}

/// `invoke(target, operation)` — the single-pid shape (spec §6). Applies
/// `operation` to `target` and re-raises the failure in the caller instead
/// of returning it structured: in Rust, "re-raise" is `Err`.
///
/// Fast paths: target local to this node is applied inline (no network);
/// target remote is dispatched as a single coalesced request directly, with
/// no per-node grouping map built for more than the one entry it needs
/// (spec §4.2, fast path 3).
pub async fn invoke_single(
    ctx: &FanoutContext,
    target: Pid,
    operation: Operation,
) -> Result<Value, Failure> {
    if target.node() == ctx.local_node {
        return apply_local(&operation, target, &ctx.registry);
    }

    let symbolic = require_symbolic(&operation)?;
    let delegate_name = ctx.memo.route(ctx.caller, &ctx.prefix, ctx.pool_size);
    let mut groups = HashMap::default();
    groups.insert(target.node(), vec![target]);
    let body = delegate::encode_invoke(&symbolic, &groups);

    match ctx.transport.request(target.node(), &delegate_name, body).await {
        Ok(reply_body) => {
            let reply = delegate::decode_invoke_reply(&reply_body)
                .map_err(|e| Failure::new("decode_error", e.to_string()))?;
            match reply.outcomes.into_iter().next() {
                Some(Outcome::Success(_, value)) => Ok(value),
                Some(Outcome::Failure(_, failure)) => Err(failure),
                None => Err(Failure::new("protocol_error", "delegate returned no outcome")),
            }
        }
        Err(_) => Err(Failure::node_down(target.node())),
    }
}

/// `invoke(targets, operation)` — the list shape (spec §6). Every input
/// target appears in exactly one of the returned lists.
///
/// Fast paths: empty list returns immediately with no network traffic
/// (spec §4.2, fast path 2); a single target is routed through
/// [`invoke_single`] and its result wrapped back into list shape rather
/// than going through the general partition/dispatch/merge path.
pub async fn invoke(
    ctx: &FanoutContext,
    targets: &[Pid],
    operation: Operation,
) -> (Vec<(Pid, Value)>, Vec<(Pid, Failure)>) {
    if targets.is_empty() {
        return (Vec::new(), Vec::new());
    }
    if targets.len() == 1 {
        let target = targets[0];
        return match invoke_single(ctx, target, operation).await {
            Ok(value) => (vec![(target, value)], Vec::new()),
            Err(failure) => (Vec::new(), vec![(target, failure)]),
        };
    }
    invoke_many(ctx, targets, operation).await
}

async fn invoke_many(
    ctx: &FanoutContext,
    targets: &[Pid],
    operation: Operation,
) -> (Vec<(Pid, Value)>, Vec<(Pid, Failure)>) {
    let (local_targets, groups) = partition(ctx.local_node, targets);
    let mut outcomes = Vec::with_capacity(targets.len());

    if !groups.is_empty() {
        match require_symbolic(&operation) {
            Ok(symbolic) => {
                let delegate_name = ctx.memo.route(ctx.caller, &ctx.prefix, ctx.pool_size);
                // Every peer node gets the same coalesced payload — the
                // full `groups` map — and looks up only its own entry
                // (spec §4.2 step 2). This is what collapses what would
                // otherwise be |targets| messages into exactly one message
                // per peer node (testable property in spec §8).
                let bodies: HashMap<NodeId, Vec<u8>> = groups
                    .keys()
                    .map(|node| (*node, delegate::encode_invoke(&symbolic, &groups)))
                    .collect();
                let (replies, unreachable) =
                    ctx.transport.multi_request(&delegate_name, bodies).await;

                for node in unreachable {
                    if let Some(group) = groups.get(&node) {
                        for &target in group {
                            outcomes.push(Outcome::Failure(target, Failure::node_down(node)));
                        }
                    }
                }
                for body in replies.into_values() {
                    if let Ok(reply) = delegate::decode_invoke_reply(&body) {
                        outcomes.extend(reply.outcomes);
                    }
                }
            }
            Err(_) => {
                for (_node, group) in groups {
                    for target in group {
                        outcomes.push(Outcome::Failure(
                            target,
                            Failure::new(
                                "badarg",
                                "captured operations cannot be sent to a remote target",
                            ),
                        ));
                    }
                }
            }
        }
    }

    for target in local_targets {
        outcomes.push(match apply_local(&operation, target, &ctx.registry) {
            Ok(value) => Outcome::Success(target, value),
            Err(failure) => Outcome::Failure(target, failure),
        });
    }

    outcome::partition(outcomes)
}

/// `invoke-no-result(targets, operation)` (spec §6): fire-and-forget.
/// Dispatches via best-effort cast instead of a synchronous request;
/// node-down targets are silently dropped rather than synthesized into
/// failures, and every error — including a captured operation misused
/// against a remote target — is suppressed. Local targets are still
/// applied synchronously in the caller (spec §4.2).
pub async fn invoke_no_result(ctx: &FanoutContext, targets: &[Pid], operation: Operation) {
    if targets.is_empty() {
        return;
    }
    let (local_targets, groups) = partition(ctx.local_node, targets);

    if !groups.is_empty() {
        if let Ok(symbolic) = require_symbolic(&operation) {
            let delegate_name = ctx.memo.route(ctx.caller, &ctx.prefix, ctx.pool_size);
            for node in groups.keys() {
                let _ = delegate::cast_invoke(
                    &ctx.transport,
                    *node,
                    &delegate_name,
                    symbolic.clone(),
                    groups.clone(),
                );
            }
        }
    }

    for target in local_targets {
        let _ = apply_local(&operation, target, &ctx.registry);
    }
}

/// `call(targets, message)` = `invoke(targets, send_sync(message))`.
pub async fn call(
    ctx: &FanoutContext,
    targets: &[Pid],
    message: Value,
) -> (Vec<(Pid, Value)>, Vec<(Pid, Failure)>) {
    invoke(ctx, targets, operation::send_sync(message)).await
}

/// `call(target, message)` — single-pid shape of [`call`].
pub async fn call_single(ctx: &FanoutContext, target: Pid, message: Value) -> Result<Value, Failure> {
    invoke_single(ctx, target, operation::send_sync(message)).await
}

/// `cast(targets, message)` = `invoke-no-result(targets, send_async(message))`.
pub async fn cast(ctx: &FanoutContext, targets: &[Pid], message: Value) {
    invoke_no_result(ctx, targets, operation::send_async(message)).await
}
