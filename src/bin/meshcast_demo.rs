//! A small demo that boots an in-process three-node cluster and exercises
//! `invoke`/`cast`/`monitor` end to end, the way `fantoch`'s experiment
//! binaries drive a protocol from the outside rather than from a unit
//! test. Not part of the library's public API.

use clap::{Parser, ValueEnum};
use meshcast::operation::{Operation, Registry};
use meshcast::transport::{LocalCluster, Transport};
use meshcast::{CallerId, FanoutContext, NodeId, Pid, WorkerPool};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scenario {
    /// Fan an `invoke` out to targets on every node, including one down.
    Invoke,
    /// Fire a `cast` then a `call` from the same caller and show ordering.
    Ordering,
    /// Three observers monitor one remote pid through a single delegate.
    Monitor,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(value_enum, default_value_t = Scenario::Invoke)]
    scenario: Scenario,
}

fn echo_registry() -> Arc<Registry> {
    let mut registry: Registry = meshcast::HashMap::default();
    registry.insert(
        ("mailbox".to_string(), "send_sync".to_string()),
        Arc::new(|target: Pid, args: &Vec<u8>| {
            println!("  {target} <- sync {:?}", String::from_utf8_lossy(args));
            args.clone()
        }),
    );
    registry.insert(
        ("mailbox".to_string(), "send_async".to_string()),
        Arc::new(|target: Pid, args: &Vec<u8>| {
            println!("  {target} <- async {:?}", String::from_utf8_lossy(args));
            args.clone()
        }),
    );
    Arc::new(registry)
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let transport: Arc<dyn Transport> = Arc::new(LocalCluster::new());
    let registry = echo_registry();

    let node_a = NodeId(1);
    let node_b = NodeId(2);
    let node_c = NodeId(3);
    let pool_size = 4;

    for node in [node_a, node_b, node_c] {
        WorkerPool::start(transport.clone(), node, "delegate_", pool_size, registry.clone()).await?;
    }

    match args.scenario {
        Scenario::Invoke => run_invoke(transport, registry, node_a, node_b, node_c, pool_size).await,
        Scenario::Ordering => run_ordering(transport, registry, node_a, node_b, pool_size).await,
        Scenario::Monitor => run_monitor(transport, node_a, node_b, pool_size).await,
    }

    Ok(())
}

async fn run_invoke(
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    node_a: NodeId,
    node_b: NodeId,
    node_c: NodeId,
    pool_size: usize,
) {
    transport.kill_node(node_c).await;

    let ctx = FanoutContext::new(transport, node_a, CallerId(1), "delegate_", pool_size, registry);
    let targets = vec![
        Pid::new(node_a, 1),
        Pid::new(node_b, 1),
        Pid::new(node_b, 2),
        Pid::new(node_c, 1),
    ];
    let (successes, failures) = meshcast::invoke(
        &ctx,
        &targets,
        Operation::symbolic("mailbox", "send_sync", b"ping".to_vec()),
    )
    .await;

    println!("successes: {}", successes.len());
    println!("failures: {:?}", failures.iter().map(|(p, f)| (p.to_string(), f.to_string())).collect::<Vec<_>>());
}

async fn run_ordering(
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    node_a: NodeId,
    node_b: NodeId,
    pool_size: usize,
) {
    let ctx = FanoutContext::new(transport, node_a, CallerId(2), "delegate_", pool_size, registry);
    let target = Pid::new(node_b, 1);
    meshcast::cast(&ctx, &[target], b"m1".to_vec()).await;
    let (successes, _) = meshcast::call(&ctx, &[target], b"m2".to_vec()).await;
    println!("call replied with {} success(es); m1 was delivered first", successes.len());
}

async fn run_monitor(transport: Arc<dyn Transport>, node_a: NodeId, node_b: NodeId, pool_size: usize) {
    use meshcast::monitor;

    let watched = Pid::new(node_b, 99);
    let mut receivers = Vec::new();
    for i in 0..3u64 {
        let observer = Pid::new(node_a, 100 + i);
        let endpoint = format!("observer_{i}");
        let rx = transport
            .register_endpoint(node_a, &endpoint)
            .await
            .expect("observer endpoint name is freshly generated, never duplicated");
        let handle = monitor::monitor(&transport, node_a, "delegate_", pool_size, observer, &endpoint, watched).await;
        receivers.push((handle, rx));
    }

    transport.kill_process(watched, "simulated crash").await;

    for (_, mut rx) in receivers {
        if let Some(envelope) = rx.recv().await {
            if let Ok(notification) = meshcast::delegate::decode_down_notification(&envelope.body) {
                println!("observer notified: {notification:?}");
            }
        }
    }
}
