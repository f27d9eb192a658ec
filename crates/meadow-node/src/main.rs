//! Meadow simulator binary
//!
//! Runs an N-node cluster over the in-process network until Ctrl-C.
//!
//! Usage:
//!
//! - `meadow-sim [config.json] [nodes]`: run a cluster. Without a config
//!   file it is configured from `MEADOW_*` environment variables.
//! - `meadow-sim combine <dir>`: merge the `process_<id>.csv` trails in
//!   `dir` into `combined.csv`.

use std::time::Duration;

use meadow_node::{audit, ClusterConfig, LocalNetwork, Node};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meadow_sim=info,meadow_node=info,meadow_protocol=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1).peekable();
    if args.peek().map(String::as_str) == Some("combine") {
        let Some(dir) = args.nth(1) else {
            eprintln!("Error: combine requires a directory argument");
            std::process::exit(1);
        };
        let path = audit::combine(&dir)?;
        tracing::info!(path = %path.display(), "wrote combined timeline");
        return Ok(());
    }

    let config = match args.next() {
        Some(arg) if arg.ends_with(".json") => {
            let config = ClusterConfig::from_file(&arg)?;
            if let Some(nodes) = args.next() {
                config.with_nodes(nodes.parse()?)
            } else {
                config
            }
        }
        Some(nodes) => ClusterConfig::from_env()?.with_nodes(nodes.parse()?),
        None => ClusterConfig::from_env()?,
    };
    config.validate()?;

    tracing::info!(
        nodes = config.nodes,
        slots = config.protocol.slots,
        seed = ?config.seed,
        audit_dir = ?config.audit_dir,
        "starting meadow cluster"
    );

    let mut handles = Vec::with_capacity(config.nodes);
    for (node, transport) in config
        .node_configs()?
        .into_iter()
        .zip(LocalNetwork::new(config.nodes))
    {
        let node = Node::new(node, transport)?;
        tracing::info!(node = node.id(), class = %node.class(), "spawning node");
        handles.push(node.spawn());
    }

    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
            _ = poll.tick() => {
                if let Some(handle) = handles.iter().find(|h| h.is_finished()) {
                    tracing::warn!(node = handle.id(), "node stopped unexpectedly");
                    break;
                }
            }
        }
    }

    let mut failed = false;
    for handle in &mut handles {
        if let Err(e) = handle.finish().await {
            tracing::error!(node = handle.id(), error = %e, "node failed");
            failed = true;
        }
    }
    for handle in handles {
        let id = handle.id();
        if let Err(e) = handle.shutdown().await {
            tracing::error!(node = id, error = %e, "node failed");
            failed = true;
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
