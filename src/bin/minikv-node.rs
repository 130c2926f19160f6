//! Entry point for a `minikv` node process.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use minikv::config::{NodeArgs, ReplicationType};

fn main() {
    let args = NodeArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.loglevel.as_filter()))
        .init();

    let connect_to = match args.connect_to_ids() {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Runtime::new().expect("failed to start async runtime");
    let result = runtime.block_on(async move {
        match args.replication_type {
            ReplicationType::None => minikv::solo::serve(args.index, connect_to).await,
            ReplicationType::Chain => minikv::chain::serve(args.index, connect_to).await,
            ReplicationType::Gossip => {
                unreachable!("gossip is rejected by NodeArgs::connect_to_ids before we get here")
            }
            ReplicationType::Client => {
                eprintln!("`client` is not a server mode; use the minikv-client binary");
                std::process::exit(1);
            }
        }
    });

    if let Err(e) = result {
        eprintln!("node exited with error: {}", e);
        std::process::exit(1);
    }
}
