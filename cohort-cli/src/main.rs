use cohort::{Cluster, Config};
use std::{net::SocketAddr, time::Duration};
use structopt::StructOpt;
use tracing::info;

#[derive(StructOpt, Debug)]
#[structopt(name = "cohort-cli", rename_all = "kebab-case")]
enum Opts {
    /// Start a fresh cluster of one.
    Start {
        /// Local UDP address to bind.
        listen: SocketAddr,
    },
    /// Start a node seeded with existing peers.
    Join {
        /// Local UDP address to bind.
        listen: SocketAddr,
        /// Peers already in the cluster.
        peers: Vec<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("cohort=debug,cohort_cli=info")
        .init();

    let (listen, peers) = match Opts::from_args() {
        Opts::Start { listen } => (listen, Vec::new()),
        Opts::Join { listen, peers } => (listen, peers),
    };

    let config = Config {
        bind_addr: listen,
        ..Config::default()
    };

    let cluster = Cluster::bind(config, peers).await?;

    let view = cluster.handle();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            match view.members().await {
                Ok(members) => info!(message = "membership view", ?members),
                Err(_) => break,
            }
        }
    });

    let stopper = cluster.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.shutdown();
        }
    });

    cluster.run().await;

    Ok(())
}
