//! Serves the doubling RPC on a broker work queue until it goes idle.

mod common;

use std::time::Duration;

use anyhow::Result;
use broker_rpc::{Doubler, LapinConnector, RpcServer, ServerConfig, Session, DEFAULT_WORK_QUEUE};
use clap::Parser;
use tracing::info;

use common::BrokerArgs;

#[derive(Parser, Debug)]
#[command(name = "rpc-server")]
#[command(about = "Answer RPC requests from a broker work queue with twice their value")]
struct Args {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Work queue to serve
    #[arg(long, default_value = DEFAULT_WORK_QUEUE)]
    queue: String,

    /// Stop after this many seconds without a request
    #[arg(long, default_value_t = 10)]
    idle_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.broker.init_logging("rpc-server")?;

    let broker_config = args.broker.broker_config();
    info!("connecting to {}:{}", broker_config.host, broker_config.port);

    let connector = LapinConnector::new().with_label("server");
    let session = Session::establish(&connector, &broker_config).await?;

    let config = ServerConfig::new(args.queue)
        .with_idle_timeout(Duration::from_secs(args.idle_timeout_secs));
    let server = RpcServer::bind(session, config, Doubler).await?;

    let report = server.run().await?;
    info!(
        "done: {} handled, {} dropped, {} dead-lettered",
        report.handled, report.dropped, report.dead_lettered
    );

    Ok(())
}
