//! Sends each value on the command line to the RPC server and prints the answers.

mod common;

use std::time::Duration;

use anyhow::{bail, Result};
use broker_rpc::{ClientConfig, LapinConnector, RpcClient, RpcError, Session, DEFAULT_WORK_QUEUE};
use clap::Parser;
use tracing::{error, info};

use common::BrokerArgs;

#[derive(Parser, Debug)]
#[command(name = "rpc-client")]
#[command(about = "Call the broker RPC service once per value")]
struct Args {
    #[command(flatten)]
    broker: BrokerArgs,

    /// Work queue the server listens on
    #[arg(long, default_value = DEFAULT_WORK_QUEUE)]
    queue: String,

    /// How long to wait for each reply
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Values to send, one call each, in order
    #[arg(required = true, allow_negative_numbers = true)]
    values: Vec<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.broker.init_logging("rpc-client")?;

    let connector = LapinConnector::new().with_label("client");
    let session = Session::establish(&connector, &args.broker.broker_config()).await?;

    let config = ClientConfig::new(args.queue)
        .with_request_timeout(Duration::from_millis(args.timeout_ms));
    let client = RpcClient::start(session, config).await?;
    info!("replies arrive on {}", client.reply_address());

    let mut failures: Vec<(i64, RpcError)> = Vec::new();
    for value in args.values {
        match client.call_default(value).await {
            Ok(response) => println!("{value} -> {}", response.value),
            Err(err) => {
                error!("call with {value} failed: {err}");
                println!("{value} -> {} error", err.kind());
                failures.push((value, err));
            }
        }
    }

    client.close().await;

    if let Some((value, err)) = failures.first() {
        bail!(
            "{} call(s) failed; first: {value} ({}: {err})",
            failures.len(),
            err.kind()
        );
    }
    Ok(())
}
