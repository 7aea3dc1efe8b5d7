use anyhow::{Context, Result};
use clap::Parser;
use rpc_chain_bench::{
    cli::{self, CommonArgs},
    logging,
    registry::Coordinator,
    transport::Transport,
};

/// Keeps the list of enlisted benchmark servers.
#[derive(Debug, Parser)]
#[command(name = "coordinator", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.common.verbose);

    let transport = Transport::bind(cli.common.local_addr())
        .await
        .context("bind coordinator socket")?;
    println!("Coordinator listening on {}", transport.local_addr());

    let stop = cli::interrupt_token();
    let mut coordinator = Coordinator::new(transport);
    coordinator.run(&stop).await;
    Ok(())
}
