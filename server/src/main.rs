use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rpc_chain_bench::{
    cli::{self, CommonArgs},
    hop::Server,
    logging, rpc,
    timetrace::TimeTrace,
    transport::Transport,
};

/// One hop of a benchmark chain.
#[derive(Debug, Parser)]
#[command(name = "server", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Address of the coordinator to enlist with.
    coordinator: SocketAddr,

    /// Directory where a time trace log should be written.
    #[arg(long)]
    timetrace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.common.verbose);

    let transport = Transport::bind(cli.common.local_addr())
        .await
        .context("bind server socket")?;
    let stop = cli::interrupt_token();

    let Some(server_id) = stop
        .run_until_cancelled(rpc::enlist_server(&transport, cli.coordinator))
        .await
    else {
        return Ok(());
    };
    let server_id = server_id.context("enlist with coordinator")?;
    println!("Registered as Server {server_id}");

    let output = cli
        .timetrace
        .map(|dir| dir.join(format!("server-{server_id}-timetrace.log")));
    let mut server = Server::new(transport, TimeTrace::new(output));
    server.run(&stop).await;
    Ok(())
}
