use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use rpc_chain_bench::{
    cli::{self, CommonArgs, OutputFormat},
    driver::{BenchConfig, BenchReport, Client, Scenario, Topology, DEFAULT_COUNT},
    logging, stats,
    transport::Transport,
};

/// Times RPC chains across the enlisted servers.
#[derive(Debug, Parser)]
#[command(name = "client", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Address of the coordinator holding the server list.
    coordinator: SocketAddr,

    /// Benchmark to run: noop, serverList, nestedRpc or ringRpc.
    bench: String,

    /// Number of hops an operation should make.
    #[arg(long, default_value_t = 1)]
    hops: usize,

    /// Number of bytes in the request.
    #[arg(long, default_value_t = 100)]
    send_bytes: u32,

    /// Number of bytes in the response.
    #[arg(long, default_value_t = 100)]
    receive_bytes: u32,

    /// Number of timed operations.
    #[arg(long, default_value_t = DEFAULT_COUNT)]
    count: usize,

    /// Format of the output.
    #[arg(long, value_enum, default_value_t = OutputFormat::Basic)]
    output: OutputFormat,

    /// Ask every hop to write its time trace after the run.
    #[arg(long)]
    dump_timetrace: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.common.verbose);

    let config = BenchConfig {
        count: cli.count,
        hops: cli.hops,
        send_bytes: cli.send_bytes,
        receive_bytes: cli.receive_bytes,
    };
    let transport = Transport::bind(cli.common.local_addr())
        .await
        .context("bind client socket")?;
    let stop = cli::interrupt_token();
    let Some(client) = stop
        .run_until_cancelled(Client::connect(transport, cli.coordinator, config))
        .await
    else {
        return Ok(());
    };
    let client = client.context("fetch server list")?;

    let topology = match Scenario::find(&cli.bench) {
        None => {
            println!("No test found matching the given arguments");
            return Ok(());
        }
        Some(Scenario::Noop) => {
            println!("Nothing was done.");
            return Ok(());
        }
        Some(Scenario::ServerList) => {
            println!("Server List has {} entries.", client.servers().len());
            for server in client.servers() {
                println!("Server {} at {}", server.server_id, server.address);
            }
            return Ok(());
        }
        Some(Scenario::NestedRpc) => Topology::Nested,
        Some(Scenario::RingRpc) => Topology::Ring,
    };

    let report = client
        .run_echo(topology, &stop)
        .await
        .context("run benchmark")?;
    print_report(&report, cli.output)?;

    if cli.dump_timetrace {
        client
            .dump_time_traces(&report.chain)
            .await
            .context("dump hop time traces")?;
    }
    Ok(())
}

fn print_report(report: &BenchReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Basic => {
            match &report.dist {
                Some(dist) => {
                    println!("{}", stats::basic_header());
                    println!("{}", stats::basic_row(dist, &report.description));
                }
                None => println!("No samples collected."),
            }
            let mismatches = &report.mismatches;
            if mismatches.total() > 0 {
                println!(
                    "mismatches: {} response size, {} hop count, {} malformed, {} failed",
                    mismatches.response_bytes,
                    mismatches.hop_count,
                    mismatches.malformed,
                    mismatches.failed
                );
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).context("serialize report")?;
            println!("{json}");
        }
    }
    Ok(())
}
