//! Command-line pieces shared by the three processes.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{ArgAction, Args, ValueEnum};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// UDP port to listen on.
    pub port: u16,

    /// Local IP to bind. Peers reply to this address, so it must be reachable.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Show more output; repeat up to four times.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl CommonArgs {
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned latency table.
    #[default]
    Basic,
    /// One JSON object per run.
    Json,
}

/// Token cancelled on the first Ctrl-C.
pub fn interrupt_token() -> CancellationToken {
    let stop = CancellationToken::new();
    let token = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("interrupted, shutting down");
                token.cancel();
            }
            Err(err) => log::error!("cannot listen for Ctrl-C: {err}"),
        }
    });
    stop
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        common: CommonArgs,
        coordinator: SocketAddr,
    }

    #[test]
    fn port_comes_before_role_arguments() {
        let cli = Cli::try_parse_from(["server", "-vvv", "4000", "127.0.0.1:3000"]).unwrap();
        assert_eq!(cli.common.port, 4000);
        assert_eq!(cli.common.verbose, 3);
        assert_eq!(cli.common.local_addr(), "127.0.0.1:4000".parse().unwrap());
        assert_eq!(cli.coordinator, "127.0.0.1:3000".parse().unwrap());
    }

    #[test]
    fn host_overrides_bind_address() {
        let cli =
            Cli::try_parse_from(["server", "--host", "10.1.2.3", "4000", "10.1.2.1:3000"]).unwrap();
        assert_eq!(cli.common.local_addr(), "10.1.2.3:4000".parse().unwrap());
    }
}
