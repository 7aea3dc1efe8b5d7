//! Turns the flat server directory into a linear hop chain.

use std::net::SocketAddr;

use serde::Serialize;

use crate::{error::BenchError, rpc, transport::Transport, wire::ServerRecord};

/// One hop of a planned chain and where it forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HopRoute {
    pub server: ServerRecord,
    pub next_hop: Option<SocketAddr>,
}

/// Takes the first `hops` servers in directory order. Every hop but the last
/// forwards to the one after it.
pub fn plan_chain(directory: &[ServerRecord], hops: usize) -> Result<Vec<HopRoute>, BenchError> {
    if hops == 0 {
        return Err(BenchError::EmptyChain);
    }
    if hops > directory.len() {
        return Err(BenchError::ChainTooLong {
            requested: hops,
            available: directory.len(),
        });
    }

    let chain = &directory[..hops];
    Ok(chain
        .iter()
        .enumerate()
        .map(|(i, &server)| HopRoute {
            server,
            next_hop: chain.get(i + 1).map(|next| next.address),
        })
        .collect())
}

/// Plans the chain and pushes each hop its route, one at a time and waiting
/// for every acknowledgement, so the whole chain is in place on return.
/// Nothing is sent when the plan is rejected.
pub async fn configure_chain(
    transport: &Transport,
    directory: &[ServerRecord],
    hops: usize,
) -> Result<Vec<HopRoute>, BenchError> {
    let chain = plan_chain(directory, hops)?;
    for route in &chain {
        rpc::config_server(transport, route.server.address, route.next_hop).await?;
        match route.next_hop {
            Some(next_hop) => log::info!(
                "server {} at {} forwards to {next_hop}",
                route.server.server_id,
                route.server.address
            ),
            None => log::info!(
                "server {} at {} ends the chain",
                route.server.server_id,
                route.server.address
            ),
        }
    }
    Ok(chain)
}
