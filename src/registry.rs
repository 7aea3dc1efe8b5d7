use std::{collections::BTreeMap, net::SocketAddr};

use tokio_util::sync::CancellationToken;

use crate::{
    transport::{InboundOp, Transport},
    wire::{Request, Response, ServerRecord},
};

/// Append-only directory of enlisted servers.
///
/// Ids start at 1 and only grow, so id order is enlistment order.
#[derive(Debug)]
pub struct Registry {
    next_server_id: u64,
    servers: BTreeMap<u64, SocketAddr>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            next_server_id: 1,
            servers: BTreeMap::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enlist(&mut self, address: SocketAddr) -> u64 {
        let server_id = self.next_server_id;
        self.next_server_id += 1;
        self.servers.insert(server_id, address);
        server_id
    }

    /// Snapshot of every enlisted server in enlistment order.
    pub fn server_list(&self) -> Vec<ServerRecord> {
        self.servers
            .iter()
            .map(|(&server_id, &address)| ServerRecord { server_id, address })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Serves enlistment and directory queries one at a time.
pub struct Coordinator {
    transport: Transport,
    registry: Registry,
}

impl Coordinator {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            registry: Registry::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn run(&mut self, stop: &CancellationToken) {
        while let Some(Some(op)) = stop.run_until_cancelled(self.transport.receive()).await {
            self.dispatch(op).await;
        }
        log::info!(
            "coordinator stopping with {} enlisted servers",
            self.registry.len()
        );
    }

    async fn dispatch(&mut self, op: InboundOp) {
        let request = match Request::decode(op.request()) {
            Ok(request) => request,
            Err(err) => {
                log::error!("dropping request from {}: {err}", op.origin());
                op.abandon();
                return;
            }
        };

        let response = match request {
            Request::EnlistServer { address } => {
                let server_id = self.registry.enlist(address);
                log::info!("Enlisted Server {server_id} at {address}");
                Response::EnlistServer { server_id }
            }
            Request::GetServerList => {
                let servers = self.registry.server_list();
                log::info!("Replied to getServerList with {} entries.", servers.len());
                Response::GetServerList { servers }
            }
            Request::ConfigServer { .. }
            | Request::Echo(_)
            | Request::EchoMultiLevel(_)
            | Request::DumpTimeTrace => {
                log::error!(
                    "coordinator does not serve {:?}, dropping request from {}",
                    request.opcode(),
                    op.origin()
                );
                op.abandon();
                return;
            }
        };

        if let Err(err) = self.transport.reply(op, response.encode()).await {
            log::error!("reply failed: {err}");
        }
    }
}
