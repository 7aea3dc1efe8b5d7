//! Loopback fixtures shared by the service tests.

use std::net::SocketAddr;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    chain, hop::Server, registry::Coordinator, timetrace::TimeTrace, transport::Transport,
    wire::ServerRecord,
};

pub async fn bind() -> Transport {
    Transport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap()
}

pub struct Handle<T> {
    pub address: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<T>,
}

impl<T> Handle<T> {
    /// Cancels the service loop and hands back its final state.
    pub async fn stop(self) -> T {
        self.stop.cancel();
        self.task.await.unwrap()
    }
}

pub async fn spawn_coordinator() -> Handle<Coordinator> {
    let mut coordinator = Coordinator::new(bind().await);
    let address = coordinator.local_addr();
    let stop = CancellationToken::new();
    let token = stop.clone();
    let task = tokio::spawn(async move {
        coordinator.run(&token).await;
        coordinator
    });
    Handle {
        address,
        stop,
        task,
    }
}

pub async fn spawn_hops(count: usize) -> Vec<Handle<Server>> {
    let mut hops = Vec::with_capacity(count);
    for _ in 0..count {
        let mut server = Server::new(bind().await, TimeTrace::new(None));
        let address = server.local_addr();
        let stop = CancellationToken::new();
        let token = stop.clone();
        let task = tokio::spawn(async move {
            server.run(&token).await;
            server
        });
        hops.push(Handle {
            address,
            stop,
            task,
        });
    }
    hops
}

/// Directory listing `hops` with ids from 1, as the coordinator would.
pub fn directory(hops: &[Handle<Server>]) -> Vec<ServerRecord> {
    hops.iter()
        .enumerate()
        .map(|(i, hop)| ServerRecord {
            server_id: i as u64 + 1,
            address: hop.address,
        })
        .collect()
}

/// Configures every hop into one chain in order.
pub async fn link(client: &Transport, hops: &[Handle<Server>]) {
    chain::configure_chain(client, &directory(hops), hops.len())
        .await
        .unwrap();
}
