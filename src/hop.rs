//! The benchmark server: one hop of a configured chain.
//!
//! Operations are handled strictly one at a time, including any downstream
//! call they make, which is why a single scratch buffer is enough.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;

use crate::{
    error::BenchError,
    timetrace::TimeTrace,
    transport::{InboundOp, Transport},
    wire::{EchoRequest, Opcode, Request, Response, MAX_PAYLOAD},
};

/// Per-hop tallies of how echo operations ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HopCounters {
    /// Echo operations this hop answered itself.
    pub replied: u64,
    /// Echo operations handed on to the next hop.
    pub delegated: u64,
    /// Operations dropped without a reply.
    pub dropped: u64,
}

pub struct Server {
    transport: Transport,
    next_hop: Option<SocketAddr>,
    buffer: BytesMut,
    trace: TimeTrace,
    counters: HopCounters,
}

impl Server {
    pub fn new(transport: Transport, trace: TimeTrace) -> Self {
        Self {
            transport,
            next_hop: None,
            buffer: BytesMut::with_capacity(MAX_PAYLOAD),
            trace,
            counters: HopCounters::default(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// A hop is a proxy exactly when it has somewhere to forward to.
    pub fn is_proxy(&self) -> bool {
        self.next_hop.is_some()
    }

    pub fn next_hop(&self) -> Option<SocketAddr> {
        self.next_hop
    }

    pub fn counters(&self) -> HopCounters {
        self.counters
    }

    pub fn trace(&self) -> &TimeTrace {
        &self.trace
    }

    pub fn configure(&mut self, next_hop: Option<SocketAddr>) {
        self.next_hop = next_hop;
    }

    pub async fn run(&mut self, stop: &CancellationToken) {
        while let Some(Some(op)) = stop.run_until_cancelled(self.transport.receive()).await {
            self.trace.record("Server::poll : operation received");
            self.dispatch(op).await;
        }
        let HopCounters {
            replied,
            delegated,
            dropped,
        } = self.counters;
        log::info!("server stopping: {replied} replied, {delegated} delegated, {dropped} dropped");
    }

    async fn dispatch(&mut self, op: InboundOp) {
        let origin = op.origin();
        let request = match Request::decode(op.request()) {
            Ok(request) => request,
            Err(err) => {
                log::error!("dropping request from {origin}: {err}");
                self.counters.dropped += 1;
                op.abandon();
                return;
            }
        };
        let opcode = request.opcode();

        let result = match request {
            Request::ConfigServer { next_hop } => self.handle_config_server(op, next_hop).await,
            Request::Echo(echo) => self.handle_echo(op, echo).await,
            Request::EchoMultiLevel(echo) => self.handle_echo_multi_level(op, echo).await,
            Request::DumpTimeTrace => self.handle_dump_time_trace(op).await,
            Request::EnlistServer { .. } | Request::GetServerList => {
                log::error!("server does not serve {opcode:?}, dropping request from {origin}");
                self.counters.dropped += 1;
                op.abandon();
                Ok(())
            }
        };

        if let Err(err) = result {
            log::error!("{opcode:?} from {origin} failed: {err}");
            self.counters.dropped += 1;
        }
    }

    async fn handle_config_server(
        &mut self,
        op: InboundOp,
        next_hop: Option<SocketAddr>,
    ) -> Result<(), BenchError> {
        self.configure(next_hop);
        self.transport
            .reply(op, Response::ConfigServer.encode())
            .await?;
        match next_hop {
            Some(next_hop) => log::info!("Server configured as proxy to {next_hop}"),
            None => log::info!("Server configured"),
        }
        Ok(())
    }

    /// Nested topology: call the next hop, wait for it, then answer our own
    /// caller with the hop count from here to the end of the chain.
    async fn handle_echo(&mut self, op: InboundOp, request: EchoRequest) -> Result<(), BenchError> {
        self.trace.record("Server::handle_echo : request decoded");
        self.buffer.clear();
        self.buffer.extend_from_slice(&request.payload);

        let mut hop_count: u32 = 1;
        if let Some(next_hop) = self.next_hop {
            self.trace.record("Server::handle_echo : nested : START");
            let reply = self
                .transport
                .call(next_hop, Bytes::copy_from_slice(op.request()))
                .await?;
            self.trace.record("Server::handle_echo : nested : response received");

            match Response::decode(&reply.body)? {
                Response::Echo {
                    hop_count: downstream,
                    payload,
                } => {
                    if payload.len() != request.response_bytes as usize {
                        log::warn!(
                            "Expected {} bytes but only got {} bytes.",
                            request.response_bytes,
                            payload.len()
                        );
                    }
                    self.buffer.clear();
                    self.buffer.extend_from_slice(&payload);
                    hop_count = hop_count.saturating_add(downstream);
                }
                other => {
                    return Err(BenchError::UnexpectedResponse {
                        expected: Opcode::Echo,
                        got: other.opcode(),
                    })
                }
            }
        }

        let payload = self.fill_response(request.response_bytes)?;
        let response = Response::Echo { hop_count, payload }.encode();
        self.trace.record("Server::handle_echo : response encoded");
        self.transport.reply(op, response).await?;
        self.trace.record("Server::handle_echo : replied");
        self.counters.replied += 1;
        Ok(())
    }

    /// Tail delegation: a proxy hands the operation itself to the next hop and
    /// never replies; only the last hop answers the original caller.
    async fn handle_echo_multi_level(
        &mut self,
        op: InboundOp,
        request: EchoRequest,
    ) -> Result<(), BenchError> {
        self.trace.record("Server::handle_echo_multi_level : request decoded");
        if let Some(next_hop) = self.next_hop {
            self.transport.delegate(op, next_hop).await?;
            self.trace.record("Server::handle_echo_multi_level : delegated");
            self.counters.delegated += 1;
            return Ok(());
        }

        self.buffer.clear();
        self.buffer.extend_from_slice(&request.payload);
        let payload = self.fill_response(request.response_bytes)?;
        let response = Response::EchoMultiLevel { payload }.encode();
        self.transport.reply(op, response).await?;
        self.trace.record("Server::handle_echo_multi_level : replied");
        self.counters.replied += 1;
        Ok(())
    }

    async fn handle_dump_time_trace(&mut self, op: InboundOp) -> Result<(), BenchError> {
        match self.trace.dump() {
            Ok(Some(path)) => log::info!("time trace written to {}", path.display()),
            Ok(None) => {}
            Err(err) => log::error!("failed to write time trace: {err}"),
        }
        self.transport
            .reply(op, Response::DumpTimeTrace.encode())
            .await?;
        Ok(())
    }

    /// Response payload of `len` bytes taken from the scratch buffer, zero
    /// padded past whatever it currently holds.
    fn fill_response(&mut self, len: u32) -> Result<Bytes, BenchError> {
        let len = len as usize;
        if len > MAX_PAYLOAD {
            return Err(BenchError::PayloadTooLarge {
                field: "response bytes",
                size: len as u32,
                max: MAX_PAYLOAD,
            });
        }
        self.buffer.resize(len, 0);
        Ok(Bytes::copy_from_slice(&self.buffer[..len]))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{rpc, testing};

    fn echo(response_bytes: u32, sent: usize) -> EchoRequest {
        EchoRequest {
            response_bytes,
            payload: Bytes::from(vec![0xab; sent]),
        }
    }

    #[tokio::test]
    async fn nested_echo_counts_every_hop() {
        let hops = testing::spawn_hops(3).await;
        let client = testing::bind().await;
        testing::link(&client, &hops).await;

        let reply = client
            .call(hops[0].address, Request::Echo(echo(100, 100)).encode())
            .await
            .unwrap();
        match Response::decode(&reply.body).unwrap() {
            Response::Echo { hop_count, payload } => {
                assert_eq!(hop_count, 3);
                assert_eq!(payload.len(), 100);
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert_eq!(reply.from, hops[0].address);

        for hop in hops {
            let server = hop.stop().await;
            assert_eq!(server.counters().replied, 1);
            assert_eq!(server.counters().delegated, 0);
        }
    }

    #[tokio::test]
    async fn multilevel_echo_is_answered_by_last_hop() {
        let hops = testing::spawn_hops(3).await;
        let client = testing::bind().await;
        testing::link(&client, &hops).await;

        let reply = client
            .call(
                hops[0].address,
                Request::EchoMultiLevel(echo(100, 100)).encode(),
            )
            .await
            .unwrap();
        assert_eq!(reply.from, hops[2].address);
        match Response::decode(&reply.body).unwrap() {
            Response::EchoMultiLevel { payload } => assert_eq!(payload.len(), 100),
            other => panic!("unexpected response {other:?}"),
        }

        let mut servers = Vec::new();
        for hop in hops {
            servers.push(hop.stop().await);
        }
        for server in &servers[..2] {
            assert_eq!(server.counters().replied, 0);
            assert_eq!(server.counters().delegated, 1);
        }
        assert_eq!(servers[2].counters().replied, 1);
        assert_eq!(servers[2].counters().delegated, 0);
    }

    #[tokio::test]
    async fn response_size_follows_request_not_payload() {
        let hops = testing::spawn_hops(1).await;
        let client = testing::bind().await;
        testing::link(&client, &hops).await;

        let reply = client
            .call(hops[0].address, Request::Echo(echo(300, 10)).encode())
            .await
            .unwrap();
        match Response::decode(&reply.body).unwrap() {
            Response::Echo { hop_count, payload } => {
                assert_eq!(hop_count, 1);
                assert_eq!(payload.len(), 300);
                assert_eq!(&payload[..10], &[0xab; 10]);
                assert!(payload[10..].iter().all(|&b| b == 0));
            }
            other => panic!("unexpected response {other:?}"),
        }
        hops.into_iter().next().unwrap().stop().await;
    }

    #[tokio::test]
    async fn short_downstream_response_is_tolerated() {
        let hops = testing::spawn_hops(1).await;
        let mut downstream = testing::bind().await;
        let client = testing::bind().await;
        rpc::config_server(&client, hops[0].address, Some(downstream.local_addr()))
            .await
            .unwrap();

        let fake = tokio::spawn(async move {
            let op = downstream.receive().await.unwrap();
            let short = Response::Echo {
                hop_count: 4,
                payload: Bytes::from_static(&[1; 10]),
            };
            downstream.reply(op, short.encode()).await.unwrap();
            downstream
        });

        let reply = client
            .call(hops[0].address, Request::Echo(echo(50, 50)).encode())
            .await
            .unwrap();
        match Response::decode(&reply.body).unwrap() {
            Response::Echo { hop_count, payload } => {
                assert_eq!(hop_count, 5);
                assert_eq!(payload.len(), 50);
            }
            other => panic!("unexpected response {other:?}"),
        }
        fake.await.unwrap();
        let server = hops.into_iter().next().unwrap().stop().await;
        assert_eq!(server.counters().replied, 1);
    }

    #[tokio::test]
    async fn oversized_downstream_hop_count_saturates() {
        let hops = testing::spawn_hops(1).await;
        let mut downstream = testing::bind().await;
        let client = testing::bind().await;
        rpc::config_server(&client, hops[0].address, Some(downstream.local_addr()))
            .await
            .unwrap();

        let fake = tokio::spawn(async move {
            for _ in 0..2 {
                let op = downstream.receive().await.unwrap();
                let bogus = Response::Echo {
                    hop_count: u32::MAX,
                    payload: Bytes::from_static(&[1; 20]),
                };
                downstream.reply(op, bogus.encode()).await.unwrap();
            }
            downstream
        });

        // the hop keeps serving after the first bogus count
        for _ in 0..2 {
            let reply = client
                .call(hops[0].address, Request::Echo(echo(20, 20)).encode())
                .await
                .unwrap();
            match Response::decode(&reply.body).unwrap() {
                Response::Echo { hop_count, .. } => assert_eq!(hop_count, u32::MAX),
                other => panic!("unexpected response {other:?}"),
            }
        }
        fake.await.unwrap();
        let server = hops.into_iter().next().unwrap().stop().await;
        assert_eq!(server.counters().replied, 2);
    }

    #[tokio::test]
    async fn config_is_idempotent() {
        let hops = testing::spawn_hops(1).await;
        let client = testing::bind().await;
        let next: SocketAddr = "127.0.0.1:45678".parse().unwrap();
        for _ in 0..2 {
            rpc::config_server(&client, hops[0].address, Some(next))
                .await
                .unwrap();
        }
        let server = hops.into_iter().next().unwrap().stop().await;
        assert!(server.is_proxy());
        assert_eq!(server.next_hop(), Some(next));
    }

    #[tokio::test]
    async fn unknown_opcode_is_dropped_and_serving_continues() {
        let hops = testing::spawn_hops(1).await;
        let client = testing::bind().await;

        let op = client
            .send(hops[0].address, Bytes::from_static(&[99, 0]))
            .await
            .unwrap();
        rpc::config_server(&client, hops[0].address, None)
            .await
            .unwrap();
        let unanswered = tokio::time::timeout(Duration::from_millis(50), op.wait()).await;
        assert!(unanswered.is_err());

        let server = hops.into_iter().next().unwrap().stop().await;
        assert_eq!(server.counters().dropped, 1);
        assert!(!server.is_proxy());
    }

    #[tokio::test]
    async fn dump_time_trace_replies_and_clears() {
        let hops = testing::spawn_hops(1).await;
        let client = testing::bind().await;
        testing::link(&client, &hops).await;
        client
            .call(hops[0].address, Request::Echo(echo(8, 8)).encode())
            .await
            .unwrap();
        rpc::dump_time_trace(&client, hops[0].address).await.unwrap();

        let server = hops.into_iter().next().unwrap().stop().await;
        assert!(server.trace().is_empty());
    }
}
