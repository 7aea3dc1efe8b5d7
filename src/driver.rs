//! The benchmark client: times repeated chain operations.

use std::{net::SocketAddr, time::Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    chain::{self, HopRoute},
    error::{BenchError, WireError},
    rpc,
    stats::{self, TimeDist},
    transport::Transport,
    wire::{EchoRequest, Opcode, Request, Response, ServerRecord, MAX_PAYLOAD},
};

pub const DEFAULT_COUNT: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchConfig {
    /// Operations to time.
    pub count: usize,
    /// Servers in the chain.
    pub hops: usize,
    pub send_bytes: u32,
    pub receive_bytes: u32,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_COUNT,
            hops: 1,
            send_bytes: 100,
            receive_bytes: 100,
        }
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.hops == 0 {
            return Err(BenchError::EmptyChain);
        }
        for (field, size) in [
            ("send bytes", self.send_bytes),
            ("receive bytes", self.receive_bytes),
        ] {
            if size as usize > MAX_PAYLOAD {
                return Err(BenchError::PayloadTooLarge {
                    field,
                    size,
                    max: MAX_PAYLOAD,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Noop,
    ServerList,
    NestedRpc,
    RingRpc,
}

impl Scenario {
    pub const ALL: [(&'static str, Scenario); 4] = [
        ("noop", Scenario::Noop),
        ("serverList", Scenario::ServerList),
        ("nestedRpc", Scenario::NestedRpc),
        ("ringRpc", Scenario::RingRpc),
    ];

    /// First scenario, in table order, whose name contains `name`.
    pub fn find(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(scenario, _)| scenario.contains(name))
            .map(|&(_, scenario)| scenario)
    }
}

/// How an echo travels along the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Every hop calls the next and waits for it (ECHO).
    Nested,
    /// Every proxy hands the operation on, the last hop replies (ECHO_MULTILEVEL).
    Ring,
}

impl Topology {
    pub fn opcode(self) -> Opcode {
        match self {
            Topology::Nested => Opcode::Echo,
            Topology::Ring => Opcode::EchoMultiLevel,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Topology::Nested => "nested",
            Topology::Ring => "ring",
        }
    }
}

/// Data-integrity warnings seen during a run. The samples are kept.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatches {
    pub response_bytes: u64,
    pub hop_count: u64,
    /// Replies that could not be decoded or had the wrong opcode.
    pub malformed: u64,
    /// Operations whose call failed. No sample is taken for them.
    pub failed: u64,
}

impl Mismatches {
    pub fn total(&self) -> u64 {
        self.response_bytes + self.hop_count + self.malformed + self.failed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub description: String,
    pub topology: Topology,
    pub started_at: String,
    pub config: BenchConfig,
    pub chain: Vec<HopRoute>,
    pub samples: usize,
    pub interrupted: bool,
    pub dist: Option<TimeDist>,
    pub mismatches: Mismatches,
}

pub struct Client {
    transport: Transport,
    config: BenchConfig,
    servers: Vec<ServerRecord>,
}

impl Client {
    pub fn new(transport: Transport, config: BenchConfig, servers: Vec<ServerRecord>) -> Self {
        Self {
            transport,
            config,
            servers,
        }
    }

    /// Fetches the current directory from the coordinator.
    pub async fn connect(
        transport: Transport,
        coordinator: SocketAddr,
        config: BenchConfig,
    ) -> Result<Self, BenchError> {
        let servers = rpc::get_server_list(&transport, coordinator).await?;
        log::info!("Server List has {} entries.", servers.len());
        Ok(Self::new(transport, config, servers))
    }

    pub fn servers(&self) -> &[ServerRecord] {
        &self.servers
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Configures the chain and times `config.count` echo operations sent to
    /// its first hop. Stops early, keeping the samples so far, when `stop` is
    /// cancelled.
    pub async fn run_echo(
        &self,
        topology: Topology,
        stop: &CancellationToken,
    ) -> Result<BenchReport, BenchError> {
        self.config.validate()?;
        let chain = chain::configure_chain(&self.transport, &self.servers, self.config.hops).await?;
        Ok(self.time_echo(topology, chain, stop).await)
    }

    /// The timed loop over an already configured chain. A failed operation
    /// is logged and counted, the run carries on.
    async fn time_echo(
        &self,
        topology: Topology,
        chain: Vec<HopRoute>,
        stop: &CancellationToken,
    ) -> BenchReport {
        let first = chain[0].server.address;
        let started_at = chrono::Local::now().to_rfc3339();

        let echo = EchoRequest {
            response_bytes: self.config.receive_bytes,
            payload: Bytes::from(vec![0u8; self.config.send_bytes as usize]),
        };
        let request = match topology {
            Topology::Nested => Request::Echo(echo),
            Topology::Ring => Request::EchoMultiLevel(echo),
        }
        .encode();

        let mut samples = Vec::with_capacity(self.config.count);
        let mut mismatches = Mismatches::default();
        let mut interrupted = false;
        for _ in 0..self.config.count {
            if stop.is_cancelled() {
                interrupted = true;
                break;
            }
            let start = Instant::now();
            let Some(reply) = stop
                .run_until_cancelled(self.transport.call(first, request.clone()))
                .await
            else {
                interrupted = true;
                break;
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(err) => {
                    log::error!("{:?} to {first} failed: {err}", topology.opcode());
                    mismatches.failed += 1;
                    continue;
                }
            };
            let response = Response::decode(&reply.body);
            samples.push(start.elapsed());
            self.check(topology, response, &mut mismatches);
        }
        if interrupted {
            log::warn!("interrupted after {} operations", samples.len());
        }

        BenchReport {
            description: format!(
                "send {}B message, receive {}B message, {} with {} hops",
                self.config.send_bytes,
                self.config.receive_bytes,
                topology.name(),
                self.config.hops
            ),
            topology,
            started_at,
            config: self.config.clone(),
            chain,
            samples: samples.len(),
            interrupted,
            dist: stats::summarize(&samples),
            mismatches,
        }
    }

    /// Asks every hop of `chain` to write out its time trace.
    pub async fn dump_time_traces(&self, chain: &[HopRoute]) -> Result<(), BenchError> {
        for route in chain {
            rpc::dump_time_trace(&self.transport, route.server.address).await?;
        }
        Ok(())
    }

    fn check(
        &self,
        topology: Topology,
        response: Result<Response, WireError>,
        mismatches: &mut Mismatches,
    ) {
        let (payload, hop_count) = match (topology, response) {
            (Topology::Nested, Ok(Response::Echo { hop_count, payload })) => {
                (payload, Some(hop_count))
            }
            (Topology::Ring, Ok(Response::EchoMultiLevel { payload })) => (payload, None),
            (_, Ok(other)) => {
                log::error!(
                    "expected a {:?} response, got {:?}",
                    topology.opcode(),
                    other.opcode()
                );
                mismatches.malformed += 1;
                return;
            }
            (_, Err(err)) => {
                log::error!("malformed response: {err}");
                mismatches.malformed += 1;
                return;
            }
        };

        if payload.len() != self.config.receive_bytes as usize {
            log::warn!(
                "Expected {} bytes but got {} bytes.",
                self.config.receive_bytes,
                payload.len()
            );
            mismatches.response_bytes += 1;
        }
        if let Some(hop_count) = hop_count {
            if hop_count as usize != self.config.hops {
                log::warn!(
                    "Expected {} hops but got {hop_count} hops.",
                    self.config.hops
                );
                mismatches.hop_count += 1;
            }
        }
    }
}
