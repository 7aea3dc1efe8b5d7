//! Blocking request/response helpers for the control operations.

use std::net::SocketAddr;

use crate::{
    error::BenchError,
    transport::Transport,
    wire::{Opcode, Request, Response, ServerRecord},
};

pub async fn enlist_server(
    transport: &Transport,
    coordinator: SocketAddr,
) -> Result<u64, BenchError> {
    let request = Request::EnlistServer {
        address: transport.local_addr(),
    };
    match invoke(transport, coordinator, &request).await? {
        Response::EnlistServer { server_id } => Ok(server_id),
        other => Err(unexpected(Opcode::EnlistServer, &other)),
    }
}

/// Fetches every enlisted server, in enlistment order.
pub async fn get_server_list(
    transport: &Transport,
    coordinator: SocketAddr,
) -> Result<Vec<ServerRecord>, BenchError> {
    match invoke(transport, coordinator, &Request::GetServerList).await? {
        Response::GetServerList { servers } => Ok(servers),
        other => Err(unexpected(Opcode::GetServerList, &other)),
    }
}

pub async fn config_server(
    transport: &Transport,
    server: SocketAddr,
    next_hop: Option<SocketAddr>,
) -> Result<(), BenchError> {
    match invoke(transport, server, &Request::ConfigServer { next_hop }).await? {
        Response::ConfigServer => Ok(()),
        other => Err(unexpected(Opcode::ConfigServer, &other)),
    }
}

pub async fn dump_time_trace(transport: &Transport, server: SocketAddr) -> Result<(), BenchError> {
    match invoke(transport, server, &Request::DumpTimeTrace).await? {
        Response::DumpTimeTrace => Ok(()),
        other => Err(unexpected(Opcode::DumpTimeTrace, &other)),
    }
}

async fn invoke(
    transport: &Transport,
    dest: SocketAddr,
    request: &Request,
) -> Result<Response, BenchError> {
    let reply = transport.call(dest, request.encode()).await?;
    Ok(Response::decode(&reply.body)?)
}

fn unexpected(expected: Opcode, got: &Response) -> BenchError {
    BenchError::UnexpectedResponse {
        expected,
        got: got.opcode(),
    }
}
