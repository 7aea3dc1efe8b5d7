//! Fixed-layout binary structures exchanged between the coordinator, the hops
//! and the client.
//!
//! Every message starts with a little-endian `u16` opcode. There is no padding
//! and no length prefix other than the explicit `u32` byte counts of the echo
//! messages:
//!
//! ```text
//! EnlistServer    req: [op][address]                 resp: [op][server_id: u64]
//! GetServerList   req: [op]                          resp: [op][num: u32][num x (server_id: u64, address)]
//! ConfigServer    req: [op][forward: u8][address]    resp: [op]
//! Echo            req: [op][sent: u32][resp: u32][payload: sent]
//!                 resp: [op][hop_count: u32][resp: u32][payload: resp]
//! EchoMultiLevel  same as Echo, hop_count is padding
//! DumpTimeTrace   req: [op]                          resp: [op]
//! address:        [family: u8][ip: 16 bytes][port: u16]
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::WireError;

/// Largest echo payload a single message may carry.
pub const MAX_PAYLOAD: usize = 60 * 1024;

pub const OPCODE_SIZE: usize = 2;
pub const ADDRESS_SIZE: usize = 19;
pub const SERVER_RECORD_SIZE: usize = 8 + ADDRESS_SIZE;
pub const ECHO_HEADER_SIZE: usize = OPCODE_SIZE + 4 + 4;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

const UNSPECIFIED: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u16)]
pub enum Opcode {
    EnlistServer = 1,
    GetServerList = 2,
    ConfigServer = 3,
    Echo = 4,
    EchoMultiLevel = 5,
    DumpTimeTrace = 6,
}

impl TryFrom<u16> for Opcode {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::EnlistServer),
            2 => Ok(Self::GetServerList),
            3 => Ok(Self::ConfigServer),
            4 => Ok(Self::Echo),
            5 => Ok(Self::EchoMultiLevel),
            6 => Ok(Self::DumpTimeTrace),
            _ => Err(WireError::UnknownOpcode(value)),
        }
    }
}

/// One enlisted server as stored by the coordinator and listed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerRecord {
    pub server_id: u64,
    pub address: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoRequest {
    pub response_bytes: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    EnlistServer { address: SocketAddr },
    GetServerList,
    /// `next_hop` is `Some` exactly when the target should act as a proxy.
    ConfigServer { next_hop: Option<SocketAddr> },
    Echo(EchoRequest),
    EchoMultiLevel(EchoRequest),
    DumpTimeTrace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    EnlistServer { server_id: u64 },
    GetServerList { servers: Vec<ServerRecord> },
    ConfigServer,
    Echo { hop_count: u32, payload: Bytes },
    EchoMultiLevel { payload: Bytes },
    DumpTimeTrace,
}

impl EchoRequest {
    pub fn sent_bytes(&self) -> u32 {
        self.payload.len() as u32
    }

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.sent_bytes());
        buf.put_u32_le(self.response_bytes);
        buf.put_slice(&self.payload);
    }

    fn get(buf: &mut impl Buf) -> Result<Self, WireError> {
        ensure(&*buf, 8)?;
        let sent_bytes = buf.get_u32_le() as usize;
        let response_bytes = buf.get_u32_le();
        let payload = get_payload(buf, sent_bytes)?;
        Ok(Self {
            response_bytes,
            payload,
        })
    }
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::EnlistServer { .. } => Opcode::EnlistServer,
            Request::GetServerList => Opcode::GetServerList,
            Request::ConfigServer { .. } => Opcode::ConfigServer,
            Request::Echo(_) => Opcode::Echo,
            Request::EchoMultiLevel(_) => Opcode::EchoMultiLevel,
            Request::DumpTimeTrace => Opcode::DumpTimeTrace,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u16_le(self.opcode() as u16);
        match self {
            Request::EnlistServer { address } => put_address(&mut buf, *address),
            Request::GetServerList | Request::DumpTimeTrace => {}
            Request::ConfigServer { next_hop } => {
                buf.put_u8(next_hop.is_some() as u8);
                put_address(&mut buf, next_hop.unwrap_or(UNSPECIFIED));
            }
            Request::Echo(echo) | Request::EchoMultiLevel(echo) => echo.put(&mut buf),
        }
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        let request = match get_opcode(&mut buf)? {
            Opcode::EnlistServer => Request::EnlistServer {
                address: get_address(&mut buf)?,
            },
            Opcode::GetServerList => Request::GetServerList,
            Opcode::ConfigServer => {
                ensure(&buf, 1)?;
                let forward = buf.get_u8() != 0;
                let address = get_address(&mut buf)?;
                Request::ConfigServer {
                    next_hop: forward.then_some(address),
                }
            }
            Opcode::Echo => Request::Echo(EchoRequest::get(&mut buf)?),
            Opcode::EchoMultiLevel => Request::EchoMultiLevel(EchoRequest::get(&mut buf)?),
            Opcode::DumpTimeTrace => Request::DumpTimeTrace,
        };
        Ok(request)
    }

    fn encoded_len(&self) -> usize {
        OPCODE_SIZE
            + match self {
                Request::EnlistServer { .. } => ADDRESS_SIZE,
                Request::GetServerList | Request::DumpTimeTrace => 0,
                Request::ConfigServer { .. } => 1 + ADDRESS_SIZE,
                Request::Echo(echo) | Request::EchoMultiLevel(echo) => 8 + echo.payload.len(),
            }
    }
}

impl Response {
    pub fn opcode(&self) -> Opcode {
        match self {
            Response::EnlistServer { .. } => Opcode::EnlistServer,
            Response::GetServerList { .. } => Opcode::GetServerList,
            Response::ConfigServer => Opcode::ConfigServer,
            Response::Echo { .. } => Opcode::Echo,
            Response::EchoMultiLevel { .. } => Opcode::EchoMultiLevel,
            Response::DumpTimeTrace => Opcode::DumpTimeTrace,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u16_le(self.opcode() as u16);
        match self {
            Response::EnlistServer { server_id } => buf.put_u64_le(*server_id),
            Response::GetServerList { servers } => {
                buf.put_u32_le(servers.len() as u32);
                for server in servers {
                    buf.put_u64_le(server.server_id);
                    put_address(&mut buf, server.address);
                }
            }
            Response::ConfigServer | Response::DumpTimeTrace => {}
            Response::Echo { hop_count, payload } => {
                buf.put_u32_le(*hop_count);
                buf.put_u32_le(payload.len() as u32);
                buf.put_slice(payload);
            }
            Response::EchoMultiLevel { payload } => {
                buf.put_u32_le(0);
                buf.put_u32_le(payload.len() as u32);
                buf.put_slice(payload);
            }
        }
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        let response = match get_opcode(&mut buf)? {
            Opcode::EnlistServer => {
                ensure(&buf, 8)?;
                Response::EnlistServer {
                    server_id: buf.get_u64_le(),
                }
            }
            Opcode::GetServerList => {
                ensure(&buf, 4)?;
                let num = buf.get_u32_le() as usize;
                ensure(&buf, num * SERVER_RECORD_SIZE)?;
                let mut servers = Vec::with_capacity(num);
                for _ in 0..num {
                    let server_id = buf.get_u64_le();
                    let address = get_address(&mut buf)?;
                    servers.push(ServerRecord { server_id, address });
                }
                Response::GetServerList { servers }
            }
            Opcode::ConfigServer => Response::ConfigServer,
            Opcode::Echo => {
                ensure(&buf, 8)?;
                let hop_count = buf.get_u32_le();
                let response_bytes = buf.get_u32_le() as usize;
                Response::Echo {
                    hop_count,
                    payload: get_payload(&mut buf, response_bytes)?,
                }
            }
            Opcode::EchoMultiLevel => {
                ensure(&buf, 8)?;
                let _pad = buf.get_u32_le();
                let response_bytes = buf.get_u32_le() as usize;
                Response::EchoMultiLevel {
                    payload: get_payload(&mut buf, response_bytes)?,
                }
            }
            Opcode::DumpTimeTrace => Response::DumpTimeTrace,
        };
        Ok(response)
    }

    fn encoded_len(&self) -> usize {
        OPCODE_SIZE
            + match self {
                Response::EnlistServer { .. } => 8,
                Response::GetServerList { servers } => 4 + servers.len() * SERVER_RECORD_SIZE,
                Response::ConfigServer | Response::DumpTimeTrace => 0,
                Response::Echo { payload, .. } | Response::EchoMultiLevel { payload } => {
                    8 + payload.len()
                }
            }
    }
}

/// Writes `address` in its fixed 19-byte wire form.
pub fn put_address(buf: &mut impl BufMut, address: SocketAddr) {
    match address.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(FAMILY_V4);
            buf.put_slice(&ip.octets());
            buf.put_bytes(0, 12);
        }
        IpAddr::V6(ip) => {
            buf.put_u8(FAMILY_V6);
            buf.put_slice(&ip.octets());
        }
    }
    buf.put_u16_le(address.port());
}

pub fn get_address(buf: &mut impl Buf) -> Result<SocketAddr, WireError> {
    ensure(&*buf, ADDRESS_SIZE)?;
    let family = buf.get_u8();
    let mut octets = [0u8; 16];
    buf.copy_to_slice(&mut octets);
    let port = buf.get_u16_le();
    let ip = match family {
        FAMILY_V4 => IpAddr::from([octets[0], octets[1], octets[2], octets[3]]),
        FAMILY_V6 => IpAddr::from(octets),
        other => return Err(WireError::InvalidAddress(other)),
    };
    Ok(SocketAddr::new(ip, port))
}

fn get_opcode(buf: &mut impl Buf) -> Result<Opcode, WireError> {
    ensure(&*buf, OPCODE_SIZE)?;
    Opcode::try_from(buf.get_u16_le())
}

fn get_payload(buf: &mut impl Buf, len: usize) -> Result<Bytes, WireError> {
    if len > MAX_PAYLOAD {
        return Err(WireError::TooLarge(len, MAX_PAYLOAD));
    }
    ensure(&*buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

fn ensure(buf: &impl Buf, needed: usize) -> Result<(), WireError> {
    let remaining = buf.remaining();
    if remaining < needed {
        return Err(WireError::Truncated { needed, remaining });
    }
    Ok(())
}
