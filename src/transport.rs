//! Datagram transport the benchmark runs over.
//!
//! Each UDP datagram carries one frame:
//!
//! ```text
//! [kind: u8][op_id: u64][origin: address][body]
//! ```
//!
//! A request frame names the caller waiting for the reply in `origin`. When an
//! inbound operation is delegated the frame is re-sent unchanged to the next
//! server, so whoever finally replies answers the original caller directly.
//!
//! A background reader task moves datagrams off the socket: replies are
//! routed to the pending outbound operation with the same id, requests are
//! queued for [`Transport::receive`] in arrival order.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{TransportError, WireError},
    wire::{get_address, put_address, ADDRESS_SIZE},
};

pub const MAX_DATAGRAM: usize = 65_507;
pub const FRAME_HEADER_SIZE: usize = 1 + 8 + ADDRESS_SIZE;

const KIND_REQUEST: u8 = 1;
const KIND_REPLY: u8 = 2;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Request,
    Reply,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    op_id: u64,
    origin: SocketAddr,
    body: Bytes,
}

impl Frame {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.body.len());
        buf.put_u8(match self.kind {
            FrameKind::Request => KIND_REQUEST,
            FrameKind::Reply => KIND_REPLY,
        });
        buf.put_u64_le(self.op_id);
        put_address(&mut buf, self.origin);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    fn decode(data: Bytes) -> Result<Self, TransportError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: FRAME_HEADER_SIZE,
                remaining: data.len(),
            }
            .into());
        }
        let mut header = &data[..FRAME_HEADER_SIZE];
        let kind = match header.get_u8() {
            KIND_REQUEST => FrameKind::Request,
            KIND_REPLY => FrameKind::Reply,
            other => return Err(TransportError::FrameKind(other)),
        };
        let op_id = header.get_u64_le();
        let origin = get_address(&mut header)?;
        Ok(Self {
            kind,
            op_id,
            origin,
            body: data.slice(FRAME_HEADER_SIZE..),
        })
    }
}

/// A completed outbound operation.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The server that actually sent the reply.
    pub from: SocketAddr,
    pub body: Bytes,
}

/// An inbound operation waiting to be answered.
///
/// It is consumed by exactly one of [`Transport::reply`],
/// [`Transport::delegate`] or [`InboundOp::abandon`].
#[derive(Debug)]
pub struct InboundOp {
    id: u64,
    origin: SocketAddr,
    request: Bytes,
}

impl InboundOp {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The caller that will receive the reply.
    pub fn origin(&self) -> SocketAddr {
        self.origin
    }

    pub fn request(&self) -> &[u8] {
        &self.request
    }

    /// Drops the operation without replying. The caller is left waiting.
    pub fn abandon(self) {
        log::debug!("abandoned operation {} from {}", self.id, self.origin);
    }
}

/// An outbound operation that has been sent and not yet answered.
#[derive(Debug)]
pub struct RemoteOp {
    id: u64,
    rx: oneshot::Receiver<Reply>,
}

impl RemoteOp {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the reply. There is no timeout.
    pub async fn wait(self) -> Result<Reply, TransportError> {
        self.rx.await.map_err(|_| TransportError::Abandoned(self.id))
    }
}

pub struct Transport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    next_op_id: AtomicU64,
    pending: Pending,
    inbound: mpsc::UnboundedReceiver<InboundOp>,
    stop: CancellationToken,
}

impl Transport {
    /// Binds `addr` and starts the reader task.
    ///
    /// The bound address is also what replies are sent back to, so it has to
    /// be reachable by peers (not `0.0.0.0`).
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let pending = Pending::default();
        let (tx_inbound, inbound) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let reader = Self::read_loop(socket.clone(), pending.clone(), tx_inbound);
        let reader_stop = stop.clone();
        tokio::spawn(async move {
            reader_stop.run_until_cancelled(reader).await;
        });

        log::debug!("transport bound to {local_addr}");
        Ok(Self {
            socket,
            local_addr,
            next_op_id: AtomicU64::new(1),
            pending,
            inbound,
            stop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts an outbound operation to `dest`.
    pub async fn send(&self, dest: SocketAddr, body: Bytes) -> Result<RemoteOp, TransportError> {
        let id = self.next_op_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        let frame = Frame {
            kind: FrameKind::Request,
            op_id: id,
            origin: self.local_addr,
            body,
        };
        if let Err(err) = self.socket.send_to(&frame.encode(), dest).await {
            self.pending().remove(&id);
            return Err(err.into());
        }
        log::trace!("sent operation {id} to {dest}");
        Ok(RemoteOp { id, rx })
    }

    /// Sends a request and waits for its reply.
    pub async fn call(&self, dest: SocketAddr, body: Bytes) -> Result<Reply, TransportError> {
        self.send(dest, body).await?.wait().await
    }

    /// Next inbound request, in arrival order.
    pub async fn receive(&mut self) -> Option<InboundOp> {
        self.inbound.recv().await
    }

    /// Answers `op` by sending `body` to its origin.
    pub async fn reply(&self, op: InboundOp, body: Bytes) -> Result<(), TransportError> {
        let frame = Frame {
            kind: FrameKind::Reply,
            op_id: op.id,
            origin: self.local_addr,
            body,
        };
        self.socket.send_to(&frame.encode(), op.origin).await?;
        log::trace!("replied to operation {} from {}", op.id, op.origin);
        Ok(())
    }

    /// Hands `op` to `dest` without replying. The request, the operation id
    /// and the origin are kept, so `dest` (or whoever it delegates to) replies
    /// straight to the original caller.
    pub async fn delegate(&self, op: InboundOp, dest: SocketAddr) -> Result<(), TransportError> {
        let frame = Frame {
            kind: FrameKind::Request,
            op_id: op.id,
            origin: op.origin,
            body: op.request,
        };
        self.socket.send_to(&frame.encode(), dest).await?;
        log::trace!("delegated operation {} from {} to {dest}", op.id, op.origin);
        Ok(())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn read_loop(
        socket: Arc<UdpSocket>,
        pending: Pending,
        tx_inbound: mpsc::UnboundedSender<InboundOp>,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    log::warn!("receive failed: {err}");
                    continue;
                }
            };
            let frame = match Frame::decode(Bytes::copy_from_slice(&buf[..len])) {
                Ok(frame) => frame,
                Err(err) => {
                    log::error!("dropping datagram from {peer}: {err}");
                    continue;
                }
            };

            match frame.kind {
                FrameKind::Reply => {
                    let waiter = pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&frame.op_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(Reply {
                                from: peer,
                                body: frame.body,
                            });
                        }
                        None => log::warn!("reply to unknown operation {} from {peer}", frame.op_id),
                    }
                }
                FrameKind::Request => {
                    let op = InboundOp {
                        id: frame.op_id,
                        origin: frame.origin,
                        request: frame.body,
                    };
                    if tx_inbound.send(op).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn bind() -> Transport {
        Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn call_and_reply() {
        let client = bind().await;
        let mut server = bind().await;
        let server_addr = server.local_addr();

        let responder = tokio::spawn(async move {
            let op = server.receive().await.unwrap();
            let mut body = op.request().to_vec();
            body.reverse();
            server.reply(op, Bytes::from(body)).await.unwrap();
            server
        });

        let reply = client
            .call(server_addr, Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(&reply.body[..], b"gnip");
        assert_eq!(reply.from, server_addr);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn delegated_operation_replies_from_last_server() {
        let client = bind().await;
        let mut middle = bind().await;
        let mut last = bind().await;
        let middle_addr = middle.local_addr();
        let last_addr = last.local_addr();

        let relay = tokio::spawn(async move {
            let op = middle.receive().await.unwrap();
            middle.delegate(op, last_addr).await.unwrap();
            middle
        });
        let responder = tokio::spawn(async move {
            let op = last.receive().await.unwrap();
            let body = Bytes::copy_from_slice(op.request());
            last.reply(op, body).await.unwrap();
            last
        });

        let op = client
            .send(middle_addr, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let reply = op.wait().await.unwrap();
        assert_eq!(reply.from, last_addr);
        assert_eq!(&reply.body[..], b"hello");

        let mut middle = relay.await.unwrap();
        responder.await.unwrap();
        // the middle server never saw anything else
        let nothing = tokio::time::timeout(Duration::from_millis(50), middle.receive()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn requests_are_received_in_order() {
        let client = bind().await;
        let mut server = bind().await;
        for i in 0..5u8 {
            client.send(server.local_addr(), Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0..5u8 {
            let op = server.receive().await.unwrap();
            assert_eq!(op.request(), &[i]);
            assert_eq!(op.origin(), client.local_addr());
        }
    }

    #[test]
    fn rejects_unknown_frame_kind() {
        let mut data = vec![9u8];
        data.extend_from_slice(&[0; FRAME_HEADER_SIZE - 1]);
        assert!(matches!(
            Frame::decode(Bytes::from(data)),
            Err(TransportError::FrameKind(9))
        ));
    }

    #[test]
    fn rejects_short_frame() {
        assert!(matches!(
            Frame::decode(Bytes::from_static(&[1, 0, 0])),
            Err(TransportError::Frame(WireError::Truncated { .. }))
        ));
    }
}
