//! Per-session transfer objects handed to a [`Handler`](super::Handler).

use super::error::TransferError;
use super::options::{negotiate, RequestedOptions};
use super::packet::{ErrorCode, Packet, MAX_PACKET_SIZE};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

/// Verdict of an `exchange` callback on a received packet.
pub(crate) enum Step<T> {
    Done(T),
    Ignore,
    /// Peer repeated its previous packet; our last one was probably lost.
    Resend,
}

/// A UDP socket connected to one peer TID, with retransmission state.
pub(crate) struct Conn {
    socket: UdpSocket,
    peer: SocketAddr,
    timeout: Duration,
    retries: u32,
    buf: Vec<u8>,
}

impl Conn {
    pub(crate) fn new(socket: UdpSocket, peer: SocketAddr, timeout: Duration, retries: u32) -> Self {
        Self {
            socket,
            peer,
            timeout,
            retries,
            buf: vec![0u8; MAX_PACKET_SIZE],
        }
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub(crate) async fn send(&self, packet: &Packet) -> Result<(), TransferError> {
        self.socket.send(&packet.encode()).await?;
        Ok(())
    }

    /// Send an ERROR packet. Best effort: the peer may already be gone.
    pub(crate) async fn abort(&self, code: ErrorCode, message: &str) {
        if let Err(err) = self.send(&Packet::error(code, message)).await {
            tracing::debug!(peer = %self.peer, error = %err, "failed to send error packet");
        }
    }

    /// Send `packet` and wait until `accept` takes a reply, retransmitting
    /// on timeout. Packets that `accept` ignores do not restart the timer.
    pub(crate) async fn exchange<T>(
        &mut self,
        packet: &Packet,
        mut accept: impl FnMut(Packet) -> Step<T>,
    ) -> Result<T, TransferError> {
        let raw = packet.encode();
        self.socket.send(&raw).await?;

        let mut attempts = 0u32;
        let mut deadline = Instant::now() + self.timeout;
        loop {
            let len = match timeout_at(deadline, self.socket.recv(&mut self.buf)).await {
                Ok(received) => received?,
                Err(_) => {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(TransferError::Timeout);
                    }
                    tracing::trace!(peer = %self.peer, attempt = attempts, "retransmitting");
                    self.socket.send(&raw).await?;
                    deadline = Instant::now() + self.timeout;
                    continue;
                }
            };

            let reply = match Packet::decode(&self.buf[..len]) {
                Ok(reply) => reply,
                Err(err) => {
                    self.abort(ErrorCode::IllegalOperation, &err.to_string()).await;
                    return Err(err.into());
                }
            };
            if let Packet::Error { code, message } = reply {
                return Err(TransferError::Peer { code, message });
            }

            match accept(reply) {
                Step::Done(value) => return Ok(value),
                Step::Ignore => {}
                Step::Resend => {
                    self.socket.send(&raw).await?;
                }
            }
        }
    }

    /// Keep re-acknowledging a retransmitted final block until the peer
    /// stays quiet for one timeout period.
    pub(crate) async fn dally(&mut self, final_block: u16) {
        let ack = Packet::Ack { block: final_block }.encode();
        let deadline = Instant::now() + self.timeout;
        while let Ok(Ok(len)) = timeout_at(deadline, self.socket.recv(&mut self.buf)).await {
            if let Ok(Packet::Data { block, .. }) = Packet::decode(&self.buf[..len]) {
                if block == final_block && self.socket.send(&ack).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Send `data` as DATA packets starting at block 1. A payload that is an
/// exact multiple of `block_size` ends with an empty block.
pub(crate) async fn send_blocks(
    conn: &mut Conn,
    data: &Bytes,
    block_size: usize,
) -> Result<u64, TransferError> {
    let mut block: u16 = 0;
    let mut offset = 0usize;
    loop {
        block = block.wrapping_add(1);
        let end = (offset + block_size).min(data.len());
        let chunk = data.slice(offset..end);
        let last = chunk.len() < block_size;

        let packet = Packet::Data { block, data: chunk };
        conn.exchange(&packet, |reply| match reply {
            Packet::Ack { block: acked } if acked == block => Step::Done(()),
            // Duplicate ACKs are not answered (Sorcerer's Apprentice)
            _ => Step::Ignore,
        })
        .await?;

        offset = end;
        if last {
            return Ok(offset as u64);
        }
    }
}

/// Collect DATA packets into `buf`, answering each with `reply` (the ACK of
/// the block before `expected`, or an OACK). Returns the final block number,
/// which has not been acknowledged yet.
pub(crate) async fn receive_blocks(
    conn: &mut Conn,
    first_reply: Packet,
    mut expected: u16,
    block_size: usize,
    limit: u64,
    buf: &mut BytesMut,
) -> Result<u16, TransferError> {
    let mut reply = first_reply;
    loop {
        let previous = expected.wrapping_sub(1);
        let data = conn
            .exchange(&reply, |packet| match packet {
                Packet::Data { block, data } if block == expected => Step::Done(data),
                Packet::Data { block, .. } if block == previous => Step::Resend,
                _ => Step::Ignore,
            })
            .await?;

        if data.len() > block_size {
            conn.abort(ErrorCode::IllegalOperation, "block larger than negotiated size")
                .await;
            return Err(TransferError::Protocol("block larger than negotiated size"));
        }
        let size = (buf.len() + data.len()) as u64;
        if size > limit {
            return Err(TransferError::TooLarge { size, limit });
        }
        buf.extend_from_slice(&data);

        if data.len() < block_size {
            return Ok(expected);
        }
        reply = Packet::Ack { block: expected };
        expected = expected.wrapping_add(1);
    }
}

/// Read session: the handler declares a size and pushes the payload.
pub struct OutgoingTransfer {
    conn: Conn,
    requested: RequestedOptions,
    max_block_size: u16,
    size: Option<u64>,
    started: bool,
    finished: bool,
}

impl OutgoingTransfer {
    pub(crate) fn new(conn: Conn, requested: RequestedOptions, max_block_size: u16) -> Self {
        Self {
            conn,
            requested,
            max_block_size,
            size: None,
            started: false,
            finished: false,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.peer()
    }

    /// Declare the total size up front so a `tsize` request can be answered.
    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    /// Run the whole DATA/ACK exchange for `data`. May only be called once.
    pub async fn send(&mut self, data: Bytes) -> Result<u64, TransferError> {
        if self.started {
            return Err(TransferError::Protocol("transfer already started"));
        }
        if self.size.is_some_and(|size| size != data.len() as u64) {
            return Err(TransferError::Protocol("payload does not match declared size"));
        }
        self.started = true;

        let (negotiated, oack) = negotiate(&self.requested, self.max_block_size, self.size);
        if let Some(timeout) = negotiated.timeout {
            self.conn.set_timeout(timeout);
        }
        if !oack.is_empty() {
            self.conn
                .exchange(&Packet::Oack(oack), |reply| match reply {
                    Packet::Ack { block: 0 } => Step::Done(()),
                    _ => Step::Ignore,
                })
                .await?;
        }

        let sent = send_blocks(&mut self.conn, &data, negotiated.block_size).await?;
        self.finished = true;
        Ok(sent)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn conn(&self) -> &Conn {
        &self.conn
    }
}

/// Write session: the handler drains the client's upload.
pub struct IncomingTransfer {
    conn: Conn,
    requested: RequestedOptions,
    max_block_size: u16,
    limit: u64,
    final_block: Option<u16>,
    started: bool,
}

impl IncomingTransfer {
    pub(crate) fn new(
        conn: Conn,
        requested: RequestedOptions,
        max_block_size: u16,
        limit: u64,
    ) -> Self {
        Self {
            conn,
            requested,
            max_block_size,
            limit,
            final_block: None,
            started: false,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.peer()
    }

    /// Size announced by the client through `tsize`, if any.
    pub fn transfer_size(&self) -> Option<u64> {
        self.requested.transfer_size
    }

    /// Receive the complete upload. The final block is acknowledged by the
    /// engine only after the handler returns successfully.
    pub async fn receive(&mut self) -> Result<Bytes, TransferError> {
        if self.started {
            return Err(TransferError::Protocol("transfer already started"));
        }
        self.started = true;

        if let Some(size) = self.requested.transfer_size {
            if size > self.limit {
                return Err(TransferError::TooLarge {
                    size,
                    limit: self.limit,
                });
            }
        }

        let (negotiated, oack) = negotiate(
            &self.requested,
            self.max_block_size,
            self.requested.transfer_size,
        );
        if let Some(timeout) = negotiated.timeout {
            self.conn.set_timeout(timeout);
        }
        let first = if oack.is_empty() {
            Packet::Ack { block: 0 }
        } else {
            Packet::Oack(oack)
        };

        let capacity = self.requested.transfer_size.unwrap_or(0).min(self.limit);
        let mut buf = BytesMut::with_capacity(usize::try_from(capacity).unwrap_or(0));
        let last = receive_blocks(
            &mut self.conn,
            first,
            1,
            negotiated.block_size,
            self.limit,
            &mut buf,
        )
        .await?;
        self.final_block = Some(last);
        Ok(buf.freeze())
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.final_block.is_some()
    }

    /// Acknowledge the final block, then linger for retransmissions of it.
    pub(crate) async fn acknowledge(&mut self) -> Result<(), TransferError> {
        let Some(block) = self.final_block else {
            return Err(TransferError::Protocol("upload was never received"));
        };
        self.conn.send(&Packet::Ack { block }).await?;
        self.conn.dally(block).await;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Conn {
        &self.conn
    }
}
