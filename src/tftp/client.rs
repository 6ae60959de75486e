use super::error::TransferError;
use super::options::{accept_oack, RequestedOptions, DEFAULT_BLOCK_SIZE};
use super::packet::{Packet, Request, MAX_PACKET_SIZE};
use super::transfer::{receive_blocks, send_blocks, Conn};
use bytes::{Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Result of a read request.
#[derive(Debug, Clone)]
pub struct Download {
    pub data: Bytes,
    /// Size the server declared through `tsize` before sending any data.
    pub transfer_size: Option<u64>,
}

/// Octet-mode TFTP client. Always asks for `tsize`.
#[derive(Debug, Clone)]
pub struct Client {
    server: SocketAddr,
    timeout: Duration,
    retries: u32,
    block_size: Option<u16>,
}

impl Client {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            timeout: Duration::from_secs(2),
            retries: 5,
            block_size: None,
        }
    }

    pub fn with_block_size(mut self, block_size: u16) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub async fn get(&self, filename: &str) -> Result<Download, TransferError> {
        let options = RequestedOptions {
            block_size: self.block_size,
            timeout: None,
            transfer_size: Some(0),
        };
        let request = Packet::Rrq(Request::new(filename, options.to_pairs()));
        let (mut conn, first) = self.open(&request).await?;

        let mut buf = BytesMut::new();
        let (last, transfer_size) = match first {
            Packet::Oack(pairs) => {
                let (negotiated, transfer_size) = accept_oack(&pairs);
                if let Some(timeout) = negotiated.timeout {
                    conn.set_timeout(timeout);
                }
                let last = receive_blocks(
                    &mut conn,
                    Packet::Ack { block: 0 },
                    1,
                    negotiated.block_size,
                    u64::MAX,
                    &mut buf,
                )
                .await?;
                (last, transfer_size)
            }
            // Server ignored our options
            Packet::Data { block: 1, data } => {
                let block_size = DEFAULT_BLOCK_SIZE as usize;
                buf.extend_from_slice(&data);
                let last = if data.len() < block_size {
                    1
                } else {
                    receive_blocks(
                        &mut conn,
                        Packet::Ack { block: 1 },
                        2,
                        block_size,
                        u64::MAX,
                        &mut buf,
                    )
                    .await?
                };
                (last, None)
            }
            _ => return Err(TransferError::Protocol("unexpected reply to read request")),
        };

        conn.send(&Packet::Ack { block: last }).await?;
        Ok(Download {
            data: buf.freeze(),
            transfer_size,
        })
    }

    /// Upload `data`; returns the number of bytes sent once the server has
    /// acknowledged the final block.
    pub async fn put(&self, filename: &str, data: Bytes) -> Result<u64, TransferError> {
        let options = RequestedOptions {
            block_size: self.block_size,
            timeout: None,
            transfer_size: Some(data.len() as u64),
        };
        let request = Packet::Wrq(Request::new(filename, options.to_pairs()));
        let (mut conn, first) = self.open(&request).await?;

        let block_size = match first {
            Packet::Oack(pairs) => {
                let (negotiated, _) = accept_oack(&pairs);
                if let Some(timeout) = negotiated.timeout {
                    conn.set_timeout(timeout);
                }
                negotiated.block_size
            }
            Packet::Ack { block: 0 } => DEFAULT_BLOCK_SIZE as usize,
            _ => return Err(TransferError::Protocol("unexpected reply to write request")),
        };

        send_blocks(&mut conn, &data, block_size).await
    }

    /// Send the request to the well-known port and lock on to the TID of
    /// whoever answers first from the server's address.
    async fn open(&self, request: &Packet) -> Result<(Conn, Packet), TransferError> {
        let bind_addr: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        let raw = request.encode();
        socket.send_to(&raw, self.server).await?;

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let mut attempts = 0u32;
        let (len, tid) = loop {
            match timeout(self.timeout, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) if from.ip() == self.server.ip() => break (len, from),
                Ok(Ok((_, from))) => {
                    tracing::debug!(%from, "ignoring datagram from unexpected host");
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    attempts += 1;
                    if attempts > self.retries {
                        return Err(TransferError::Timeout);
                    }
                    socket.send_to(&raw, self.server).await?;
                }
            }
        };

        let first = Packet::decode(&buf[..len])?;
        if let Packet::Error { code, message } = first {
            return Err(TransferError::Peer { code, message });
        }
        socket.connect(tid).await?;
        Ok((Conn::new(socket, tid, self.timeout, self.retries), first))
    }
}
