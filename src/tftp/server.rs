//! Listener and per-session task management.

use super::error::SessionError;
use super::options::RequestedOptions;
use super::packet::{ErrorCode, Packet, Request, MAX_PACKET_SIZE};
use super::transfer::{Conn, IncomingTransfer, OutgoingTransfer};
use super::{EngineConfig, Handler};
use dashmap::DashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// A bound, not yet serving, listen socket.
pub struct Listener {
    socket: UdpSocket,
}

impl Listener {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

/// TFTP server dispatching each accepted request to a [`Handler`].
pub struct Server<H> {
    handler: Arc<H>,
    config: EngineConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    active: Arc<DashMap<SocketAddr, ()>>,
}

impl<H> Clone for Server<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            tracker: self.tracker.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl<H: Handler> Server<H> {
    pub fn new(handler: H, config: EngineConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Accept requests until [`shutdown`](Self::shutdown), then wait for the
    /// (cancelled) sessions to wind down.
    pub async fn serve(&self, listener: Listener) -> io::Result<()> {
        let socket = listener.socket;
        let local_ip = socket.local_addr()?.ip();
        tracing::info!(addr = %socket.local_addr()?, "TFTP listener started");

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            let (len, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(err) => {
                        // ICMP errors from earlier replies surface here on some platforms
                        tracing::debug!(error = %err, "recv on listen socket failed");
                        continue;
                    }
                },
            };

            match Packet::decode(&buf[..len]) {
                Ok(Packet::Rrq(request)) => self.accept(Direction::Read, request, peer, local_ip),
                Ok(Packet::Wrq(request)) => self.accept(Direction::Write, request, peer, local_ip),
                Ok(other) => {
                    tracing::debug!(%peer, packet = ?other, "unexpected packet on listen socket");
                    reply_error(&socket, peer, ErrorCode::UnknownTransferId, "no such transfer")
                        .await;
                }
                Err(err) => {
                    tracing::debug!(%peer, error = %err, "malformed request");
                    reply_error(&socket, peer, ErrorCode::IllegalOperation, &err.to_string()).await;
                }
            }
        }

        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            tracing::debug!(in_flight, "waiting for sessions to finish");
        }
        self.tracker.wait().await;
        tracing::info!("TFTP listener stopped");
        Ok(())
    }

    /// Stop accepting and cancel every running session. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn accept(&self, direction: Direction, request: Request, peer: SocketAddr, local_ip: IpAddr) {
        // A retransmitted request must not start a second session
        let guard = match ActiveSession::claim(&self.active, peer) {
            Some(guard) => guard,
            None => {
                tracing::debug!(%peer, "duplicate request ignored");
                return;
            }
        };

        let span = tracing::info_span!(
            "session",
            id = %uuid::Uuid::new_v4(),
            %peer,
            file = %request.filename,
        );
        let handler = Arc::clone(&self.handler);
        let config = self.config.clone();
        let cancel = self.shutdown.child_token();

        self.tracker.spawn(
            async move {
                let _guard = guard;
                if let Err(err) =
                    run_session(handler, config, cancel, direction, request, peer, local_ip).await
                {
                    tracing::warn!(error = %err, "session setup failed");
                }
            }
            .instrument(span),
        );
    }
}

/// Removes the peer from the active set when the session task ends.
struct ActiveSession {
    active: Arc<DashMap<SocketAddr, ()>>,
    peer: SocketAddr,
}

impl ActiveSession {
    fn claim(active: &Arc<DashMap<SocketAddr, ()>>, peer: SocketAddr) -> Option<Self> {
        match active.entry(peer) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    active: Arc::clone(active),
                    peer,
                })
            }
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.active.remove(&self.peer);
    }
}

async fn reply_error(socket: &UdpSocket, peer: SocketAddr, code: ErrorCode, message: &str) {
    let packet = Packet::error(code, message).encode();
    if let Err(err) = socket.send_to(&packet, peer).await {
        tracing::debug!(%peer, error = %err, "failed to send error reply");
    }
}

async fn run_session<H: Handler>(
    handler: Arc<H>,
    config: EngineConfig,
    cancel: CancellationToken,
    direction: Direction,
    request: Request,
    peer: SocketAddr,
    local_ip: IpAddr,
) -> io::Result<()> {
    // Each session gets its own TID (ephemeral port)
    let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
    socket.connect(peer).await?;
    let conn = Conn::new(socket, peer, config.timeout, config.retries);

    if !request.is_octet() {
        tracing::debug!(mode = %request.mode, "refusing transfer mode");
        conn.abort(
            ErrorCode::IllegalOperation,
            &format!("unsupported transfer mode {:?}", request.mode),
        )
        .await;
        return Ok(());
    }

    let requested = RequestedOptions::parse(&request.options);
    let filename = request.filename;

    match direction {
        Direction::Read => {
            let mut transfer = OutgoingTransfer::new(conn, requested, config.max_block_size);
            let result = tokio::select! {
                result = handler.read(&filename, &mut transfer) => result,
                _ = cancel.cancelled() => Err(SessionError::new(ErrorCode::NotDefined, "server shutting down")),
            };
            match result {
                Ok(()) if transfer.is_finished() => {}
                Ok(()) => {
                    tracing::warn!("read handler returned without sending data");
                    transfer
                        .conn()
                        .abort(ErrorCode::NotDefined, "no data produced")
                        .await;
                }
                Err(err) => fail(transfer.conn(), &err).await,
            }
        }
        Direction::Write => {
            let mut transfer =
                IncomingTransfer::new(conn, requested, config.max_block_size, config.max_transfer_size);
            let result = tokio::select! {
                result = handler.write(&filename, &mut transfer) => result,
                _ = cancel.cancelled() => Err(SessionError::new(ErrorCode::NotDefined, "server shutting down")),
            };
            match result {
                Ok(()) if transfer.is_finished() => {
                    if let Err(err) = transfer.acknowledge().await {
                        tracing::debug!(error = %err, "final acknowledgement failed");
                    }
                }
                Ok(()) => {
                    tracing::warn!("write handler returned without receiving data");
                    transfer
                        .conn()
                        .abort(ErrorCode::NotDefined, "upload not accepted")
                        .await;
                }
                Err(err) => fail(transfer.conn(), &err).await,
            }
        }
    }
    Ok(())
}

async fn fail(conn: &Conn, err: &SessionError) {
    tracing::debug!(code = %err.code, message = %err.message, silent = err.silent, "session failed");
    if !err.silent {
        conn.abort(err.code, &err.message).await;
    }
}
