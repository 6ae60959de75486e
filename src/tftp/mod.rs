//! TFTP engine (RFC 1350) with option extension support (RFC 2347-2349).
//!
//! The server invokes a [`Handler`] once per accepted request, each on its
//! own task and its own UDP port. Handlers get a transfer object that runs
//! the block/acknowledge exchange; the handler's return value decides whether
//! the session ends normally or with an ERROR packet.

mod client;
mod error;
pub mod options;
pub mod packet;
mod server;
mod transfer;

pub use client::{Client, Download};
pub use error::{SessionError, TransferError};
pub use packet::ErrorCode;
pub use server::{Listener, Server};
pub use transfer::{IncomingTransfer, OutgoingTransfer};

use async_trait::async_trait;
use std::time::Duration;

/// Engine-side limits and timers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retransmission timeout, unless the client negotiates its own.
    pub timeout: Duration,
    /// Retransmissions before a session is given up.
    pub retries: u32,
    pub max_block_size: u16,
    /// Upper bound on the bytes buffered for one upload.
    pub max_transfer_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            retries: 5,
            max_block_size: options::MAX_BLOCK_SIZE,
            max_transfer_size: 64 * 1024 * 1024,
        }
    }
}

/// Callbacks for read (RRQ) and write (WRQ) sessions.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn read(
        &self,
        filename: &str,
        transfer: &mut OutgoingTransfer,
    ) -> Result<(), SessionError>;

    async fn write(
        &self,
        filename: &str,
        transfer: &mut IncomingTransfer,
    ) -> Result<(), SessionError>;
}
