//! TFTP session handlers backed by the HTTP object store.

use crate::backend::{normalize_path, BackendClient};
use crate::common::GatewayError;
use crate::tftp::{Handler, IncomingTransfer, OutgoingTransfer, SessionError};
use async_trait::async_trait;
use std::sync::Arc;

/// Bridges each TFTP session to one backend call.
/// Holds no per-session state; the backend client is shared read-only.
#[derive(Clone)]
pub struct GatewayHandler {
    pub backend: Arc<BackendClient>, // Arc = shared pooled transport
}

impl GatewayHandler {
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Handler for GatewayHandler {
    /// RRQ: fetch the object, declare its size, then stream it.
    async fn read(
        &self,
        filename: &str,
        transfer: &mut OutgoingTransfer,
    ) -> Result<(), SessionError> {
        let addr = transfer.remote_addr().to_string();
        tracing::info!(from = %addr, filename, "RRQ");

        let path = normalize_path(filename);
        // Nothing reaches the client until the full body is buffered
        let payload = self.backend.fetch(&path, &addr).await?;

        transfer.set_size(payload.len() as u64);
        let sent = transfer.send(payload).await.map_err(GatewayError::from)?;

        tracing::info!(from = %addr, filename, bytes = sent, "RRQ complete");
        Ok(())
    }

    /// WRQ: drain the upload, then store it in one request.
    async fn write(
        &self,
        filename: &str,
        transfer: &mut IncomingTransfer,
    ) -> Result<(), SessionError> {
        let addr = transfer.remote_addr().to_string();
        tracing::info!(from = %addr, filename, declared = ?transfer.transfer_size(), "WRQ");

        // Content-Length must be exact, so buffer everything first
        let payload = transfer.receive().await.map_err(GatewayError::from)?;
        let received = payload.len();

        let path = normalize_path(filename);
        self.backend.store(&path, &addr, payload).await?;

        tracing::info!(from = %addr, filename, bytes = received, "WRQ complete");
        Ok(())
    }
}
