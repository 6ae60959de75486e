pub mod handlers;

use crate::backend::BackendClient;
use crate::common::GatewayConfig;
use crate::server::handlers::GatewayHandler;
use crate::tftp::{self, Listener};
use anyhow::{Context, Result};
use std::sync::Arc;

/// TFTP front end for an HTTP object store.
///
/// Cheap to clone; clones share the listener state, so `shutdown` on any
/// clone stops `serve` on all of them.
#[derive(Clone)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    engine: tftp::Server<GatewayHandler>,
}

impl Gateway {
    /// Build the HTTP client and the engine. Does not touch the network.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let backend = Arc::new(BackendClient::new(&config)?);
        let handler = GatewayHandler::new(backend);
        let engine = tftp::Server::new(handler, config.transfer.engine());

        Ok(Self {
            config: Arc::new(config),
            engine,
        })
    }

    /// Gateway with default settings for `base_url`.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        Self::new(GatewayConfig::new(base_url))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn bind(&self, addr: &str) -> Result<Listener> {
        Listener::bind(addr)
            .await
            .with_context(|| format!("failed to bind TFTP listener on {}", addr))
    }

    /// Serve until `shutdown`; returns after in-flight sessions are done.
    pub async fn serve(&self, listener: Listener) -> Result<()> {
        tracing::info!(base_url = %self.config.base_url, "gateway serving");
        self.engine.serve(listener).await.context("TFTP listener failed")
    }

    pub async fn listen_and_serve(&self, addr: &str) -> Result<()> {
        let listener = self.bind(addr).await?;
        self.serve(listener).await
    }

    /// Stop accepting sessions and cancel running ones. Idempotent.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}
