pub mod config;
pub mod errors;

pub use config::{BackendConfig, GatewayConfig, TransferConfig};
pub use errors::{ErrorKind, GatewayError, Result};
