pub mod backend;
pub mod common;
pub mod server;
pub mod tftp;

pub use common::{GatewayConfig, GatewayError};
pub use server::Gateway;
