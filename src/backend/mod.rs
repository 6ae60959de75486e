//! HTTP object store access.

pub mod client;
pub mod path;

pub use client::{BackendClient, RetryPolicy, X_FORWARDED_FOR};
pub use path::normalize_path;
