use crate::tftp::{ErrorCode, SessionError, TransferError};
use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Coarse failure category, derived from HTTP status ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Denied,
    Full,
    Transient,
    Internal,
}

/// Structured error types for TFTP error code mapping
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Denied(String),

    #[error("Storage full: {0}")]
    Full(String),

    #[error("Object of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Backend unavailable: {0}")]
    Transient(String),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// Catch-all for unexpected errors - logs full context internally
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Classify a backend response that was not a success.
    pub fn from_status(status: StatusCode, path: &str) -> Self {
        let context = format!("{} returned {}", path, status);
        match status.as_u16() {
            404 | 410 => GatewayError::NotFound(context),
            401 | 403 | 405 => GatewayError::Denied(context),
            413 | 507 => GatewayError::Full(context),
            408 | 429 | 500..=599 => GatewayError::Transient(context),
            _ => GatewayError::Internal(anyhow::anyhow!("unexpected backend status: {}", context)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::Denied(_) => ErrorKind::Denied,
            GatewayError::Full(_) | GatewayError::TooLarge { .. } => ErrorKind::Full,
            GatewayError::Transient(_) => ErrorKind::Transient,
            GatewayError::Transfer(TransferError::TooLarge { .. }) => ErrorKind::Full,
            GatewayError::Transfer(TransferError::Timeout | TransferError::Io(_)) => {
                ErrorKind::Transient
            }
            GatewayError::Transfer(_) | GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            GatewayError::Internal(anyhow::Error::new(err).context("invalid backend request"))
        } else {
            GatewayError::Transient(err.to_string())
        }
    }
}

impl From<GatewayError> for SessionError {
    fn from(err: GatewayError) -> Self {
        let code = match err.kind() {
            ErrorKind::NotFound => ErrorCode::FileNotFound,
            ErrorKind::Denied => ErrorCode::AccessViolation,
            ErrorKind::Full => ErrorCode::DiskFull,
            ErrorKind::Transient | ErrorKind::Internal => ErrorCode::NotDefined,
        };
        match err {
            // Protocol failures already know whether the peer should hear about them
            GatewayError::Transfer(inner) => SessionError::from(inner),
            GatewayError::Internal(ref inner) => {
                // Log full error server-side, send a generic message to the client
                tracing::error!(error = ?inner, "Internal gateway error");
                SessionError::new(code, "internal error")
            }
            GatewayError::Transient(ref message) => {
                tracing::warn!(%message, "backend unavailable");
                SessionError::new(code, "backend temporarily unavailable")
            }
            other => SessionError::new(code, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranges_map_to_kinds() {
        let kind = |code: u16| GatewayError::from_status(StatusCode::from_u16(code).unwrap(), "/x").kind();

        assert_eq!(kind(404), ErrorKind::NotFound);
        assert_eq!(kind(410), ErrorKind::NotFound);
        assert_eq!(kind(401), ErrorKind::Denied);
        assert_eq!(kind(403), ErrorKind::Denied);
        assert_eq!(kind(413), ErrorKind::Full);
        assert_eq!(kind(429), ErrorKind::Transient);
        assert_eq!(kind(500), ErrorKind::Transient);
        assert_eq!(kind(503), ErrorKind::Transient);
        assert_eq!(kind(400), ErrorKind::Internal);
        assert_eq!(kind(302), ErrorKind::Internal);
    }

    #[test]
    fn kinds_map_to_tftp_codes() {
        let code = |err: GatewayError| SessionError::from(err).code;

        assert_eq!(code(GatewayError::NotFound("a".into())), ErrorCode::FileNotFound);
        assert_eq!(code(GatewayError::Denied("a".into())), ErrorCode::AccessViolation);
        assert_eq!(
            code(GatewayError::TooLarge { size: 2, limit: 1 }),
            ErrorCode::DiskFull
        );
        assert_eq!(code(GatewayError::Transient("a".into())), ErrorCode::NotDefined);
    }

    #[test]
    fn internal_details_are_not_sent_to_client() {
        let err = GatewayError::Internal(anyhow::anyhow!("secret backend detail"));
        let session = SessionError::from(err);

        assert_eq!(session.code, ErrorCode::NotDefined);
        assert!(!session.message.contains("secret"));
        assert!(!session.silent);
    }

    #[test]
    fn transfer_failures_share_the_gateway_mapping() {
        let over_cap = GatewayError::from(TransferError::TooLarge { size: 10, limit: 5 });
        assert_eq!(over_cap.kind(), ErrorKind::Full);
        assert_eq!(SessionError::from(over_cap).code, ErrorCode::DiskFull);

        let timeout = GatewayError::from(TransferError::Timeout);
        assert!(timeout.is_transient());
        assert!(SessionError::from(timeout).silent);
    }

    #[test]
    fn peer_aborts_stay_silent() {
        let err = GatewayError::Transfer(TransferError::Peer {
            code: ErrorCode::NotDefined,
            message: "bye".into(),
        });
        assert!(SessionError::from(err).silent);
    }
}
