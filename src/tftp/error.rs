use super::packet::{ErrorCode, PacketError};
use thiserror::Error;

/// Failure of the protocol exchange itself.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer aborted transfer: {code}: {message}")]
    Peer { code: ErrorCode, message: String },

    #[error("timed out waiting for peer")]
    Timeout,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("bad packet from peer: {0}")]
    Packet(#[from] PacketError),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("transfer of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

impl TransferError {
    /// Error code reported by the peer, if the peer aborted.
    pub fn peer_code(&self) -> Option<ErrorCode> {
        match self {
            TransferError::Peer { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// What a handler returns on failure: the code and message the engine
/// sends back in an ERROR packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
    /// Set when the peer is already gone or already knows; no ERROR is sent.
    pub silent: bool,
}

impl SessionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            silent: false,
        }
    }

    pub fn silent(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            silent: true,
            ..Self::new(code, message)
        }
    }
}

impl From<TransferError> for SessionError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Peer { code, message } => SessionError::silent(code, message),
            TransferError::Timeout | TransferError::Cancelled | TransferError::Io(_) => {
                SessionError::silent(ErrorCode::NotDefined, err.to_string())
            }
            TransferError::Packet(_) | TransferError::Protocol(_) => {
                SessionError::new(ErrorCode::IllegalOperation, err.to_string())
            }
            TransferError::TooLarge { .. } => SessionError::new(ErrorCode::DiskFull, err.to_string()),
        }
    }
}
