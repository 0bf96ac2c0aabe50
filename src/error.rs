use thiserror::Error;

use crate::frame::ErrorCode;

/// Crate-wide error type, distinguishing the taxonomy from spec §7:
/// protocol-recoverable conditions are handled internally and never
/// surface as this type; everything here is either protocol-fatal for
/// the current operation, peer-reported, or setup-fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after exhausting retries")]
    Timeout,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid frame")]
    InvalidFrame,

    #[error("peer reported error: {0:?}")]
    PeerError(ErrorCode),

    #[error("insufficient space on receiver")]
    NoSpace,

    #[error("setup failed: {0}")]
    Setup(String),
}

pub type Result<T> = std::result::Result<T, Error>;
