//! Error taxonomy for the OSD core.
//!
//! Mirrors the table in the daemon's design notes: wire decode failures drop
//! the offending message and keep the connection; op-level failures never
//! become `Err` once inside the dispatcher (they are encoded into a per-op
//! `rval`); only codec and resource-exhaustion failures propagate out of the
//! request path.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OsdError {
    #[error("options error: {0}")]
    InvalidArgument(String),

    #[error("truncated message: {0}")]
    Truncated(String),

    #[error("corrupted message: {0}")]
    Corrupted(String),

    #[error("unsupported struct version: {0}")]
    UnsupportedVersion(String),

    #[error("unsupported opcode: {0}")]
    UnsupportedOp(u16),

    #[error("object not found")]
    NotFound,

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("bad address: {0}")]
    BadAddress(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("denc error: {0}")]
    Denc(#[from] denc::RadosError),

    #[error("messenger error: {0}")]
    Msgr2(#[from] msgr2::Error),

    #[error("monitor client error: {0}")]
    MonClient(#[from] monclient::MonClientError),
}

pub type Result<T> = std::result::Result<T, OsdError>;

/// The negative `errno`-style codes carried in a per-op or overall `rval`.
///
/// The wire format has no room for a typed error; every failure collapses to
/// one of these small integers, matching the rest of the RADOS protocol.
pub mod rval {
    pub const OK: i32 = 0;
    pub const ENOENT: i32 = -2;
    pub const ENOMEM: i32 = -12;
    pub const EFAULT: i32 = -14;
    pub const EOPNOTSUPP: i32 = -95;
    pub const ETIMEDOUT: i32 = -110;
}

impl OsdError {
    /// Maps an error onto the `rval` an op or a whole request reports on the wire.
    pub fn to_rval(&self) -> i32 {
        match self {
            OsdError::NotFound => rval::ENOENT,
            OsdError::OutOfMemory(_) => rval::ENOMEM,
            OsdError::BadAddress(_) => rval::EFAULT,
            OsdError::UnsupportedOp(_) => rval::EOPNOTSUPP,
            OsdError::Timeout(_) => rval::ETIMEDOUT,
            OsdError::Truncated(_) | OsdError::Corrupted(_) | OsdError::UnsupportedVersion(_) => {
                rval::EOPNOTSUPP
            }
            OsdError::Denc(_)
            | OsdError::Msgr2(_)
            | OsdError::MonClient(_)
            | OsdError::InvalidArgument(_) => rval::EFAULT,
        }
    }
}
