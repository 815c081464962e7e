//! Error categories a client↔service request can fail with (spec §7).
//!
//! Drops the switch counts rather than returns — a frame lost to ring
//! overflow, an unknown MAC-table entry evicted, a GSO context rejected as
//! invalid — never become a variant here; they only move a statistics
//! counter. This enum is strictly for request/response failures.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IntNetError {
    #[error("handle does not refer to an open interface")]
    InvalidHandle,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("operation called out of order for this handle's state")]
    WrongOrder,
    #[error("out of memory")]
    NoMemory,
    #[error("value out of the accepted range")]
    OutOfRange,
    #[error("would block, try again")]
    TryAgain,
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("wait was interrupted")]
    Interrupted,
    #[error("the wait primitive was torn down while blocked")]
    SemDestroyed,
    #[error("requested open flags conflict with the network's policy")]
    IncompatibleFlags,
    #[error("requested trunk type conflicts with the network's existing trunk")]
    IncompatibleTrunk,
    #[error("not implemented")]
    NotImplemented,
    #[error("not supported on this configuration")]
    NotSupported,
}

pub type Result<T> = std::result::Result<T, IntNetError>;
