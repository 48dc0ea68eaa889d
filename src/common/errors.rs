// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::result;

use thiserror::Error;

use crate::backoff::BackofferError;
use crate::region::RegionVerId;

/// An error originating from the RangeKV client or its dependencies.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty values are rejected on every write path.
    #[error("empty value is not supported")]
    EmptyValue,
    /// Client-side argument validation failure.
    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },
    /// Scan limit exceeds the maximum.
    #[error("limit {} exceeds max scan limit {}", limit, max_limit)]
    MaxScanLimitExceeded { limit: u32, max_limit: u32 },
    /// The operation requires the other atomic-mode setting. The only way to
    /// use `compare_and_swap` is a client with atomic mode enabled.
    #[error("the operation is not supported in the current mode, consider a client with or without atomic mode")]
    UnsupportedMode,
    /// The server returned a success envelope with no body for the command.
    #[error("response body is missing")]
    BodyMissing,
    /// A logical error string returned by the store, surfaced verbatim.
    #[error("kv error: {}", message)]
    KvError { message: String },
    /// The retry budget is exhausted or was cancelled.
    #[error("backoff: {0}")]
    Backoff(#[from] BackofferError),
    /// No leader is known for the region.
    #[error("leader of region {} is not found", region.id)]
    LeaderNotFound { region: RegionVerId },
    /// The placement directory knows no region covering the key.
    #[error("region is not found for key: {:?}", key)]
    RegionForKeyNotFound { key: Vec<u8> },
    /// The client has been closed.
    #[error("the client has been closed")]
    ClientClosed,
    /// Wraps a `std::io::Error`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Wraps a gRPC transport error.
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),
    /// Wraps a gRPC status.
    #[error("gRPC api error: {0}")]
    GrpcApi(#[from] tonic::Status),
    #[error("url error: {0}")]
    Url(#[from] tonic::codegen::http::uri::InvalidUri),
    /// Can't join tokio tasks.
    #[error("failed to join tokio tasks")]
    JoinError(#[from] tokio::task::JoinError),
    #[error("{}", message)]
    InternalError { message: String },
    #[error("{0}")]
    StringError(String),
}

/// A result holding an [`Error`](enum@Error).
pub type Result<T> = result::Result<T, Error>;

impl Error {
    /// Whether this is a client-side argument validation failure (no RPC was
    /// issued).
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            Error::EmptyValue
                | Error::InvalidArguments { .. }
                | Error::MaxScanLimitExceeded { .. }
                | Error::UnsupportedMode
        )
    }

    /// Whether the operation failed because its retry budget ran out.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(
            self,
            Error::Backoff(BackofferError::MaxSleepExceeded { .. })
        )
    }

    /// Whether the operation was cancelled while retrying or in flight.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Backoff(BackofferError::Canceled { .. }))
    }

    /// Transient transport/directory failures worth retrying under a budget.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Error::Grpc(_) | Error::GrpcApi(_))
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! internal_err {
    ($e:expr) => ({
        $crate::Error::InternalError {
            message: format!("[{}:{}]: {}", file!(), line!(),  $e)
        }
    });
    ($f:tt, $($arg:expr),+) => ({
        $crate::internal_err!(format!($f, $($arg),+))
    });
}
