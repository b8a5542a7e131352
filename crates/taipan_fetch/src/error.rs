//! The error taxonomy of the fetch engine.

use std::path::PathBuf;

use thiserror::Error;

/// The transport-level result code of a transfer, independent of any
/// HTTP status. Mirrors the failure modes of the underlying network
/// stack.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum TransportCode {
    Ok,
    CouldntResolveHost,
    CouldntConnect,
    OperationTimedout,
    SslConnectError,
    SslCacertBadfile,
    SendError,
    RecvError,
    PartialFile,
    GotNothing,
    HttpReturnedError,
    WriteError,
    FilesizeExceeded,
    AbortedByCallback,
    OutOfMemory,
}

impl TransportCode {
    /// Whether a transfer that failed with this code may be retried.
    /// Hard local failures and deliberate aborts are not.
    pub fn is_recoverable(self) -> bool {
        !matches!(
            self,
            TransportCode::OutOfMemory
                | TransportCode::SslCacertBadfile
                | TransportCode::FilesizeExceeded
                | TransportCode::AbortedByCallback
                | TransportCode::OperationTimedout
                | TransportCode::WriteError
        )
    }

    /// Derives a transport code from a client error.
    pub fn from_reqwest(error: &reqwest::Error) -> TransportCode {
        if error.is_timeout() {
            TransportCode::OperationTimedout
        } else if error.is_connect() {
            TransportCode::CouldntConnect
        } else if error.is_body() || error.is_decode() {
            TransportCode::RecvError
        } else if error.is_request() {
            TransportCode::SendError
        } else if error.is_status() {
            TransportCode::HttpReturnedError
        } else {
            TransportCode::GotNothing
        }
    }
}

/// An error of a single transfer or of the cache layer around it.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The transfer failed after exhausting its retry budget.
    #[error("failed to download {name} ({message})")]
    Fetch {
        /// The name of the download target.
        name: String,
        /// The final HTTP status, when one was received.
        http_status: Option<u16>,
        /// The transport result code.
        transport_code: TransportCode,
        /// Human-readable detail, with secrets redacted.
        message: String,
    },

    /// The downloaded artifact does not match its expected digest or
    /// size. Never retried.
    #[error("integrity check of {name} failed: expected {expected}, got {actual}")]
    Integrity {
        /// The name of the download target.
        name: String,
        /// The expected digest or size.
        expected: String,
        /// The actual digest or size.
        actual: String,
    },

    /// A cached artifact or its sidecar is malformed. The caller purges
    /// the cache entry and retries the fetch once.
    #[error("corrupt cache entry at {path}: {reason}")]
    Cache {
        /// The offending cache path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// The user interrupted the operation.
    #[error("the operation was interrupted")]
    Interrupted,

    /// A local I/O failure.
    #[error("io error while downloading {name}")]
    Io {
        /// The name of the download target.
        name: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The finalize callback of a target rejected the result.
    #[error("finalizing {name} failed: {reason}")]
    Finalize {
        /// The name of the download target.
        name: String,
        /// Why the callback failed.
        reason: String,
    },
}

impl DownloadError {
    /// The target name the error is about, when it is about one.
    pub fn target_name(&self) -> Option<&str> {
        match self {
            DownloadError::Fetch { name, .. }
            | DownloadError::Integrity { name, .. }
            | DownloadError::Io { name, .. }
            | DownloadError::Finalize { name, .. } => Some(name),
            DownloadError::Cache { .. } | DownloadError::Interrupted => None,
        }
    }
}

/// The summary of a multi-transfer download: one failed transfer never
/// masks the others, and the transfers that did complete are part of
/// the summary.
#[derive(Debug, Error)]
#[error("{} of {} transfers failed", .errors.len(), .total)]
pub struct MultiDownloadError {
    /// The total number of transfers attempted.
    pub total: usize,
    /// The transfers that completed before or despite the failures.
    pub completed: Vec<crate::target::DownloadOutcome>,
    /// The per-transfer failures.
    pub errors: Vec<DownloadError>,
}

#[cfg(test)]
mod tests {
    use super::TransportCode;

    #[test]
    fn recoverability() {
        assert!(TransportCode::CouldntConnect.is_recoverable());
        assert!(TransportCode::RecvError.is_recoverable());
        assert!(!TransportCode::OperationTimedout.is_recoverable());
        assert!(!TransportCode::WriteError.is_recoverable());
        assert!(!TransportCode::SslCacertBadfile.is_recoverable());
        assert!(!TransportCode::OutOfMemory.is_recoverable());
    }
}
