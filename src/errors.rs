//! Historian Error Hierarchy
//!
//! Defines the error types for the ingestion engine, categorized by the layer
//! that produced them: the remote watch transport, the local revision store,
//! configuration, and backfill.

use std::path::PathBuf;

use ::config::ConfigError;
use reqwest::StatusCode;

use crate::GapInterval;
use crate::Revision;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures, raised before any I/O
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Gaps that were detected but could not be repaired
    #[error(transparent)]
    Backfill(#[from] BackfillError),

    /// The stage of a command that failed, added by the command dispatcher
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Network layer
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    SignalReceiveFailed(String),

    /// An external program (pager, diff tool) exited unsuccessfully
    #[error("{program} exited with {status}")]
    ExternalTool {
        program: String,
        status: std::process::ExitStatus,
    },

    /// An external program could not be started or waited for
    #[error("failed to run {program}: {source}")]
    ExternalToolUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The files handed to the diff tool could not be written
    #[error("diff tree {path:?}: {source}")]
    DiffTree {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two keys map to the same file, or one key's file is another key's
    /// directory
    #[error("keys {key:?} and {other:?} map to clashing paths in the diff tree")]
    DiffPathCollision { key: String, other: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Request could not be sent or the connection dropped mid-stream
    #[error("Transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// Watch subscription rejected by the remote store
    #[error("status={status}: {body:?}")]
    UnexpectedStatus { status: StatusCode, body: String },

    /// Reading a line of the watch stream failed
    #[error("Stream read failed: {0}")]
    StreamRead(#[from] tokio_util::codec::LinesCodecError),

    /// A watch message was not valid JSON of the expected shape
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A byte field of a watch message was not valid base64
    #[error("Invalid base64 in field {field}: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// The gateway reported an error instead of a watch result
    #[error("Remote error (code {code}): {message}")]
    Remote { code: i64, message: String },

    /// The remote store cancelled the watch, e.g. because the start revision
    /// has been compacted
    #[error("Watch canceled by server (compact_revision={compact_revision}): {reason}")]
    WatchCanceled {
        compact_revision: Revision,
        reason: String,
    },

    /// The remote store closed the subscription without an error
    #[error("Watch stream closed by server")]
    StreamClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// SQLite engine failures
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Embedded sled database errors
    #[error("Embedded database error: {0}")]
    SledError(#[from] sled::Error),

    /// Multi-tree sled transaction aborted
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Serialization failures for persisted data
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    /// Error type for value conversion operations
    #[error("Value convert failed: {0}")]
    Convert(#[from] ConvertError),

    /// The store was written by a newer schema than this binary understands
    #[error("schema version mismatch: expected at most {expected}, got {got}")]
    SchemaVersionMismatch { expected: i64, got: i64 },

    /// A read-only open found a file that was never initialised by `watch`
    #[error("{0} is not an initialised history store")]
    Uninitialized(String),
}

/// Error type for value conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Invalid input length error
    ///
    /// This occurs when the input byte slice length doesn't match the required 8 bytes.
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),

    /// Generic conversion failure with detailed message
    #[error("conversion failure: {0}")]
    ConversionFailure(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// Gaps that are still missing after replay, or that could not be
    /// replayed at all
    #[error("unresolved revision gaps: {}", format_intervals(.0))]
    UnresolvedGaps(Vec<GapInterval>),
}

fn format_intervals(intervals: &[GapInterval]) -> String {
    intervals
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Attach the name of the failing stage.
    pub fn stage(
        self,
        stage: &'static str,
    ) -> Self {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }
}

/// Adds stage context to any result that converts into [`Error`].
pub trait StageExt<T> {
    fn stage(
        self,
        stage: &'static str,
    ) -> Result<T>;
}

impl<T, E> StageExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn stage(
        self,
        stage: &'static str,
    ) -> Result<T> {
        self.map_err(|e| e.into().stage(stage))
    }
}

// ============== Conversion Implementations ============== //
impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::System(SystemError::Storage(StorageError::Convert(e)))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::System(SystemError::Storage(StorageError::Sqlite(e)))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::System(SystemError::Storage(StorageError::SledError(e)))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::System(SystemError::Storage(StorageError::BincodeError(e)))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Storage(StorageError::IoError(e)))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::System(SystemError::Network(NetworkError::Transport(e)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::System(SystemError::Network(NetworkError::Decode(e)))
    }
}

impl From<tokio_util::codec::LinesCodecError> for Error {
    fn from(e: tokio_util::codec::LinesCodecError) -> Self {
        Error::System(SystemError::Network(NetworkError::StreamRead(e)))
    }
}
