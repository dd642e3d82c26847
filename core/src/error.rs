//! The crate-wide error taxonomy (spec §7), classified by recovery so the commit coordinator
//! knows what to retry and what to surface immediately.

use crate::Version;

/// Crate-wide result alias, mirroring `delta_kernel::DeltaResult`.
pub type IngestResult<T> = Result<T, IngestError>;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    /// A record does not conform to the resolved schema.
    #[error("record failed validation: {0}")]
    ValidationFailure(String),

    /// No registry entry exists for the table.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A schema evolution attempt was rejected.
    #[error("incompatible schema evolution for table {table}: {reason}")]
    IncompatibleSchema { table: String, reason: String },

    /// The write queue is at capacity.
    #[error("write queue is full")]
    QueueFull,

    /// The request's deadline elapsed before commit.
    #[error("write timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The caller cancelled the request before dispatch.
    #[error("write was cancelled")]
    Cancelled,

    /// The target log entry already existed at commit time; retried internally up to
    /// `max_retries` and only surfaced once the cap is exhausted.
    #[error("concurrent commit at version {0}")]
    ConcurrentCommit(Version),

    /// A schema was malformed beyond recovery (e.g. a self-referential record type).
    #[error("unsupported schema: {0}")]
    UnsupportedSchema(String),

    /// The metadata cache failed to (re)load a table's snapshot.
    #[error("metadata unavailable for table {0}: {1}")]
    MetadataUnavailable(String, String),

    /// A transient object-store failure (5xx, timeout): retried internally.
    #[error("transient object store error: {0}")]
    TransientIo(#[source] object_store::Error),

    /// A non-retryable object-store failure (auth, permission, malformed URI).
    #[error("object store error: {0}")]
    PermanentIo(#[source] object_store::Error),

    #[error("invalid table URI: {0}")]
    InvalidUri(#[from] url::ParseError),

    #[error("json (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal invariant was violated. Should never occur in correct code.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// A terminal error observed while committing a batch, replayed to a request handle with its
    /// original category preserved (see [`ErrorCategory`]). The original error's source doesn't
    /// survive the oneshot channel back to the caller, so only its rendered message does.
    #[error("{message}")]
    Categorized {
        category: ErrorCategory,
        message: String,
    },
}

/// How the commit coordinator's retry loop should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Terminal,
}

/// A coarse discriminant mirroring each `IngestError` variant, carried through
/// [`crate::write_queue::WriteOutcome::Failed`] so a terminal error's category survives the
/// oneshot channel crossing to every handle in the affected batch (spec §7: "Terminal errors are
/// surfaced to every request handle in the affected batch with the same error category"). A
/// plain category + message pair is used there instead of `IngestError` itself because several of
/// its variants wrap sources (`object_store::Error`, `serde_json::Error`) that aren't `Clone`,
/// while one failure must fan out to every completion in a coalesced batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ValidationFailure,
    UnknownTable,
    IncompatibleSchema,
    QueueFull,
    Timeout,
    Cancelled,
    ConcurrentCommit,
    UnsupportedSchema,
    MetadataUnavailable,
    TransientIo,
    PermanentIo,
    InvalidUri,
    Json,
    Arrow,
    Parquet,
    InvalidConfig,
    Internal,
}

impl IngestError {
    /// Classifies an error for the commit retry loop (spec §4.7 step 6 / §7).
    ///
    /// Grounded on `delta-rs`'s `TransactionError` split between `VersionAlreadyExists` (retry)
    /// and every other variant (terminal).
    pub fn retry_class(&self) -> RetryClass {
        match self {
            IngestError::ConcurrentCommit(_) | IngestError::TransientIo(_) => {
                RetryClass::Retryable
            }
            IngestError::Categorized { category, .. } => match category {
                ErrorCategory::ConcurrentCommit | ErrorCategory::TransientIo => {
                    RetryClass::Retryable
                }
                _ => RetryClass::Terminal,
            },
            _ => RetryClass::Terminal,
        }
    }

    /// The taxonomy category this error belongs to (spec §7), used to carry a terminal failure's
    /// classification across the write queue's completion channel.
    pub fn category(&self) -> ErrorCategory {
        match self {
            IngestError::ValidationFailure(_) => ErrorCategory::ValidationFailure,
            IngestError::UnknownTable(_) => ErrorCategory::UnknownTable,
            IngestError::IncompatibleSchema { .. } => ErrorCategory::IncompatibleSchema,
            IngestError::QueueFull => ErrorCategory::QueueFull,
            IngestError::Timeout(_) => ErrorCategory::Timeout,
            IngestError::Cancelled => ErrorCategory::Cancelled,
            IngestError::ConcurrentCommit(_) => ErrorCategory::ConcurrentCommit,
            IngestError::UnsupportedSchema(_) => ErrorCategory::UnsupportedSchema,
            IngestError::MetadataUnavailable(..) => ErrorCategory::MetadataUnavailable,
            IngestError::TransientIo(_) => ErrorCategory::TransientIo,
            IngestError::PermanentIo(_) => ErrorCategory::PermanentIo,
            IngestError::InvalidUri(_) => ErrorCategory::InvalidUri,
            IngestError::Json(_) => ErrorCategory::Json,
            IngestError::Arrow(_) => ErrorCategory::Arrow,
            IngestError::Parquet(_) => ErrorCategory::Parquet,
            IngestError::InvalidConfig(_) => ErrorCategory::InvalidConfig,
            IngestError::Internal(_) => ErrorCategory::Internal,
            IngestError::Categorized { category, .. } => *category,
        }
    }

    /// Wraps a raw `object_store::Error`, classifying it as transient or permanent.
    pub fn from_object_store(err: object_store::Error) -> Self {
        match &err {
            object_store::Error::NotFound { .. } => IngestError::PermanentIo(err),
            object_store::Error::AlreadyExists { .. } => {
                // surfaced distinctly by callers that know the version being probed; this
                // fallback only applies when the version isn't known at the call site.
                IngestError::TransientIo(err)
            }
            object_store::Error::Generic { .. } | object_store::Error::NotImplemented => {
                IngestError::TransientIo(err)
            }
            _ => IngestError::PermanentIo(err),
        }
    }
}
