//! Error types for file store operations.

/// Result type for file store operations.
pub type FileStoreResult<T> = Result<T, FileStoreError>;

/// Errors that can occur while opening, writing, reading or closing a
/// [`File`](crate::File).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FileStoreError {
    /// The file was opened without a writer (read mode).
    #[error("no writer configured for {identity}")]
    NoWriter { identity: String },

    /// The file was opened without a reader (write or append mode).
    #[error("no reader configured for {identity}")]
    NoReader { identity: String },

    #[error("object not found: {identity}")]
    NotFound { identity: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A call against the object storage service failed.
    #[error("object storage {operation} failed: {source:#}")]
    ObjectStorage {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The reading end of the conduit went away before the writer finished.
    #[error("conduit reader is gone")]
    ConduitClosed,

    /// An earlier write at `offset` failed, so no later offset can ever be
    /// accepted.
    #[error("ordered writer is poisoned by a failed write at offset {offset}")]
    WriterPoisoned { offset: u64 },

    /// The background finalize task did not report back.
    #[error("finalize for {identity} did not complete: {reason}")]
    Finalize { identity: String, reason: String },

    #[error("{failed} write(s) to {identity} failed")]
    IncompleteWrite { identity: String, failed: usize },

    #[error("{identity} is already closed")]
    AlreadyClosed { identity: String },

    #[error("invalid object identity '{path}': {reason}")]
    InvalidIdentity { path: String, reason: String },
}

impl FileStoreError {
    pub fn object_storage(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        FileStoreError::ObjectStorage {
            operation,
            source: source.into(),
        }
    }

    /// Maps an `io::Error` from opening `identity` to [`FileStoreError::NotFound`]
    /// when the file does not exist.
    pub(crate) fn from_open(identity: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            FileStoreError::NotFound {
                identity: identity.to_string(),
            }
        } else {
            FileStoreError::Io { source: err }
        }
    }
}

impl From<object_store::Error> for FileStoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => FileStoreError::NotFound { identity: path },
            other => FileStoreError::object_storage("request", other),
        }
    }
}
