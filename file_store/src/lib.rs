//! Storage backends and file handles for chunked uploads.
//!
//! A [`File`] is opened from an [`ObjectIdentity`] with an [`OpenMode`] and
//! unifies two very different targets:
//!
//! - the local filesystem, where chunks are positioned writes straight into
//!   the open file and may land in any order;
//! - object storage, which only accepts one ordered byte stream per object.
//!   Chunks go through an [`OrderedWriter`] that releases each one only when
//!   every byte before its offset has been released.
//!
//! Callers track every chunk with [`File::track`] and finish with
//! [`File::close`], which waits for all tracked chunks and then for the
//! backend to finalize the object.
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use file_store::{backend_for, BackendConfig, ObjectIdentity, OpenMode};
//!
//! # async fn example() -> Result<(), file_store::FileStoreError> {
//! let config = BackendConfig::Local { root: "/srv/files".into() };
//! let backend = backend_for(&config, file_store::DEFAULT_CONDUIT_CAPACITY).await?;
//! let identity = ObjectIdentity::from_path("my-files", "/docs/notes.txt", config)?;
//!
//! let file = backend.open(&identity, OpenMode::CreateWrite).await?;
//! let guard = file.track();
//! file.write_at(Bytes::from_static(b"This is a test"), 0).await?;
//! drop(guard);
//! file.close().await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod client;
mod conduit;
mod error;
mod file;
mod identity;
mod join_group;
mod local;
mod memory;
mod object_storage;
mod ordered_writer;
mod s3;

pub use backend::{backend_for, OpenMode, StorageBackend, DEFAULT_CONDUIT_CAPACITY};
pub use client::{CompletedPart, ObjectStorageClient};
pub use conduit::{conduit, ConduitReader, ConduitWriter, FileReader};
pub use error::{FileStoreError, FileStoreResult};
pub use file::{Completion, File, FileWriter};
pub use identity::{BackendConfig, ObjectIdentity, UploadOptions, PARTIAL_UPLOAD_SUFFIX};
pub use join_group::{InFlightGuard, JoinGroup};
pub use local::{LocalBackend, LocalWriter};
pub use memory::{ClientCall, FailPoint, InMemoryObjectClient};
pub use object_storage::ObjectStorageBackend;
pub use ordered_writer::OrderedWriter;
pub use s3::S3ObjectClient;
