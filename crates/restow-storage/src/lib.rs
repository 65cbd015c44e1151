//!
//! # Restow Storage
//!
//! The narrow object-storage capability consumed by the restow transfer engine. A [`Folder`]
//! is a view into one storage backend, addressable by relative object paths: it can check
//! existence, stream objects in and out, delete many objects at once and list everything
//! under a prefix.
//!
//! Backends provided here:
//! - [`FsFolder`]: a directory on the local filesystem;
//! - [`MemoryFolder`]: an in-process store, mostly useful for tests and tooling;
//! - [`RecordingFolder`]: a test-support wrapper that records every operation and can
//!   inject faults, including simulated eventual consistency.
//!
//! Folders are usually obtained by name from a [`StorageConfig`] registry, so the layers
//! above never care which backend they are talking to.

#![warn(
	clippy::all,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms
)]

mod config;
mod fs;
mod memory;
mod record;

pub use config::{BackendConfig, StorageConfig};
pub use fs::FsFolder;
pub use memory::{MemoryFolder, MemoryStorage};
pub use record::{FolderOp, RecordingFolder};

use std::{io, time::SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A readable object content stream.
pub type ObjectStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("object not found: {0:?}")]
	NotFound(String),
	#[error("i/o error on {path:?}: {source}")]
	Io {
		path: String,
		#[source]
		source: io::Error,
	},
	#[error("unknown storage: {0:?}")]
	UnknownStorage(String),
	#[error("storage backend error: {0}")]
	Backend(String),
}

/// Metadata of one stored object, as returned by recursive listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
	pub name: String,
	pub size: u64,
	pub last_modified: SystemTime,
}

/// One storage backend, addressed by object paths relative to the folder root.
#[async_trait]
pub trait Folder: Send + Sync {
	async fn exists(&self, path: &str) -> Result<bool, StorageError>;

	/// Opens the object for reading. Errors with [`StorageError::NotFound`] if it is absent.
	async fn read_object(&self, path: &str) -> Result<ObjectStream, StorageError>;

	/// Writes the object, silently overwriting any previous content.
	async fn put_object(&self, path: &str, content: ObjectStream) -> Result<(), StorageError>;

	/// Deletes the given objects. Paths that are already absent are not an error.
	async fn delete_objects(&self, paths: &[String]) -> Result<(), StorageError>;

	/// Lists every object whose path starts with `prefix`, recursively.
	async fn list_recursively(&self, prefix: &str) -> Result<Vec<Object>, StorageError>;
}

/// Wraps in-memory bytes into an [`ObjectStream`].
pub fn bytes_stream(bytes: impl Into<Vec<u8>>) -> ObjectStream {
	Box::new(io::Cursor::new(bytes.into()))
}

/// Reads a whole object into memory. Intended for small objects and tests.
pub async fn read_object_bytes(folder: &dyn Folder, path: &str) -> Result<Vec<u8>, StorageError> {
	let mut stream = folder.read_object(path).await?;
	let mut buf = Vec::new();
	stream
		.read_to_end(&mut buf)
		.await
		.map_err(|source| StorageError::Io {
			path: path.to_string(),
			source,
		})?;
	Ok(buf)
}

/// Leading slashes in prefixes are accepted for convenience and mean "everything".
pub(crate) fn normalize_prefix(prefix: &str) -> &str {
	prefix.trim_start_matches('/')
}
