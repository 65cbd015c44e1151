//! Local-filesystem storage backend.

use std::{
	io,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{normalize_prefix, Folder, Object, ObjectStream, StorageError};

/// A folder rooted at a local directory. Object paths use `/` separators and are
/// resolved relative to the root; paths escaping the root are rejected.
#[derive(Debug, Clone)]
pub struct FsFolder {
	root: PathBuf,
}

impl FsFolder {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
		let path = normalize_prefix(path);
		if path.split('/').any(|segment| segment == "..") {
			return Err(StorageError::Backend(format!(
				"object path escapes the storage root: {path:?}"
			)));
		}
		Ok(self.root.join(path))
	}

	fn relative_name(&self, path: &Path) -> String {
		path.strip_prefix(&self.root)
			.unwrap_or(path)
			.to_string_lossy()
			.replace(std::path::MAIN_SEPARATOR, "/")
	}
}

fn io_err(path: &str, source: io::Error) -> StorageError {
	StorageError::Io {
		path: path.to_string(),
		source,
	}
}

#[async_trait]
impl Folder for FsFolder {
	async fn exists(&self, path: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.resolve(path)?)
			.await
			.map_err(|e| io_err(path, e))
	}

	async fn read_object(&self, path: &str) -> Result<ObjectStream, StorageError> {
		match fs::File::open(self.resolve(path)?).await {
			Ok(file) => Ok(Box::new(file)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				Err(StorageError::NotFound(path.to_string()))
			}
			Err(e) => Err(io_err(path, e)),
		}
	}

	async fn put_object(&self, path: &str, mut content: ObjectStream) -> Result<(), StorageError> {
		let full_path = self.resolve(path)?;
		if let Some(parent) = full_path.parent() {
			fs::create_dir_all(parent).await.map_err(|e| io_err(path, e))?;
		}

		let mut file = fs::File::create(&full_path)
			.await
			.map_err(|e| io_err(path, e))?;
		tokio::io::copy(&mut content, &mut file)
			.await
			.map_err(|e| io_err(path, e))?;
		tokio::io::AsyncWriteExt::flush(&mut file)
			.await
			.map_err(|e| io_err(path, e))
	}

	async fn delete_objects(&self, paths: &[String]) -> Result<(), StorageError> {
		for path in paths {
			match fs::remove_file(self.resolve(path)?).await {
				Ok(()) => {}
				// Deleting an already-absent object is not an error.
				Err(e) if e.kind() == io::ErrorKind::NotFound => {
					debug!("Skipped deleting a nonexistent object: {path:?}");
				}
				Err(e) => return Err(io_err(path, e)),
			}
		}
		Ok(())
	}

	async fn list_recursively(&self, prefix: &str) -> Result<Vec<Object>, StorageError> {
		let prefix = normalize_prefix(prefix).to_string();
		let mut objects = Vec::new();
		let mut pending = vec![self.root.clone()];

		while let Some(dir) = pending.pop() {
			let mut entries = match fs::read_dir(&dir).await {
				Ok(entries) => entries,
				Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
				Err(e) => return Err(io_err(&self.relative_name(&dir), e)),
			};

			while let Some(entry) = entries
				.next_entry()
				.await
				.map_err(|e| io_err(&self.relative_name(&dir), e))?
			{
				let entry_path = entry.path();
				let name = self.relative_name(&entry_path);
				let metadata = entry
					.metadata()
					.await
					.map_err(|e| io_err(&name, e))?;

				if metadata.is_dir() {
					pending.push(entry_path);
				} else if name.starts_with(&prefix) {
					objects.push(Object {
						last_modified: metadata.modified().map_err(|e| io_err(&name, e))?,
						name,
						size: metadata.len(),
					});
				}
			}
		}

		Ok(objects)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{bytes_stream, read_object_bytes};

	#[tokio::test]
	async fn round_trips_objects_through_a_directory() {
		let dir = tempfile::tempdir().unwrap();
		let folder = FsFolder::new(dir.path());

		folder
			.put_object("backups/b1/data", bytes_stream(b"payload".to_vec()))
			.await
			.unwrap();

		assert!(folder.exists("backups/b1/data").await.unwrap());
		assert_eq!(
			read_object_bytes(&folder, "backups/b1/data").await.unwrap(),
			b"payload"
		);

		let listed = folder.list_recursively("backups/").await.unwrap();
		assert_eq!(listed.len(), 1);
		assert_eq!(listed[0].name, "backups/b1/data");
		assert_eq!(listed[0].size, 7);

		folder
			.delete_objects(&["backups/b1/data".to_string()])
			.await
			.unwrap();
		assert!(!folder.exists("backups/b1/data").await.unwrap());
	}

	#[tokio::test]
	async fn deleting_absent_objects_is_fine() {
		let dir = tempfile::tempdir().unwrap();
		let folder = FsFolder::new(dir.path());
		folder
			.delete_objects(&["never/was/here".to_string()])
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn rejects_paths_escaping_the_root() {
		let dir = tempfile::tempdir().unwrap();
		let folder = FsFolder::new(dir.path());
		let err = folder.exists("../outside").await.err().unwrap();
		assert!(matches!(err, StorageError::Backend(_)));
	}

	#[tokio::test]
	async fn listing_a_missing_root_is_empty() {
		let folder = FsFolder::new("/definitely/not/a/real/dir");
		assert!(folder.list_recursively("").await.unwrap().is_empty());
	}
}
