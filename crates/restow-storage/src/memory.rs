//! In-process storage backend.
//!
//! A [`MemoryStorage`] holds the object map; several [`MemoryFolder`]s can share one
//! storage under different roots, which is how tests get a "source" and a "target"
//! side in a single process.

use std::{collections::BTreeMap, sync::Arc, time::SystemTime};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{bytes_stream, normalize_prefix, Folder, Object, ObjectStream, StorageError};

#[derive(Debug, Clone)]
struct StoredObject {
	data: Vec<u8>,
	last_modified: SystemTime,
}

/// Shared object map backing one or more [`MemoryFolder`]s.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
	objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
}

impl MemoryStorage {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}
}

/// A view into a [`MemoryStorage`] under a fixed root prefix.
#[derive(Debug, Clone)]
pub struct MemoryFolder {
	root: String,
	storage: MemoryStorage,
}

impl MemoryFolder {
	pub fn new(root: impl Into<String>, storage: MemoryStorage) -> Self {
		Self {
			root: root.into(),
			storage,
		}
	}

	fn absolute(&self, path: &str) -> String {
		format!("{}{}", self.root, normalize_prefix(path))
	}
}

#[async_trait]
impl Folder for MemoryFolder {
	async fn exists(&self, path: &str) -> Result<bool, StorageError> {
		let objects = self.storage.objects.read().await;
		Ok(objects.contains_key(&self.absolute(path)))
	}

	async fn read_object(&self, path: &str) -> Result<ObjectStream, StorageError> {
		let objects = self.storage.objects.read().await;
		objects
			.get(&self.absolute(path))
			.map(|object| bytes_stream(object.data.clone()))
			.ok_or_else(|| StorageError::NotFound(path.to_string()))
	}

	async fn put_object(&self, path: &str, mut content: ObjectStream) -> Result<(), StorageError> {
		let mut data = Vec::new();
		tokio::io::AsyncReadExt::read_to_end(&mut content, &mut data)
			.await
			.map_err(|source| StorageError::Io {
				path: path.to_string(),
				source,
			})?;

		let mut objects = self.storage.objects.write().await;
		objects.insert(
			self.absolute(path),
			StoredObject {
				data,
				last_modified: SystemTime::now(),
			},
		);
		Ok(())
	}

	async fn delete_objects(&self, paths: &[String]) -> Result<(), StorageError> {
		let mut objects = self.storage.objects.write().await;
		for path in paths {
			objects.remove(&self.absolute(path));
		}
		Ok(())
	}

	async fn list_recursively(&self, prefix: &str) -> Result<Vec<Object>, StorageError> {
		let full_prefix = self.absolute(prefix);
		let objects = self.storage.objects.read().await;
		Ok(objects
			.range(full_prefix.clone()..)
			.take_while(|(name, _)| name.starts_with(&full_prefix))
			.map(|(name, object)| Object {
				name: name[self.root.len()..].to_string(),
				size: object.data.len() as u64,
				last_modified: object.last_modified,
			})
			.collect())
	}
}
