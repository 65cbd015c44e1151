//! Named storage registry.
//!
//! The transfer engine addresses storages by name ("default", "failover", ...); this
//! registry maps those names to backend configurations and hands out [`Folder`]
//! instances. Memory backends are shared per name, so resolving the same name twice
//! yields views of the same store.

use std::{
	collections::HashMap,
	path::PathBuf,
	sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Folder, FsFolder, MemoryFolder, MemoryStorage, StorageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
	Memory,
	Fs { root: PathBuf },
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
	pub storages: HashMap<String, BackendConfig>,

	#[serde(skip)]
	memory_pool: Mutex<HashMap<String, MemoryStorage>>,
}

impl StorageConfig {
	#[must_use]
	pub fn new(storages: HashMap<String, BackendConfig>) -> Self {
		Self {
			storages,
			memory_pool: Mutex::default(),
		}
	}

	pub fn resolve(&self, name: &str) -> Result<Arc<dyn Folder>, StorageError> {
		match self.storages.get(name) {
			None => Err(StorageError::UnknownStorage(name.to_string())),
			Some(BackendConfig::Fs { root }) => {
				debug!("Using filesystem storage folder {root:?} as {name:?}");
				Ok(Arc::new(FsFolder::new(root.clone())))
			}
			Some(BackendConfig::Memory) => {
				let mut pool = self
					.memory_pool
					.lock()
					.unwrap_or_else(PoisonError::into_inner);
				let storage = pool.entry(name.to_string()).or_default().clone();
				Ok(Arc::new(MemoryFolder::new("", storage)))
			}
		}
	}
}
