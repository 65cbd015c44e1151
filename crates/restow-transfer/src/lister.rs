//! File listing: computing which objects must move.

use std::collections::HashMap;

use async_trait::async_trait;
use restow_storage::{Folder, Object};
use tracing::{info, warn};

use super::error::TransferError;

/// One file to move, with the files it depends on. A file's copy job is admissible
/// only once every `copy_after` file is visible in the target; its delete job only
/// once every `delete_after` file is gone from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToMove {
	pub path: String,
	pub copy_after: Vec<String>,
	pub delete_after: Vec<String>,
}

impl FileToMove {
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			copy_after: Vec::new(),
			delete_after: Vec::new(),
		}
	}
}

/// An ordered set of files that must move as one atomic unit. Groups are independent
/// of each other.
pub type FilesGroup = Vec<FileToMove>;

/// Computes the set of files to move and groups them into atomic units.
#[async_trait]
pub trait FileLister: Send + Sync {
	/// Returns the groups and the total number of files across them.
	async fn list_files_to_move(
		&self,
		source: &dyn Folder,
		target: &dyn Folder,
	) -> Result<(Vec<FilesGroup>, usize), TransferError>;
}

/// Lists independent files under a prefix, without any ordering between them.
///
/// A file is selected when it exists in the source and either is absent from the
/// target or `overwrite` is set. Truncation to `max_files` picks an arbitrary subset:
/// which files make the cut is not deterministic.
#[derive(Debug, Clone)]
pub struct RegularFileLister {
	pub prefix: String,
	pub overwrite: bool,
	pub max_files: usize,
}

impl RegularFileLister {
	pub fn new(prefix: impl Into<String>, overwrite: bool) -> Self {
		Self {
			prefix: prefix.into(),
			overwrite,
			max_files: usize::MAX,
		}
	}

	#[must_use]
	pub fn with_max_files(mut self, max_files: usize) -> Self {
		self.max_files = max_files;
		self
	}
}

#[async_trait]
impl FileLister for RegularFileLister {
	async fn list_files_to_move(
		&self,
		source: &dyn Folder,
		target: &dyn Folder,
	) -> Result<(Vec<FilesGroup>, usize), TransferError> {
		let missing = list_missing_files(source, target, &self.prefix, self.overwrite).await?;

		let groups: Vec<FilesGroup> = missing
			.into_keys()
			.take(self.max_files)
			.map(|path| vec![FileToMove::new(path)])
			.collect();

		let num = groups.len();
		info!("Files will be transferred: {num}");
		Ok((groups, num))
	}
}

/// Lists both storages under `prefix` and returns the source files that must move,
/// keyed by path. This is a point-in-time snapshot; nothing re-lists mid-run.
pub(crate) async fn list_missing_files(
	source: &dyn Folder,
	target: &dyn Folder,
	prefix: &str,
	overwrite: bool,
) -> Result<HashMap<String, Object>, TransferError> {
	let target_files = target
		.list_recursively(prefix)
		.await
		.map_err(TransferError::ListTarget)?;
	let source_files = source
		.list_recursively(prefix)
		.await
		.map_err(TransferError::ListSource)?;
	info!("Total files in the source storage: {}", source_files.len());

	let mut missing: HashMap<String, Object> = source_files
		.into_iter()
		.map(|file| (file.name.clone(), file))
		.collect();

	for target_file in &target_files {
		if overwrite {
			if let Some(source_file) = missing.get(&target_file.name) {
				log_size_difference(source_file, target_file);
			}
		} else {
			missing.remove(&target_file.name);
		}
	}
	info!("Files missing in the target storage: {}", missing.len());

	Ok(missing)
}

fn log_size_difference(source_file: &Object, target_file: &Object) {
	if source_file.size != target_file.size {
		warn!(
			"File present in both storages and its size is different: {:?} (source {} bytes VS target {} bytes)",
			target_file.name, source_file.size, target_file.size,
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use restow_storage::{bytes_stream, MemoryFolder, MemoryStorage};

	async fn put(folder: &dyn Folder, path: &str) {
		folder
			.put_object(path, bytes_stream(Vec::new()))
			.await
			.unwrap();
	}

	fn folders() -> (MemoryFolder, MemoryFolder) {
		(
			MemoryFolder::new("source/", MemoryStorage::new()),
			MemoryFolder::new("target/", MemoryStorage::new()),
		)
	}

	#[tokio::test]
	async fn selects_files_missing_in_target() {
		let (source, target) = folders();
		put(&source, "dir/a").await;
		put(&source, "dir/b").await;
		put(&target, "dir/b").await;

		let lister = RegularFileLister::new("dir/", false);
		let (groups, num) = lister.list_files_to_move(&source, &target).await.unwrap();

		assert_eq!(num, 1);
		assert_eq!(groups, vec![vec![FileToMove::new("dir/a")]]);
	}

	#[tokio::test]
	async fn overwrite_includes_files_present_on_both_sides() {
		let (source, target) = folders();
		put(&source, "a").await;
		put(&target, "a").await;

		let lister = RegularFileLister::new("/", true);
		let (_, num) = lister.list_files_to_move(&source, &target).await.unwrap();
		assert_eq!(num, 1);
	}

	#[tokio::test]
	async fn truncates_to_max_files() {
		let (source, target) = folders();
		for i in 0..10 {
			put(&source, &i.to_string()).await;
		}

		let lister = RegularFileLister::new("/", false).with_max_files(4);
		let (groups, num) = lister.list_files_to_move(&source, &target).await.unwrap();
		assert_eq!(num, 4);
		assert_eq!(groups.len(), 4);
	}

	#[tokio::test]
	async fn nothing_to_do_yields_empty_listing() {
		let (source, target) = folders();
		put(&source, "a").await;
		put(&target, "a").await;

		let lister = RegularFileLister::new("/", false);
		let (groups, num) = lister.list_files_to_move(&source, &target).await.unwrap();
		assert!(groups.is_empty());
		assert_eq!(num, 0);
	}
}
