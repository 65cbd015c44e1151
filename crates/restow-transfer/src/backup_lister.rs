//! Backup-aware file listing.
//!
//! Groups the sentinel and data files of one backup into a single atomic transfer
//! unit, linked so that the target never sees the sentinel before all data and the
//! source never loses the sentinel before all data. A backup observed through its
//! sentinel is therefore always either fully old or fully new.

use std::collections::BTreeMap;

use async_trait::async_trait;
use restow_storage::Folder;
use tracing::{info, warn};

use super::{
	error::TransferError,
	lister::{list_missing_files, FileLister, FileToMove, FilesGroup},
};

/// Root prefix all backups live under.
pub const BASE_BACKUP_PATH: &str = "basebackups_005/";
/// Prefix of every backup name.
pub const BACKUP_NAME_PREFIX: &str = "base_";
/// Suffix of the sentinel object marking a backup as complete and valid.
pub const SENTINEL_SUFFIX: &str = "_backup_stop_sentinel.json";

/// Lists whole backups missing in the target storage.
///
/// Backups are only ever admitted whole: a backup that would exceed `max_files`
/// stops iteration, and no group is partially emitted. `max_backups` caps the number
/// of emitted groups, except when an exact `name` is requested.
#[derive(Debug, Clone)]
pub struct BackupFileLister {
	pub name: Option<String>,
	pub overwrite: bool,
	pub max_files: usize,
	pub max_backups: usize,
}

impl BackupFileLister {
	/// Lists a single backup by its exact name.
	pub fn single(name: impl Into<String>, overwrite: bool, max_files: usize) -> Self {
		Self {
			name: Some(name.into()),
			overwrite,
			max_files,
			max_backups: 1,
		}
	}

	/// Lists all transferable backups.
	#[must_use]
	pub fn all(overwrite: bool, max_files: usize, max_backups: usize) -> Self {
		Self {
			name: None,
			overwrite,
			max_files,
			max_backups,
		}
	}
}

#[async_trait]
impl FileLister for BackupFileLister {
	async fn list_files_to_move(
		&self,
		source: &dyn Folder,
		target: &dyn Folder,
	) -> Result<(Vec<FilesGroup>, usize), TransferError> {
		let missing =
			list_missing_files(source, target, BASE_BACKUP_PATH, self.overwrite).await?;
		let backups = find_backups(missing.into_keys(), self.name.as_deref());
		let (groups, num) = group_and_limit_backups(
			backups,
			self.max_files,
			self.max_backups,
			self.name.is_some(),
		);
		Ok((groups, num))
	}
}

#[derive(Debug, Default)]
struct BackupFiles {
	sentinel: Option<String>,
	data: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum FileCategory {
	Other,
	Sentinel(String),
	BackupData(String),
}

/// Classifies a path under the backups root by the fixed naming convention:
/// `<backup>_backup_stop_sentinel.json` directly under the root is a sentinel,
/// anything under `<backup>/...` is that backup's data, the rest is ignored.
fn categorise_file(path: &str) -> FileCategory {
	let rel = path.strip_prefix(BASE_BACKUP_PATH).unwrap_or(path);
	let (dir, file_name) = match rel.rfind('/') {
		Some(i) => (&rel[..=i], &rel[i + 1..]),
		None => ("", rel),
	};

	if dir.is_empty()
		&& file_name.starts_with(BACKUP_NAME_PREFIX)
		&& file_name.ends_with(SENTINEL_SUFFIX)
	{
		if let Some(backup_name) = file_name.strip_suffix(SENTINEL_SUFFIX) {
			return FileCategory::Sentinel(backup_name.to_string());
		}
	}
	if dir.starts_with(BACKUP_NAME_PREFIX) {
		if let Some(first_slash) = dir.find('/') {
			return FileCategory::BackupData(dir[..first_slash].to_string());
		}
	}
	FileCategory::Other
}

/// Buckets missing files per backup. A `BTreeMap` keeps the backup order (and so cap
/// selection) deterministic.
fn find_backups(
	paths: impl Iterator<Item = String>,
	target_name: Option<&str>,
) -> BTreeMap<String, BackupFiles> {
	let mut backups: BTreeMap<String, BackupFiles> = BTreeMap::new();
	for path in paths {
		let category = categorise_file(&path);
		let backup_name = match &category {
			FileCategory::Other => continue,
			FileCategory::Sentinel(name) | FileCategory::BackupData(name) => name.clone(),
		};
		if target_name.is_some_and(|target| target != backup_name) {
			continue;
		}

		let backup = backups.entry(backup_name).or_default();
		match category {
			FileCategory::Sentinel(_) => backup.sentinel = Some(path),
			FileCategory::BackupData(_) => backup.data.push(path),
			FileCategory::Other => {}
		}
	}
	info!("Backups missing in the target storage: {}", backups.len());
	backups
}

fn group_and_limit_backups(
	backups: BTreeMap<String, BackupFiles>,
	max_files: usize,
	max_backups: usize,
	exact_name: bool,
) -> (Vec<FilesGroup>, usize) {
	let mut files_count = 0;
	let mut groups = Vec::with_capacity(backups.len());

	for (name, backup) in backups {
		let Some(sentinel) = backup.sentinel else {
			info!("Skip incomplete backup without sentinel file: {name}");
			continue;
		};
		if backup.data.is_empty() {
			warn!("Backup doesn't have any data: {name}");
			continue;
		}
		// The cap on backups does not apply when one exact backup was requested.
		if !exact_name && groups.len() >= max_backups {
			break;
		}

		let group = link_group(sentinel, backup.data);
		if files_count + group.len() > max_files {
			break;
		}
		files_count += group.len();
		groups.push(group);
	}

	info!("Backups will be transferred: {}", groups.len());
	info!("Files will be transferred: {files_count}");
	(groups, files_count)
}

/// Links the backup's files into one atomic group: the sentinel is copied only after
/// every data file is visible in the target, and data files are deleted only after
/// the sentinel is gone from the source.
fn link_group(sentinel_path: String, data_paths: Vec<String>) -> FilesGroup {
	let mut sentinel = FileToMove::new(sentinel_path);
	let mut group: FilesGroup = data_paths
		.into_iter()
		.map(|path| {
			sentinel.copy_after.push(path.clone());
			FileToMove {
				path,
				copy_after: Vec::new(),
				delete_after: vec![sentinel.path.clone()],
			}
		})
		.collect();
	group.push(sentinel);
	group
}
