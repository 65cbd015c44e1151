use restow_storage::StorageError;

use thiserror::Error;

use super::{job::JobKind, status::TransferStatus};

/// The single error type returned by [`Handler::handle`](crate::Handler::handle).
///
/// Per-file failures never abort unrelated files; in the tolerant policy they are
/// folded into a final [`TransferError::Finished`] count, while fail-fast mode returns
/// the first [`TransferError::File`] as is.
#[derive(Debug, Error)]
pub enum TransferError {
	#[error("invalid transfer config: {0}")]
	Config(String),

	#[error("list files in the source storage: {0}")]
	ListSource(#[source] StorageError),

	#[error("list files in the target storage: {0}")]
	ListTarget(#[source] StorageError),

	#[error("error with file {path:?}: {source}")]
	File {
		path: String,
		#[source]
		source: JobError,
	},

	#[error("finished with {0} errors")]
	Finished(usize),

	#[error(transparent)]
	Storage(#[from] StorageError),
}

/// Why a single file's state machine failed.
#[derive(Debug, Error)]
pub enum JobError {
	#[error("read file from the source storage: {0}")]
	Read(#[source] StorageError),

	#[error("write file to the target storage: {0}")]
	Write(#[source] StorageError),

	#[error("check if file exists in the target storage: {0}")]
	Exists(#[source] StorageError),

	#[error("delete file from the source storage: {0}")]
	Delete(#[source] StorageError),

	#[error("couldn't wait for the file to appear in the target storage ({0} checks performed)")]
	AppearanceTimeout(u32),

	#[error("{kind} operation requires other file {path:?} to be {min_status}, but it's failed")]
	RequirementFailed {
		kind: JobKind,
		path: String,
		min_status: TransferStatus,
	},

	#[error("job has a requirement on an unknown file {0:?}")]
	UnknownRequirement(String),
}
