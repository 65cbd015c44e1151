//!
//! # Restow Transfer
//!
//! The storage-to-storage transfer engine of the restow backup tool: it moves a
//! coherent set of backup objects from one storage backend to another under bounded
//! concurrency, while guaranteeing that an external reader never observes a torn
//! backup.
//!
//! A [`FileLister`] decides what must move and groups files into atomic units with
//! explicit dependency edges; the [`Handler`] flattens those groups into jobs and
//! drives every file through a `copy → wait → delete` state machine on a pool of
//! concurrent workers. The `wait` step polls the target for the written object to
//! become visible, absorbing eventually-consistent backends.
//!
//! For backups, the [`BackupFileLister`] links each group so the sentinel file is
//! copied only after all data files are visible in the target, and data files are
//! deleted only after the sentinel is gone from the source. A backup observed
//! through its sentinel is therefore always fully old or fully new.
//!
//! All scheduling state lives in memory for the duration of one
//! [`Handler::handle`] call; there is no persisted or resumable job state.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use restow_storage::{MemoryFolder, MemoryStorage};
//! use restow_transfer::{BackupFileLister, Handler, HandlerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), restow_transfer::TransferError> {
//!     let source = Arc::new(MemoryFolder::new("failover/", MemoryStorage::new()));
//!     let target = Arc::new(MemoryFolder::new("primary/", MemoryStorage::new()));
//!
//!     let lister = BackupFileLister::all(false, usize::MAX, 16);
//!     let handler =
//!         Handler::with_folders(source, target, Box::new(lister), HandlerConfig::default())?;
//!     handler.handle().await
//! }
//! ```

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

mod backup_lister;
mod error;
mod handler;
mod job;
mod lister;
mod status;

pub use backup_lister::{
	BackupFileLister, BACKUP_NAME_PREFIX, BASE_BACKUP_PATH, SENTINEL_SUFFIX,
};
pub use error::{JobError, TransferError};
pub use handler::{FailurePolicy, Handler, HandlerConfig};
pub use job::JobKind;
pub use lister::{FileLister, FileToMove, FilesGroup, RegularFileLister};
pub use status::TransferStatus;
