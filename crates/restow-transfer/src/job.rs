//! Units of work driven by the scheduler.

use std::fmt;

use tokio::time::Instant;

use super::status::TransferStatus;

/// The three steps of the per-file state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
	Copy,
	Wait,
	Delete,
}

impl fmt::Display for JobKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Copy => "copy",
			Self::Wait => "wait",
			Self::Delete => "delete",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct JobKey {
	pub path: String,
	pub kind: JobKind,
}

/// One queued piece of work. Re-created with advanced fields every time the file is
/// re-enqueued; discarded once the file reaches a terminal status.
#[derive(Debug, Clone)]
pub(crate) struct TransferJob {
	pub key: JobKey,
	pub prev_check: Option<Instant>,
	pub performed_checks: u32,
}

impl TransferJob {
	pub fn copy(path: String) -> Self {
		Self {
			key: JobKey {
				path,
				kind: JobKind::Copy,
			},
			prev_check: None,
			performed_checks: 0,
		}
	}
}

/// "This job may run only once `path` has reached `min_status`."
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JobRequirement {
	pub path: String,
	pub min_status: TransferStatus,
}
