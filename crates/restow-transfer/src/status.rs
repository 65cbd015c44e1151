//! Per-file transfer progress, shared between workers.

use std::{collections::HashMap, fmt};

use tokio::sync::Mutex;

/// Progress marker of one file. Values are ordered: a file only ever advances
/// `New → Copied → Appeared → Deleted`, or drops to `Failed` from any non-terminal
/// state. Dependency admission compares against this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransferStatus {
	Failed,
	New,
	Copied,
	Appeared,
	Deleted,
}

impl fmt::Display for TransferStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Failed => "failed",
			Self::New => "new",
			Self::Copied => "copied",
			Self::Appeared => "appeared",
			Self::Deleted => "deleted",
		})
	}
}

/// Status table owned by one scheduler run.
///
/// The monotonic-status invariant is enforced here and nowhere else: statuses only
/// move forward, and `Failed` is sticky.
#[derive(Debug, Default)]
pub(crate) struct StatusTable {
	statuses: Mutex<HashMap<String, TransferStatus>>,
}

impl StatusTable {
	pub async fn insert_new(&self, path: &str) {
		self.statuses
			.lock()
			.await
			.insert(path.to_string(), TransferStatus::New);
	}

	pub async fn get(&self, path: &str) -> Option<TransferStatus> {
		self.statuses.lock().await.get(path).copied()
	}

	/// Advances the file forward to `next`. Returns whether the transition happened;
	/// backward transitions and transitions out of `Failed` are refused.
	pub async fn advance(&self, path: &str, next: TransferStatus) -> bool {
		let mut statuses = self.statuses.lock().await;
		match statuses.get_mut(path) {
			Some(current) if *current != TransferStatus::Failed && next > *current => {
				*current = next;
				true
			}
			_ => false,
		}
	}

	/// Drops the file to `Failed`, unless it already reached `Deleted`.
	pub async fn mark_failed(&self, path: &str) {
		let mut statuses = self.statuses.lock().await;
		if let Some(current) = statuses.get_mut(path) {
			if *current != TransferStatus::Deleted {
				*current = TransferStatus::Failed;
			}
		}
	}
}
