//! Test-support folder wrapper.
//!
//! Records the order of mutating and probing operations and injects faults, so tests
//! can assert write/delete ordering guarantees and exercise failure and
//! eventual-consistency paths without a real flaky backend.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Folder, Object, ObjectStream, StorageError};

/// One recorded folder operation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderOp {
	Put(String),
	Delete(Vec<String>),
	Exists(String),
}

/// Wraps any [`Folder`], recording operations and optionally injecting faults.
#[derive(Clone)]
pub struct RecordingFolder {
	inner: Arc<dyn Folder>,
	ops: Arc<Mutex<Vec<FolderOp>>>,

	put_calls: Arc<AtomicU64>,
	delete_calls: Arc<AtomicU64>,
	exists_probes: Arc<Mutex<HashMap<String, u32>>>,

	fail_every_nth_put: Option<u64>,
	fail_deletes_after: Option<u64>,
	hide_from_exists: bool,
	appear_after_probes: Option<u32>,
}

impl RecordingFolder {
	pub fn new(inner: Arc<dyn Folder>) -> Self {
		Self {
			inner,
			ops: Arc::default(),
			put_calls: Arc::default(),
			delete_calls: Arc::default(),
			exists_probes: Arc::default(),
			fail_every_nth_put: None,
			fail_deletes_after: None,
			hide_from_exists: false,
			appear_after_probes: None,
		}
	}

	/// Every nth `put_object` call fails without writing.
	#[must_use]
	pub fn fail_every_nth_put(mut self, n: u64) -> Self {
		self.fail_every_nth_put = Some(n);
		self
	}

	/// All `delete_objects` calls after the nth one fail without deleting.
	#[must_use]
	pub fn fail_deletes_after(mut self, n: u64) -> Self {
		self.fail_deletes_after = Some(n);
		self
	}

	/// `exists` always reports `false`, whatever the inner folder holds.
	#[must_use]
	pub fn hide_from_exists(mut self) -> Self {
		self.hide_from_exists = true;
		self
	}

	/// Simulates eventual consistency: the first `n` `exists` probes of each path
	/// report `false`, later ones consult the inner folder.
	#[must_use]
	pub fn appear_after_probes(mut self, n: u32) -> Self {
		self.appear_after_probes = Some(n);
		self
	}

	/// All operations recorded so far, in call order.
	pub async fn ops(&self) -> Vec<FolderOp> {
		self.ops.lock().await.clone()
	}

	async fn record(&self, op: FolderOp) {
		self.ops.lock().await.push(op);
	}
}

#[async_trait]
impl Folder for RecordingFolder {
	async fn exists(&self, path: &str) -> Result<bool, StorageError> {
		self.record(FolderOp::Exists(path.to_string())).await;

		if self.hide_from_exists {
			return Ok(false);
		}
		if let Some(required) = self.appear_after_probes {
			let mut probes = self.exists_probes.lock().await;
			let seen = probes.entry(path.to_string()).or_insert(0);
			*seen += 1;
			if *seen <= required {
				return Ok(false);
			}
		}
		self.inner.exists(path).await
	}

	async fn read_object(&self, path: &str) -> Result<ObjectStream, StorageError> {
		self.inner.read_object(path).await
	}

	async fn put_object(&self, path: &str, content: ObjectStream) -> Result<(), StorageError> {
		let call = self.put_calls.fetch_add(1, Ordering::SeqCst) + 1;
		if let Some(n) = self.fail_every_nth_put {
			if call % n == 0 {
				return Err(StorageError::Backend(format!(
					"injected put failure (call {call})"
				)));
			}
		}

		self.record(FolderOp::Put(path.to_string())).await;
		self.inner.put_object(path, content).await
	}

	async fn delete_objects(&self, paths: &[String]) -> Result<(), StorageError> {
		let call = self.delete_calls.fetch_add(1, Ordering::SeqCst) + 1;
		if let Some(n) = self.fail_deletes_after {
			if call > n {
				return Err(StorageError::Backend(format!(
					"injected delete failure (call {call})"
				)));
			}
		}

		self.record(FolderOp::Delete(paths.to_vec())).await;
		self.inner.delete_objects(paths).await
	}

	async fn list_recursively(&self, prefix: &str) -> Result<Vec<Object>, StorageError> {
		self.inner.list_recursively(prefix).await
	}
}
