//! The transfer scheduler: a bounded pool of workers driving every file through the
//! copy → wait → delete state machine, respecting inter-file dependencies.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicI64, Ordering},
		Arc,
	},
	time::Duration,
};

use async_channel as chan;
use futures_concurrency::future::Join;
use restow_storage::{Folder, StorageConfig};
use serde::{Deserialize, Serialize};
use tokio::{
	spawn,
	sync::watch,
	time::{sleep, Instant},
};
use tracing::{error, info, warn};

use super::{
	error::{JobError, TransferError},
	job::{JobKey, JobKind, JobRequirement, TransferJob},
	lister::{FileLister, FileToMove, FilesGroup},
	status::{StatusTable, TransferStatus},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
	/// Cancel all outstanding work on the first error instead of trying every file.
	pub fail_on_first_err: bool,
	/// Number of concurrent workers, at least 1.
	pub concurrency: usize,
	/// How many times to poll the target for a just-written file to become visible.
	/// Zero disables appearance confirmation entirely.
	pub appearance_checks: u32,
	/// Minimum interval between appearance checks of one file.
	pub appearance_checks_interval: Duration,
	/// Pause before re-enqueueing a job whose requirements are not yet satisfied.
	/// Zero keeps the historical tight-polling behavior.
	pub requeue_delay: Duration,
}

impl Default for HandlerConfig {
	fn default() -> Self {
		Self {
			fail_on_first_err: false,
			concurrency: 10,
			appearance_checks: 3,
			appearance_checks_interval: Duration::from_secs(1),
			requeue_delay: Duration::ZERO,
		}
	}
}

impl HandlerConfig {
	fn validate(&self) -> Result<(), TransferError> {
		if self.concurrency < 1 {
			return Err(TransferError::Config(
				"concurrency level must be >= 1 (which turns it off)".to_string(),
			));
		}
		Ok(())
	}

	fn failure_policy(&self) -> FailurePolicy {
		if self.fail_on_first_err {
			FailurePolicy::FailFast
		} else {
			FailurePolicy::Accumulate
		}
	}
}

/// What to do with per-file errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
	/// The first error cancels all workers and becomes the run's sole result.
	FailFast,
	/// Every file is attempted; errors are logged and counted into the final result.
	Accumulate,
}

/// Moves a set of backup-related files from one storage to another.
pub struct Handler {
	source: Arc<dyn Folder>,
	target: Arc<dyn Folder>,
	lister: Box<dyn FileLister>,
	cfg: HandlerConfig,
}

impl Handler {
	/// Resolves both storages from the registry by name.
	pub fn new(
		source_storage: &str,
		target_storage: &str,
		storages: &StorageConfig,
		lister: Box<dyn FileLister>,
		cfg: HandlerConfig,
	) -> Result<Self, TransferError> {
		if source_storage == target_storage {
			return Err(TransferError::Config(
				"source and target storages must be different".to_string(),
			));
		}
		let source = storages
			.resolve(source_storage)
			.map_err(|e| TransferError::Config(format!("configure source storage folder: {e}")))?;
		let target = storages
			.resolve(target_storage)
			.map_err(|e| TransferError::Config(format!("configure target storage folder: {e}")))?;
		Self::with_folders(source, target, lister, cfg)
	}

	/// Builds a handler over already-resolved folders.
	pub fn with_folders(
		source: Arc<dyn Folder>,
		target: Arc<dyn Folder>,
		lister: Box<dyn FileLister>,
		cfg: HandlerConfig,
	) -> Result<Self, TransferError> {
		cfg.validate()?;
		Ok(Self {
			source,
			target,
			lister,
			cfg,
		})
	}

	/// Runs the whole transfer. Returns `Ok(())` once every listed file reached a
	/// terminal state without errors; per-file failure detail goes to the logs.
	pub async fn handle(&self) -> Result<(), TransferError> {
		let (groups, files_num) = self
			.lister
			.list_files_to_move(self.source.as_ref(), self.target.as_ref())
			.await?;
		if files_num == 0 {
			info!("No files to transfer");
			return Ok(());
		}

		let workers = self.cfg.concurrency.min(groups.len());
		self.transfer_concurrently(workers, &groups, files_num).await
	}

	async fn transfer_concurrently(
		&self,
		workers: usize,
		groups: &[FilesGroup],
		files_num: usize,
	) -> Result<(), TransferError> {
		let run = Arc::new(TransferRun::new(
			Arc::clone(&self.source),
			Arc::clone(&self.target),
			self.cfg.clone(),
			groups,
			files_num,
		));

		// The queue is sized for every file in the run: a file has at most one job
		// outstanding, so re-enqueueing can never block a worker.
		let (jobs_tx, jobs_rx) = chan::bounded(files_num);
		for group in groups {
			for file in group {
				run.register_file(&file.path).await;
				jobs_tx
					.try_send(TransferJob::copy(file.path.clone()))
					.expect("pre-sized job queue rejected an initial job");
			}
		}

		let (errs_tx, errs_rx) = chan::bounded(files_num);
		let (cancel_tx, cancel_rx) = watch::channel(false);
		let cancel_tx = Arc::new(cancel_tx);
		spawn(cancel_on_signal(Arc::clone(&cancel_tx)));

		let aggregator = spawn(aggregate_errors(
			self.cfg.failure_policy(),
			errs_rx,
			Arc::clone(&cancel_tx),
		));

		let worker_handles = (0..workers)
			.map(|_| {
				spawn(Arc::clone(&run).run_worker(
					jobs_rx.clone(),
					jobs_tx.clone(),
					errs_tx.clone(),
					cancel_rx.clone(),
				))
			})
			.collect::<Vec<_>>();
		drop(jobs_rx);
		drop(jobs_tx);
		drop(errs_tx);
		drop(cancel_rx);

		for result in worker_handles.join().await {
			if let Err(e) = result {
				error!("Transfer worker panicked: {e:#?}");
			}
		}

		match aggregator.await {
			Ok(Some(final_err)) => Err(final_err),
			Ok(None) => Ok(()),
			Err(e) => {
				error!("Error aggregator task failed: {e:#?}");
				Ok(())
			}
		}
	}
}

/// Shared state of one scheduling run: the status table, the requirement table and
/// the outstanding-file counter. Built entirely before the first worker starts.
struct TransferRun {
	source: Arc<dyn Folder>,
	target: Arc<dyn Folder>,
	cfg: HandlerConfig,
	statuses: StatusTable,
	requirements: HashMap<JobKey, Vec<JobRequirement>>,
	files_left: AtomicI64,
}

impl TransferRun {
	fn new(
		source: Arc<dyn Folder>,
		target: Arc<dyn Folder>,
		cfg: HandlerConfig,
		groups: &[FilesGroup],
		files_num: usize,
	) -> Self {
		let mut requirements = HashMap::new();
		for group in groups {
			for file in group {
				save_requirements(&mut requirements, file);
			}
		}

		Self {
			source,
			target,
			cfg,
			statuses: StatusTable::default(),
			requirements,
			files_left: AtomicI64::new(files_num as i64),
		}
	}

	async fn register_file(&self, path: &str) {
		self.statuses.insert_new(path).await;
	}

	async fn run_worker(
		self: Arc<Self>,
		jobs_rx: chan::Receiver<TransferJob>,
		jobs_tx: chan::Sender<TransferJob>,
		errs_tx: chan::Sender<TransferError>,
		cancel_rx: watch::Receiver<bool>,
	) {
		loop {
			// No job in the queue means no more files for this worker to process.
			let Ok(job) = jobs_rx.try_recv() else {
				return;
			};

			if *cancel_rx.borrow() {
				return;
			}

			match self.check_requirements(&job).await {
				Err(e) => {
					self.fail_file(&job, e, &errs_tx).await;
					continue;
				}
				Ok(false) => {
					// Requirements not yet satisfied, retry the same job later.
					if !self.cfg.requeue_delay.is_zero() {
						sleep(self.cfg.requeue_delay).await;
					}
					requeue(&jobs_tx, job);
					continue;
				}
				Ok(true) => {}
			}

			let outcome = match job.key.kind {
				JobKind::Copy => self.copy_file(job.clone()).await,
				JobKind::Wait => self.wait_file(job.clone()).await,
				JobKind::Delete => self.delete_file(&job).await.map(|()| None),
			};

			match outcome {
				Err(e) => self.fail_file(&job, e, &errs_tx).await,
				Ok(Some(next_job)) => requeue(&jobs_tx, next_job),
				Ok(None) => {
					let left = self.files_left.fetch_sub(1, Ordering::SeqCst) - 1;
					info!("File is transferred ({left} left): {:?}", job.key.path);
				}
			}
		}
	}

	/// Checks whether every file this job depends on has reached the required status.
	/// A failed dependency is an error; a merely lagging one makes the job not ready.
	async fn check_requirements(&self, job: &TransferJob) -> Result<bool, JobError> {
		for required in self.requirements.get(&job.key).into_iter().flatten() {
			let Some(actual) = self.statuses.get(&required.path).await else {
				return Err(JobError::UnknownRequirement(required.path.clone()));
			};
			if actual == TransferStatus::Failed {
				return Err(JobError::RequirementFailed {
					kind: job.key.kind,
					path: required.path.clone(),
					min_status: required.min_status,
				});
			}
			if actual < required.min_status {
				return Ok(false);
			}
		}
		Ok(true)
	}

	async fn copy_file(&self, mut job: TransferJob) -> Result<Option<TransferJob>, JobError> {
		let content = self
			.source
			.read_object(&job.key.path)
			.await
			.map_err(JobError::Read)?;
		self.target
			.put_object(&job.key.path, content)
			.await
			.map_err(JobError::Write)?;

		self.statuses
			.advance(&job.key.path, TransferStatus::Copied)
			.await;
		job.key.kind = JobKind::Wait;
		Ok(Some(job))
	}

	async fn wait_file(&self, mut job: TransferJob) -> Result<Option<TransferJob>, JobError> {
		let appeared = if self.cfg.appearance_checks == 0 {
			// Appearance confirmation is disabled, trust the write.
			true
		} else {
			self.check_for_appearance(job.prev_check, &job.key.path)
				.await?
		};

		if appeared {
			self.statuses
				.advance(&job.key.path, TransferStatus::Appeared)
				.await;
			job.key.kind = JobKind::Delete;
			return Ok(Some(job));
		}

		let performed_checks = job.performed_checks + 1;
		if performed_checks >= self.cfg.appearance_checks {
			return Err(JobError::AppearanceTimeout(self.cfg.appearance_checks));
		}

		warn!(
			"Written file hasn't appeared in the target storage (check {performed_checks} of {})",
			self.cfg.appearance_checks,
		);
		job.prev_check = Some(Instant::now());
		job.performed_checks = performed_checks;
		Ok(Some(job))
	}

	/// Waits out the rest of the check interval, then probes the target. Fixed-interval
	/// polling: eventually-consistent backends need time, not backoff.
	async fn check_for_appearance(
		&self,
		prev_check: Option<Instant>,
		path: &str,
	) -> Result<bool, JobError> {
		if let Some(prev_check) = prev_check {
			let next_check = prev_check + self.cfg.appearance_checks_interval;
			let now = Instant::now();
			if next_check > now {
				sleep(next_check - now).await;
			}
		}

		self.target.exists(path).await.map_err(JobError::Exists)
	}

	async fn delete_file(&self, job: &TransferJob) -> Result<(), JobError> {
		self.source
			.delete_objects(std::slice::from_ref(&job.key.path))
			.await
			.map_err(JobError::Delete)?;
		self.statuses
			.advance(&job.key.path, TransferStatus::Deleted)
			.await;
		Ok(())
	}

	async fn fail_file(
		&self,
		job: &TransferJob,
		err: JobError,
		errs_tx: &chan::Sender<TransferError>,
	) {
		self.statuses.mark_failed(&job.key.path).await;
		self.files_left.fetch_sub(1, Ordering::SeqCst);
		let _ = errs_tx
			.send(TransferError::File {
				path: job.key.path.clone(),
				source: err,
			})
			.await;
	}
}

fn save_requirements(requirements: &mut HashMap<JobKey, Vec<JobRequirement>>, file: &FileToMove) {
	for required_path in &file.copy_after {
		requirements
			.entry(JobKey {
				path: file.path.clone(),
				kind: JobKind::Copy,
			})
			.or_default()
			.push(JobRequirement {
				path: required_path.clone(),
				min_status: TransferStatus::Appeared,
			});
	}

	for required_path in &file.delete_after {
		requirements
			.entry(JobKey {
				path: file.path.clone(),
				kind: JobKind::Delete,
			})
			.or_default()
			.push(JobRequirement {
				path: required_path.clone(),
				min_status: TransferStatus::Deleted,
			});
	}
}

fn requeue(jobs_tx: &chan::Sender<TransferJob>, job: TransferJob) {
	jobs_tx
		.try_send(job)
		.expect("pre-sized job queue rejected a re-enqueued job");
}

/// A single interrupt cancels all workers; in-flight storage calls are not aborted.
async fn cancel_on_signal(cancel: Arc<watch::Sender<bool>>) {
	tokio::select! {
		result = tokio::signal::ctrl_c() => {
			if result.is_ok() {
				warn!("Interrupted, canceling all transfer workers");
				let _ = cancel.send(true);
			}
		}
		() = cancel.closed() => {}
	}
}

/// Drains worker errors under the configured policy and produces the final verdict.
async fn aggregate_errors(
	policy: FailurePolicy,
	errs_rx: chan::Receiver<TransferError>,
	cancel: Arc<watch::Sender<bool>>,
) -> Option<TransferError> {
	let mut errs_num = 0;
	while let Ok(e) = errs_rx.recv().await {
		match policy {
			FailurePolicy::FailFast => {
				let _ = cancel.send(true);
				return Some(e);
			}
			FailurePolicy::Accumulate => {
				error!("{e}");
				errs_num += 1;
			}
		}
	}
	(errs_num > 0).then(|| TransferError::Finished(errs_num))
}

#[cfg(test)]
mod tests {
	use super::*;
	use restow_storage::{bytes_stream, MemoryFolder, MemoryStorage, RecordingFolder};

	fn run_over(source: Arc<dyn Folder>, target: Arc<dyn Folder>, cfg: HandlerConfig) -> TransferRun {
		TransferRun::new(source, target, cfg, &[], 0)
	}

	fn memory() -> Arc<MemoryFolder> {
		Arc::new(MemoryFolder::new("", MemoryStorage::new()))
	}

	#[test]
	fn builds_requirements_from_dependency_edges() {
		let mut requirements = HashMap::new();
		save_requirements(
			&mut requirements,
			&FileToMove {
				path: "1".to_string(),
				copy_after: vec!["2".to_string(), "3".to_string()],
				delete_after: vec!["4".to_string(), "5".to_string()],
			},
		);

		assert_eq!(
			requirements[&JobKey {
				path: "1".to_string(),
				kind: JobKind::Copy,
			}],
			vec![
				JobRequirement {
					path: "2".to_string(),
					min_status: TransferStatus::Appeared,
				},
				JobRequirement {
					path: "3".to_string(),
					min_status: TransferStatus::Appeared,
				},
			]
		);
		assert_eq!(
			requirements[&JobKey {
				path: "1".to_string(),
				kind: JobKind::Delete,
			}],
			vec![
				JobRequirement {
					path: "4".to_string(),
					min_status: TransferStatus::Deleted,
				},
				JobRequirement {
					path: "5".to_string(),
					min_status: TransferStatus::Deleted,
				},
			]
		);
	}

	#[tokio::test]
	async fn requirement_checks_gate_admission() {
		let mut run = run_over(memory(), memory(), HandlerConfig::default());
		run.requirements = HashMap::from([
			(
				JobKey {
					path: "1".to_string(),
					kind: JobKind::Delete,
				},
				vec![JobRequirement {
					path: "2".to_string(),
					min_status: TransferStatus::Copied,
				}],
			),
			(
				JobKey {
					path: "2".to_string(),
					kind: JobKind::Delete,
				},
				vec![JobRequirement {
					path: "3".to_string(),
					min_status: TransferStatus::Appeared,
				}],
			),
			(
				JobKey {
					path: "3".to_string(),
					kind: JobKind::Delete,
				},
				vec![JobRequirement {
					path: "4".to_string(),
					min_status: TransferStatus::Appeared,
				}],
			),
		]);
		for (path, status) in [
			("2", TransferStatus::Appeared),
			("3", TransferStatus::Copied),
			("4", TransferStatus::Failed),
		] {
			run.statuses.insert_new(path).await;
			if status == TransferStatus::Failed {
				run.statuses.mark_failed(path).await;
			} else {
				run.statuses.advance(path, status).await;
			}
		}

		let delete_job = |path: &str| {
			let mut job = TransferJob::copy(path.to_string());
			job.key.kind = JobKind::Delete;
			job
		};

		assert!(run.check_requirements(&delete_job("1")).await.unwrap());
		assert!(!run.check_requirements(&delete_job("2")).await.unwrap());

		let err = run.check_requirements(&delete_job("3")).await.err().unwrap();
		assert_eq!(
			err.to_string(),
			"delete operation requires other file \"4\" to be appeared, but it's failed"
		);
	}

	#[tokio::test]
	async fn copy_moves_content_and_schedules_a_wait() {
		let source = memory();
		let target = memory();
		source
			.put_object("f", bytes_stream(b"payload".to_vec()))
			.await
			.unwrap();

		let run = run_over(source, target.clone(), HandlerConfig::default());
		run.statuses.insert_new("f").await;

		let next = run
			.copy_file(TransferJob::copy("f".to_string()))
			.await
			.unwrap()
			.unwrap();

		assert_eq!(next.key.kind, JobKind::Wait);
		assert!(target.exists("f").await.unwrap());
		assert_eq!(run.statuses.get("f").await, Some(TransferStatus::Copied));
	}

	#[tokio::test]
	async fn copy_of_a_missing_file_fails_with_a_read_error() {
		let run = run_over(memory(), memory(), HandlerConfig::default());
		run.statuses.insert_new("f").await;

		let err = run
			.copy_file(TransferJob::copy("f".to_string()))
			.await
			.err()
			.unwrap();
		assert!(matches!(err, JobError::Read(_)));
	}

	#[tokio::test]
	async fn copy_surfaces_target_write_failures() {
		let source = memory();
		source
			.put_object("f", bytes_stream(b"payload".to_vec()))
			.await
			.unwrap();
		let target = Arc::new(RecordingFolder::new(memory()).fail_every_nth_put(1));

		let run = run_over(source, target, HandlerConfig::default());
		run.statuses.insert_new("f").await;

		let err = run
			.copy_file(TransferJob::copy("f".to_string()))
			.await
			.err()
			.unwrap();
		assert!(matches!(err, JobError::Write(_)));
		assert_eq!(run.statuses.get("f").await, Some(TransferStatus::New));
	}

	#[tokio::test]
	async fn wait_without_checks_trusts_the_write() {
		let target = Arc::new(RecordingFolder::new(memory()).hide_from_exists());
		let run = run_over(
			memory(),
			target.clone(),
			HandlerConfig {
				appearance_checks: 0,
				..Default::default()
			},
		);
		run.statuses.insert_new("f").await;

		let mut job = TransferJob::copy("f".to_string());
		job.key.kind = JobKind::Wait;
		let next = run.wait_file(job).await.unwrap().unwrap();

		assert_eq!(next.key.kind, JobKind::Delete);
		assert_eq!(run.statuses.get("f").await, Some(TransferStatus::Appeared));
		assert!(target.ops().await.is_empty());
	}

	#[tokio::test]
	async fn wait_exhausting_its_budget_times_out() {
		let target = Arc::new(RecordingFolder::new(memory()).hide_from_exists());
		let run = run_over(
			memory(),
			target,
			HandlerConfig {
				appearance_checks: 2,
				appearance_checks_interval: Duration::ZERO,
				..Default::default()
			},
		);
		run.statuses.insert_new("f").await;

		let mut job = TransferJob::copy("f".to_string());
		job.key.kind = JobKind::Wait;

		let retry = run.wait_file(job).await.unwrap().unwrap();
		assert_eq!(retry.key.kind, JobKind::Wait);
		assert_eq!(retry.performed_checks, 1);
		assert!(retry.prev_check.is_some());

		let err = run.wait_file(retry).await.err().unwrap();
		assert!(matches!(err, JobError::AppearanceTimeout(2)));
	}

	#[tokio::test]
	async fn appearance_checks_are_paced_by_the_interval() {
		let target = memory();
		target
			.put_object("f", bytes_stream(b"x".to_vec()))
			.await
			.unwrap();
		let run = run_over(
			memory(),
			target,
			HandlerConfig {
				appearance_checks_interval: Duration::from_millis(30),
				..Default::default()
			},
		);

		let started = Instant::now();
		let appeared = run
			.check_for_appearance(Some(started), "f")
			.await
			.unwrap();
		assert!(appeared);
		assert!(started.elapsed() >= Duration::from_millis(30));
	}

	#[tokio::test]
	async fn delete_removes_the_source_object() {
		let source = memory();
		source
			.put_object("f", bytes_stream(b"x".to_vec()))
			.await
			.unwrap();
		let run = run_over(source.clone(), memory(), HandlerConfig::default());
		run.statuses.insert_new("f").await;

		let mut job = TransferJob::copy("f".to_string());
		job.key.kind = JobKind::Delete;
		run.delete_file(&job).await.unwrap();

		assert!(!source.exists("f").await.unwrap());
		assert_eq!(run.statuses.get("f").await, Some(TransferStatus::Deleted));
	}

	#[test]
	fn config_deserializes_with_defaults() {
		let cfg: HandlerConfig =
			serde_json::from_str(r#"{"concurrency": 3, "fail_on_first_err": true}"#).unwrap();
		assert!(cfg.fail_on_first_err);
		assert_eq!(cfg.concurrency, 3);
		assert_eq!(cfg.appearance_checks, 3);
		assert_eq!(cfg.appearance_checks_interval, Duration::from_secs(1));
		assert!(cfg.requeue_delay.is_zero());
	}

	#[test]
	fn rejects_zero_concurrency() {
		let cfg = HandlerConfig {
			concurrency: 0,
			..Default::default()
		};
		assert!(cfg.validate().is_err());
	}
}
