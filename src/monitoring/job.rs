//! Refresh-job monitoring: execution history, staleness tracking, and
//! threshold-based alerting for the scheduled scrape pipeline.

// std
use std::{
	collections::VecDeque,
	sync::{Mutex, MutexGuard},
};
// crates.io
use serde::Serialize;
use serde_json::json;
// self
use crate::{
	_prelude::*,
	monitoring::alert::{self, Alert, AlertHandler, AlertKind},
};

/// Maximum retained job execution records.
pub const MAX_JOB_HISTORY: usize = 100;
/// Maximum retained alerts.
pub const MAX_ALERT_HISTORY: usize = 100;

/// Terminal status of one refresh job run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	/// Every state was processed without error.
	Success,
	/// Some states failed but fresh data reached the serving path.
	PartialFailure,
	/// Errors occurred and the cache was not invalidated.
	Failure,
}

/// Outcome of one refresh job run.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionRecord {
	/// Unique identifier of the run.
	pub job_id: String,
	/// Wall-clock completion time.
	pub timestamp: DateTime<Utc>,
	/// Total run duration in milliseconds.
	pub execution_time_ms: u64,
	/// States the scraper attempted.
	pub states_processed: usize,
	/// States newly created upstream.
	pub states_created: usize,
	/// States whose upstream rows changed.
	pub states_updated: usize,
	/// States confirmed unchanged.
	pub states_verified: usize,
	/// Per-state scrape failures.
	pub scrape_errors: Vec<String>,
	/// Per-state store-write failures.
	pub update_errors: Vec<String>,
	/// Whether the serving cache was invalidated after the writes.
	pub cache_invalidated: bool,
	/// Sum of scrape and update errors.
	pub total_errors: usize,
	/// Derived terminal status.
	pub status: JobStatus,
	#[serde(skip)]
	recorded_at: Instant,
}
impl JobExecutionRecord {
	/// Build a record, deriving the verified count, error total, and status.
	///
	/// Status is `Success` when no errors occurred; otherwise
	/// `PartialFailure` if the cache was invalidated (readers will see the
	/// partial refresh) and `Failure` if it was not.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		job_id: impl Into<String>,
		execution_time: Duration,
		states_processed: usize,
		states_created: usize,
		states_updated: usize,
		scrape_errors: Vec<String>,
		update_errors: Vec<String>,
		cache_invalidated: bool,
	) -> Self {
		let total_errors = scrape_errors.len() + update_errors.len();
		let status = if total_errors == 0 {
			JobStatus::Success
		} else if cache_invalidated {
			JobStatus::PartialFailure
		} else {
			JobStatus::Failure
		};

		Self {
			job_id: job_id.into(),
			timestamp: Utc::now(),
			execution_time_ms: execution_time.as_millis() as u64,
			states_processed,
			states_created,
			states_updated,
			states_verified: states_processed
				.saturating_sub(states_created)
				.saturating_sub(states_updated),
			scrape_errors,
			update_errors,
			cache_invalidated,
			total_errors,
			status,
			recorded_at: Instant::now(),
		}
	}
}

/// Thresholds evaluated on every recorded job run.
#[derive(Clone, Copy, Debug)]
pub struct JobAlertThresholds {
	/// Run-duration threshold in milliseconds.
	pub execution_time_ms: u64,
	/// Absolute error-count threshold per run.
	pub error_count: usize,
	/// Per-run error-rate threshold in percent.
	pub error_rate_percent: f64,
	/// Maximum tolerated gap since the last successful run.
	pub max_time_since_last_run: Duration,
}
impl Default for JobAlertThresholds {
	fn default() -> Self {
		Self {
			execution_time_ms: 30_000,
			error_count: 5,
			error_rate_percent: 10.,
			max_time_since_last_run: Duration::from_secs(24 * 60 * 60),
		}
	}
}

#[derive(Default)]
struct JobState {
	history: VecDeque<JobExecutionRecord>,
	alerts: VecDeque<Alert>,
	last_successful_run: Option<Instant>,
	last_successful_run_at: Option<DateTime<Utc>>,
}
impl JobState {
	fn push_alert(&mut self, alert: Alert) {
		self.alerts.push_back(alert);

		if self.alerts.len() > MAX_ALERT_HISTORY {
			self.alerts.pop_front();
		}
	}
}

/// Tracks refresh job executions and raises alerts on slow, failing, or
/// overdue runs.
pub struct JobMonitor {
	inner: Mutex<JobState>,
	handlers: Mutex<Vec<Arc<dyn AlertHandler>>>,
	thresholds: JobAlertThresholds,
}
impl JobMonitor {
	/// Create a monitor with the given thresholds.
	pub fn new(thresholds: JobAlertThresholds) -> Self {
		Self { inner: Mutex::new(JobState::default()), handlers: Mutex::new(Vec::new()), thresholds }
	}

	/// Register an alert handler; handlers survive [`reset`](Self::reset).
	pub fn on_alert(&self, handler: Arc<dyn AlertHandler>) {
		self.lock_handlers().push(handler);
	}

	/// Record one finished run and evaluate alert conditions.
	///
	/// A partial failure still counts as data reaching readers, so it resets
	/// the staleness clock alongside full success.
	pub fn record_job_execution(&self, record: JobExecutionRecord) {
		let alerts = {
			let mut inner = self.lock_inner();

			if matches!(record.status, JobStatus::Success | JobStatus::PartialFailure) {
				inner.last_successful_run = Some(record.recorded_at);
				inner.last_successful_run_at = Some(record.timestamp);
			}

			let mut alerts = Vec::new();

			if record.execution_time_ms > self.thresholds.execution_time_ms {
				alerts.push(Alert::new(
					AlertKind::SlowExecution,
					json!({
						"jobId": record.job_id,
						"executionTimeMs": record.execution_time_ms,
						"threshold": self.thresholds.execution_time_ms,
					}),
				));
			}

			if record.total_errors > self.thresholds.error_count {
				alerts.push(Alert::new(
					AlertKind::HighErrorCount,
					json!({
						"jobId": record.job_id,
						"errorCount": record.total_errors,
						"threshold": self.thresholds.error_count,
					}),
				));
			}

			if record.states_processed > 0 {
				let error_rate =
					record.total_errors as f64 / record.states_processed as f64 * 100.;

				if error_rate > self.thresholds.error_rate_percent {
					alerts.push(Alert::new(
						AlertKind::HighErrorRate,
						json!({
							"jobId": record.job_id,
							"errorRate": error_rate,
							"threshold": self.thresholds.error_rate_percent,
						}),
					));
				}
			}

			if record.status == JobStatus::Failure {
				alerts.push(Alert::new(
					AlertKind::JobFailure,
					json!({
						"jobId": record.job_id,
						"scrapeErrors": record.scrape_errors,
						"updateErrors": record.update_errors,
					}),
				));
			}

			// Writes landed but readers will keep seeing stale cache entries.
			if !record.cache_invalidated && record.status != JobStatus::Failure {
				alerts.push(Alert::new(
					AlertKind::CacheInvalidationFailed,
					json!({
						"jobId": record.job_id,
						"status": record.status,
					}),
				));
			}

			for alert in &alerts {
				inner.push_alert(alert.clone());
			}

			inner.history.push_back(record);

			if inner.history.len() > MAX_JOB_HISTORY {
				inner.history.pop_front();
			}

			alerts
		};

		self.dispatch_all(&alerts);
	}

	/// Whether the data is stale: no successful run yet, or the last one is
	/// older than the configured maximum gap.
	pub fn is_job_overdue(&self) -> bool {
		let inner = self.lock_inner();

		match inner.last_successful_run {
			None => true,
			Some(at) => at.elapsed() > self.thresholds.max_time_since_last_run,
		}
	}

	/// Raise a `job_overdue` alert if the job is overdue, returning whether
	/// one fired.
	pub fn check_overdue(&self) -> bool {
		if !self.is_job_overdue() {
			return false;
		}

		let alert = {
			let mut inner = self.lock_inner();
			let alert = Alert::new(
				AlertKind::JobOverdue,
				json!({
					"lastSuccessfulRun": inner.last_successful_run_at,
					"maxGapMs": self.thresholds.max_time_since_last_run.as_millis() as u64,
				}),
			);

			inner.push_alert(alert.clone());

			alert
		};

		self.dispatch_all(std::slice::from_ref(&alert));

		true
	}

	/// Aggregate snapshot of job health.
	pub fn job_stats(&self) -> JobStats {
		let inner = self.lock_inner();
		let total_jobs = inner.history.len();

		if total_jobs == 0 {
			return JobStats {
				total_jobs: 0,
				successful_jobs: 0,
				failed_jobs: 0,
				partial_failures: 0,
				success_rate: 0.,
				average_execution_time: 0.,
				average_error_count: 0.,
				last_run: None,
				last_successful_run: None,
				is_overdue: true,
			};
		}

		let mut successful_jobs = 0;
		let mut failed_jobs = 0;
		let mut partial_failures = 0;
		let mut total_execution_time = 0;
		let mut total_error_count = 0;

		for record in &inner.history {
			match record.status {
				JobStatus::Success => successful_jobs += 1,
				JobStatus::PartialFailure => partial_failures += 1,
				JobStatus::Failure => failed_jobs += 1,
			}

			total_execution_time += record.execution_time_ms;
			total_error_count += record.total_errors;
		}

		let is_overdue = match inner.last_successful_run {
			None => true,
			Some(at) => at.elapsed() > self.thresholds.max_time_since_last_run,
		};

		JobStats {
			total_jobs,
			successful_jobs,
			failed_jobs,
			partial_failures,
			success_rate: successful_jobs as f64 / total_jobs as f64 * 100.,
			average_execution_time: total_execution_time as f64 / total_jobs as f64,
			average_error_count: total_error_count as f64 / total_jobs as f64,
			last_run: inner.history.back().cloned(),
			last_successful_run: inner.last_successful_run_at,
			is_overdue,
		}
	}

	/// Most recent job records, newest last.
	pub fn recent_jobs(&self, limit: usize) -> Vec<JobExecutionRecord> {
		let inner = self.lock_inner();

		inner.history.iter().rev().take(limit).rev().cloned().collect()
	}

	/// Look up one run by its identifier.
	pub fn job_by_id(&self, job_id: &str) -> Option<JobExecutionRecord> {
		let inner = self.lock_inner();

		inner.history.iter().find(|record| record.job_id == job_id).cloned()
	}

	/// Up to the ten most recent alerts, newest last.
	pub fn recent_alerts(&self) -> Vec<Alert> {
		let inner = self.lock_inner();

		inner.alerts.iter().rev().take(10).rev().cloned().collect()
	}

	/// Drop all history and staleness state; registered handlers are kept.
	pub fn reset(&self) {
		*self.lock_inner() = JobState::default();
	}

	fn dispatch_all(&self, alerts: &[Alert]) {
		if alerts.is_empty() {
			return;
		}

		let handlers = self.lock_handlers().clone();

		for alert in alerts {
			alert::dispatch(&handlers, alert);
		}
	}

	fn lock_inner(&self) -> MutexGuard<'_, JobState> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn lock_handlers(&self) -> MutexGuard<'_, Vec<Arc<dyn AlertHandler>>> {
		self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}
impl Default for JobMonitor {
	fn default() -> Self {
		Self::new(JobAlertThresholds::default())
	}
}

/// Aggregate snapshot of refresh job health.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
	/// Runs currently retained in history.
	pub total_jobs: usize,
	/// Runs that finished with `success`.
	pub successful_jobs: usize,
	/// Runs that finished with `failure`.
	pub failed_jobs: usize,
	/// Runs that finished with `partial_failure`.
	pub partial_failures: usize,
	/// Share of retained runs that finished with `success`, in percent.
	pub success_rate: f64,
	/// Mean run duration in milliseconds.
	pub average_execution_time: f64,
	/// Mean error total per retained run.
	pub average_error_count: f64,
	/// The most recent run in full.
	pub last_run: Option<JobExecutionRecord>,
	/// Completion time of the most recent success or partial failure.
	pub last_successful_run: Option<DateTime<Utc>>,
	/// Whether the job is currently overdue.
	pub is_overdue: bool,
}
