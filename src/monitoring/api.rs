//! Request-path monitoring: rolling metrics over served API requests and
//! threshold-based alerting.

// std
use std::{
	collections::VecDeque,
	sync::{Mutex, MutexGuard},
};
// crates.io
use http::StatusCode;
use serde::Serialize;
use serde_json::json;
// self
use crate::{
	_prelude::*,
	monitoring::alert::{self, Alert, AlertHandler, AlertKind},
};

/// Maximum retained request records.
pub const MAX_REQUEST_HISTORY: usize = 1_000;
/// Maximum retained error records.
pub const MAX_ERROR_HISTORY: usize = 100;
/// Maximum retained alerts.
pub const MAX_ALERT_HISTORY: usize = 100;
/// Default trailing window for uptime computation.
pub const DEFAULT_UPTIME_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Coarse classification of request-path errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
	/// An outbound call exceeded its timeout budget.
	Timeout,
	/// Upstream connectivity or response failure.
	Network,
	/// The caller supplied an invalid request.
	Validation,
	/// Anything else.
	Unknown,
}
impl From<&Error> for ErrorType {
	fn from(value: &Error) -> Self {
		match value {
			Error::Timeout { .. } => Self::Timeout,
			Error::ExternalService { .. } => Self::Network,
			Error::BadRequest { .. } => Self::Validation,
			_ => Self::Unknown,
		}
	}
}

/// One served API request.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
	/// Request path.
	pub endpoint: String,
	/// Latency in milliseconds.
	pub response_time_ms: u64,
	/// HTTP status served.
	pub status_code: u16,
	/// Whether the response was served from cache.
	pub from_cache: bool,
	/// Wall-clock time the request completed.
	pub timestamp: DateTime<Utc>,
	/// Derived: status >= 400.
	pub is_error: bool,
	#[serde(skip)]
	recorded_at: Instant,
}

/// One recorded request-path error.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
	/// Request path the error occurred on.
	pub endpoint: String,
	/// Error message.
	pub message: String,
	/// Coarse error classification.
	pub error_type: ErrorType,
	/// Wall-clock time the error was recorded.
	pub timestamp: DateTime<Utc>,
}

/// Thresholds evaluated on every recorded request.
#[derive(Clone, Copy, Debug)]
pub struct ApiAlertThresholds {
	/// Per-request latency threshold in milliseconds.
	pub response_time_ms: u64,
	/// Global error-rate threshold in percent.
	pub error_rate_percent: f64,
	/// Global cache-hit-rate floor in percent.
	pub cache_hit_rate_percent: f64,
}
impl Default for ApiAlertThresholds {
	fn default() -> Self {
		Self { response_time_ms: 500, error_rate_percent: 5., cache_hit_rate_percent: 50. }
	}
}

#[derive(Default)]
struct ApiMetrics {
	requests: VecDeque<RequestRecord>,
	errors: VecDeque<ErrorRecord>,
	alerts: VecDeque<Alert>,
	cache_hits: u64,
	cache_misses: u64,
	total_response_time_ms: u64,
	request_count: u64,
}
impl ApiMetrics {
	fn average_response_time(&self) -> f64 {
		if self.request_count == 0 {
			0.
		} else {
			self.total_response_time_ms as f64 / self.request_count as f64
		}
	}

	// Numerator counts errors still in the bounded buffer while the
	// denominator is the all-time request count; retained for behavioural
	// parity with existing alert tuning.
	fn error_rate(&self) -> f64 {
		if self.request_count == 0 {
			return 0.;
		}

		let error_count = self.requests.iter().filter(|request| request.is_error).count();

		error_count as f64 / self.request_count as f64 * 100.
	}

	fn cache_hit_rate(&self) -> f64 {
		let total = self.cache_hits + self.cache_misses;

		if total == 0 { 0. } else { self.cache_hits as f64 / total as f64 * 100. }
	}

	fn uptime_within(&self, window: Duration) -> f64 {
		let now = Instant::now();
		let recent: Vec<_> = self
			.requests
			.iter()
			.filter(|request| now.saturating_duration_since(request.recorded_at) < window)
			.collect();

		if recent.is_empty() {
			return 100.;
		}

		let successful = recent.iter().filter(|request| !request.is_error).count();

		successful as f64 / recent.len() as f64 * 100.
	}

	fn push_alert(&mut self, alert: Alert) {
		self.alerts.push_back(alert);

		if self.alerts.len() > MAX_ALERT_HISTORY {
			self.alerts.pop_front();
		}
	}
}

/// Records API request outcomes, computes rolling metrics, and fires
/// threshold-based alerts to registered handlers.
pub struct ApiMonitor {
	inner: Mutex<ApiMetrics>,
	handlers: Mutex<Vec<Arc<dyn AlertHandler>>>,
	thresholds: ApiAlertThresholds,
}
impl ApiMonitor {
	/// Create a monitor with the given thresholds.
	pub fn new(thresholds: ApiAlertThresholds) -> Self {
		Self { inner: Mutex::new(ApiMetrics::default()), handlers: Mutex::new(Vec::new()), thresholds }
	}

	/// Register an alert handler; handlers survive [`reset`](Self::reset).
	pub fn on_alert(&self, handler: Arc<dyn AlertHandler>) {
		self.lock_handlers().push(handler);
	}

	/// Record one served request and evaluate alert conditions.
	///
	/// The three checks (slow response, error rate, cache hit rate) run
	/// independently; a single request may raise several alerts.
	pub fn record_request(
		&self,
		endpoint: &str,
		response_time_ms: u64,
		status: StatusCode,
		from_cache: bool,
	) {
		let alerts = {
			let mut inner = self.lock_inner();
			let record = RequestRecord {
				endpoint: endpoint.to_owned(),
				response_time_ms,
				status_code: status.as_u16(),
				from_cache,
				timestamp: Utc::now(),
				is_error: status.as_u16() >= 400,
				recorded_at: Instant::now(),
			};

			inner.requests.push_back(record);
			inner.total_response_time_ms += response_time_ms;
			inner.request_count += 1;

			if from_cache {
				inner.cache_hits += 1;
			} else {
				inner.cache_misses += 1;
			}

			let mut alerts = Vec::new();

			if response_time_ms > self.thresholds.response_time_ms {
				alerts.push(Alert::new(
					AlertKind::SlowResponse,
					json!({
						"endpoint": endpoint,
						"responseTimeMs": response_time_ms,
						"threshold": self.thresholds.response_time_ms,
					}),
				));
			}

			let error_rate = inner.error_rate();

			if error_rate > self.thresholds.error_rate_percent {
				alerts.push(Alert::new(
					AlertKind::HighErrorRate,
					json!({
						"errorRate": error_rate,
						"threshold": self.thresholds.error_rate_percent,
					}),
				));
			}

			let cache_hit_rate = inner.cache_hit_rate();

			// Small samples are too noisy to alert on.
			if cache_hit_rate < self.thresholds.cache_hit_rate_percent && inner.request_count > 10 {
				alerts.push(Alert::new(
					AlertKind::LowCacheHitRate,
					json!({
						"cacheHitRate": cache_hit_rate,
						"threshold": self.thresholds.cache_hit_rate_percent,
					}),
				));
			}

			for alert in &alerts {
				inner.push_alert(alert.clone());
			}

			if inner.requests.len() > MAX_REQUEST_HISTORY {
				inner.requests.pop_front();
			}

			alerts
		};

		self.dispatch_all(&alerts);
	}

	/// Record a request-path error and fire an unconditional `error` alert.
	pub fn record_error(&self, endpoint: &str, error: &Error, error_type: ErrorType) {
		let alert = {
			let mut inner = self.lock_inner();

			inner.errors.push_back(ErrorRecord {
				endpoint: endpoint.to_owned(),
				message: error.to_string(),
				error_type,
				timestamp: Utc::now(),
			});

			if inner.errors.len() > MAX_ERROR_HISTORY {
				inner.errors.pop_front();
			}

			let alert = Alert::new(
				AlertKind::Error,
				json!({
					"endpoint": endpoint,
					"errorType": error_type,
					"message": error.to_string(),
				}),
			);

			inner.push_alert(alert.clone());

			alert
		};

		self.dispatch_all(std::slice::from_ref(&alert));
	}

	/// Mean latency over every recorded request, in milliseconds.
	pub fn average_response_time(&self) -> f64 {
		self.lock_inner().average_response_time()
	}

	/// Global error rate in percent.
	pub fn error_rate(&self) -> f64 {
		self.lock_inner().error_rate()
	}

	/// Global cache hit rate in percent.
	pub fn cache_hit_rate(&self) -> f64 {
		self.lock_inner().cache_hit_rate()
	}

	/// Percentage of non-error requests within the default trailing hour;
	/// returns 100 when the window holds no requests.
	pub fn uptime(&self) -> f64 {
		self.uptime_within(DEFAULT_UPTIME_WINDOW)
	}

	/// Percentage of non-error requests within the trailing window.
	pub fn uptime_within(&self, window: Duration) -> f64 {
		self.lock_inner().uptime_within(window)
	}

	/// Aggregate metrics snapshot including the last ten alerts.
	pub fn metrics(&self) -> MetricsSummary {
		let inner = self.lock_inner();

		MetricsSummary {
			request_count: inner.request_count,
			error_count: inner.errors.len(),
			cache_hits: inner.cache_hits,
			cache_misses: inner.cache_misses,
			cache_hit_rate: inner.cache_hit_rate(),
			average_response_time: inner.average_response_time(),
			error_rate: inner.error_rate(),
			uptime: inner.uptime_within(DEFAULT_UPTIME_WINDOW),
			recent_alerts: inner.alerts.iter().rev().take(10).rev().cloned().collect(),
		}
	}

	/// Most recent request records, newest last.
	pub fn recent_requests(&self, limit: usize) -> Vec<RequestRecord> {
		let inner = self.lock_inner();

		inner.requests.iter().rev().take(limit).rev().cloned().collect()
	}

	/// Most recent error records, newest last.
	pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
		let inner = self.lock_inner();

		inner.errors.iter().rev().take(limit).rev().cloned().collect()
	}

	/// Zero all counters and buffers; registered handlers are kept.
	pub fn reset(&self) {
		*self.lock_inner() = ApiMetrics::default();
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

	fn lock_inner(&self) -> MutexGuard<'_, ApiMetrics> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn lock_handlers(&self) -> MutexGuard<'_, Vec<Arc<dyn AlertHandler>>> {
		self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}
impl Default for ApiMonitor {
	fn default() -> Self {
		Self::new(ApiAlertThresholds::default())
	}
}

/// Aggregate snapshot of request-path metrics.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
	/// Total requests recorded since start or last reset.
	pub request_count: u64,
	/// Errors currently retained in the error buffer.
	pub error_count: usize,
	/// Requests served from cache.
	pub cache_hits: u64,
	/// Requests that missed the cache.
	pub cache_misses: u64,
	/// Cache hit rate in percent.
	pub cache_hit_rate: f64,
	/// Mean latency in milliseconds.
	pub average_response_time: f64,
	/// Error rate in percent.
	pub error_rate: f64,
	/// Uptime percentage over the default window.
	pub uptime: f64,
	/// Up to ten most recent alerts.
	pub recent_alerts: Vec<Alert>,
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	fn record_statuses(monitor: &ApiMonitor, statuses: &[u16]) {
		for status in statuses {
			monitor.record_request(
				"/api/states",
				10,
				StatusCode::from_u16(*status).expect("valid status"),
				false,
			);
		}
	}

	#[tokio::test]
	async fn aggregation_stays_consistent_over_any_sequence() {
		let monitor = ApiMonitor::default();
		let latencies = [12, 48, 3, 90, 47];

		for (idx, latency) in latencies.iter().enumerate() {
			monitor.record_request("/api/states", *latency, StatusCode::OK, idx % 2 == 0);
		}

		let expected = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
		let summary = monitor.metrics();

		assert_eq!(monitor.average_response_time(), expected);
		assert_eq!(summary.cache_hits + summary.cache_misses, summary.request_count);
	}

	#[tokio::test]
	async fn error_rate_counts_4xx_and_5xx() {
		let monitor = ApiMonitor::default();

		record_statuses(&monitor, &[200, 200, 404, 500]);

		assert_eq!(monitor.error_rate(), 50.);
	}

	#[tokio::test]
	async fn uptime_is_vacuously_perfect_without_requests() {
		let monitor = ApiMonitor::default();

		assert_eq!(monitor.uptime(), 100.);
	}

	#[tokio::test]
	async fn uptime_reflects_error_share_in_window() {
		let monitor = ApiMonitor::default();

		record_statuses(&monitor, &[200, 200, 200, 500]);

		assert_eq!(monitor.uptime(), 75.);
	}

	#[tokio::test]
	async fn slow_requests_raise_an_alert() {
		let monitor = ApiMonitor::default();
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();

		monitor.on_alert(Arc::new(move |alert: &Alert| -> Result<()> {
			if alert.kind == AlertKind::SlowResponse {
				counter.fetch_add(1, Ordering::SeqCst);
			}

			Ok(())
		}));

		monitor.record_request("/api/states/ca", 750, StatusCode::OK, false);
		monitor.record_request("/api/states/ca", 20, StatusCode::OK, true);

		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn low_cache_hit_rate_alert_waits_for_sample_size() {
		let monitor = ApiMonitor::default();
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();

		monitor.on_alert(Arc::new(move |alert: &Alert| -> Result<()> {
			if alert.kind == AlertKind::LowCacheHitRate {
				counter.fetch_add(1, Ordering::SeqCst);
			}

			Ok(())
		}));

		// Ten all-miss requests stay under the small-sample guard.
		record_statuses(&monitor, &[200; 10]);

		assert_eq!(seen.load(Ordering::SeqCst), 0);

		record_statuses(&monitor, &[200]);

		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn throwing_handler_does_not_starve_later_handlers() {
		let monitor = ApiMonitor::default();
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();

		monitor.on_alert(Arc::new(|_: &Alert| -> Result<()> {
			Err(crate::Error::internal("first handler broke"))
		}));
		monitor.on_alert(Arc::new(move |_: &Alert| -> Result<()> {
			counter.fetch_add(1, Ordering::SeqCst);

			Ok(())
		}));

		monitor.record_error(
			"/api/states/ca",
			&crate::Error::timeout("upstream timed out"),
			ErrorType::Timeout,
		);

		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn request_buffer_is_bounded_with_fifo_eviction() {
		let monitor = ApiMonitor::default();

		for idx in 0..(MAX_REQUEST_HISTORY + 5) {
			monitor.record_request(&format!("/api/states/{idx}"), 1, StatusCode::OK, false);
		}

		let recent = monitor.recent_requests(MAX_REQUEST_HISTORY + 5);

		assert_eq!(recent.len(), MAX_REQUEST_HISTORY);
		assert_eq!(recent[0].endpoint, "/api/states/5");
		assert_eq!(monitor.metrics().request_count, (MAX_REQUEST_HISTORY + 5) as u64);
	}

	#[tokio::test]
	async fn reset_zeroes_metrics_but_keeps_handlers() {
		let monitor = ApiMonitor::default();
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();

		monitor.on_alert(Arc::new(move |_: &Alert| -> Result<()> {
			counter.fetch_add(1, Ordering::SeqCst);

			Ok(())
		}));
		record_statuses(&monitor, &[200, 500]);
		monitor.reset();

		assert_eq!(monitor.metrics().request_count, 0);
		assert_eq!(monitor.error_rate(), 0.);

		monitor.record_request("/api/states", 900, StatusCode::OK, false);

		assert!(seen.load(Ordering::SeqCst) > 0, "handler survives reset");
	}
}
