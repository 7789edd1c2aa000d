//! Alert types and the observer interface shared by both monitors.

// crates.io
use serde::{Deserialize, Serialize};
use serde_json::Value;
// self
use crate::_prelude::*;

/// Alert categories raised by the monitors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
	/// A single request exceeded the response-time threshold.
	SlowResponse,
	/// The global (or per-job) error rate exceeded its threshold.
	HighErrorRate,
	/// The cache hit rate dropped below its threshold.
	LowCacheHitRate,
	/// A refresh job exceeded the execution-time threshold.
	SlowExecution,
	/// A refresh job accumulated more errors than the threshold allows.
	HighErrorCount,
	/// A refresh job failed outright.
	JobFailure,
	/// Upstream data was refreshed but the dependent cache was not
	/// invalidated; stale reads will follow.
	CacheInvalidationFailed,
	/// No successful refresh has happened within the expected window.
	JobOverdue,
	/// A recorded request-path error.
	Error,
}
impl AlertKind {
	/// Static severity lookup; kinds outside the table default to `Info`.
	pub fn severity(self) -> Severity {
		match self {
			Self::SlowExecution => Severity::Warning,
			Self::HighErrorCount | Self::HighErrorRate => Severity::Error,
			Self::JobFailure | Self::CacheInvalidationFailed | Self::JobOverdue =>
				Severity::Critical,
			_ => Severity::Info,
		}
	}
}

/// Severity levels attached to alerts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	/// Informational; no action required.
	Info,
	/// Degradation worth watching.
	Warning,
	/// Threshold breach requiring attention.
	Error,
	/// Data-freshness or liveness failure.
	Critical,
}

/// Ephemeral notification pushed to registered handlers.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
	/// Alert category.
	#[serde(rename = "type")]
	pub kind: AlertKind,
	/// Free-form context for the alert.
	pub details: Value,
	/// When the alert fired.
	pub timestamp: DateTime<Utc>,
	/// Severity derived from the kind.
	pub severity: Severity,
}
impl Alert {
	/// Build an alert, deriving severity and timestamp.
	pub fn new(kind: AlertKind, details: Value) -> Self {
		Self { kind, details, timestamp: Utc::now(), severity: kind.severity() }
	}
}

/// Observer invoked synchronously for every alert.
pub trait AlertHandler: Send + Sync {
	/// Handle one alert; a returned error is logged and never propagated.
	fn handle(&self, alert: &Alert) -> Result<()>;
}
impl<F> AlertHandler for F
where
	F: Fn(&Alert) -> Result<()> + Send + Sync,
{
	fn handle(&self, alert: &Alert) -> Result<()> {
		self(alert)
	}
}

/// Handler that forwards alerts into the tracing pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAlertHandler;
impl AlertHandler for TracingAlertHandler {
	fn handle(&self, alert: &Alert) -> Result<()> {
		match alert.severity {
			Severity::Critical | Severity::Error => {
				tracing::error!(kind = ?alert.kind, details = %alert.details, "alert");
			},
			Severity::Warning => {
				tracing::warn!(kind = ?alert.kind, details = %alert.details, "alert");
			},
			Severity::Info => {
				tracing::info!(kind = ?alert.kind, details = %alert.details, "alert");
			},
		}

		Ok(())
	}
}

/// Invoke every handler for the alert, isolating failures so one bad
/// consumer never blocks the rest.
pub(crate) fn dispatch(handlers: &[Arc<dyn AlertHandler>], alert: &Alert) {
	for handler in handlers {
		if let Err(err) = handler.handle(alert) {
			tracing::error!(kind = ?alert.kind, error = %err, "alert handler failed");
		}
	}
}
