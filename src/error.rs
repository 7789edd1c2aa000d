//! Crate-wide error taxonomy and `Result` alias.
//!
//! The taxonomy is a closed set of five kinds, each carrying a stable
//! machine-readable code and a default HTTP status. Upstream failures are
//! mapped into the taxonomy at the boundary rather than leaking transport
//! errors through the crate.

// crates.io
use http::StatusCode;
use serde::Serialize;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the regulation lookup service.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
	/// The requested entity does not exist (HTTP 404).
	#[error("{message}")]
	NotFound {
		/// Human-readable description of what was missing.
		message: String,
	},
	/// The caller supplied an invalid request (HTTP 400).
	#[error("{message}")]
	BadRequest {
		/// Human-readable description of the validation failure.
		message: String,
	},
	/// An outbound call exceeded its timeout budget (HTTP 504).
	#[error("{message}")]
	Timeout {
		/// Human-readable description of the timed-out operation.
		message: String,
	},
	/// The upstream store or a scrape target returned a failure (HTTP 502
	/// unless the upstream status is meaningful to preserve).
	#[error("{message}")]
	ExternalService {
		/// Human-readable description of the upstream failure.
		message: String,
		/// Status returned by the upstream, when one was received.
		upstream_status: Option<StatusCode>,
	},
	/// Unexpected internal failure (HTTP 500); the catch-all kind.
	#[error("{message}")]
	Internal {
		/// Internal diagnostic message, never exposed to API callers.
		message: String,
	},
}
impl Error {
	/// Build a [`Error::NotFound`].
	pub fn not_found(message: impl Into<String>) -> Self {
		Self::NotFound { message: message.into() }
	}

	/// Build a [`Error::BadRequest`].
	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::BadRequest { message: message.into() }
	}

	/// Build a [`Error::Timeout`].
	pub fn timeout(message: impl Into<String>) -> Self {
		Self::Timeout { message: message.into() }
	}

	/// Build a [`Error::ExternalService`], optionally preserving the status
	/// the upstream responded with.
	pub fn external(message: impl Into<String>, upstream_status: Option<StatusCode>) -> Self {
		Self::ExternalService { message: message.into(), upstream_status }
	}

	/// Build a [`Error::Internal`].
	pub fn internal(message: impl Into<String>) -> Self {
		Self::Internal { message: message.into() }
	}

	/// Stable machine-readable code for this kind.
	pub fn code(&self) -> &'static str {
		match self {
			Self::NotFound { .. } => "NOT_FOUND",
			Self::BadRequest { .. } => "BAD_REQUEST",
			Self::Timeout { .. } => "TIMEOUT",
			Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
			Self::Internal { .. } => "INTERNAL_ERROR",
		}
	}

	/// HTTP status this error maps to.
	pub fn status_code(&self) -> StatusCode {
		match self {
			Self::NotFound { .. } => StatusCode::NOT_FOUND,
			Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
			Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
			Self::ExternalService { upstream_status, .. } =>
				upstream_status.unwrap_or(StatusCode::BAD_GATEWAY),
			Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Uniform JSON envelope served to API callers.
	///
	/// Internal errors are flattened to a generic message so unexpected
	/// failures never leak diagnostics.
	pub fn envelope(&self) -> ErrorEnvelope {
		let message = match self {
			Self::Internal { .. } => "Internal server error".to_string(),
			other => other.to_string(),
		};

		ErrorEnvelope {
			error: ErrorDetail {
				message,
				code: self.code(),
				status_code: self.status_code().as_u16(),
			},
		}
	}
}
impl From<reqwest::Error> for Error {
	fn from(value: reqwest::Error) -> Self {
		if value.is_timeout() {
			Self::Timeout { message: format!("Request timed out: {value}") }
		} else {
			Self::ExternalService {
				message: format!("Request failed: {value}"),
				upstream_status: None,
			}
		}
	}
}
impl From<serde_json::Error> for Error {
	fn from(value: serde_json::Error) -> Self {
		Self::Internal { message: format!("Serialization failed: {value}") }
	}
}
impl From<url::ParseError> for Error {
	fn from(value: url::ParseError) -> Self {
		Self::BadRequest { message: format!("Invalid URL: {value}") }
	}
}

/// JSON body returned for every error response.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorEnvelope {
	/// Error payload.
	pub error: ErrorDetail,
}

/// Inner error payload of the uniform envelope.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
	/// Human-readable error message.
	pub message: String,
	/// Stable machine-readable code.
	pub code: &'static str,
	/// HTTP status mirrored into the body.
	pub status_code: u16,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn kinds_map_to_stable_codes_and_statuses() {
		let cases = [
			(Error::not_found("missing"), "NOT_FOUND", StatusCode::NOT_FOUND),
			(Error::bad_request("bad"), "BAD_REQUEST", StatusCode::BAD_REQUEST),
			(Error::timeout("slow"), "TIMEOUT", StatusCode::GATEWAY_TIMEOUT),
			(Error::external("down", None), "EXTERNAL_SERVICE_ERROR", StatusCode::BAD_GATEWAY),
			(Error::internal("boom"), "INTERNAL_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
		];

		for (error, code, status) in cases {
			assert_eq!(error.code(), code);
			assert_eq!(error.status_code(), status);
		}
	}

	#[test]
	fn external_errors_preserve_upstream_status() {
		let error = Error::external("upstream said no", Some(StatusCode::SERVICE_UNAVAILABLE));

		assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
	}

	#[test]
	fn internal_envelope_hides_diagnostics() {
		let envelope = Error::internal("secret detail").envelope();

		assert_eq!(envelope.error.message, "Internal server error");
		assert_eq!(envelope.error.code, "INTERNAL_ERROR");
		assert_eq!(envelope.error.status_code, 500);
	}
}
