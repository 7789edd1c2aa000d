//! Environment-driven service configuration.

// std
use std::{env, net::SocketAddr, str::FromStr};
// crates.io
use url::Url;
// self
use crate::_prelude::*;

/// Runtime configuration assembled from the process environment.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
	/// Socket the API binds to.
	pub listen: SocketAddr,
	/// Base URL of the upstream record store.
	pub store_api_url: Url,
	/// Bearer token for the upstream record store.
	pub store_api_token: String,
	/// Table identifier for state rows.
	pub table_states: String,
	/// Table identifier for detail rows.
	pub table_details: String,
	/// Table identifier for resource rows.
	pub table_resources: String,
	/// Table identifier for audit log rows.
	pub table_update_log: String,
	/// Response cache TTL.
	pub cache_ttl: Duration,
	/// Bearer token guarding the internal endpoints.
	pub admin_token: String,
	/// Interval between scheduled refresh runs.
	pub refresh_interval: Duration,
	/// Interval between cache cleanup sweeps.
	pub cleanup_interval: Duration,
	/// Cache invalidation endpoint the pipeline calls; defaults to this
	/// process's own endpoint.
	pub cache_invalidate_url: Option<Url>,
	/// Webhook notified when a refresh run has errors.
	pub alert_webhook_url: Option<Url>,
}
impl ServiceConfig {
	/// Read configuration from the environment.
	///
	/// `STORE_API_URL` and `STORE_API_TOKEN` are required; everything else
	/// has a sensible default.
	pub fn from_env() -> Result<Self> {
		let host = env::var("SOLAR_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_owned());
		let port = parse_or("SOLAR_API_PORT", 8080_u16)?;
		let listen = SocketAddr::from_str(&format!("{host}:{port}"))
			.map_err(|err| Error::bad_request(format!("Invalid listen address: {err}")))?;

		Ok(Self {
			listen,
			store_api_url: Url::parse(&required("STORE_API_URL")?)?,
			store_api_token: required("STORE_API_TOKEN")?,
			table_states: env::var("STORE_TABLE_STATES").unwrap_or_else(|_| "states".to_owned()),
			table_details: env::var("STORE_TABLE_DETAILS").unwrap_or_else(|_| "details".to_owned()),
			table_resources: env::var("STORE_TABLE_RESOURCES")
				.unwrap_or_else(|_| "resources".to_owned()),
			table_update_log: env::var("STORE_TABLE_UPDATE_LOG")
				.unwrap_or_else(|_| "update_log".to_owned()),
			cache_ttl: Duration::from_secs(parse_or("CACHE_TTL_SECS", 86_400)?),
			admin_token: required("ADMIN_TOKEN")?,
			refresh_interval: Duration::from_secs(parse_or("REFRESH_INTERVAL_SECS", 604_800)?),
			cleanup_interval: Duration::from_secs(parse_or("CLEANUP_INTERVAL_SECS", 3_600)?),
			cache_invalidate_url: optional_url("CACHE_INVALIDATE_URL")?,
			alert_webhook_url: optional_url("ALERT_WEBHOOK_URL")?,
		})
	}
}

fn required(key: &str) -> Result<String> {
	env::var(key).map_err(|_| Error::bad_request(format!("Missing required env var: {key}")))
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match env::var(key) {
		Ok(value) => value
			.parse()
			.map_err(|err| Error::bad_request(format!("Invalid value for {key}: {err}"))),
		Err(_) => Ok(default),
	}
}

fn optional_url(key: &str) -> Result<Option<Url>> {
	match env::var(key) {
		Ok(value) if !value.is_empty() => Ok(Some(Url::parse(&value)?)),
		_ => Ok(None),
	}
}
