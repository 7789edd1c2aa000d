//! State balcony-solar regulation lookup service: a read-through TTL cache in
//! front of an upstream record store, a monitoring/alerting layer for both the
//! request path and the scheduled refresh job, and the refresh pipeline that
//! reconciles freshly scraped regulations into the store and invalidates
//! dependent cache keys.

#![deny(clippy::all, missing_docs)]

pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod model;
pub mod monitoring;
pub mod pipeline;
pub mod scrape;
pub mod store;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

pub use crate::{
	cache::TtlCache,
	config::ServiceConfig,
	error::{Error, Result},
	monitoring::{
		alert::{Alert, AlertHandler, AlertKind, Severity},
		api::ApiMonitor,
		job::{JobExecutionRecord, JobMonitor, JobStatus},
	},
	pipeline::RefreshPipeline,
	store::RecordStore,
};
