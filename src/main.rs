//! Service binary: wires the cache, store clients, monitors, refresh
//! pipeline, and HTTP API together and runs the scheduled background tasks.

// std
use std::sync::Arc;
// crates.io
use tokio::{net::TcpListener, time};
use tracing_subscriber::EnvFilter;
use url::Url;
// self
use balcony_solar_api::{
	ApiMonitor, JobMonitor, RecordStore, RefreshPipeline, ServiceConfig, TtlCache,
	analytics::AnalyticsService,
	api::{self, AppState},
	monitoring::alert::TracingAlertHandler,
	pipeline::{CacheInvalidator, WebhookNotifier},
	scrape::RegulationScraper,
	store::TableIds,
};

// The read path needs to stay snappy; the pipeline can afford slower store
// writes.
const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const WRITE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let config = ServiceConfig::from_env()?;
	let tables = TableIds {
		states: config.table_states.clone(),
		details: config.table_details.clone(),
		resources: config.table_resources.clone(),
		update_log: config.table_update_log.clone(),
	};
	let cache = Arc::new(TtlCache::new(config.cache_ttl));
	let monitor = Arc::new(ApiMonitor::default());
	let job_monitor = Arc::new(JobMonitor::default());
	let analytics = Arc::new(AnalyticsService::default());

	monitor.on_alert(Arc::new(TracingAlertHandler));
	job_monitor.on_alert(Arc::new(TracingAlertHandler));

	let read_store = Arc::new(RecordStore::new(
		config.store_api_url.clone(),
		config.store_api_token.clone(),
		tables.clone(),
		READ_TIMEOUT,
	)?);
	let write_store = Arc::new(RecordStore::new(
		config.store_api_url.clone(),
		config.store_api_token.clone(),
		tables,
		WRITE_TIMEOUT,
	)?);

	// Bind before building the pipeline so the invalidation endpoint can
	// default to this process's own address.
	let listener = TcpListener::bind(config.listen).await?;
	let local_addr = listener.local_addr()?;
	let invalidate_url = match &config.cache_invalidate_url {
		Some(url) => url.clone(),
		None => Url::parse(&format!("http://{local_addr}/api/cache-invalidate"))?,
	};
	let pipeline = Arc::new(RefreshPipeline::new(
		write_store,
		RegulationScraper::with_default_sources()?,
		CacheInvalidator::new(invalidate_url, config.admin_token.clone())?,
		WebhookNotifier::new(config.alert_webhook_url.clone())?,
		job_monitor.clone(),
	));
	let state = AppState {
		cache: cache.clone(),
		store: read_store,
		monitor,
		job_monitor: job_monitor.clone(),
		analytics,
		pipeline: Some(pipeline.clone()),
		admin_token: config.admin_token.clone(),
	};

	tokio::spawn(refresh_loop(pipeline, config.refresh_interval));
	tokio::spawn(cleanup_loop(cache, job_monitor, config.cleanup_interval));

	tracing::info!(addr = %local_addr, "listening");
	axum::serve(listener, api::router(state)).with_graceful_shutdown(shutdown_signal()).await?;

	Ok(())
}

/// Run the refresh pipeline on a fixed interval, starting one interval from
/// now rather than immediately.
async fn refresh_loop(pipeline: Arc<RefreshPipeline>, interval: std::time::Duration) {
	let mut ticker = time::interval(interval);

	// The first tick fires immediately; the initial refresh should wait a
	// full interval like every other run.
	ticker.tick().await;

	loop {
		ticker.tick().await;

		if let Err(err) = pipeline.run().await {
			tracing::error!(error = %err, "scheduled refresh failed");
		}
	}
}

/// Periodically sweep expired cache entries and check job staleness.
async fn cleanup_loop(
	cache: Arc<TtlCache>,
	job_monitor: Arc<JobMonitor>,
	interval: std::time::Duration,
) {
	let mut ticker = time::interval(interval);

	ticker.tick().await;

	loop {
		ticker.tick().await;

		let removed = cache.cleanup().await;

		if removed > 0 {
			tracing::info!(removed, "cache cleanup");
		}

		job_monitor.check_overdue();
	}
}

async fn shutdown_signal() {
	if let Err(err) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %err, "failed to listen for shutdown signal");
	}

	tracing::info!("shutting down");
}
