//! Scheduled refresh pipeline: scrape every configured state, reconcile the
//! results into the upstream store, invalidate dependent cache keys, and
//! record the run with the job monitor.
//!
//! Failures are contained per state so one broken source or store row never
//! blocks the rest of the run; the run itself only fails on infrastructure
//! errors outside the per-state loop.

// crates.io
use reqwest::{Client, ClientBuilder};
use serde_json::{Value, json};
use url::Url;
// self
use crate::{
	_prelude::*,
	cache,
	model::{ScrapedState, StateDetail, StateResource},
	monitoring::job::{JobExecutionRecord, JobMonitor},
	scrape::RegulationScraper,
	store::{AuditEntry, ChangeType, RecordStore},
};

/// Budget for invalidation and webhook calls.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
const AUDIT_SOURCE: &str = "scraper_worker";

/// Calls the serving API's cache-invalidation endpoint after a refresh.
pub struct CacheInvalidator {
	client: Client,
	endpoint: Url,
	token: String,
}
impl CacheInvalidator {
	/// Build an invalidator for the given endpoint.
	pub fn new(endpoint: Url, token: String) -> Result<Self> {
		Ok(Self { client: ClientBuilder::new().build()?, endpoint, token })
	}

	/// Invalidate keys matching the pattern, returning whether the call
	/// succeeded. Failures are logged, never propagated; the caller records
	/// the outcome in the job summary instead.
	pub async fn invalidate(&self, pattern: &str) -> bool {
		let response = self
			.client
			.post(self.endpoint.clone())
			.bearer_auth(&self.token)
			.timeout(NOTIFY_TIMEOUT)
			.json(&json!({ "pattern": pattern }))
			.send()
			.await;

		match response {
			Ok(response) if response.status().is_success() => {
				tracing::info!(pattern, "cache invalidated");

				true
			},
			Ok(response) => {
				tracing::warn!(status = %response.status(), "cache invalidation failed");

				false
			},
			Err(err) => {
				tracing::warn!(error = %err, "cache invalidation failed");

				false
			},
		}
	}
}

/// Posts job summaries to an operator webhook when a run has errors.
pub struct WebhookNotifier {
	client: Client,
	url: Option<Url>,
}
impl WebhookNotifier {
	/// Build a notifier; `None` disables notification entirely.
	pub fn new(url: Option<Url>) -> Result<Self> {
		Ok(Self { client: ClientBuilder::new().build()?, url })
	}

	/// Fire-and-forget delivery; a failed webhook is logged and dropped so
	/// notification problems never affect the pipeline outcome.
	pub async fn notify(&self, payload: &Value) {
		let Some(url) = &self.url else {
			tracing::debug!("no webhook configured, dropping notification");

			return;
		};

		if let Err(err) =
			self.client.post(url.clone()).timeout(NOTIFY_TIMEOUT).json(payload).send().await
		{
			tracing::warn!(error = %err, "webhook notification failed");
		}
	}
}

enum SyncAction {
	Created,
	Updated,
	Verified,
}

/// Orchestrates one full refresh: scrape, reconcile, invalidate, record.
pub struct RefreshPipeline {
	store: Arc<RecordStore>,
	scraper: RegulationScraper,
	invalidator: CacheInvalidator,
	notifier: WebhookNotifier,
	monitor: Arc<JobMonitor>,
}
impl RefreshPipeline {
	/// Assemble a pipeline from its collaborators.
	pub fn new(
		store: Arc<RecordStore>,
		scraper: RegulationScraper,
		invalidator: CacheInvalidator,
		notifier: WebhookNotifier,
		monitor: Arc<JobMonitor>,
	) -> Self {
		Self { store, scraper, invalidator, notifier, monitor }
	}

	/// Execute one refresh run and return its summary record.
	pub async fn run(&self) -> Result<JobExecutionRecord> {
		let started = Instant::now();
		let job_id = format!("scraper-{}", Utc::now().to_rfc3339());

		tracing::info!(job_id, "starting refresh run");

		match self.run_inner(&job_id, started).await {
			Ok(record) => Ok(record),
			Err(err) => {
				tracing::error!(job_id, error = %err, "fatal error in refresh run");
				self.notifier
					.notify(&json!({
						"jobId": job_id,
						"timestamp": Utc::now(),
						"executionTimeMs": started.elapsed().as_millis() as u64,
						"error": err.to_string(),
						"stage": "fatal",
					}))
					.await;

				Err(err)
			},
		}
	}

	async fn run_inner(&self, job_id: &str, started: Instant) -> Result<JobExecutionRecord> {
		let outcome = self.scraper.scrape_all().await;
		let scrape_errors: Vec<String> = outcome
			.errors
			.iter()
			.map(|failure| format!("{}: {}", failure.state, failure.message))
			.collect();
		let mut created = 0;
		let mut updated = 0;
		let mut update_errors = Vec::new();

		for state in &outcome.results {
			match self.sync_state(state).await {
				Ok(SyncAction::Created) => created += 1,
				Ok(SyncAction::Updated) => updated += 1,
				Ok(SyncAction::Verified) => {},
				Err(err) => {
					tracing::error!(state = state.code, error = %err, "state sync failed");

					update_errors.push(format!("{}: Update failed: {err}", state.code));
				},
			}
		}

		let cache_invalidated = self.invalidator.invalidate(cache::STATE_KEY_PREFIX).await;
		let record = JobExecutionRecord::new(
			job_id,
			started.elapsed(),
			outcome.results.len(),
			created,
			updated,
			scrape_errors,
			update_errors,
			cache_invalidated,
		);

		tracing::info!(
			job_id,
			status = ?record.status,
			processed = record.states_processed,
			errors = record.total_errors,
			"refresh run finished",
		);
		self.monitor.record_job_execution(record.clone());

		if !record.update_errors.is_empty() {
			self.notifier.notify(&serde_json::to_value(&record)?).await;
		}

		Ok(record)
	}

	/// Reconcile one scraped state into the store: upsert the state row,
	/// upsert its detail rows by category, and replace its resource rows.
	async fn sync_state(&self, state: &ScrapedState) -> Result<SyncAction> {
		let action = self.sync_state_row(state).await?;

		self.sync_details(&state.code, &state.details).await?;
		self.sync_resources(&state.code, &state.resources).await?;

		Ok(action)
	}

	async fn sync_state_row(&self, state: &ScrapedState) -> Result<SyncAction> {
		let tables = self.store.tables().clone();
		let existing = self.store.find_state_by_code(&state.code).await?;
		let Some(existing) = existing else {
			self.store
				.create_record(
					&tables.states,
					json!({
						"code": state.code,
						"name": state.name,
						"abbreviation": state.abbreviation,
						"isLegal": state.is_legal,
						"maxWattage": state.max_wattage,
						"keyLaw": state.key_law,
						"lastUpdated": Utc::now().to_rfc3339(),
						"dataSource": state.data_source,
					}),
				)
				.await?;
			self.store
				.append_audit_log(AuditEntry {
					timestamp: Utc::now(),
					state_code: state.code.clone(),
					change_type: ChangeType::Created,
					old_value: None,
					new_value: Some(state_row_json(state)?),
					source: AUDIT_SOURCE.to_owned(),
				})
				.await?;
			tracing::info!(state = state.code, "created state record");

			return Ok(SyncAction::Created);
		};
		let fields = &existing.fields;
		let has_changes = fields.is_legal != Some(state.is_legal)
			|| fields.max_wattage != Some(state.max_wattage)
			|| fields.key_law.as_deref() != Some(&state.key_law);

		if has_changes {
			self.store
				.update_record(
					&tables.states,
					&existing.id,
					json!({
						"isLegal": state.is_legal,
						"maxWattage": state.max_wattage,
						"keyLaw": state.key_law,
						"lastUpdated": Utc::now().to_rfc3339(),
						"dataSource": state.data_source,
					}),
				)
				.await?;
			self.store
				.append_audit_log(AuditEntry {
					timestamp: Utc::now(),
					state_code: state.code.clone(),
					change_type: ChangeType::Updated,
					old_value: Some(serde_json::to_string(fields)?),
					new_value: Some(state_row_json(state)?),
					source: AUDIT_SOURCE.to_owned(),
				})
				.await?;
			tracing::info!(state = state.code, "updated state record");

			Ok(SyncAction::Updated)
		} else {
			// Unchanged rows are still logged so the audit trail proves every
			// state was checked on every run.
			self.store
				.append_audit_log(AuditEntry {
					timestamp: Utc::now(),
					state_code: state.code.clone(),
					change_type: ChangeType::Verified,
					old_value: Some(serde_json::to_string(fields)?),
					new_value: Some(state_row_json(state)?),
					source: AUDIT_SOURCE.to_owned(),
				})
				.await?;
			tracing::debug!(state = state.code, "verified state record");

			Ok(SyncAction::Verified)
		}
	}

	async fn sync_details(
		&self,
		code: &str,
		details: &std::collections::BTreeMap<String, StateDetail>,
	) -> Result<()> {
		let tables = self.store.tables().clone();
		let existing = self.store.state_details(code).await?;

		for (category, detail) in details {
			let matched = existing
				.iter()
				.find(|record| record.fields.category.as_deref() == Some(category));

			match matched {
				Some(record) =>
					self.store
						.update_record(
							&tables.details,
							&record.id,
							json!({
								"required": detail.required,
								"description": detail.description,
							}),
						)
						.await?,
				None => {
					self.store
						.create_record(
							&tables.details,
							json!({
								"stateCode": code,
								"category": category,
								"required": detail.required,
								"description": detail.description,
							}),
						)
						.await?;
				},
			}
		}

		Ok(())
	}

	async fn sync_resources(&self, code: &str, resources: &[StateResource]) -> Result<()> {
		let tables = self.store.tables().clone();

		// Resources carry no stable identity, so replacement is simpler and
		// safer than diffing.
		for record in self.store.state_resources(code).await? {
			self.store.delete_record(&tables.resources, &record.id).await?;
		}
		for resource in resources {
			self.store
				.create_record(
					&tables.resources,
					json!({
						"stateCode": code,
						"title": resource.title,
						"url": resource.url,
						"resourceType": resource.resource_type,
					}),
				)
				.await?;
		}

		Ok(())
	}
}

fn state_row_json(state: &ScrapedState) -> Result<String> {
	Ok(json!({
		"code": state.code,
		"name": state.name,
		"abbreviation": state.abbreviation,
		"isLegal": state.is_legal,
		"maxWattage": state.max_wattage,
		"keyLaw": state.key_law,
		"dataSource": state.data_source,
		"scrapedAt": state.scraped_at,
	})
	.to_string())
}
