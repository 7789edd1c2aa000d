//! HTTP API: read-through cached state lookups, health, cache invalidation,
//! analytics ingestion and reporting, and the manual refresh trigger.

// std
use std::collections::BTreeMap;
// crates.io
use axum::{
	Json, Router,
	extract::{Path, Query, Request, State},
	http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
// self
use crate::{
	_prelude::*,
	analytics::{AnalyticsEvent, AnalyticsService, FeedbackEntry},
	cache::{self, TtlCache},
	model::{StateDetail, StateRecord, StateResource, StateSummary},
	monitoring::{api::{ApiMonitor, ErrorType}, job::JobMonitor},
	pipeline::RefreshPipeline,
	store::RecordStore,
};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared handler dependencies.
#[derive(Clone)]
pub struct AppState {
	/// Response cache for the read path.
	pub cache: Arc<TtlCache>,
	/// Upstream store client with the read-path timeout budget.
	pub store: Arc<RecordStore>,
	/// Request-path monitor.
	pub monitor: Arc<ApiMonitor>,
	/// Refresh-job monitor, surfaced through the health endpoint.
	pub job_monitor: Arc<JobMonitor>,
	/// Usage analytics store.
	pub analytics: Arc<AnalyticsService>,
	/// Refresh pipeline behind the manual trigger; absent in read-only
	/// deployments.
	pub pipeline: Option<Arc<RefreshPipeline>>,
	/// Bearer token guarding the internal endpoints.
	pub admin_token: String,
}

/// Build the service router with CORS, tracing, and request metrics applied.
pub fn router(state: AppState) -> Router {
	let cors = CorsLayer::new()
		.allow_origin(Any)
		.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
		.allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

	Router::new()
		.route("/api/states", get(list_states))
		.route("/api/states/:code", get(get_state))
		.route("/api/health", get(health))
		.route("/api/cache-invalidate", post(cache_invalidate))
		.route("/api/analytics/events", post(record_events))
		.route("/api/feedback", post(record_feedback))
		.route("/api/analytics/summary", get(analytics_summary))
		.route("/api/analytics/engagement", get(engagement_metrics))
		.route("/api/analytics/feedback", get(feedback_summary))
		.route("/scrape", post(trigger_scrape))
		.fallback(not_found)
		.layer(middleware::from_fn_with_state(state.clone(), track_metrics))
		.layer(cors)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		(self.status_code(), Json(self.envelope())).into_response()
	}
}

/// Records every request's endpoint, latency, status, and cache outcome.
async fn track_metrics(State(state): State<AppState>, request: Request, next: Next) -> Response {
	let endpoint = request.uri().path().to_owned();
	let started = Instant::now();
	let response = next.run(request).await;
	let from_cache =
		response.headers().get(&X_CACHE).is_some_and(|value| value.as_bytes() == b"HIT");

	state.monitor.record_request(
		&endpoint,
		started.elapsed().as_millis() as u64,
		response.status(),
		from_cache,
	);

	response
}

async fn list_states(State(state): State<AppState>) -> Result<Response> {
	if let Some(cached) = state.cache.get(cache::COLLECTION_KEY).await {
		return Ok(cached_json(&state, json!({ "states": cached }), true));
	}

	let records = match state.store.list_states().await {
		Ok(records) => records,
		Err(err) => {
			state.monitor.record_error("/api/states", &err, ErrorType::from(&err));

			return Err(err);
		},
	};
	let states: Vec<StateSummary> = records
		.into_iter()
		.filter_map(|record| StateSummary::from_fields(record.fields))
		.collect();
	let value = serde_json::to_value(&states)?;

	state.cache.set(cache::COLLECTION_KEY, value.clone()).await;

	Ok(cached_json(&state, json!({ "states": value }), false))
}

async fn get_state(State(state): State<AppState>, Path(code): Path<String>) -> Result<Response> {
	if !valid_state_code(&code) {
		return Err(Error::not_found("Not found"));
	}

	let key = cache::state_key(&code);

	if let Some(cached) = state.cache.get(&key).await {
		return Ok(cached_json(&state, json!({ "state": cached }), true));
	}

	let record = match load_state(&state, &code).await {
		Ok(record) => record,
		Err(err) => {
			state.monitor.record_error(&format!("/api/states/{code}"), &err, ErrorType::from(&err));

			return Err(err);
		},
	};
	// Missing states are never cached; a later refresh may add them.
	let Some(record) = record else {
		return Err(Error::not_found("State not found"));
	};
	let value = serde_json::to_value(&record)?;

	state.cache.set(key, value.clone()).await;

	Ok(cached_json(&state, json!({ "state": value }), false))
}

/// Assemble the full projection for one state from its three tables.
async fn load_state(state: &AppState, code: &str) -> Result<Option<StateRecord>> {
	let Some(row) = state.store.find_state_by_code(code).await? else {
		return Ok(None);
	};
	let Some(summary) = StateSummary::from_fields(row.fields) else {
		return Ok(None);
	};
	let mut details = BTreeMap::new();

	for record in state.store.state_details(code).await? {
		let fields = record.fields;

		if fields.state_code.as_deref() != Some(code) {
			continue;
		}
		if let Some(category) = fields.category {
			details.insert(category, StateDetail {
				required: fields.required.unwrap_or(false),
				description: fields.description.unwrap_or_default(),
			});
		}
	}

	let resources = state
		.store
		.state_resources(code)
		.await?
		.into_iter()
		.filter(|record| record.fields.state_code.as_deref() == Some(code))
		.map(|record| StateResource {
			title: record.fields.title.unwrap_or_default(),
			url: record.fields.url.unwrap_or_default(),
			resource_type: record.fields.resource_type.unwrap_or_default(),
		})
		.collect();

	Ok(Some(StateRecord { summary, details, resources }))
}

async fn health(State(state): State<AppState>) -> Response {
	let body = json!({
		"status": "ok",
		"timestamp": Utc::now(),
		"cache": state.cache.stats().await,
		"metrics": state.monitor.metrics(),
		"jobs": state.job_monitor.job_stats(),
	});

	Json(body).into_response()
}

#[derive(Deserialize)]
struct InvalidateBody {
	#[serde(default)]
	pattern: Option<String>,
}

async fn cache_invalidate(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: Option<Json<InvalidateBody>>,
) -> Response {
	if !authorized(&state, &headers) {
		return unauthorized();
	}

	// A missing or malformed body means a full clear, same as a null pattern.
	let pattern = body.and_then(|Json(body)| body.pattern);

	state.cache.invalidate(pattern.as_deref()).await;
	tracing::info!(pattern = ?pattern, "cache invalidated via api");

	Json(json!({
		"status": "cache invalidated",
		"pattern": pattern,
		"timestamp": Utc::now(),
	}))
	.into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventBatch {
	session_id: String,
	events: Vec<AnalyticsEvent>,
}

async fn record_events(
	State(state): State<AppState>,
	body: Option<Json<EventBatch>>,
) -> Result<Response> {
	let Some(Json(batch)) = body else {
		return Err(Error::bad_request("Invalid request body"));
	};
	let count = batch.events.len();

	state.analytics.record_events(&batch.session_id, batch.events);

	Ok(Json(json!({
		"status": "events recorded",
		"count": count,
		"timestamp": Utc::now(),
	}))
	.into_response())
}

async fn record_feedback(
	State(state): State<AppState>,
	body: Option<Json<FeedbackEntry>>,
) -> Result<Response> {
	let Some(Json(entry)) = body else {
		return Err(Error::bad_request("Failed to record feedback"));
	};

	state.analytics.record_feedback(entry);

	Ok(Json(json!({ "status": "feedback recorded", "timestamp": Utc::now() })).into_response())
}

#[derive(Deserialize)]
struct WindowQuery {
	/// Reporting window in milliseconds.
	#[serde(default)]
	window: Option<u64>,
}
impl WindowQuery {
	fn duration(&self) -> Duration {
		self.window.map_or(crate::analytics::DEFAULT_WINDOW, Duration::from_millis)
	}
}

async fn analytics_summary(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(query): Query<WindowQuery>,
) -> Response {
	if !authorized(&state, &headers) {
		return unauthorized();
	}

	Json(state.analytics.analytics_summary(query.duration())).into_response()
}

async fn engagement_metrics(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(query): Query<WindowQuery>,
) -> Response {
	if !authorized(&state, &headers) {
		return unauthorized();
	}

	Json(state.analytics.engagement_metrics(query.duration())).into_response()
}

async fn feedback_summary(
	State(state): State<AppState>,
	headers: HeaderMap,
	Query(query): Query<WindowQuery>,
) -> Response {
	if !authorized(&state, &headers) {
		return unauthorized();
	}

	Json(state.analytics.feedback_summary(query.duration())).into_response()
}

/// Manual refresh trigger, equivalent to one scheduled run.
async fn trigger_scrape(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
	if !authorized(&state, &headers) {
		return Ok(unauthorized());
	}

	let Some(pipeline) = &state.pipeline else {
		return Err(Error::internal("Refresh pipeline is not configured"));
	};
	let record = pipeline.run().await?;

	Ok(Json(serde_json::to_value(&record)?).into_response())
}

async fn not_found() -> Response {
	(StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

fn cached_json(state: &AppState, body: Value, from_cache: bool) -> Response {
	let mut response = Json(body).into_response();
	let headers = response.headers_mut();

	headers.insert(X_CACHE, HeaderValue::from_static(if from_cache { "HIT" } else { "MISS" }));

	if let Ok(value) =
		HeaderValue::from_str(&format!("public, max-age={}", state.cache.ttl().as_secs()))
	{
		headers.insert(header::CACHE_CONTROL, value);
	}

	response
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
	headers
		.get(header::AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "))
		.is_some_and(|token| !state.admin_token.is_empty() && token == state.admin_token)
}

fn unauthorized() -> Response {
	(StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
}

fn valid_state_code(code: &str) -> bool {
	code.len() == 2 && code.bytes().all(|byte| byte.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn state_codes_must_be_two_lowercase_letters() {
		assert!(valid_state_code("ca"));
		assert!(valid_state_code("ny"));
		assert!(!valid_state_code("CA"));
		assert!(!valid_state_code("cal"));
		assert!(!valid_state_code("c"));
		assert!(!valid_state_code("c1"));
	}

	#[test]
	fn window_query_defaults_to_a_day() {
		let query = WindowQuery { window: None };

		assert_eq!(query.duration(), Duration::from_secs(24 * 60 * 60));
		assert_eq!(WindowQuery { window: Some(5_000) }.duration(), Duration::from_secs(5));
	}
}
