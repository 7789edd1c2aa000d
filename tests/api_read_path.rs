//! End-to-end tests for the cached read path: a real HTTP server in front of
//! a mock upstream store.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use serde_json::{Value, json};
use tokio::net::TcpListener;
use url::Url;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path, query_param},
};
// self
use balcony_solar_api::{
	ApiMonitor, JobMonitor, RecordStore, TtlCache,
	analytics::AnalyticsService,
	api::{self, AppState},
	store::TableIds,
};

const ADMIN_TOKEN: &str = "test-admin-token";

fn tables() -> TableIds {
	TableIds {
		states: "tblStates".into(),
		details: "tblDetails".into(),
		resources: "tblResources".into(),
		update_log: "tblUpdateLog".into(),
	}
}

fn filter_param(field: &str, value: &str) -> String {
	json!({
		"conjunction": "and",
		"filterSet": [{ "fieldId": field, "operator": "is", "value": value }],
	})
	.to_string()
}

async fn spawn_app(store_uri: &str) -> String {
	let store = Arc::new(
		RecordStore::new(
			Url::parse(store_uri).unwrap(),
			"store-token".into(),
			tables(),
			Duration::from_secs(5),
		)
		.unwrap(),
	);
	let state = AppState {
		cache: Arc::new(TtlCache::new(Duration::from_secs(60))),
		store,
		monitor: Arc::new(ApiMonitor::default()),
		job_monitor: Arc::new(JobMonitor::default()),
		analytics: Arc::new(AnalyticsService::default()),
		pipeline: None,
		admin_token: ADMIN_TOKEN.into(),
	};
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	tokio::spawn(async move {
		axum::serve(listener, api::router(state)).await.unwrap();
	});

	format!("http://{addr}")
}

fn ca_row() -> Value {
	json!({
		"id": "recCA",
		"fields": {
			"code": "ca",
			"name": "California",
			"abbreviation": "CA",
			"isLegal": true,
			"maxWattage": 800,
			"keyLaw": "SB 709 (2024)",
		},
	})
}

#[tokio::test]
async fn list_is_served_from_cache_after_the_first_miss() {
	let upstream = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"records": [ca_row(), { "id": "recEmpty", "fields": {} }],
		})))
		.expect(1)
		.mount(&upstream)
		.await;

	let base = spawn_app(&upstream.uri()).await;
	let client = reqwest::Client::new();

	let first = client.get(format!("{base}/api/states")).send().await.unwrap();

	assert_eq!(first.status(), 200);
	assert_eq!(first.headers()["x-cache"], "MISS");
	assert_eq!(first.headers()["cache-control"], "public, max-age=60");

	let body: Value = first.json().await.unwrap();
	let states = body["states"].as_array().unwrap();

	// The incomplete row is filtered out of the projection.
	assert_eq!(states.len(), 1);
	assert_eq!(states[0]["code"], json!("ca"));

	let second = client.get(format!("{base}/api/states")).send().await.unwrap();

	assert_eq!(second.headers()["x-cache"], "HIT");

	let body: Value = second.json().await.unwrap();

	assert_eq!(body["states"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn state_lookup_assembles_details_and_resources() {
	let upstream = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.and(query_param("filter", filter_param("code", "ca")))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(json!({ "records": [ca_row()] })),
		)
		.expect(1)
		.mount(&upstream)
		.await;
	Mock::given(method("GET"))
		.and(path("/table/tblDetails/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"records": [
				{
					"id": "recD1",
					"fields": {
						"stateCode": "ca",
						"category": "permit",
						"required": false,
						"description": "No building permit required",
					},
				},
				{
					"id": "recD2",
					"fields": { "stateCode": "ny", "category": "permit", "required": true },
				},
			],
		})))
		.expect(1)
		.mount(&upstream)
		.await;
	Mock::given(method("GET"))
		.and(path("/table/tblResources/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"records": [{
				"id": "recR1",
				"fields": {
					"stateCode": "ca",
					"title": "CPUC",
					"url": "https://www.cpuc.ca.gov/",
					"resourceType": "official",
				},
			}],
		})))
		.expect(1)
		.mount(&upstream)
		.await;

	let base = spawn_app(&upstream.uri()).await;
	let client = reqwest::Client::new();

	let first = client.get(format!("{base}/api/states/ca")).send().await.unwrap();

	assert_eq!(first.status(), 200);
	assert_eq!(first.headers()["x-cache"], "MISS");

	let body: Value = first.json().await.unwrap();
	let state = &body["state"];

	assert_eq!(state["code"], json!("ca"));
	assert_eq!(state["maxWattage"], json!(800));
	assert_eq!(state["details"]["permit"]["required"], json!(false));
	// The mismatched-state detail row is filtered out.
	assert!(state["details"].as_object().unwrap().len() == 1);
	assert_eq!(state["resources"][0]["title"], json!("CPUC"));

	// Second read is a cache hit; the upstream expectations above allow only
	// one call per table.
	let second = client.get(format!("{base}/api/states/ca")).send().await.unwrap();

	assert_eq!(second.headers()["x-cache"], "HIT");
}

#[tokio::test]
async fn missing_states_are_never_cached() {
	let upstream = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
		.expect(2)
		.mount(&upstream)
		.await;

	let base = spawn_app(&upstream.uri()).await;
	let client = reqwest::Client::new();

	for _ in 0..2 {
		let response = client.get(format!("{base}/api/states/zz")).send().await.unwrap();

		assert_eq!(response.status(), 404);

		let body: Value = response.json().await.unwrap();

		assert_eq!(body["error"]["code"], json!("NOT_FOUND"));
		assert_eq!(body["error"]["message"], json!("State not found"));
	}
}

#[tokio::test]
async fn malformed_state_codes_are_rejected_without_an_upstream_call() {
	let upstream = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
		.expect(0)
		.mount(&upstream)
		.await;

	let base = spawn_app(&upstream.uri()).await;
	let client = reqwest::Client::new();

	for code in ["CA", "cal", "c1"] {
		let response = client.get(format!("{base}/api/states/{code}")).send().await.unwrap();

		assert_eq!(response.status(), 404);
	}
}

#[tokio::test]
async fn upstream_errors_surface_as_the_uniform_envelope() {
	let upstream = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&upstream)
		.await;

	let base = spawn_app(&upstream.uri()).await;
	let response = reqwest::get(format!("{base}/api/states")).await.unwrap();

	assert_eq!(response.status(), 503);

	let body: Value = response.json().await.unwrap();

	assert_eq!(body["error"]["code"], json!("EXTERNAL_SERVICE_ERROR"));
	assert_eq!(body["error"]["statusCode"], json!(503));
}

#[tokio::test]
async fn cache_invalidation_requires_the_admin_token() {
	let upstream = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [ca_row()] })))
		.expect(2)
		.mount(&upstream)
		.await;

	let base = spawn_app(&upstream.uri()).await;
	let client = reqwest::Client::new();

	// Warm the cache.
	client.get(format!("{base}/api/states")).send().await.unwrap();

	let denied = client
		.post(format!("{base}/api/cache-invalidate"))
		.bearer_auth("wrong-token")
		.json(&json!({ "pattern": null }))
		.send()
		.await
		.unwrap();

	assert_eq!(denied.status(), 401);

	// Still cached after the denied attempt.
	let cached = client.get(format!("{base}/api/states")).send().await.unwrap();

	assert_eq!(cached.headers()["x-cache"], "HIT");

	let accepted = client
		.post(format!("{base}/api/cache-invalidate"))
		.bearer_auth(ADMIN_TOKEN)
		.json(&json!({ "pattern": null }))
		.send()
		.await
		.unwrap();

	assert_eq!(accepted.status(), 200);

	let body: Value = accepted.json().await.unwrap();

	assert_eq!(body["status"], json!("cache invalidated"));

	// Next read goes back to the upstream.
	let refetched = client.get(format!("{base}/api/states")).send().await.unwrap();

	assert_eq!(refetched.headers()["x-cache"], "MISS");
}

#[tokio::test]
async fn state_pattern_invalidation_clears_entities_but_not_the_collection() {
	let upstream = MockServer::start().await;

	// Entity lookups carry a filter; the bare list does not. The filtered
	// mock is mounted first so it wins for entity reads.
	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.and(query_param("filter", filter_param("code", "ca")))
		.respond_with(
			ResponseTemplate::new(200).set_body_json(json!({ "records": [ca_row()] })),
		)
		.expect(2)
		.mount(&upstream)
		.await;
	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [ca_row()] })))
		.expect(1)
		.mount(&upstream)
		.await;
	Mock::given(method("GET"))
		.and(path("/table/tblDetails/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
		.expect(2)
		.mount(&upstream)
		.await;
	Mock::given(method("GET"))
		.and(path("/table/tblResources/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [] })))
		.expect(2)
		.mount(&upstream)
		.await;

	let base = spawn_app(&upstream.uri()).await;
	let client = reqwest::Client::new();

	// Warm both the entity key and the collection key.
	let miss = client.get(format!("{base}/api/states/ca")).send().await.unwrap();

	assert_eq!(miss.headers()["x-cache"], "MISS");

	let hit = client.get(format!("{base}/api/states/ca")).send().await.unwrap();

	assert_eq!(hit.headers()["x-cache"], "HIT");

	client.get(format!("{base}/api/states")).send().await.unwrap();

	let invalidated = client
		.post(format!("{base}/api/cache-invalidate"))
		.bearer_auth(ADMIN_TOKEN)
		.json(&json!({ "pattern": "state-" }))
		.send()
		.await
		.unwrap();

	assert_eq!(invalidated.status(), 200);

	let body: Value = invalidated.json().await.unwrap();

	assert_eq!(body["pattern"], json!("state-"));

	// The entity key is gone; the collection key survives.
	let refetched = client.get(format!("{base}/api/states/ca")).send().await.unwrap();

	assert_eq!(refetched.headers()["x-cache"], "MISS");

	let collection = client.get(format!("{base}/api/states")).send().await.unwrap();

	assert_eq!(collection.headers()["x-cache"], "HIT");
}

#[tokio::test]
async fn body_less_invalidation_is_authorized_first_and_clears_everything() {
	let upstream = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/table/tblStates/record"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "records": [ca_row()] })))
		.expect(2)
		.mount(&upstream)
		.await;

	let base = spawn_app(&upstream.uri()).await;
	let client = reqwest::Client::new();

	client.get(format!("{base}/api/states")).send().await.unwrap();

	// Auth is checked before the body, so a body-less request with a bad
	// token is a 401 rather than a parse failure.
	let denied = client
		.post(format!("{base}/api/cache-invalidate"))
		.bearer_auth("wrong-token")
		.send()
		.await
		.unwrap();

	assert_eq!(denied.status(), 401);

	let accepted = client
		.post(format!("{base}/api/cache-invalidate"))
		.bearer_auth(ADMIN_TOKEN)
		.send()
		.await
		.unwrap();

	assert_eq!(accepted.status(), 200);

	let body: Value = accepted.json().await.unwrap();

	assert_eq!(body["pattern"], json!(null));

	let refetched = client.get(format!("{base}/api/states")).send().await.unwrap();

	assert_eq!(refetched.headers()["x-cache"], "MISS");
}

#[tokio::test]
async fn health_reports_cache_and_job_state() {
	let upstream = MockServer::start().await;
	let base = spawn_app(&upstream.uri()).await;
	let response = reqwest::get(format!("{base}/api/health")).await.unwrap();

	assert_eq!(response.status(), 200);

	let body: Value = response.json().await.unwrap();

	assert_eq!(body["status"], json!("ok"));
	assert_eq!(body["cache"]["size"], json!(0));
	assert_eq!(body["cache"]["ttlMs"], json!(60_000));
	assert_eq!(body["jobs"]["isOverdue"], json!(true));
}

#[tokio::test]
async fn analytics_ingestion_and_reporting_round_trip() {
	let upstream = MockServer::start().await;
	let base = spawn_app(&upstream.uri()).await;
	let client = reqwest::Client::new();

	let recorded = client
		.post(format!("{base}/api/analytics/events"))
		.json(&json!({
			"sessionId": "s1",
			"events": [
				{ "type": "view_state", "data": { "stateCode": "ca" } },
				{ "type": "copy_link", "data": {} },
			],
		}))
		.send()
		.await
		.unwrap();

	assert_eq!(recorded.status(), 200);

	let body: Value = recorded.json().await.unwrap();

	assert_eq!(body["count"], json!(2));

	let feedback = client
		.post(format!("{base}/api/feedback"))
		.json(&json!({ "type": "rating", "rating": 4 }))
		.send()
		.await
		.unwrap();

	assert_eq!(feedback.status(), 200);

	// Reporting endpoints are gated on the admin token.
	let denied =
		client.get(format!("{base}/api/analytics/summary")).send().await.unwrap();

	assert_eq!(denied.status(), 401);

	let summary: Value = client
		.get(format!("{base}/api/analytics/summary"))
		.bearer_auth(ADMIN_TOKEN)
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();

	assert_eq!(summary["totalEvents"], json!(2));
	assert_eq!(summary["topStates"][0]["code"], json!("ca"));
	assert_eq!(summary["averageRating"], json!(4.));

	let engagement: Value = client
		.get(format!("{base}/api/analytics/engagement"))
		.bearer_auth(ADMIN_TOKEN)
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();

	assert_eq!(engagement["interactions"]["stateViews"], json!(1));
	assert_eq!(engagement["conversionRates"]["viewToShare"], json!(100.));
}

#[tokio::test]
async fn unknown_routes_return_a_bare_404() {
	let upstream = MockServer::start().await;
	let base = spawn_app(&upstream.uri()).await;
	let response = reqwest::get(format!("{base}/api/unknown")).await.unwrap();

	assert_eq!(response.status(), 404);

	let body: Value = response.json().await.unwrap();

	assert_eq!(body, json!({ "error": "Not found" }));
}
