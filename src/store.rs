//! HTTP client for the upstream record store.
//!
//! The store exposes a table/record REST surface: `GET`/`POST` on
//! `{base}/table/{tableId}/record` and `PATCH`/`DELETE` on
//! `{base}/table/{tableId}/record/{recordId}`, with list responses wrapped in
//! a `{"records": [...]}` envelope and filtering via a JSON filter object in
//! the `filter` query parameter.

// crates.io
use http::StatusCode;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;
// self
use crate::{_prelude::*, model::*};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Identifiers of the four tables the service reads and writes.
#[derive(Clone, Debug)]
pub struct TableIds {
	/// State rows.
	pub states: String,
	/// Requirement detail rows.
	pub details: String,
	/// Resource link rows.
	pub resources: String,
	/// Append-only audit log rows.
	pub update_log: String,
}

/// One stored record with its opaque identifier.
#[derive(Clone, Debug, Deserialize)]
pub struct Record<T> {
	/// Store-assigned record identifier.
	pub id: String,
	/// Typed field payload.
	pub fields: T,
}

#[derive(Debug, Deserialize)]
struct RecordPage<T> {
	#[serde(default = "Vec::new")]
	records: Vec<Record<T>>,
}

/// Typed client for the upstream record store.
///
/// Every request carries the bearer token and a per-request timeout; the API
/// read path and the pipeline write path construct separate instances with
/// different budgets.
#[derive(Clone, Debug)]
pub struct RecordStore {
	client: Client,
	base_url: Url,
	token: String,
	tables: TableIds,
	timeout: Duration,
}
impl RecordStore {
	/// Build a store client against the given base URL.
	pub fn new(base_url: Url, token: String, tables: TableIds, timeout: Duration) -> Result<Self> {
		let client = ClientBuilder::new()
			.connect_timeout(Duration::from_secs(5))
			.user_agent(USER_AGENT)
			.build()?;

		Ok(Self { client, base_url, token, tables, timeout })
	}

	/// List every state row.
	pub async fn list_states(&self) -> Result<Vec<Record<StateFields>>> {
		self.list(self.record_endpoint(&self.tables.states)?).await
	}

	/// Find the state row for a code, or `None` when no row matches.
	pub async fn find_state_by_code(&self, code: &str) -> Result<Option<Record<StateFields>>> {
		let mut url = self.record_endpoint(&self.tables.states)?;

		append_filter(&mut url, field_filter("code", code));

		let records: Vec<Record<StateFields>> = self.list(url).await?;

		// The filter is advisory; verify the match locally so a permissive
		// upstream can never hand back the wrong state.
		Ok(records.into_iter().find(|record| record.fields.code.as_deref() == Some(code)))
	}

	/// List the requirement detail rows for a state.
	pub async fn state_details(&self, code: &str) -> Result<Vec<Record<DetailFields>>> {
		let mut url = self.record_endpoint(&self.tables.details)?;

		append_filter(&mut url, field_filter("stateCode", code));

		self.list(url).await
	}

	/// List the resource link rows for a state.
	pub async fn state_resources(&self, code: &str) -> Result<Vec<Record<ResourceFields>>> {
		let mut url = self.record_endpoint(&self.tables.resources)?;

		append_filter(&mut url, field_filter("stateCode", code));

		self.list(url).await
	}

	/// Create one record, returning its store-assigned identifier.
	pub async fn create_record(&self, table: &str, fields: Value) -> Result<String> {
		let url = self.record_endpoint(table)?;
		let body = json!({ "records": [{ "fields": fields }] });
		let response = self.send(self.client.post(url).json(&body)).await?;
		let page = response.json::<RecordPage<Value>>().await?;

		page.records
			.into_iter()
			.next()
			.map(|record| record.id)
			.ok_or_else(|| Error::external("Store created no record", None))
	}

	/// Update the fields of one record.
	pub async fn update_record(&self, table: &str, record_id: &str, fields: Value) -> Result<()> {
		let url = self.single_record_endpoint(table, record_id)?;

		self.send(self.client.patch(url).json(&json!({ "fields": fields }))).await?;

		Ok(())
	}

	/// Delete one record.
	pub async fn delete_record(&self, table: &str, record_id: &str) -> Result<()> {
		let url = self.single_record_endpoint(table, record_id)?;

		self.send(self.client.delete(url)).await?;

		Ok(())
	}

	/// Append one row to the audit log table.
	pub async fn append_audit_log(&self, entry: AuditEntry) -> Result<String> {
		let table = self.tables.update_log.clone();

		self.create_record(&table, serde_json::to_value(&entry)?).await
	}

	/// Table identifiers this client was configured with.
	pub fn tables(&self) -> &TableIds {
		&self.tables
	}

	async fn list<T>(&self, url: Url) -> Result<Vec<Record<T>>>
	where
		T: DeserializeOwned,
	{
		let response = self.send(self.client.get(url)).await?;
		let page = response.json::<RecordPage<T>>().await?;

		Ok(page.records)
	}

	async fn send(&self, request: RequestBuilder) -> Result<Response> {
		let response = request.bearer_auth(&self.token).timeout(self.timeout).send().await?;
		let status = response.status();

		if status == StatusCode::NOT_FOUND {
			return Err(Error::not_found("Record not found"));
		}
		if !status.is_success() {
			return Err(Error::external(
				format!("Store responded with {status}"),
				Some(status),
			));
		}

		Ok(response)
	}

	fn record_endpoint(&self, table: &str) -> Result<Url> {
		Ok(Url::parse(&format!(
			"{}/table/{table}/record",
			self.base_url.as_str().trim_end_matches('/')
		))?)
	}

	fn single_record_endpoint(&self, table: &str, record_id: &str) -> Result<Url> {
		Ok(Url::parse(&format!(
			"{}/table/{table}/record/{record_id}",
			self.base_url.as_str().trim_end_matches('/')
		))?)
	}
}

/// One append-only audit log row describing a reconciliation outcome.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
	/// When the reconciliation decision was made.
	pub timestamp: DateTime<Utc>,
	/// State the row describes.
	pub state_code: String,
	/// What the pipeline did with the state.
	pub change_type: ChangeType,
	/// Previous field values as a JSON string, when the row changed.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub old_value: Option<String>,
	/// New field values as a JSON string.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub new_value: Option<String>,
	/// Origin of the data, typically the scrape source URL.
	pub source: String,
}

/// Reconciliation outcome recorded per state, including the no-op case so the
/// log doubles as proof each state was checked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
	/// A new state row was created.
	Created,
	/// An existing state row changed.
	Updated,
	/// The row was checked and confirmed unchanged.
	Verified,
}

fn field_filter(field: &str, value: &str) -> Value {
	json!({
		"conjunction": "and",
		"filterSet": [{ "fieldId": field, "operator": "is", "value": value }],
	})
}

fn append_filter(url: &mut Url, filter: Value) {
	url.query_pairs_mut().append_pair("filter", &filter.to_string());
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn filter_uses_the_store_filter_object_shape() {
		let filter = field_filter("code", "ca");

		assert_eq!(filter["conjunction"], json!("and"));
		assert_eq!(filter["filterSet"][0]["fieldId"], json!("code"));
		assert_eq!(filter["filterSet"][0]["operator"], json!("is"));
		assert_eq!(filter["filterSet"][0]["value"], json!("ca"));
	}

	#[test]
	fn filter_is_urlencoded_into_the_query() {
		let mut url = Url::parse("https://store.test/api/table/t1/record").expect("valid url");

		append_filter(&mut url, field_filter("stateCode", "ny"));

		let query = url.query().expect("query present");

		assert!(query.starts_with("filter=%7B"), "filter must be an encoded JSON object: {query}");
		assert!(query.contains("stateCode"));
	}

	#[test]
	fn audit_entries_serialize_with_wire_names() {
		let entry = AuditEntry {
			timestamp: Utc::now(),
			state_code: "ca".into(),
			change_type: ChangeType::Verified,
			old_value: None,
			new_value: None,
			source: "https://www.cpuc.ca.gov/balcony-solar".into(),
		};
		let value = serde_json::to_value(&entry).expect("serializable");

		assert_eq!(value["stateCode"], json!("ca"));
		assert_eq!(value["changeType"], json!("verified"));
		assert!(value.get("oldValue").is_none());
	}

	#[test]
	fn record_pages_tolerate_a_missing_records_field() {
		let page: RecordPage<StateFields> = serde_json::from_str("{}").expect("deserializable");

		assert!(page.records.is_empty());
	}
}
