//! Domain types shared between the upstream store, the scraper, and the API
//! projections.
//!
//! Wire field names follow the upstream store schema (camelCase).

// std
use std::collections::BTreeMap;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// State row as stored upstream; incomplete rows are tolerated and filtered
/// out of API projections.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFields {
	/// Two-letter lowercase state code.
	pub code: Option<String>,
	/// Full state name.
	pub name: Option<String>,
	/// Uppercase postal abbreviation.
	pub abbreviation: Option<String>,
	/// Whether balcony solar devices are legal in the state.
	pub is_legal: Option<bool>,
	/// Maximum permitted wattage, when a cap applies.
	pub max_wattage: Option<u32>,
	/// Statute or rule governing balcony solar in the state.
	pub key_law: Option<String>,
	/// Timestamp of the last refresh that touched this row.
	pub last_updated: Option<String>,
	/// URL of the authoritative source the row was derived from.
	pub data_source: Option<String>,
}

/// Summary projection served by the collection endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
	/// Two-letter lowercase state code.
	pub code: String,
	/// Full state name.
	pub name: String,
	/// Uppercase postal abbreviation.
	pub abbreviation: Option<String>,
	/// Whether balcony solar devices are legal in the state.
	pub is_legal: Option<bool>,
	/// Maximum permitted wattage, when a cap applies.
	pub max_wattage: Option<u32>,
	/// Statute or rule governing balcony solar in the state.
	pub key_law: Option<String>,
	/// Timestamp of the last refresh that touched this row.
	pub last_updated: Option<String>,
}
impl StateSummary {
	/// Project a store row into a summary; rows missing a code or name are
	/// rejected as incomplete.
	pub fn from_fields(fields: StateFields) -> Option<Self> {
		let code = fields.code.filter(|code| !code.is_empty())?;
		let name = fields.name.filter(|name| !name.is_empty())?;

		Some(Self {
			code,
			name,
			abbreviation: fields.abbreviation,
			is_legal: fields.is_legal,
			max_wattage: fields.max_wattage,
			key_law: fields.key_law,
			last_updated: fields.last_updated,
		})
	}
}

/// Full state projection served by the entity endpoint, with nested detail
/// categories and resources.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
	/// Summary fields of the state.
	#[serde(flatten)]
	pub summary: StateSummary,
	/// Detail categories keyed by category name (interconnection, permit,
	/// outlet, special_notes).
	pub details: BTreeMap<String, StateDetail>,
	/// External resources about the state's rules.
	pub resources: Vec<StateResource>,
}

/// One requirement category for a state.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateDetail {
	/// Whether the requirement applies.
	pub required: bool,
	/// Explanation of the requirement.
	pub description: String,
}

/// External resource link for a state.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateResource {
	/// Display title.
	pub title: String,
	/// Resource URL.
	pub url: String,
	/// Resource classification (e.g. `official`).
	pub resource_type: String,
}

/// Detail row as stored upstream.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailFields {
	/// Owning state code.
	pub state_code: Option<String>,
	/// Category name.
	pub category: Option<String>,
	/// Whether the requirement applies.
	pub required: Option<bool>,
	/// Explanation of the requirement.
	pub description: Option<String>,
}

/// Resource row as stored upstream.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFields {
	/// Owning state code.
	pub state_code: Option<String>,
	/// Display title.
	pub title: Option<String>,
	/// Resource URL.
	pub url: Option<String>,
	/// Resource classification.
	pub resource_type: Option<String>,
}

/// Freshly scraped authoritative data for one state, ready to be reconciled
/// into the upstream store.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedState {
	/// Two-letter lowercase state code.
	pub code: String,
	/// Full state name.
	pub name: String,
	/// Uppercase postal abbreviation.
	pub abbreviation: String,
	/// Whether balcony solar devices are legal in the state.
	pub is_legal: bool,
	/// Maximum permitted wattage.
	pub max_wattage: u32,
	/// Statute or rule governing balcony solar in the state.
	pub key_law: String,
	/// URL the regulation text was scraped from.
	pub data_source: String,
	/// When the scrape completed.
	pub scraped_at: DateTime<Utc>,
	/// Detail categories keyed by category name.
	pub details: BTreeMap<String, StateDetail>,
	/// External resources about the state's rules.
	pub resources: Vec<StateResource>,
}
