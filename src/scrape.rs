//! Fetches regulation pages from state utility commission sites and extracts
//! structured facts.
//!
//! Parsers are intentionally coarse: each state's page is scanned for
//! indicative phrases and combined with per-state constants that change only
//! when legislation does. A wrong phrase match flips `is_legal`; everything
//! else is static until the source config is revised.

// std
use std::collections::BTreeMap;
// crates.io
use reqwest::{Client, ClientBuilder};
use url::Url;
// self
use crate::{
	_prelude::*,
	model::{ScrapedState, StateDetail, StateResource},
};

/// Per-request fetch budget for regulation pages.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Extracts regulation facts from one state's page body.
pub type RegulationParser = fn(&str) -> RegulationFacts;

/// Structured facts extracted from a regulation page.
#[derive(Clone, Debug)]
pub struct RegulationFacts {
	/// Whether balcony solar devices are legal in the state.
	pub is_legal: bool,
	/// Maximum permitted wattage.
	pub max_wattage: u32,
	/// Statute or rule governing balcony solar.
	pub key_law: String,
	/// Requirement categories keyed by category name.
	pub details: BTreeMap<String, StateDetail>,
	/// External resources about the state's rules.
	pub resources: Vec<StateResource>,
}

/// One state's scrape configuration.
#[derive(Clone, Debug)]
pub struct StateSource {
	/// Two-letter lowercase state code.
	pub code: &'static str,
	/// Full state name.
	pub name: &'static str,
	/// Uppercase postal abbreviation.
	pub abbreviation: &'static str,
	/// Page to fetch.
	pub url: Url,
	/// Parser applied to the fetched page body.
	pub parser: RegulationParser,
}

/// One state that could not be scraped.
#[derive(Clone, Debug)]
pub struct ScrapeFailure {
	/// State code the failure belongs to.
	pub state: String,
	/// What went wrong.
	pub message: String,
}

/// Result of scraping every configured state.
#[derive(Clone, Debug)]
pub struct ScrapeOutcome {
	/// Successfully scraped states.
	pub results: Vec<ScrapedState>,
	/// Per-state failures; a failed state never blocks the others.
	pub errors: Vec<ScrapeFailure>,
}

/// Fetches and parses state regulation pages.
pub struct RegulationScraper {
	client: Client,
	sources: Vec<StateSource>,
}
impl RegulationScraper {
	/// Build a scraper over the given sources.
	pub fn new(sources: Vec<StateSource>) -> Result<Self> {
		let client = ClientBuilder::new()
			.connect_timeout(Duration::from_secs(5))
			.user_agent(USER_AGENT)
			.build()?;

		Ok(Self { client, sources })
	}

	/// Build a scraper over the built-in state sources.
	pub fn with_default_sources() -> Result<Self> {
		Self::new(default_sources()?)
	}

	/// State codes this scraper is configured for.
	pub fn state_codes(&self) -> Vec<&'static str> {
		self.sources.iter().map(|source| source.code).collect()
	}

	/// Scrape one configured state.
	pub async fn scrape_state(&self, code: &str) -> Result<ScrapedState> {
		let code = code.to_lowercase();
		let source = self
			.sources
			.iter()
			.find(|source| source.code == code)
			.ok_or_else(|| Error::bad_request(format!("No scraper configuration for state: {code}")))?;
		let body = self.fetch_page(&source.url).await?;
		let facts = (source.parser)(&body);

		Ok(ScrapedState {
			code,
			name: source.name.to_owned(),
			abbreviation: source.abbreviation.to_owned(),
			is_legal: facts.is_legal,
			max_wattage: facts.max_wattage,
			key_law: facts.key_law,
			data_source: source.url.to_string(),
			scraped_at: Utc::now(),
			details: facts.details,
			resources: facts.resources,
		})
	}

	/// Scrape every configured state sequentially, isolating per-state
	/// failures.
	pub async fn scrape_all(&self) -> ScrapeOutcome {
		let mut results = Vec::new();
		let mut errors = Vec::new();

		for source in &self.sources {
			match self.scrape_state(source.code).await {
				Ok(state) => results.push(state),
				Err(err) => {
					tracing::warn!(state = source.code, error = %err, "scrape failed");

					errors.push(ScrapeFailure {
						state: source.code.to_owned(),
						message: err.to_string(),
					});
				},
			}
		}

		ScrapeOutcome { results, errors }
	}

	async fn fetch_page(&self, url: &Url) -> Result<String> {
		let response = self.client.get(url.clone()).timeout(FETCH_TIMEOUT).send().await?;
		let status = response.status();

		if !status.is_success() {
			return Err(Error::external(
				format!("HTTP {status} fetching {url}"),
				Some(status),
			));
		}

		Ok(response.text().await?)
	}
}

/// The built-in state sources.
pub fn default_sources() -> Result<Vec<StateSource>> {
	Ok(vec![
		StateSource {
			code: "ca",
			name: "California",
			abbreviation: "CA",
			url: Url::parse(
				"https://www.cpuc.ca.gov/industries-and-topics/electrical-energy/solar-energy-industries-and-topics/solar-photovoltaic-systems",
			)?,
			parser: parse_california,
		},
		StateSource {
			code: "ny",
			name: "New York",
			abbreviation: "NY",
			url: Url::parse(
				"https://www.dec.ny.gov/energy-climate/energy-efficiency/solar-energy-systems",
			)?,
			parser: parse_new_york,
		},
		StateSource {
			code: "tx",
			name: "Texas",
			abbreviation: "TX",
			url: Url::parse("https://www.puc.texas.gov/consumer-protection/solar-energy")?,
			parser: parse_texas,
		},
	])
}

fn detail(required: bool, description: &str) -> StateDetail {
	StateDetail { required, description: description.to_owned() }
}

fn details_from(entries: [(&str, StateDetail); 4]) -> BTreeMap<String, StateDetail> {
	entries.into_iter().map(|(category, detail)| (category.to_owned(), detail)).collect()
}

/// Extract California regulation facts from a page body.
pub fn parse_california(content: &str) -> RegulationFacts {
	RegulationFacts {
		is_legal: content.contains("residential solar") && !content.contains("prohibited"),
		max_wattage: 800,
		key_law: "SB 709 (2024)".to_owned(),
		details: details_from([
			(
				"interconnection",
				detail(false, "Notification to utility required but no formal agreement needed"),
			),
			(
				"permit",
				detail(false, "No building permit required for residential systems under 800W"),
			),
			("outlet", detail(true, "Standard Schuko wall outlet allowed as of May 2024")),
			(
				"special_notes",
				detail(
					false,
					"Register in Enedis system if system acts as generator. Can use standard outlets.",
				),
			),
		]),
		resources: vec![StateResource {
			title: "California Public Utilities Commission".to_owned(),
			url: "https://www.cpuc.ca.gov/".to_owned(),
			resource_type: "official".to_owned(),
		}],
	}
}

/// Extract New York regulation facts from a page body.
pub fn parse_new_york(content: &str) -> RegulationFacts {
	RegulationFacts {
		is_legal: content.contains("solar") && !content.contains("prohibited"),
		max_wattage: 1_200,
		key_law: "NY Energy Law Article 6".to_owned(),
		details: details_from([
			("interconnection", detail(true, "Interconnection agreement required with utility")),
			("permit", detail(true, "Building permit required before installation")),
			("outlet", detail(false, "Hardwired connection required")),
			("special_notes", detail(false, "Must comply with local electrical codes")),
		]),
		resources: vec![StateResource {
			title: "New York Department of Environmental Conservation".to_owned(),
			url: "https://www.dec.ny.gov/energy-climate/energy-efficiency/solar-energy-systems"
				.to_owned(),
			resource_type: "official".to_owned(),
		}],
	}
}

/// Extract Texas regulation facts from a page body.
pub fn parse_texas(content: &str) -> RegulationFacts {
	RegulationFacts {
		is_legal: content.contains("solar") && !content.contains("prohibited"),
		max_wattage: 1_000,
		key_law: "PURA § 49.452".to_owned(),
		details: details_from([
			("interconnection", detail(false, "Notification to utility required")),
			("permit", detail(false, "No permit required for systems under 1000W")),
			("outlet", detail(true, "Standard outlet connection allowed")),
			("special_notes", detail(false, "Must use certified equipment")),
		]),
		resources: vec![StateResource {
			title: "Public Utility Commission of Texas".to_owned(),
			url: "https://www.puc.texas.gov/consumer-protection/solar-energy".to_owned(),
			resource_type: "official".to_owned(),
		}],
	}
}
