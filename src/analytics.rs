//! In-memory usage analytics: client events, feedback, and session tracking
//! with bounded buffers and windowed summaries.
//!
//! Windowing uses the server-side receipt time rather than the
//! client-supplied timestamp, so skewed client clocks cannot push events out
//! of (or into) a reporting window.

// std
use std::{
	collections::{HashMap, VecDeque},
	sync::{Mutex, MutexGuard},
};
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
// self
use crate::_prelude::*;

/// Default cap on retained events.
pub const MAX_EVENTS_IN_MEMORY: usize = 10_000;
/// Default cap on retained feedback entries.
pub const MAX_FEEDBACK_IN_MEMORY: usize = 1_000;
/// Default reporting window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// One client-side event as submitted by the frontend.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
	/// Event kind, e.g. `view_state` or `copy_link`.
	#[serde(rename = "type")]
	pub kind: String,
	/// Session the event belongs to; filled from the batch when absent.
	#[serde(default)]
	pub session_id: Option<String>,
	/// Free-form event payload.
	#[serde(default)]
	pub data: Value,
}

/// One feedback submission.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
	/// Feedback kind: `rating`, `suggestion`, or `bug_report`.
	#[serde(rename = "type")]
	pub kind: String,
	/// Star rating, 1 through 5, for `rating` feedback.
	#[serde(default)]
	pub rating: Option<u8>,
	/// Free-text message for suggestions and bug reports.
	#[serde(default)]
	pub message: Option<String>,
	/// State the feedback refers to, when any.
	#[serde(default)]
	pub state_code: Option<String>,
	/// Contact address volunteered with bug reports.
	#[serde(default)]
	pub email: Option<String>,
	/// Client-supplied timestamp in epoch milliseconds.
	#[serde(default)]
	pub timestamp: Option<i64>,
}

struct StoredEvent {
	event: AnalyticsEvent,
	recorded_at: Instant,
}

struct StoredFeedback {
	entry: FeedbackEntry,
	recorded_at: Instant,
}

struct SessionInfo {
	event_count: usize,
	last_event_at: Instant,
}

#[derive(Default)]
struct AnalyticsState {
	events: VecDeque<StoredEvent>,
	feedback: VecDeque<StoredFeedback>,
	sessions: HashMap<String, SessionInfo>,
}

/// Bounded in-memory store for engagement events and feedback.
pub struct AnalyticsService {
	inner: Mutex<AnalyticsState>,
	max_events: usize,
	max_feedback: usize,
}
impl AnalyticsService {
	/// Create a service with explicit buffer caps.
	pub fn new(max_events: usize, max_feedback: usize) -> Self {
		Self { inner: Mutex::new(AnalyticsState::default()), max_events, max_feedback }
	}

	/// Record a batch of events for one session.
	pub fn record_events(&self, session_id: &str, events: Vec<AnalyticsEvent>) {
		let mut inner = self.lock();
		let now = Instant::now();
		let session = inner
			.sessions
			.entry(session_id.to_owned())
			.or_insert_with(|| SessionInfo { event_count: 0, last_event_at: now });

		session.event_count += events.len();
		session.last_event_at = now;

		for mut event in events {
			if event.session_id.is_none() {
				event.session_id = Some(session_id.to_owned());
			}

			inner.events.push_back(StoredEvent { event, recorded_at: now });
		}

		while inner.events.len() > self.max_events {
			inner.events.pop_front();
		}
	}

	/// Record one feedback submission.
	pub fn record_feedback(&self, entry: FeedbackEntry) {
		let mut inner = self.lock();

		inner.feedback.push_back(StoredFeedback { entry, recorded_at: Instant::now() });

		if inner.feedback.len() > self.max_feedback {
			inner.feedback.pop_front();
		}
	}

	/// Windowed summary of events, sessions, feedback, and top states.
	pub fn analytics_summary(&self, window: Duration) -> Value {
		let inner = self.lock();
		let now = Instant::now();
		let recent: Vec<_> = inner
			.events
			.iter()
			.filter(|stored| now.saturating_duration_since(stored.recorded_at) < window)
			.collect();
		let recent_feedback: Vec<_> = inner
			.feedback
			.iter()
			.filter(|stored| now.saturating_duration_since(stored.recorded_at) < window)
			.collect();
		let mut event_types: HashMap<&str, usize> = HashMap::new();
		let mut state_views: HashMap<&str, usize> = HashMap::new();

		for stored in &recent {
			*event_types.entry(stored.event.kind.as_str()).or_default() += 1;

			if stored.event.kind == "view_state" {
				if let Some(code) = stored.event.data.get("stateCode").and_then(Value::as_str) {
					*state_views.entry(code).or_default() += 1;
				}
			}
		}

		let mut feedback_types: HashMap<&str, usize> = HashMap::new();

		for stored in &recent_feedback {
			*feedback_types.entry(stored.entry.kind.as_str()).or_default() += 1;
		}

		let mut top_states: Vec<_> = state_views.into_iter().collect();

		top_states.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
		top_states.truncate(10);

		let active_sessions = inner
			.sessions
			.values()
			.filter(|session| now.saturating_duration_since(session.last_event_at) < window)
			.count();

		json!({
			"timeWindow": format!("{} hours", window.as_secs_f64() / 3_600.),
			"totalEvents": recent.len(),
			"totalSessions": active_sessions,
			"totalFeedback": recent_feedback.len(),
			"eventTypes": event_types,
			"feedbackTypes": feedback_types,
			"topStates": top_states
				.into_iter()
				.map(|(code, count)| json!({ "code": code, "count": count }))
				.collect::<Vec<_>>(),
			"averageRating": average_rating(&recent_feedback),
			"activeSessions": active_sessions,
		})
	}

	/// Windowed interaction counts and conversion rates.
	pub fn engagement_metrics(&self, window: Duration) -> Value {
		let inner = self.lock();
		let now = Instant::now();
		let recent: Vec<_> = inner
			.events
			.iter()
			.filter(|stored| now.saturating_duration_since(stored.recorded_at) < window)
			.collect();
		let unique_sessions = recent
			.iter()
			.filter_map(|stored| stored.event.session_id.as_deref())
			.collect::<std::collections::HashSet<_>>()
			.len();
		let count = |kind: &str| recent.iter().filter(|stored| stored.event.kind == kind).count();
		let state_views = count("view_state");
		let link_copies = count("copy_link");
		let newsletter_clicks = count("click_newsletter_cta");
		let related_content_clicks = count("click_related_content");
		let rate = |numerator: usize| {
			if state_views == 0 { 0. } else { round2(numerator as f64 / state_views as f64 * 100.) }
		};

		json!({
			"uniqueSessions": unique_sessions,
			"totalInteractions": recent.len(),
			"interactions": {
				"stateSelections": count("select_state"),
				"stateViews": state_views,
				"linkCopies": link_copies,
				"resourceClicks": count("click_resource"),
				"newsletterClicks": newsletter_clicks,
				"relatedContentClicks": related_content_clicks,
				"errors": count("error"),
			},
			"conversionRates": {
				"viewToShare": rate(link_copies),
				"viewToNewsletter": rate(newsletter_clicks),
				"viewToRelatedContent": rate(related_content_clicks),
			},
		})
	}

	/// Windowed feedback breakdown: type counts, rating distribution,
	/// suggestions, and bug reports.
	pub fn feedback_summary(&self, window: Duration) -> Value {
		let inner = self.lock();
		let now = Instant::now();
		let recent: Vec<_> = inner
			.feedback
			.iter()
			.filter(|stored| now.saturating_duration_since(stored.recorded_at) < window)
			.collect();
		let mut by_type: HashMap<&str, usize> = HashMap::new();
		let mut distribution = [0_usize; 5];
		let mut suggestions = Vec::new();
		let mut bug_reports = Vec::new();

		for stored in &recent {
			let entry = &stored.entry;

			*by_type.entry(entry.kind.as_str()).or_default() += 1;

			match entry.kind.as_str() {
				"rating" =>
					if let Some(rating) = entry.rating.filter(|rating| (1..=5).contains(rating)) {
						distribution[rating as usize - 1] += 1;
					},
				"suggestion" =>
					if let Some(message) = &entry.message {
						suggestions.push(json!({
							"message": message,
							"stateCode": entry.state_code,
							"timestamp": entry.timestamp,
						}));
					},
				"bug_report" =>
					if let Some(message) = &entry.message {
						bug_reports.push(json!({
							"message": message,
							"stateCode": entry.state_code,
							"email": entry.email,
							"timestamp": entry.timestamp,
						}));
					},
				_ => {},
			}
		}

		json!({
			"totalFeedback": recent.len(),
			"byType": by_type,
			"ratings": {
				"average": average_rating(&recent),
				"distribution": {
					"1": distribution[0],
					"2": distribution[1],
					"3": distribution[2],
					"4": distribution[3],
					"5": distribution[4],
				},
			},
			"suggestions": suggestions,
			"bugReports": bug_reports,
		})
	}

	/// Drop all stored events, feedback, and sessions.
	pub fn reset(&self) {
		*self.lock() = AnalyticsState::default();
	}

	fn lock(&self) -> MutexGuard<'_, AnalyticsState> {
		self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}
impl Default for AnalyticsService {
	fn default() -> Self {
		Self::new(MAX_EVENTS_IN_MEMORY, MAX_FEEDBACK_IN_MEMORY)
	}
}

fn average_rating(feedback: &[&StoredFeedback]) -> Value {
	let ratings: Vec<u8> = feedback
		.iter()
		.filter(|stored| stored.entry.kind == "rating")
		.filter_map(|stored| stored.entry.rating)
		.collect();

	if ratings.is_empty() {
		Value::Null
	} else {
		json!(round2(ratings.iter().map(|rating| *rating as f64).sum::<f64>() / ratings.len() as f64))
	}
}

fn round2(value: f64) -> f64 {
	(value * 100.).round() / 100.
}

#[cfg(test)]
mod tests {
	// crates.io
	use tokio::time;
	// self
	use super::*;

	fn event(kind: &str, data: Value) -> AnalyticsEvent {
		AnalyticsEvent { kind: kind.to_owned(), session_id: None, data }
	}

	fn rating(stars: u8) -> FeedbackEntry {
		FeedbackEntry {
			kind: "rating".to_owned(),
			rating: Some(stars),
			message: None,
			state_code: None,
			email: None,
			timestamp: None,
		}
	}

	#[test]
	fn summary_counts_events_and_top_states() {
		let service = AnalyticsService::default();

		service.record_events(
			"s1",
			vec![
				event("view_state", json!({ "stateCode": "ca" })),
				event("view_state", json!({ "stateCode": "ca" })),
				event("view_state", json!({ "stateCode": "ny" })),
				event("copy_link", json!({})),
			],
		);

		let summary = service.analytics_summary(DEFAULT_WINDOW);

		assert_eq!(summary["totalEvents"], json!(4));
		assert_eq!(summary["eventTypes"]["view_state"], json!(3));
		assert_eq!(summary["topStates"][0], json!({ "code": "ca", "count": 2 }));
		assert_eq!(summary["activeSessions"], json!(1));
	}

	#[tokio::test(start_paused = true)]
	async fn windowing_excludes_old_events() {
		let service = AnalyticsService::default();

		service.record_events("s1", vec![event("view_state", json!({ "stateCode": "tx" }))]);

		time::advance(Duration::from_secs(2)).await;
		service.record_events("s2", vec![event("copy_link", json!({}))]);

		let summary = service.analytics_summary(Duration::from_secs(1));

		assert_eq!(summary["totalEvents"], json!(1));
		assert_eq!(summary["eventTypes"].get("view_state"), None);
	}

	#[test]
	fn engagement_rates_divide_by_state_views() {
		let service = AnalyticsService::default();

		service.record_events(
			"s1",
			vec![
				event("view_state", json!({ "stateCode": "ca" })),
				event("view_state", json!({ "stateCode": "ny" })),
				event("copy_link", json!({})),
			],
		);

		let metrics = service.engagement_metrics(DEFAULT_WINDOW);

		assert_eq!(metrics["interactions"]["stateViews"], json!(2));
		assert_eq!(metrics["conversionRates"]["viewToShare"], json!(50.));
		assert_eq!(metrics["uniqueSessions"], json!(1));
	}

	#[test]
	fn engagement_rates_are_zero_without_views() {
		let service = AnalyticsService::default();

		service.record_events("s1", vec![event("copy_link", json!({}))]);

		let metrics = service.engagement_metrics(DEFAULT_WINDOW);

		assert_eq!(metrics["conversionRates"]["viewToShare"], json!(0.));
	}

	#[test]
	fn feedback_summary_builds_the_rating_distribution() {
		let service = AnalyticsService::default();

		service.record_feedback(rating(5));
		service.record_feedback(rating(5));
		service.record_feedback(rating(2));
		service.record_feedback(FeedbackEntry {
			kind: "suggestion".to_owned(),
			rating: None,
			message: Some("Add Florida".to_owned()),
			state_code: Some("fl".to_owned()),
			email: None,
			timestamp: None,
		});

		let summary = service.feedback_summary(DEFAULT_WINDOW);

		assert_eq!(summary["totalFeedback"], json!(4));
		assert_eq!(summary["ratings"]["distribution"]["5"], json!(2));
		assert_eq!(summary["ratings"]["average"], json!(4.));
		assert_eq!(summary["suggestions"][0]["message"], json!("Add Florida"));
	}

	#[test]
	fn buffers_are_bounded_with_fifo_eviction() {
		let service = AnalyticsService::new(3, 2);

		service.record_events(
			"s1",
			(0..5).map(|idx| event("view_state", json!({ "stateCode": idx.to_string() }))).collect(),
		);

		for stars in 1..=4 {
			service.record_feedback(rating(stars));
		}

		let summary = service.analytics_summary(DEFAULT_WINDOW);

		assert_eq!(summary["totalEvents"], json!(3));
		assert_eq!(summary["totalFeedback"], json!(2));
	}
}
