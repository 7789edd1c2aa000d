//! In-memory TTL cache with explicit and pattern-based invalidation.
//!
//! Entries expire by age alone; there is no LRU or size cap because the
//! cached dataset is a small, fixed set of state records. Expired entries
//! are evicted lazily on read and proactively by the periodic [`cleanup`]
//! sweep.
//!
//! [`cleanup`]: TtlCache::cleanup

// std
use std::collections::HashMap;
// crates.io
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
// self
use crate::_prelude::*;

/// Cache key for the full state listing.
pub const COLLECTION_KEY: &str = "all-states";
/// Prefix shared by every entity-level key; doubles as the invalidation
/// pattern that clears all per-state entries while leaving the collection.
pub const STATE_KEY_PREFIX: &str = "state-";

/// Build the entity-level cache key for one state code.
pub fn state_key(code: &str) -> String {
	format!("{STATE_KEY_PREFIX}{code}")
}

struct CacheSlot {
	value: Value,
	stored_at: Instant,
}

/// Bounded-lifetime key/value store for API response payloads.
pub struct TtlCache {
	entries: RwLock<HashMap<String, CacheSlot>>,
	ttl: Duration,
}
impl TtlCache {
	/// Create a cache whose entries expire `ttl` after insertion.
	pub fn new(ttl: Duration) -> Self {
		Self { entries: RwLock::new(HashMap::new()), ttl }
	}

	/// Entry lifetime applied to every key.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Retrieve a value, or `None` when the key is absent or expired.
	///
	/// Detecting an expired entry deletes it as a side effect.
	pub async fn get(&self, key: &str) -> Option<Value> {
		let mut entries = self.entries.write().await;
		let slot = entries.get(key)?;

		if slot.stored_at.elapsed() > self.ttl {
			entries.remove(key);

			return None;
		}

		Some(slot.value.clone())
	}

	/// Store a value, unconditionally overwriting and resetting its age.
	pub async fn set(&self, key: impl Into<String>, value: Value) {
		let mut entries = self.entries.write().await;

		entries.insert(key.into(), CacheSlot { value, stored_at: Instant::now() });
	}

	/// Whether the key holds a non-expired value.
	pub async fn has(&self, key: &str) -> bool {
		self.get(key).await.is_some()
	}

	/// Remove a key if present.
	pub async fn delete(&self, key: &str) {
		let mut entries = self.entries.write().await;

		entries.remove(key);
	}

	/// Invalidate keys matching a pattern, or everything when no pattern is
	/// given.
	///
	/// Matching is substring containment, not prefix or regex: invalidating
	/// `state-` removes every `state-<code>` key but leaves `all-states`
	/// untouched. Call sites depend on that exact partition.
	pub async fn invalidate(&self, pattern: Option<&str>) {
		let mut entries = self.entries.write().await;

		match pattern {
			None => entries.clear(),
			Some(pattern) => entries.retain(|key, _| !key.contains(pattern)),
		}
	}

	/// Proactively delete every expired entry, returning how many were
	/// removed.
	pub async fn cleanup(&self) -> usize {
		let mut entries = self.entries.write().await;
		let before = entries.len();

		entries.retain(|_, slot| slot.stored_at.elapsed() <= self.ttl);

		before - entries.len()
	}

	/// Point-in-time cache statistics for health reporting.
	pub async fn stats(&self) -> CacheStats {
		let entries = self.entries.read().await;
		let mut expired_count = 0;
		let mut total_size_bytes = 0;

		for slot in entries.values() {
			if slot.stored_at.elapsed() > self.ttl {
				expired_count += 1;
			}

			total_size_bytes += slot.value.to_string().len();
		}

		CacheStats {
			size: entries.len(),
			expired_count,
			total_size_bytes,
			ttl_ms: self.ttl.as_millis() as u64,
		}
	}
}

/// Diagnostic snapshot of cache occupancy.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
	/// Current entry count, including expired entries not yet swept.
	pub size: usize,
	/// Entries currently past their TTL.
	pub expired_count: usize,
	/// Serialized byte length of all stored values (diagnostic only).
	pub total_size_bytes: usize,
	/// Configured TTL in milliseconds.
	pub ttl_ms: u64,
}
