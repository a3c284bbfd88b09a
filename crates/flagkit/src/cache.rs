// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory flag cache with TTL and bounded capacity.
//!
//! Reads take the shared side of a reader/writer lock; writes and evictions
//! take the exclusive side. Eviction on insert happens within the exclusive
//! hold, so capacity is never momentarily exceeded. The cache performs no
//! I/O.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

use flagkit_core::flag::FlagState;

/// A cached flag with freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
	pub flag: FlagState,
	pub fetched_at: Instant,
	/// `None` means the entry never expires (bootstrap values).
	pub expires_at: Option<Instant>,
}

impl CacheEntry {
	fn is_fresh(&self) -> bool {
		match self.expires_at {
			Some(expires_at) => Instant::now() < expires_at,
			None => true,
		}
	}
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
	pub ttl: Duration,
	pub max_size: usize,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			ttl: Duration::from_secs(300),
			max_size: 1000,
		}
	}
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
	pub size: usize,
	pub valid_count: usize,
	pub stale_count: usize,
	pub max_size: usize,
}

/// Thread-safe TTL cache of flag states.
#[derive(Debug)]
pub struct FlagCache {
	config: CacheConfig,
	entries: RwLock<HashMap<String, CacheEntry>>,
}

impl FlagCache {
	pub fn new(config: CacheConfig) -> Self {
		Self {
			config,
			entries: RwLock::new(HashMap::new()),
		}
	}

	/// Returns a fresh entry, or `None` when missing or expired.
	pub fn get(&self, key: &str) -> Option<FlagState> {
		let entries = self.entries.read().expect("cache lock poisoned");
		let entry = entries.get(key)?;

		if !entry.is_fresh() {
			debug!(key, "cache miss (expired)");
			return None;
		}
		Some(entry.flag.clone())
	}

	/// Returns an entry regardless of expiry. Used for degraded-mode reads.
	pub fn get_stale(&self, key: &str) -> Option<FlagState> {
		let entries = self.entries.read().expect("cache lock poisoned");
		entries.get(key).map(|entry| entry.flag.clone())
	}

	/// True only when the entry exists and has expired.
	pub fn is_stale(&self, key: &str) -> bool {
		let entries = self.entries.read().expect("cache lock poisoned");
		entries
			.get(key)
			.map(|entry| !entry.is_fresh())
			.unwrap_or(false)
	}

	/// Inserts or replaces an entry.
	///
	/// `ttl` of `None` uses the configured default. When the cache is at
	/// capacity and the key is new, the entry with the oldest `fetched_at`
	/// is evicted before insertion.
	pub fn set(&self, key: &str, flag: FlagState, ttl: Option<Duration>) {
		let mut entries = self.entries.write().expect("cache lock poisoned");

		if entries.len() >= self.config.max_size && !entries.contains_key(key) {
			evict_oldest(&mut entries);
		}

		let ttl = ttl.unwrap_or(self.config.ttl);
		let fetched_at = Instant::now();
		entries.insert(
			key.to_string(),
			CacheEntry {
				flag,
				fetched_at,
				expires_at: fetched_at.checked_add(ttl),
			},
		);
	}

	/// Inserts entries one by one; atomic per entry, not bulk-atomic.
	pub fn set_many(&self, flags: Vec<FlagState>, ttl: Option<Duration>) {
		for flag in flags {
			let key = flag.key.clone();
			self.set(&key, flag, ttl);
		}
	}

	pub fn delete(&self, key: &str) -> bool {
		let mut entries = self.entries.write().expect("cache lock poisoned");
		entries.remove(key).is_some()
	}

	pub fn clear(&self) {
		let mut entries = self.entries.write().expect("cache lock poisoned");
		let size = entries.len();
		entries.clear();
		debug!(entries = size, "cache cleared");
	}

	/// Whether the key exists at all, stale included.
	pub fn has(&self, key: &str) -> bool {
		let entries = self.entries.read().expect("cache lock poisoned");
		entries.contains_key(key)
	}

	pub fn all_keys(&self) -> Vec<String> {
		let entries = self.entries.read().expect("cache lock poisoned");
		entries.keys().cloned().collect()
	}

	/// All cached flags, stale included.
	pub fn get_all(&self) -> Vec<FlagState> {
		let entries = self.entries.read().expect("cache lock poisoned");
		entries.values().map(|entry| entry.flag.clone()).collect()
	}

	/// All fresh flags.
	pub fn get_all_valid(&self) -> Vec<FlagState> {
		let entries = self.entries.read().expect("cache lock poisoned");
		entries
			.values()
			.filter(|entry| entry.is_fresh())
			.map(|entry| entry.flag.clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.entries.read().expect("cache lock poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn stats(&self) -> CacheStats {
		let entries = self.entries.read().expect("cache lock poisoned");
		let valid_count = entries.values().filter(|entry| entry.is_fresh()).count();

		CacheStats {
			size: entries.len(),
			valid_count,
			stale_count: entries.len() - valid_count,
			max_size: self.config.max_size,
		}
	}
}

fn evict_oldest(entries: &mut HashMap<String, CacheEntry>) {
	let oldest = entries
		.iter()
		.min_by_key(|(_, entry)| entry.fetched_at)
		.map(|(key, _)| key.clone());

	if let Some(key) = oldest {
		entries.remove(&key);
		debug!(key, "cache evicted oldest entry");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flagkit_core::flag::{FlagType, FlagValue};

	fn flag(key: &str, value: bool) -> FlagState {
		FlagState {
			key: key.to_string(),
			value: FlagValue::Bool(value),
			enabled: true,
			version: 1,
			flag_type: FlagType::Boolean,
			last_modified: "2025-01-01T00:00:00Z".to_string(),
		}
	}

	fn cache(ttl: Duration, max_size: usize) -> FlagCache {
		FlagCache::new(CacheConfig { ttl, max_size })
	}

	#[test]
	fn set_then_get_fresh() {
		let cache = cache(Duration::from_secs(60), 10);
		cache.set("a", flag("a", true), None);

		let state = cache.get("a").unwrap();
		assert_eq!(state.value, FlagValue::Bool(true));
	}

	#[test]
	fn expired_entries_are_invisible_to_get_but_not_get_stale() {
		let cache = cache(Duration::from_millis(10), 10);
		cache.set("a", flag("a", true), None);

		std::thread::sleep(Duration::from_millis(30));

		assert!(cache.get("a").is_none());
		assert!(cache.get_stale("a").is_some());
		assert!(cache.is_stale("a"));
	}

	#[test]
	fn missing_is_not_stale() {
		let cache = cache(Duration::from_secs(60), 10);
		assert!(!cache.is_stale("missing"));
		assert!(cache.get_stale("missing").is_none());
	}

	#[test]
	fn per_entry_ttl_overrides_default() {
		let cache = cache(Duration::from_millis(10), 10);
		cache.set("long", flag("long", true), Some(Duration::from_secs(3600)));

		std::thread::sleep(Duration::from_millis(30));
		assert!(cache.get("long").is_some());
	}

	#[test]
	fn huge_ttl_never_expires() {
		let cache = cache(Duration::from_secs(60), 10);
		cache.set(
			"boot",
			flag("boot", true),
			Some(Duration::from_secs(365 * 24 * 3600)),
		);
		assert!(cache.get("boot").is_some());
		assert!(!cache.is_stale("boot"));
	}

	#[test]
	fn capacity_evicts_oldest_fetched() {
		let cache = cache(Duration::from_secs(60), 3);

		cache.set("a", flag("a", true), None);
		std::thread::sleep(Duration::from_millis(2));
		cache.set("b", flag("b", true), None);
		std::thread::sleep(Duration::from_millis(2));
		cache.set("c", flag("c", true), None);
		std::thread::sleep(Duration::from_millis(2));
		cache.set("d", flag("d", true), None);

		assert_eq!(cache.len(), 3);
		assert!(!cache.has("a"));
		assert!(cache.has("b"));
		assert!(cache.has("c"));
		assert!(cache.has("d"));
	}

	#[test]
	fn replacing_existing_key_does_not_evict() {
		let cache = cache(Duration::from_secs(60), 2);
		cache.set("a", flag("a", true), None);
		cache.set("b", flag("b", true), None);
		cache.set("a", flag("a", false), None);

		assert_eq!(cache.len(), 2);
		assert_eq!(cache.get("a").unwrap().value, FlagValue::Bool(false));
		assert!(cache.has("b"));
	}

	#[test]
	fn delete_and_clear() {
		let cache = cache(Duration::from_secs(60), 10);
		cache.set("a", flag("a", true), None);
		cache.set("b", flag("b", true), None);

		assert!(cache.delete("a"));
		assert!(!cache.delete("a"));
		assert_eq!(cache.len(), 1);

		cache.clear();
		assert!(cache.is_empty());
	}

	#[test]
	fn set_many_inserts_all() {
		let cache = cache(Duration::from_secs(60), 10);
		cache.set_many(vec![flag("a", true), flag("b", false)], None);

		assert_eq!(cache.len(), 2);
		let mut keys = cache.all_keys();
		keys.sort();
		assert_eq!(keys, vec!["a", "b"]);
	}

	#[test]
	fn stats_counts_valid_and_stale() {
		let cache = cache(Duration::from_millis(20), 10);
		cache.set("stale", flag("stale", true), None);
		cache.set("fresh", flag("fresh", true), Some(Duration::from_secs(60)));

		std::thread::sleep(Duration::from_millis(40));

		let stats = cache.stats();
		assert_eq!(stats.size, 2);
		assert_eq!(stats.valid_count, 1);
		assert_eq!(stats.stale_count, 1);
		assert_eq!(stats.max_size, 10);
	}

	#[test]
	fn get_all_valid_filters_expired() {
		let cache = cache(Duration::from_millis(20), 10);
		cache.set("stale", flag("stale", true), None);
		cache.set("fresh", flag("fresh", true), Some(Duration::from_secs(60)));

		std::thread::sleep(Duration::from_millis(40));

		assert_eq!(cache.get_all().len(), 2);
		let valid = cache.get_all_valid();
		assert_eq!(valid.len(), 1);
		assert_eq!(valid[0].key, "fresh");
	}

	#[test]
	fn capacity_property_n_plus_one_inserts() {
		let capacity = 5;
		let cache = cache(Duration::from_secs(60), capacity);

		for i in 0..=capacity {
			cache.set(&format!("k{i}"), flag(&format!("k{i}"), true), None);
			std::thread::sleep(Duration::from_millis(2));
		}

		assert_eq!(cache.len(), capacity);
		assert!(!cache.has("k0"));
	}
}
