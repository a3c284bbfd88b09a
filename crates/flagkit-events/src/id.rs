// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event id generation.
//!
//! Ids must be unique within one process for the WAL's lifetime; a monotonic
//! per-process counter plus eight hex characters of randomness covers that.
//! Cross-process uniqueness is not required because ids are scoped to one
//! SDK instance's persistence directory.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;

static EVENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a unique event id of the form `evt_<counter>_<hex>`.
pub fn generate_event_id() -> String {
	let count = EVENT_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
	format!("evt_{count}_{}", random_hex(8))
}

/// Generates `length` hex characters of cryptographic randomness.
pub fn random_hex(length: usize) -> String {
	let mut bytes = vec![0u8; length.div_ceil(2)];
	rand::rngs::OsRng.fill_bytes(&mut bytes);
	hex::encode(bytes)[..length].to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	#[test]
	fn ids_have_expected_shape() {
		let id = generate_event_id();
		assert!(id.starts_with("evt_"));

		let parts: Vec<&str> = id.split('_').collect();
		assert_eq!(parts.len(), 3);
		assert!(parts[1].parse::<u64>().is_ok());
		assert_eq!(parts[2].len(), 8);
		assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn ids_are_unique() {
		let ids: HashSet<String> = (0..10_000).map(|_| generate_event_id()).collect();
		assert_eq!(ids.len(), 10_000);
	}

	#[test]
	fn random_hex_length() {
		assert_eq!(random_hex(8).len(), 8);
		assert_eq!(random_hex(7).len(), 7);
		assert_eq!(random_hex(1).len(), 1);
	}
}
