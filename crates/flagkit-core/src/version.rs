// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Semantic version comparison for server-driven SDK version metadata.
//!
//! The init endpoint may return minimum/recommended/latest SDK versions; the
//! client compares its own version against them and logs accordingly.

use std::sync::OnceLock;

use regex::Regex;

/// A parsed semantic version. Pre-release suffixes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
	pub major: u64,
	pub minor: u64,
	pub patch: u64,
}

fn semver_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"^[vV]?(\d+)\.(\d+)\.(\d+)").expect("valid semver regex"))
}

impl Version {
	/// Parses a semantic version string. Returns `None` for invalid input.
	pub fn parse(version: &str) -> Option<Self> {
		let trimmed = version.trim();
		if trimmed.is_empty() {
			return None;
		}

		let caps = semver_regex().captures(trimmed)?;
		Some(Self {
			major: caps[1].parse().ok()?,
			minor: caps[2].parse().ok()?,
			patch: caps[3].parse().ok()?,
		})
	}
}

/// Compares two version strings. Returns `Ordering::Equal` when either side
/// fails to parse.
pub fn compare(a: &str, b: &str) -> std::cmp::Ordering {
	match (Version::parse(a), Version::parse(b)) {
		(Some(a), Some(b)) => a.cmp(&b),
		_ => std::cmp::Ordering::Equal,
	}
}

pub fn is_less_than(a: &str, b: &str) -> bool {
	compare(a, b) == std::cmp::Ordering::Less
}

pub fn is_at_least(a: &str, b: &str) -> bool {
	compare(a, b) != std::cmp::Ordering::Less
}
