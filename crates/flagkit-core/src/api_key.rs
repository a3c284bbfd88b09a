// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! API key classification for SDK authentication.
//!
//! FlagKit keys use a prefix grammar: client-side keys start with `sdk_` or
//! `cli_`, server-side keys with `srv_`. Keys shorter than ten characters are
//! rejected at construction.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, FlagKitError, Result};

/// Minimum accepted key length, prefix included.
pub const MIN_KEY_LENGTH: usize = 10;

/// The kind of an API key, derived from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyKind {
	/// Client-side key (`sdk_` or `cli_` prefix).
	Client,
	/// Server-side key (`srv_` prefix).
	Server,
}

impl ApiKeyKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ApiKeyKind::Client => "client",
			ApiKeyKind::Server => "server",
		}
	}
}

/// A validated API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
	raw: String,
	kind: ApiKeyKind,
}

impl ApiKey {
	/// Parses and validates a raw key string.
	pub fn parse(raw: impl Into<String>) -> Result<Self> {
		let raw = raw.into();

		if raw.is_empty() {
			return Err(FlagKitError::new(
				ErrorCode::AuthMissingKey,
				"API key is required",
			));
		}
		if raw.len() < MIN_KEY_LENGTH {
			return Err(FlagKitError::new(
				ErrorCode::AuthInvalidKey,
				"API key is too short",
			));
		}

		let kind = if raw.starts_with("sdk_") || raw.starts_with("cli_") {
			ApiKeyKind::Client
		} else if raw.starts_with("srv_") {
			ApiKeyKind::Server
		} else {
			return Err(FlagKitError::new(
				ErrorCode::AuthInvalidKey,
				"API key must start with 'sdk_', 'cli_' or 'srv_'",
			));
		};

		Ok(Self { raw, kind })
	}

	pub fn kind(&self) -> ApiKeyKind {
		self.kind
	}

	pub fn is_server_key(&self) -> bool {
		self.kind == ApiKeyKind::Server
	}

	pub fn is_client_key(&self) -> bool {
		self.kind == ApiKeyKind::Client
	}

	/// The full key value.
	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// The first eight characters, safe to expose for identification.
	pub fn key_id(&self) -> &str {
		key_id(&self.raw)
	}
}

/// Returns the first eight characters of a key for identification.
pub fn key_id(api_key: &str) -> &str {
	if api_key.len() < 8 {
		api_key
	} else {
		&api_key[..8]
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn parse_client_keys() {
		let key = ApiKey::parse("sdk_test_key_1234567890").unwrap();
		assert_eq!(key.kind(), ApiKeyKind::Client);
		assert!(key.is_client_key());

		let key = ApiKey::parse("cli_test_key_1234567890").unwrap();
		assert!(key.is_client_key());
	}

	#[test]
	fn parse_server_key() {
		let key = ApiKey::parse("srv_test_key_1234567890").unwrap();
		assert_eq!(key.kind(), ApiKeyKind::Server);
		assert!(key.is_server_key());
	}

	#[test]
	fn rejects_short_keys() {
		let err = ApiKey::parse("sdk_short").unwrap_err();
		assert_eq!(err.code(), ErrorCode::AuthInvalidKey);
	}

	#[test]
	fn rejects_empty_key() {
		let err = ApiKey::parse("").unwrap_err();
		assert_eq!(err.code(), ErrorCode::AuthMissingKey);
	}

	#[test]
	fn rejects_unknown_prefix() {
		let err = ApiKey::parse("pk_live_1234567890").unwrap_err();
		assert_eq!(err.code(), ErrorCode::AuthInvalidKey);
	}

	#[test]
	fn key_id_is_first_eight_chars() {
		assert_eq!(key_id("sdk_test_key_1234567890"), "sdk_test");
		assert_eq!(key_id("short"), "short");
	}

	proptest! {
		#[test]
		fn valid_keys_parse(suffix in "[a-zA-Z0-9_]{6,40}") {
			for prefix in ["sdk_", "cli_", "srv_"] {
				let raw = format!("{prefix}{suffix}");
				let key = ApiKey::parse(&raw).unwrap();
				prop_assert_eq!(key.as_str(), raw.as_str());
				prop_assert_eq!(key.key_id(), &raw[..8]);
			}
		}

		#[test]
		fn garbage_does_not_parse(garbage in "[a-zA-Z0-9]{0,40}") {
			if !garbage.starts_with("sdk_")
				&& !garbage.starts_with("cli_")
				&& !garbage.starts_with("srv_")
			{
				prop_assert!(ApiKey::parse(&garbage).is_err());
			}
		}
	}
}
