// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Signed bootstrap verification.
//!
//! Bootstrap flags supplied at construction can carry an HMAC-SHA256
//! signature over `"{timestamp_ms}.{canonical_json(flags)}"`. Verification
//! checks staleness, guards against future timestamps (clock skew), and
//! compares signatures in constant time.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use flagkit_core::error::{ErrorCode, FlagKitError, Result};

use crate::canonical::canonical_json;
use crate::signing::{compute_hmac_sha256, verify_hmac_sha256};

/// Allowed clock skew for future-dated bootstrap timestamps (5 minutes).
const MAX_CLOCK_SKEW_MS: i64 = 300_000;

/// Bootstrap flag values with an optional integrity signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignedBootstrap {
	/// Flag keys mapped to their raw values.
	pub flags: serde_json::Map<String, serde_json::Value>,
	/// HMAC-SHA256 hex signature. Empty means legacy unsigned bootstrap.
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub signature: String,
	/// Millisecond epoch timestamp the signature covers.
	#[serde(default, skip_serializing_if = "is_zero")]
	pub timestamp: i64,
}

fn is_zero(n: &i64) -> bool {
	*n == 0
}

/// What to do when bootstrap verification fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationFailurePolicy {
	/// Log a warning and apply the flags anyway.
	#[default]
	Warn,
	/// Reject the flags and notify the error callback.
	Error,
	/// Silently apply the flags.
	Ignore,
}

/// Bootstrap signature verification configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapVerification {
	pub enabled: bool,
	/// Maximum accepted bootstrap age. Zero disables the staleness check.
	pub max_age: Duration,
	pub on_failure: VerificationFailurePolicy,
}

impl Default for BootstrapVerification {
	fn default() -> Self {
		Self {
			enabled: true,
			max_age: Duration::from_secs(24 * 60 * 60),
			on_failure: VerificationFailurePolicy::Warn,
		}
	}
}

/// Verifies the signature of a signed bootstrap.
///
/// Disabled verification and empty signatures (legacy bootstrap) are
/// accepted without checks.
pub fn verify_bootstrap_signature(
	bootstrap: &SignedBootstrap,
	api_key: &str,
	config: &BootstrapVerification,
) -> Result<()> {
	if !config.enabled {
		return Ok(());
	}
	if bootstrap.signature.is_empty() {
		return Ok(());
	}

	let max_age_ms = config.max_age.as_millis() as i64;
	if max_age_ms > 0 && bootstrap.timestamp > 0 {
		let age = Utc::now().timestamp_millis() - bootstrap.timestamp;

		if age > max_age_ms {
			return Err(FlagKitError::new(
				ErrorCode::SecuritySignatureInvalid,
				format!("bootstrap data is expired: age {age}ms exceeds max age {max_age_ms}ms"),
			));
		}
		if age < -MAX_CLOCK_SKEW_MS {
			return Err(FlagKitError::new(
				ErrorCode::SecuritySignatureInvalid,
				"bootstrap timestamp is in the future",
			));
		}
	}

	let canonical = canonical_json(&serde_json::Value::Object(bootstrap.flags.clone()));
	let message = format!("{}.{}", bootstrap.timestamp, canonical);

	if !verify_hmac_sha256(api_key.as_bytes(), message.as_bytes(), &bootstrap.signature) {
		return Err(FlagKitError::new(
			ErrorCode::SecuritySignatureInvalid,
			"bootstrap signature verification failed: signature mismatch",
		));
	}

	Ok(())
}

/// Produces a signed bootstrap for the given flags. Used by tooling and
/// tests to generate bootstrap payloads the client can verify.
pub fn create_bootstrap_signature(
	flags: serde_json::Map<String, serde_json::Value>,
	api_key: &str,
) -> SignedBootstrap {
	let timestamp = Utc::now().timestamp_millis();
	let canonical = canonical_json(&serde_json::Value::Object(flags.clone()));
	let message = format!("{timestamp}.{canonical}");

	SignedBootstrap {
		flags,
		signature: compute_hmac_sha256(api_key.as_bytes(), message.as_bytes()),
		timestamp,
	}
}
