// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HMAC-SHA256 request signatures.
//!
//! Signed POST requests carry three headers derived here: the hex signature,
//! the millisecond timestamp, and the key id (first eight characters of the
//! signing key). The signed message is `"{timestamp}.{body}"`.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use flagkit_core::api_key::key_id;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum signature age accepted by verification (5 minutes).
pub const DEFAULT_MAX_SIGNATURE_AGE_MS: i64 = 300_000;

/// Computes an HMAC-SHA256 signature, returned as lowercase hex.
pub fn compute_hmac_sha256(key: &[u8], message: &[u8]) -> String {
	let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
	mac.update(message);
	hex::encode(mac.finalize().into_bytes())
}

/// Verifies an HMAC-SHA256 hex signature in constant time.
pub fn verify_hmac_sha256(key: &[u8], message: &[u8], signature_hex: &str) -> bool {
	let Ok(signature) = hex::decode(signature_hex) else {
		return false;
	};

	let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
	mac.update(message);
	mac.verify_slice(&signature).is_ok()
}

/// Signature material attached to an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
	/// Lowercase hex HMAC-SHA256 of `"{timestamp}.{body}"`.
	pub signature: String,
	/// Millisecond epoch timestamp the signature covers.
	pub timestamp: i64,
	/// First eight characters of the signing key.
	pub key_id: String,
}

/// Creates a signature for a request body using the current time.
pub fn create_request_signature(body: &[u8], api_key: &str) -> RequestSignature {
	let timestamp = Utc::now().timestamp_millis();
	sign_at(body, api_key, timestamp)
}

fn sign_at(body: &[u8], api_key: &str, timestamp: i64) -> RequestSignature {
	let mut message = timestamp.to_string().into_bytes();
	message.push(b'.');
	message.extend_from_slice(body);

	RequestSignature {
		signature: compute_hmac_sha256(api_key.as_bytes(), &message),
		timestamp,
		key_id: key_id(api_key).to_string(),
	}
}

/// Verifies a request signature, rejecting stale or future timestamps.
///
/// `max_age_ms` of zero falls back to [`DEFAULT_MAX_SIGNATURE_AGE_MS`].
pub fn verify_request_signature(
	body: &[u8],
	signature_hex: &str,
	timestamp: i64,
	api_key: &str,
	max_age_ms: i64,
) -> bool {
	let max_age_ms = if max_age_ms == 0 {
		DEFAULT_MAX_SIGNATURE_AGE_MS
	} else {
		max_age_ms
	};

	let age = Utc::now().timestamp_millis() - timestamp;
	if age > max_age_ms || age < 0 {
		return false;
	}

	let mut message = timestamp.to_string().into_bytes();
	message.push(b'.');
	message.extend_from_slice(body);

	verify_hmac_sha256(api_key.as_bytes(), &message, signature_hex)
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn signing_is_deterministic(message in proptest::collection::vec(any::<u8>(), 0..512)) {
			let a = compute_hmac_sha256(b"key", &message);
			let b = compute_hmac_sha256(b"key", &message);
			prop_assert_eq!(a, b);
		}

		#[test]
		fn verification_accepts_iff_inputs_match(
			message in proptest::collection::vec(any::<u8>(), 1..256),
			flip in 0usize..256,
		) {
			let sig = compute_hmac_sha256(b"key", &message);
			prop_assert!(verify_hmac_sha256(b"key", &message, &sig));

			let mut tampered = message.clone();
			let idx = flip % tampered.len();
			tampered[idx] ^= 0x01;
			prop_assert!(!verify_hmac_sha256(b"key", &tampered, &sig));
			prop_assert!(!verify_hmac_sha256(b"other", &message, &sig));
		}
	}
}
