// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AES-256-GCM cache encryption.
//!
//! The encryption key is derived from the API key with PBKDF2-HMAC-SHA256
//! over a static salt. Encrypted values are self-describing JSON envelopes
//! (`{iv, data, version}`) so a store can hold a mix of encrypted and legacy
//! plaintext entries.

use std::collections::HashMap;
use std::sync::RwLock;

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

use flagkit_core::error::{ErrorCode, FlagKitError, Result};

/// Current encryption envelope version.
pub const ENCRYPTION_VERSION: u32 = 1;

/// AES-GCM nonce length in bytes (96 bits).
pub const IV_LENGTH: usize = 12;

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// PBKDF2 iteration count for key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Static salt for key derivation.
pub const ENCRYPTION_SALT: &[u8] = b"FlagKit-v1-cache";

/// The serialized encryption envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
	/// Base64-encoded 12-byte IV.
	pub iv: String,
	/// Base64-encoded ciphertext with appended GCM tag.
	pub data: String,
	pub version: u32,
}

/// AES-256-GCM encryption over a PBKDF2-derived key.
pub struct EncryptedStorage {
	cipher: Aes256Gcm,
}

impl std::fmt::Debug for EncryptedStorage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EncryptedStorage").finish_non_exhaustive()
	}
}

impl EncryptedStorage {
	/// Creates storage with a key derived from the API key.
	pub fn new(api_key: &str) -> Result<Self> {
		if api_key.is_empty() {
			return Err(FlagKitError::new(
				ErrorCode::ConfigMissingRequired,
				"API key is required for encrypted storage",
			));
		}

		let key = derive_key(api_key);
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
		Ok(Self { cipher })
	}

	/// Encrypts a plaintext string into a JSON envelope.
	pub fn encrypt(&self, plaintext: &str) -> Result<String> {
		let mut iv = [0u8; IV_LENGTH];
		OsRng.fill_bytes(&mut iv);
		let nonce = Nonce::from_slice(&iv);

		let ciphertext = self
			.cipher
			.encrypt(nonce, plaintext.as_bytes())
			.map_err(|e| {
				FlagKitError::new(
					ErrorCode::SecurityEncryptionFailed,
					format!("encryption failed: {e}"),
				)
			})?;

		let blob = EncryptedBlob {
			iv: BASE64.encode(iv),
			data: BASE64.encode(ciphertext),
			version: ENCRYPTION_VERSION,
		};

		serde_json::to_string(&blob).map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::SecurityEncryptionFailed,
				"failed to serialize encrypted data",
				e,
			)
		})
	}

	/// Decrypts a JSON envelope back into the plaintext string.
	pub fn decrypt(&self, envelope: &str) -> Result<String> {
		let blob: EncryptedBlob = serde_json::from_str(envelope).map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::SecurityDecryptionFailed,
				"failed to parse encrypted data",
				e,
			)
		})?;

		if blob.version != ENCRYPTION_VERSION {
			return Err(FlagKitError::new(
				ErrorCode::SecurityDecryptionFailed,
				format!("unsupported encryption version {}", blob.version),
			));
		}

		let iv = BASE64.decode(&blob.iv).map_err(|e| {
			FlagKitError::with_cause(ErrorCode::SecurityDecryptionFailed, "failed to decode IV", e)
		})?;
		if iv.len() != IV_LENGTH {
			return Err(FlagKitError::new(
				ErrorCode::SecurityDecryptionFailed,
				"invalid IV length",
			));
		}

		let data = BASE64.decode(&blob.data).map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::SecurityDecryptionFailed,
				"failed to decode ciphertext",
				e,
			)
		})?;

		let plaintext = self
			.cipher
			.decrypt(Nonce::from_slice(&iv), data.as_slice())
			.map_err(|_| {
				FlagKitError::new(
					ErrorCode::SecurityDecryptionFailed,
					"decryption failed (invalid key or corrupted data)",
				)
			})?;

		String::from_utf8(plaintext).map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::SecurityDecryptionFailed,
				"decrypted data is not valid UTF-8",
				e,
			)
		})
	}
}

/// Derives the AES-256 key from the API key.
pub fn derive_key(api_key: &str) -> [u8; KEY_LENGTH] {
	let mut key = [0u8; KEY_LENGTH];
	pbkdf2_hmac::<Sha256>(
		api_key.as_bytes(),
		ENCRYPTION_SALT,
		PBKDF2_ITERATIONS,
		&mut key,
	);
	key
}

/// Structural check for the encryption envelope: JSON with non-empty `iv`,
/// `data`, and a positive `version`.
pub fn is_encrypted(data: &str) -> bool {
	match serde_json::from_str::<EncryptedBlob>(data) {
		Ok(blob) => blob.version > 0 && !blob.iv.is_empty() && !blob.data.is_empty(),
		Err(_) => false,
	}
}

/// A key-value store that encrypts values at rest.
///
/// Reads detect legacy plaintext entries with [`is_encrypted`] and return
/// them unchanged, so pre-encryption data stays readable.
#[derive(Debug)]
pub struct EncryptedKvStore {
	storage: EncryptedStorage,
	entries: RwLock<HashMap<String, String>>,
}

impl EncryptedKvStore {
	pub fn new(api_key: &str) -> Result<Self> {
		Ok(Self {
			storage: EncryptedStorage::new(api_key)?,
			entries: RwLock::new(HashMap::new()),
		})
	}

	/// Stores a value encrypted. When encryption fails the value is stored
	/// as plaintext and the error is surfaced after the write.
	pub fn set(&self, key: &str, value: &str) -> Result<()> {
		match self.storage.encrypt(value) {
			Ok(encrypted) => {
				self
					.entries
					.write()
					.expect("kv lock poisoned")
					.insert(key.to_string(), encrypted);
				Ok(())
			}
			Err(e) => {
				warn!(key, error = %e, "encryption failed, storing plaintext");
				self
					.entries
					.write()
					.expect("kv lock poisoned")
					.insert(key.to_string(), value.to_string());
				Err(e)
			}
		}
	}

	/// Retrieves and decrypts a value. Legacy plaintext entries pass through.
	pub fn get(&self, key: &str) -> Result<Option<String>> {
		let stored = {
			let entries = self.entries.read().expect("kv lock poisoned");
			entries.get(key).cloned()
		};

		match stored {
			None => Ok(None),
			Some(value) if !is_encrypted(&value) => Ok(Some(value)),
			Some(value) => self.storage.decrypt(&value).map(Some),
		}
	}

	pub fn delete(&self, key: &str) -> bool {
		self
			.entries
			.write()
			.expect("kv lock poisoned")
			.remove(key)
			.is_some()
	}

	pub fn clear(&self) {
		self.entries.write().expect("kv lock poisoned").clear();
	}

	pub fn has(&self, key: &str) -> bool {
		self
			.entries
			.read()
			.expect("kv lock poisoned")
			.contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.entries.read().expect("kv lock poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const KEY: &str = "sdk_test_key_1234567890";

	#[test]
	fn derive_key_is_deterministic() {
		assert_eq!(derive_key(KEY), derive_key(KEY));
		assert_ne!(derive_key(KEY), derive_key("sdk_other_key_123456"));
	}

	#[test]
	fn encrypt_decrypt_roundtrip() {
		let storage = EncryptedStorage::new(KEY).unwrap();
		let plaintext = r#"{"flag": true, "count": 42}"#;

		let envelope = storage.encrypt(plaintext).unwrap();
		assert!(is_encrypted(&envelope));
		assert_eq!(storage.decrypt(&envelope).unwrap(), plaintext);
	}

	#[test]
	fn empty_api_key_is_rejected() {
		let err = EncryptedStorage::new("").unwrap_err();
		assert_eq!(err.code(), ErrorCode::ConfigMissingRequired);
	}

	#[test]
	fn tampered_ciphertext_fails() {
		let storage = EncryptedStorage::new(KEY).unwrap();
		let envelope = storage.encrypt("secret").unwrap();

		let mut blob: EncryptedBlob = serde_json::from_str(&envelope).unwrap();
		let mut data = BASE64.decode(&blob.data).unwrap();
		data[0] ^= 0x01;
		blob.data = BASE64.encode(data);

		let err = storage
			.decrypt(&serde_json::to_string(&blob).unwrap())
			.unwrap_err();
		assert_eq!(err.code(), ErrorCode::SecurityDecryptionFailed);
	}

	#[test]
	fn tampered_iv_fails() {
		let storage = EncryptedStorage::new(KEY).unwrap();
		let envelope = storage.encrypt("secret").unwrap();

		let mut blob: EncryptedBlob = serde_json::from_str(&envelope).unwrap();
		let mut iv = BASE64.decode(&blob.iv).unwrap();
		iv[0] ^= 0x01;
		blob.iv = BASE64.encode(iv);

		assert!(storage
			.decrypt(&serde_json::to_string(&blob).unwrap())
			.is_err());
	}

	#[test]
	fn unsupported_version_fails() {
		let storage = EncryptedStorage::new(KEY).unwrap();
		let envelope = storage.encrypt("secret").unwrap();

		let mut blob: EncryptedBlob = serde_json::from_str(&envelope).unwrap();
		blob.version = 2;

		let err = storage
			.decrypt(&serde_json::to_string(&blob).unwrap())
			.unwrap_err();
		assert!(err.message().contains("version"));
	}

	#[test]
	fn malformed_envelope_fails() {
		let storage = EncryptedStorage::new(KEY).unwrap();
		assert!(storage.decrypt("not json").is_err());
		assert!(storage.decrypt("{}").is_err());
	}

	#[test]
	fn wrong_key_fails_decryption() {
		let a = EncryptedStorage::new(KEY).unwrap();
		let b = EncryptedStorage::new("sdk_other_key_0987654321").unwrap();

		let envelope = a.encrypt("secret").unwrap();
		assert!(b.decrypt(&envelope).is_err());
	}

	#[test]
	fn is_encrypted_predicate() {
		let storage = EncryptedStorage::new(KEY).unwrap();
		assert!(is_encrypted(&storage.encrypt("x").unwrap()));

		assert!(!is_encrypted("plain text"));
		assert!(!is_encrypted(r#"{"some": "json"}"#));
		assert!(!is_encrypted(r#"{"iv": "", "data": "x", "version": 1}"#));
		assert!(!is_encrypted(r#"{"iv": "x", "data": "y", "version": 0}"#));
	}

	#[test]
	fn kv_store_roundtrip() {
		let store = EncryptedKvStore::new(KEY).unwrap();
		store.set("flags", r#"{"a": 1}"#).unwrap();

		assert!(store.has("flags"));
		assert_eq!(store.get("flags").unwrap().as_deref(), Some(r#"{"a": 1}"#));
		assert_eq!(store.get("missing").unwrap(), None);

		assert!(store.delete("flags"));
		assert!(!store.has("flags"));
	}

	#[test]
	fn kv_store_reads_legacy_plaintext() {
		let store = EncryptedKvStore::new(KEY).unwrap();
		store
			.entries
			.write()
			.unwrap()
			.insert("legacy".into(), "unencrypted value".into());

		assert_eq!(
			store.get("legacy").unwrap().as_deref(),
			Some("unencrypted value")
		);
	}

	#[test]
	fn kv_store_clear() {
		let store = EncryptedKvStore::new(KEY).unwrap();
		store.set("a", "1").unwrap();
		store.set("b", "2").unwrap();
		assert_eq!(store.len(), 2);

		store.clear();
		assert!(store.is_empty());
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn roundtrip_any_string(plaintext in "[ -~]{0,500}") {
			let storage = EncryptedStorage::new("sdk_test_key_1234567890").unwrap();
			let envelope = storage.encrypt(&plaintext).unwrap();
			prop_assert_eq!(storage.decrypt(&envelope).unwrap(), plaintext);
		}

		#[test]
		fn distinct_encryptions_differ(plaintext in "[ -~]{1,100}") {
			let storage = EncryptedStorage::new("sdk_test_key_1234567890").unwrap();
			let a = storage.encrypt(&plaintext).unwrap();
			let b = storage.encrypt(&plaintext).unwrap();
			prop_assert_ne!(a, b);
		}

		#[test]
		fn bit_flip_in_ciphertext_fails(plaintext in "[ -~]{1,100}", flip in 0usize..1000) {
			let storage = EncryptedStorage::new("sdk_test_key_1234567890").unwrap();
			let envelope = storage.encrypt(&plaintext).unwrap();

			let mut blob: EncryptedBlob = serde_json::from_str(&envelope).unwrap();
			let mut data = BASE64.decode(&blob.data).unwrap();
			let idx = flip % data.len();
			data[idx] ^= 0x01;
			blob.data = BASE64.encode(data);

			prop_assert!(storage.decrypt(&serde_json::to_string(&blob).unwrap()).is_err());
		}
	}
}
