// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Security primitives for the FlagKit SDK.
//!
//! This crate provides:
//! - Canonical JSON serialization used as HMAC signing input
//! - HMAC-SHA256 request and bootstrap signatures
//! - Signed bootstrap verification with staleness and clock-skew checks
//! - PBKDF2-derived AES-256-GCM cache encryption
//! - PII field-name detection for contexts and event data
//! - Error message sanitization

pub mod bootstrap;
pub mod canonical;
pub mod encryption;
pub mod pii;
pub mod sanitize;
pub mod signing;

pub use bootstrap::{
	create_bootstrap_signature, verify_bootstrap_signature, BootstrapVerification,
	SignedBootstrap, VerificationFailurePolicy,
};
pub use canonical::canonical_json;
pub use encryption::{is_encrypted, EncryptedBlob, EncryptedKvStore, EncryptedStorage};
pub use pii::{check_pii, detect_potential_pii, is_potential_pii_field, PiiDetection};
pub use sanitize::{sanitize_error, sanitize_error_message, ErrorSanitization};
pub use signing::{
	compute_hmac_sha256, create_request_signature, verify_hmac_sha256, verify_request_signature,
	RequestSignature,
};
