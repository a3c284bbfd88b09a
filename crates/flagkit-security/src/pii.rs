// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! PII field-name detection.
//!
//! A pure heuristic over attribute names: normalized field names that contain
//! a known sensitive token are flagged. Nested maps are walked recursively
//! and reported with dotted paths. In strict mode a detection becomes a hard
//! error; otherwise callers log a warning and continue.

use std::collections::BTreeMap;

use flagkit_core::error::{ErrorCode, FlagKitError, Result};

/// Field-name tokens treated as potential PII. Matching is case-insensitive
/// and ignores `-`/`_` separators.
const PII_PATTERNS: &[&str] = &[
	"email",
	"phone",
	"telephone",
	"mobile",
	"ssn",
	"socialsecurity",
	"creditcard",
	"cardnumber",
	"cvv",
	"password",
	"passwd",
	"secret",
	"token",
	"apikey",
	"privatekey",
	"accesstoken",
	"refreshtoken",
	"authtoken",
	"address",
	"street",
	"zipcode",
	"postalcode",
	"dateofbirth",
	"dob",
	"birthdate",
	"passport",
	"driverlicense",
	"nationalid",
	"bankaccount",
	"routingnumber",
	"iban",
	"swift",
];

/// Returns whether a field name looks like it holds PII.
pub fn is_potential_pii_field(field_name: &str) -> bool {
	let normalized: String = field_name
		.to_lowercase()
		.chars()
		.filter(|c| *c != '-' && *c != '_')
		.collect();

	PII_PATTERNS
		.iter()
		.any(|pattern| normalized.contains(pattern))
}

/// Walks a map recursively, returning dotted paths of suspicious fields.
pub fn detect_potential_pii(
	data: &BTreeMap<String, serde_json::Value>,
	prefix: &str,
) -> Vec<String> {
	let mut fields = Vec::new();

	for (key, value) in data {
		let path = if prefix.is_empty() {
			key.clone()
		} else {
			format!("{prefix}.{key}")
		};

		if is_potential_pii_field(key) {
			fields.push(path.clone());
		}

		if let serde_json::Value::Object(nested) = value {
			let nested_map: BTreeMap<String, serde_json::Value> =
				nested.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
			fields.extend(detect_potential_pii(&nested_map, &path));
		}
	}

	fields
}

/// The outcome of a PII scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiiDetection {
	pub fields: Vec<String>,
	pub message: String,
}

impl PiiDetection {
	pub fn has_pii(&self) -> bool {
		!self.fields.is_empty()
	}
}

/// Scans data for PII. In strict mode a detection is an error; otherwise the
/// caller receives the detection to log.
///
/// `data_kind` is "context" or "event" and only affects the advice text.
pub fn check_pii(
	data: &BTreeMap<String, serde_json::Value>,
	data_kind: &str,
	strict: bool,
) -> Result<PiiDetection> {
	let fields = detect_potential_pii(data, "");
	if fields.is_empty() {
		return Ok(PiiDetection::default());
	}

	let advice = if data_kind == "context" {
		"Consider adding these to private attributes."
	} else {
		"Consider removing sensitive data from events."
	};
	let message = format!(
		"potential PII detected in {data_kind} data: {}. {advice}",
		fields.join(", ")
	);

	if strict {
		return Err(FlagKitError::new(ErrorCode::SecurityPiiDetected, message));
	}

	Ok(PiiDetection { fields, message })
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn matches_direct_names() {
		assert!(is_potential_pii_field("email"));
		assert!(is_potential_pii_field("password"));
		assert!(is_potential_pii_field("ssn"));
	}

	#[test]
	fn matches_ignore_case_and_separators() {
		assert!(is_potential_pii_field("Email"));
		assert!(is_potential_pii_field("credit_card"));
		assert!(is_potential_pii_field("Credit-Card-Number"));
		assert!(is_potential_pii_field("user_email_address"));
	}

	#[test]
	fn clean_names_pass() {
		assert!(!is_potential_pii_field("plan"));
		assert!(!is_potential_pii_field("feature_count"));
		assert!(!is_potential_pii_field("theme"));
	}

	#[test]
	fn detects_nested_fields_with_paths() {
		let mut data = BTreeMap::new();
		data.insert("plan".to_string(), json!("pro"));
		data.insert(
			"billing".to_string(),
			json!({"credit_card": "4111", "amount": 10}),
		);
		data.insert("email".to_string(), json!("a@b.c"));

		let mut fields = detect_potential_pii(&data, "");
		fields.sort();
		assert_eq!(fields, vec!["billing.credit_card", "email"]);
	}

	#[test]
	fn strict_mode_errors() {
		let mut data = BTreeMap::new();
		data.insert("password".to_string(), json!("hunter2"));

		let err = check_pii(&data, "event", true).unwrap_err();
		assert_eq!(err.code(), ErrorCode::SecurityPiiDetected);
		assert!(err.message().contains("password"));
	}

	#[test]
	fn lenient_mode_returns_detection() {
		let mut data = BTreeMap::new();
		data.insert("email".to_string(), json!("a@b.c"));

		let detection = check_pii(&data, "context", false).unwrap();
		assert!(detection.has_pii());
		assert!(detection.message.contains("private attributes"));
	}

	#[test]
	fn clean_data_passes_strict() {
		let mut data = BTreeMap::new();
		data.insert("plan".to_string(), json!("pro"));

		let detection = check_pii(&data, "event", true).unwrap();
		assert!(!detection.has_pii());
	}
}
