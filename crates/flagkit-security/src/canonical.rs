// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Canonical JSON serialization.
//!
//! Signatures must be computed over deterministic bytes: object keys are
//! sorted by code point, there is no whitespace, integers use their shortest
//! decimal form, and floats that are whole numbers are emitted as integers.
//! Semantically equal documents always canonicalize to identical bytes.

use serde_json::Value;

/// Produces the canonical serialization of a JSON value.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();
	write_value(value, &mut out);
	out
}

fn write_value(value: &Value, out: &mut String) {
	match value {
		Value::Null => out.push_str("null"),
		Value::Bool(true) => out.push_str("true"),
		Value::Bool(false) => out.push_str("false"),
		Value::Number(n) => write_number(n, out),
		Value::String(s) => write_string(s, out),
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_value(item, out);
			}
			out.push(']');
		}
		Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort_unstable();

			out.push('{');
			for (i, key) in keys.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_string(key, out);
				out.push(':');
				write_value(&map[key.as_str()], out);
			}
			out.push('}');
		}
	}
}

fn write_number(n: &serde_json::Number, out: &mut String) {
	if let Some(i) = n.as_i64() {
		out.push_str(&i.to_string());
	} else if let Some(u) = n.as_u64() {
		out.push_str(&u.to_string());
	} else if let Some(f) = n.as_f64() {
		// Whole-number floats collapse to their integer form.
		if f.is_finite() && f == f.trunc() && f.abs() < 9.007_199_254_740_992e15 {
			out.push_str(&(f as i64).to_string());
		} else {
			out.push_str(&f.to_string());
		}
	}
}

fn write_string(s: &str, out: &mut String) {
	// serde_json applies standard JSON escaping.
	out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	fn arb_value() -> impl Strategy<Value = serde_json::Value> {
		let leaf = prop_oneof![
			Just(serde_json::Value::Null),
			proptest::bool::ANY.prop_map(serde_json::Value::Bool),
			(-1_000_000i64..1_000_000).prop_map(|n| serde_json::json!(n)),
			"[a-zA-Z0-9 _.\n\"]{0,20}".prop_map(serde_json::Value::String),
		];
		leaf.prop_recursive(3, 32, 4, |inner| {
			prop_oneof![
				proptest::collection::vec(inner.clone(), 0..4)
					.prop_map(serde_json::Value::Array),
				proptest::collection::btree_map("[a-z]{1,8}", inner, 0..4).prop_map(|m| {
					serde_json::Value::Object(m.into_iter().collect())
				}),
			]
		})
	}

	proptest! {
		#[test]
		fn canonical_output_is_stable(value in arb_value()) {
			prop_assert_eq!(canonical_json(&value), canonical_json(&value));
		}

		#[test]
		fn canonical_output_parses_back_equal(value in arb_value()) {
			let canonical = canonical_json(&value);
			let reparsed: serde_json::Value = serde_json::from_str(&canonical).unwrap();
			prop_assert_eq!(canonical_json(&reparsed), canonical);
		}
	}
}
