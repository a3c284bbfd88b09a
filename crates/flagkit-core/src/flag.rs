// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag state and dynamically typed flag values.

use serde::{Deserialize, Serialize};

/// The type of a flag value, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
	Boolean,
	String,
	Number,
	Json,
}

impl FlagType {
	/// Returns the string representation used on the wire.
	pub fn as_str(&self) -> &'static str {
		match self {
			FlagType::Boolean => "boolean",
			FlagType::String => "string",
			FlagType::Number => "number",
			FlagType::Json => "json",
		}
	}
}

impl std::fmt::Display for FlagType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// A dynamically typed flag value.
///
/// Deserialization is untagged: booleans, numbers, and strings map to their
/// scalar variants, everything else (objects, arrays, null) becomes
/// [`FlagValue::Json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
	Bool(bool),
	Number(f64),
	String(String),
	Json(serde_json::Value),
}

impl FlagValue {
	/// Returns the [`FlagType`] matching this value's dynamic shape.
	pub fn flag_type(&self) -> FlagType {
		match self {
			FlagValue::Bool(_) => FlagType::Boolean,
			FlagValue::Number(_) => FlagType::Number,
			FlagValue::String(_) => FlagType::String,
			FlagValue::Json(_) => FlagType::Json,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			FlagValue::Number(n) => Some(*n),
			_ => None,
		}
	}

	/// Returns the value as an integer, flooring fractional numbers.
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			FlagValue::Number(n) if n.is_finite() => Some(n.floor() as i64),
			_ => None,
		}
	}

	pub fn as_json(&self) -> Option<&serde_json::Value> {
		match self {
			FlagValue::Json(v) => Some(v),
			_ => None,
		}
	}

	/// Converts a raw JSON value into a [`FlagValue`], inferring the type.
	pub fn from_json(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Bool(b) => FlagValue::Bool(b),
			serde_json::Value::Number(n) => match n.as_f64() {
				Some(f) => FlagValue::Number(f),
				None => FlagValue::Json(serde_json::Value::Number(n)),
			},
			serde_json::Value::String(s) => FlagValue::String(s),
			other => FlagValue::Json(other),
		}
	}

	/// Converts this value back into a raw JSON value.
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			FlagValue::Bool(b) => serde_json::Value::Bool(*b),
			FlagValue::Number(n) => serde_json::Number::from_f64(*n)
				.map(serde_json::Value::Number)
				.unwrap_or(serde_json::Value::Null),
			FlagValue::String(s) => serde_json::Value::String(s.clone()),
			FlagValue::Json(v) => v.clone(),
		}
	}
}

impl From<bool> for FlagValue {
	fn from(b: bool) -> Self {
		FlagValue::Bool(b)
	}
}

impl From<f64> for FlagValue {
	fn from(n: f64) -> Self {
		FlagValue::Number(n)
	}
}

impl From<i64> for FlagValue {
	fn from(n: i64) -> Self {
		FlagValue::Number(n as f64)
	}
}

impl From<&str> for FlagValue {
	fn from(s: &str) -> Self {
		FlagValue::String(s.to_string())
	}
}

impl From<String> for FlagValue {
	fn from(s: String) -> Self {
		FlagValue::String(s)
	}
}

impl From<serde_json::Value> for FlagValue {
	fn from(v: serde_json::Value) -> Self {
		FlagValue::from_json(v)
	}
}

/// A single flag value snapshot as delivered by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagState {
	pub key: String,
	pub value: FlagValue,
	pub enabled: bool,
	/// Monotonic per-flag version assigned by the server.
	pub version: i64,
	pub flag_type: FlagType,
	/// RFC-3339 timestamp of the last server-side modification.
	pub last_modified: String,
}

impl FlagState {
	/// Returns `true` when the declared type agrees with the value's shape.
	pub fn type_is_consistent(&self) -> bool {
		self.flag_type == self.value.flag_type()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flag_value_types() {
		assert_eq!(FlagValue::Bool(true).flag_type(), FlagType::Boolean);
		assert_eq!(FlagValue::Number(1.5).flag_type(), FlagType::Number);
		assert_eq!(
			FlagValue::String("x".into()).flag_type(),
			FlagType::String
		);
		assert_eq!(
			FlagValue::Json(serde_json::json!({"a": 1})).flag_type(),
			FlagType::Json
		);
	}

	#[test]
	fn flag_value_untagged_deserialization() {
		let v: FlagValue = serde_json::from_str("true").unwrap();
		assert_eq!(v, FlagValue::Bool(true));

		let v: FlagValue = serde_json::from_str("42").unwrap();
		assert_eq!(v, FlagValue::Number(42.0));

		let v: FlagValue = serde_json::from_str("\"hello\"").unwrap();
		assert_eq!(v, FlagValue::String("hello".into()));

		let v: FlagValue = serde_json::from_str(r#"{"k":"v"}"#).unwrap();
		assert!(matches!(v, FlagValue::Json(_)));
	}

	#[test]
	fn as_i64_floors_negative_fractions() {
		assert_eq!(FlagValue::Number(2.9).as_i64(), Some(2));
		assert_eq!(FlagValue::Number(-2.5).as_i64(), Some(-3));
		assert_eq!(FlagValue::Bool(true).as_i64(), None);
	}

	#[test]
	fn conversions_do_not_cross_types() {
		let v = FlagValue::String("true".into());
		assert_eq!(v.as_bool(), None);
		assert_eq!(v.as_f64(), None);

		let v = FlagValue::Number(1.0);
		assert_eq!(v.as_bool(), None);
		assert_eq!(v.as_str(), None);
	}

	#[test]
	fn flag_state_wire_format() {
		let state = FlagState {
			key: "checkout.new_flow".into(),
			value: FlagValue::Bool(true),
			enabled: true,
			version: 7,
			flag_type: FlagType::Boolean,
			last_modified: "2025-01-01T00:00:00Z".into(),
		};

		let json = serde_json::to_value(&state).unwrap();
		assert_eq!(json["flagType"], "boolean");
		assert_eq!(json["lastModified"], "2025-01-01T00:00:00Z");

		let parsed: FlagState = serde_json::from_value(json).unwrap();
		assert_eq!(parsed, state);
		assert!(parsed.type_is_consistent());
	}

	#[test]
	fn type_inconsistency_is_detected() {
		let state = FlagState {
			key: "x".into(),
			value: FlagValue::String("oops".into()),
			enabled: true,
			version: 1,
			flag_type: FlagType::Boolean,
			last_modified: String::new(),
		};
		assert!(!state.type_is_consistent());
	}
}
