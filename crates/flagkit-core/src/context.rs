// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation context: user identity and attributes attached to flag
//! evaluations and analytics events.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// User and environment information for flag evaluation.
///
/// The context is opaque to the evaluation path today (targeting rules are
/// resolved server-side); it travels with analytics events after private
/// attributes have been stripped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub anonymous: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub country: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub device_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub os: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub browser: Option<String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub custom: BTreeMap<String, serde_json::Value>,
	/// Attribute names stripped from the outbound shape.
	#[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
	pub private_attributes: BTreeSet<String>,
}

impl EvaluationContext {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates an anonymous context.
	pub fn anonymous() -> Self {
		Self {
			anonymous: true,
			..Self::default()
		}
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_email(mut self, email: impl Into<String>) -> Self {
		self.email = Some(email.into());
		self
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn with_country(mut self, country: impl Into<String>) -> Self {
		self.country = Some(country.into());
		self
	}

	pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
		self.device_type = Some(device_type.into());
		self
	}

	pub fn with_os(mut self, os: impl Into<String>) -> Self {
		self.os = Some(os.into());
		self
	}

	pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
		self.browser = Some(browser.into());
		self
	}

	pub fn with_custom(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.custom.insert(key.into(), value);
		self
	}

	/// Marks an attribute name as private.
	pub fn with_private_attribute(mut self, attr: impl Into<String>) -> Self {
		self.private_attributes.insert(attr.into());
		self
	}

	/// Returns a copy with all private attributes removed.
	///
	/// `user_id` and `anonymous` always survive; named attributes and custom
	/// entries are dropped when listed in `private_attributes`. The stored
	/// context is not modified.
	pub fn strip_private(&self) -> Self {
		let private = &self.private_attributes;
		let keep = |name: &str, value: &Option<String>| {
			if private.contains(name) {
				None
			} else {
				value.clone()
			}
		};

		Self {
			user_id: self.user_id.clone(),
			email: keep("email", &self.email),
			name: keep("name", &self.name),
			anonymous: self.anonymous,
			country: keep("country", &self.country),
			device_type: keep("deviceType", &self.device_type),
			os: keep("os", &self.os),
			browser: keep("browser", &self.browser),
			custom: self
				.custom
				.iter()
				.filter(|(k, _)| !private.contains(k.as_str()))
				.map(|(k, v)| (k.clone(), v.clone()))
				.collect(),
			private_attributes: BTreeSet::new(),
		}
	}

	/// Produces a new context combining `self` with `other`.
	///
	/// Scalar fields from `other` win when set; custom maps union with
	/// `other` overriding; private attribute sets union.
	pub fn merge(&self, other: &EvaluationContext) -> Self {
		let mut merged = self.clone();

		if other.user_id.is_some() {
			merged.user_id = other.user_id.clone();
		}
		if other.email.is_some() {
			merged.email = other.email.clone();
		}
		if other.name.is_some() {
			merged.name = other.name.clone();
		}
		if other.country.is_some() {
			merged.country = other.country.clone();
		}
		if other.device_type.is_some() {
			merged.device_type = other.device_type.clone();
		}
		if other.os.is_some() {
			merged.os = other.os.clone();
		}
		if other.browser.is_some() {
			merged.browser = other.browser.clone();
		}
		if other.anonymous {
			merged.anonymous = true;
		}

		for (k, v) in &other.custom {
			merged.custom.insert(k.clone(), v.clone());
		}
		for attr in &other.private_attributes {
			merged.private_attributes.insert(attr.clone());
		}

		merged
	}

	/// Converts the context into the map shape sent with analytics events.
	pub fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
		let mut m = BTreeMap::new();

		if let Some(user_id) = &self.user_id {
			m.insert("userId".to_string(), serde_json::json!(user_id));
		}
		if let Some(email) = &self.email {
			m.insert("email".to_string(), serde_json::json!(email));
		}
		if let Some(name) = &self.name {
			m.insert("name".to_string(), serde_json::json!(name));
		}
		if self.anonymous {
			m.insert("anonymous".to_string(), serde_json::json!(true));
		}
		if let Some(country) = &self.country {
			m.insert("country".to_string(), serde_json::json!(country));
		}
		if !self.custom.is_empty() {
			m.insert(
				"custom".to_string(),
				serde_json::Value::Object(
					self
						.custom
						.iter()
						.map(|(k, v)| (k.clone(), v.clone()))
						.collect(),
				),
			);
		}

		m
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_sets_fields() {
		let ctx = EvaluationContext::new()
			.with_user_id("user123")
			.with_email("a@example.com")
			.with_country("NZ")
			.with_custom("plan", serde_json::json!("enterprise"));

		assert_eq!(ctx.user_id.as_deref(), Some("user123"));
		assert_eq!(ctx.email.as_deref(), Some("a@example.com"));
		assert_eq!(ctx.custom["plan"], "enterprise");
		assert!(!ctx.anonymous);
	}

	#[test]
	fn strip_private_removes_listed_fields() {
		let ctx = EvaluationContext::new()
			.with_user_id("user123")
			.with_email("a@example.com")
			.with_custom("plan", serde_json::json!("pro"))
			.with_custom("ssn_last4", serde_json::json!("1234"))
			.with_private_attribute("email")
			.with_private_attribute("ssn_last4");

		let stripped = ctx.strip_private();
		assert_eq!(stripped.user_id.as_deref(), Some("user123"));
		assert!(stripped.email.is_none());
		assert!(stripped.custom.contains_key("plan"));
		assert!(!stripped.custom.contains_key("ssn_last4"));

		// Original is untouched.
		assert!(ctx.email.is_some());
		assert!(ctx.custom.contains_key("ssn_last4"));
	}

	#[test]
	fn merge_other_wins_on_scalars() {
		let base = EvaluationContext::new()
			.with_user_id("base")
			.with_country("NZ")
			.with_custom("a", serde_json::json!(1))
			.with_private_attribute("email");
		let other = EvaluationContext::new()
			.with_user_id("other")
			.with_custom("a", serde_json::json!(2))
			.with_custom("b", serde_json::json!(3))
			.with_private_attribute("name");

		let merged = base.merge(&other);
		assert_eq!(merged.user_id.as_deref(), Some("other"));
		assert_eq!(merged.country.as_deref(), Some("NZ"));
		assert_eq!(merged.custom["a"], 2);
		assert_eq!(merged.custom["b"], 3);
		assert!(merged.private_attributes.contains("email"));
		assert!(merged.private_attributes.contains("name"));
	}

	#[test]
	fn merge_empty_other_is_identity_on_scalars() {
		let base = EvaluationContext::new().with_user_id("u").with_os("linux");
		let merged = base.merge(&EvaluationContext::new());
		assert_eq!(merged, base);
	}

	#[test]
	fn to_map_includes_only_populated_fields() {
		let ctx = EvaluationContext::new().with_user_id("u1");
		let m = ctx.to_map();
		assert_eq!(m["userId"], "u1");
		assert!(!m.contains_key("email"));
		assert!(!m.contains_key("anonymous"));
	}

	#[test]
	fn anonymous_context() {
		let ctx = EvaluationContext::anonymous();
		assert!(ctx.anonymous);
		assert_eq!(ctx.to_map()["anonymous"], true);
	}
}
