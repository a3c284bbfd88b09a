// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation results and reasons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flag::FlagValue;

/// Why an evaluation produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
	Cached,
	Fallthrough,
	Targeted,
	Default,
	Disabled,
	FlagNotFound,
	Error,
	StaleCache,
	Bootstrap,
}

impl EvaluationReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			EvaluationReason::Cached => "CACHED",
			EvaluationReason::Fallthrough => "FALLTHROUGH",
			EvaluationReason::Targeted => "TARGETED",
			EvaluationReason::Default => "DEFAULT",
			EvaluationReason::Disabled => "DISABLED",
			EvaluationReason::FlagNotFound => "FLAG_NOT_FOUND",
			EvaluationReason::Error => "ERROR",
			EvaluationReason::StaleCache => "STALE_CACHE",
			EvaluationReason::Bootstrap => "BOOTSTRAP",
		}
	}
}

impl std::fmt::Display for EvaluationReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// The result of evaluating a flag.
///
/// Evaluation never fails; failures degrade into a result carrying the
/// caller's default and an explanatory reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
	pub flag_key: String,
	pub value: FlagValue,
	pub enabled: bool,
	pub reason: EvaluationReason,
	pub version: i64,
	pub timestamp: DateTime<Utc>,
}

impl EvaluationResult {
	pub fn new(
		flag_key: impl Into<String>,
		value: FlagValue,
		enabled: bool,
		reason: EvaluationReason,
		version: i64,
	) -> Self {
		Self {
			flag_key: flag_key.into(),
			value,
			enabled,
			reason,
			version,
			timestamp: Utc::now(),
		}
	}

	/// Builds a result carrying a default value for the given reason.
	pub fn fallback(flag_key: impl Into<String>, value: FlagValue, reason: EvaluationReason) -> Self {
		Self::new(flag_key, value, false, reason, 0)
	}

	pub fn bool_value(&self) -> bool {
		self.value.as_bool().unwrap_or(false)
	}

	pub fn string_value(&self) -> String {
		self.value.as_str().unwrap_or_default().to_string()
	}

	pub fn f64_value(&self) -> f64 {
		self.value.as_f64().unwrap_or(0.0)
	}

	pub fn i64_value(&self) -> i64 {
		self.value.as_i64().unwrap_or(0)
	}

	pub fn json_value(&self) -> Option<&serde_json::Value> {
		self.value.as_json()
	}
}
