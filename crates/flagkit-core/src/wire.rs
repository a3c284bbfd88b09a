// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wire types for the FlagKit service endpoints.

use serde::{Deserialize, Serialize};

use crate::flag::FlagState;

/// SDK version metadata returned by the init endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
	#[serde(default)]
	pub sdk_version_min: Option<String>,
	#[serde(default)]
	pub sdk_version_recommended: Option<String>,
	#[serde(default)]
	pub sdk_version_latest: Option<String>,
	#[serde(default)]
	pub deprecation_warning: Option<String>,
}

/// Response from `GET /sdk/init`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
	#[serde(default)]
	pub flags: Vec<FlagState>,
	#[serde(default)]
	pub environment: String,
	#[serde(default)]
	pub environment_id: String,
	/// RFC-3339 server time used as the `since` cursor for delta fetches.
	#[serde(default)]
	pub server_time: String,
	#[serde(default)]
	pub polling_interval_seconds: u64,
	#[serde(default)]
	pub metadata: Option<VersionMetadata>,
}

/// Response from `GET /sdk/updates?since=<RFC-3339>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatesResponse {
	#[serde(default)]
	pub flags: Vec<FlagState>,
	#[serde(default)]
	pub checked_at: String,
	#[serde(default)]
	pub since: String,
}

/// Response from `POST /sdk/events/batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsBatchResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub recorded: u64,
	#[serde(default)]
	pub errors: u64,
}

/// Usage metrics extracted from API response headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageMetrics {
	/// Percentage of the API call limit used this period (0-150+).
	pub api_usage_percent: f64,
	/// Percentage of the evaluation limit used (0-150+).
	pub evaluation_usage_percent: f64,
	/// Whether the account is approaching its rate-limit threshold.
	pub rate_limit_warning: bool,
	/// Current subscription status ("active", "trial", "past_due",
	/// "suspended", "cancelled").
	pub subscription_status: String,
}
