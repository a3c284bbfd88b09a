// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event types: the wire shape and the persisted (WAL) shape.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// An analytics event as sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	pub id: String,
	#[serde(rename = "type")]
	pub event_type: String,
	/// RFC-3339 timestamp.
	pub timestamp: String,
	pub session_id: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub environment_id: String,
	pub sdk_version: String,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub data: BTreeMap<String, serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<BTreeMap<String, serde_json::Value>>,
}

/// Delivery status of a persisted event.
///
/// Every event begins `Pending`; `Sent` and `Failed` are terminal and an id
/// never transitions out of a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
	Pending,
	Sending,
	Sent,
	Failed,
}

impl EventStatus {
	/// Whether this status admits no further transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(self, EventStatus::Sent | EventStatus::Failed)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			EventStatus::Pending => "pending",
			EventStatus::Sending => "sending",
			EventStatus::Sent => "sent",
			EventStatus::Failed => "failed",
		}
	}
}

/// An event as stored in the write-ahead log.
///
/// The WAL uses millisecond epoch timestamps; conversion back to the wire
/// shape happens on recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEvent {
	pub id: String,
	#[serde(rename = "type")]
	pub event_type: String,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub data: BTreeMap<String, serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<BTreeMap<String, serde_json::Value>>,
	/// Unix milliseconds.
	pub timestamp: i64,
	pub status: EventStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sent_at: Option<i64>,
}

impl PersistedEvent {
	/// Converts a persisted event back into the wire shape.
	pub fn into_event(self, session_id: &str, sdk_version: &str) -> Event {
		let timestamp = Utc
			.timestamp_millis_opt(self.timestamp)
			.single()
			.unwrap_or_else(Utc::now);

		Event {
			id: self.id,
			event_type: self.event_type,
			timestamp: rfc3339(timestamp),
			session_id: session_id.to_string(),
			environment_id: String::new(),
			sdk_version: sdk_version.to_string(),
			data: self.data,
			context: self.context,
		}
	}
}

/// Formats a timestamp the way the FlagKit wire protocol expects.
pub fn rfc3339(timestamp: DateTime<Utc>) -> String {
	timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_serde_is_lowercase() {
		assert_eq!(
			serde_json::to_string(&EventStatus::Pending).unwrap(),
			"\"pending\""
		);
		let status: EventStatus = serde_json::from_str("\"sending\"").unwrap();
		assert_eq!(status, EventStatus::Sending);
	}

	#[test]
	fn terminal_statuses() {
		assert!(!EventStatus::Pending.is_terminal());
		assert!(!EventStatus::Sending.is_terminal());
		assert!(EventStatus::Sent.is_terminal());
		assert!(EventStatus::Failed.is_terminal());
	}

	#[test]
	fn event_wire_shape() {
		let mut data = BTreeMap::new();
		data.insert("button".to_string(), serde_json::json!("signup"));

		let event = Event {
			id: "evt_1_abcd1234".to_string(),
			event_type: "button_clicked".to_string(),
			timestamp: "2025-01-01T00:00:00Z".to_string(),
			session_id: "sess".to_string(),
			environment_id: "env_1".to_string(),
			sdk_version: "1.0.0".to_string(),
			data,
			context: None,
		};

		let json = serde_json::to_value(&event).unwrap();
		assert_eq!(json["type"], "button_clicked");
		assert_eq!(json["sessionId"], "sess");
		assert_eq!(json["environmentId"], "env_1");
		assert!(json.get("context").is_none());
	}

	#[test]
	fn persisted_event_roundtrip() {
		let event = PersistedEvent {
			id: "evt_1_abcd1234".to_string(),
			event_type: "test".to_string(),
			data: BTreeMap::new(),
			context: None,
			timestamp: 1_735_689_600_000,
			status: EventStatus::Pending,
			sent_at: None,
		};

		let line = serde_json::to_string(&event).unwrap();
		let parsed: PersistedEvent = serde_json::from_str(&line).unwrap();
		assert_eq!(parsed, event);
	}

	#[test]
	fn into_event_converts_timestamp() {
		let persisted = PersistedEvent {
			id: "evt_1_abcd1234".to_string(),
			event_type: "test".to_string(),
			data: BTreeMap::new(),
			context: None,
			timestamp: 1_735_689_600_000,
			status: EventStatus::Pending,
			sent_at: None,
		};

		let event = persisted.into_event("sess", "1.0.0");
		assert_eq!(event.timestamp, "2025-01-01T00:00:00Z");
		assert_eq!(event.session_id, "sess");
		assert_eq!(event.sdk_version, "1.0.0");
	}
}
