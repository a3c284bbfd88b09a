// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error message sanitization.
//!
//! When enabled, outbound error messages are scrubbed of file paths, IP
//! addresses, API key tokens, email addresses, and database connection
//! strings before reaching logs or callbacks.

use std::sync::OnceLock;

use regex::Regex;

use flagkit_core::error::FlagKitError;

/// Error sanitization configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorSanitization {
	pub enabled: bool,
	/// Keep the original message in the error's details under
	/// `originalMessage`.
	pub preserve_original: bool,
}

struct Pattern {
	regex: Regex,
	replacement: &'static str,
}

fn patterns() -> &'static [Pattern] {
	static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
	PATTERNS.get_or_init(|| {
		let compile = |re: &str, replacement: &'static str| Pattern {
			regex: Regex::new(re).expect("valid sanitization regex"),
			replacement,
		};
		vec![
			// Unix paths first so path segments are not misread as emails.
			compile(r"/(?:[\w.-]+/)+[\w.-]+", "[PATH]"),
			compile(r"[A-Za-z]:\\(?:[^\\]+\\)+[^\\]*", "[PATH]"),
			compile(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b", "[IP]"),
			compile(r"sdk_[a-zA-Z0-9_-]{8,}", "sdk_[REDACTED]"),
			compile(r"srv_[a-zA-Z0-9_-]{8,}", "srv_[REDACTED]"),
			compile(r"cli_[a-zA-Z0-9_-]{8,}", "cli_[REDACTED]"),
			compile(r"[\w.+-]+@[\w.-]+\.\w+", "[EMAIL]"),
			compile(
				r"(?i)(?:postgres|mysql|mongodb|redis)://\S+",
				"[CONNECTION_STRING]",
			),
		]
	})
}

/// Redacts sensitive fragments from a message. Returns the message unchanged
/// when sanitization is disabled.
pub fn sanitize_error_message(message: &str, config: &ErrorSanitization) -> String {
	if !config.enabled {
		return message.to_string();
	}

	let mut result = message.to_string();
	for pattern in patterns() {
		result = pattern
			.regex
			.replace_all(&result, pattern.replacement)
			.into_owned();
	}
	result
}

/// Applies sanitization to an error's message in place, optionally stashing
/// the original in the details map.
pub fn sanitize_error(mut error: FlagKitError, config: &ErrorSanitization) -> FlagKitError {
	if !config.enabled {
		return error;
	}

	let original = error.message().to_string();
	let sanitized = sanitize_error_message(&original, config);
	if sanitized == original {
		return error;
	}

	error.set_message(sanitized);
	if config.preserve_original {
		error = error.with_detail("originalMessage", serde_json::json!(original));
	}
	error
}
