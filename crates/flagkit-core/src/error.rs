// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the FlagKit SDK.
//!
//! Every SDK error carries a stable [`ErrorCode`], a human-readable message,
//! an optional cause, a recoverability marker consumed by the retry loop, and
//! a free-form details map. Evaluation paths never surface these errors to
//! callers; they degrade to the caller's default value instead.

use std::collections::BTreeMap;

use thiserror::Error;

/// Stable error codes exposed by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
	// Initialization
	InitFailed,
	InitTimeout,
	InitAlreadyInitialized,
	InitNotInitialized,

	// Authentication
	AuthInvalidKey,
	AuthExpiredKey,
	AuthMissingKey,
	AuthUnauthorized,

	// Network
	NetworkError,
	NetworkTimeout,
	NetworkRetryLimit,

	// Evaluation
	EvalFlagNotFound,
	EvalTypeMismatch,
	EvalInvalidKey,
	EvalInvalidValue,
	EvalDisabled,
	EvalError,
	EvalContextError,
	EvalDefaultUsed,
	EvalStaleValue,
	EvalCacheMiss,
	EvalNetworkError,
	EvalParseError,
	EvalTimeoutError,

	// Cache
	CacheReadError,
	CacheWriteError,
	CacheInvalidData,
	CacheExpired,
	CacheStorageError,

	// Events
	EventQueueFull,
	EventInvalidType,
	EventInvalidData,
	EventSendFailed,
	EventFlushFailed,
	EventFlushTimeout,

	// Circuit breaker
	CircuitOpen,

	// Configuration
	ConfigInvalidUrl,
	ConfigInvalidInterval,
	ConfigMissingRequired,

	// Security
	SecurityLocalPortInProduction,
	SecurityPiiDetected,
	SecuritySignatureInvalid,
	SecurityEncryptionFailed,
	SecurityDecryptionFailed,
}

impl ErrorCode {
	/// Returns the stable wire representation of this code.
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorCode::InitFailed => "INIT_FAILED",
			ErrorCode::InitTimeout => "INIT_TIMEOUT",
			ErrorCode::InitAlreadyInitialized => "INIT_ALREADY_INITIALIZED",
			ErrorCode::InitNotInitialized => "INIT_NOT_INITIALIZED",
			ErrorCode::AuthInvalidKey => "AUTH_INVALID_KEY",
			ErrorCode::AuthExpiredKey => "AUTH_EXPIRED_KEY",
			ErrorCode::AuthMissingKey => "AUTH_MISSING_KEY",
			ErrorCode::AuthUnauthorized => "AUTH_UNAUTHORIZED",
			ErrorCode::NetworkError => "NETWORK_ERROR",
			ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
			ErrorCode::NetworkRetryLimit => "NETWORK_RETRY_LIMIT",
			ErrorCode::EvalFlagNotFound => "EVAL_FLAG_NOT_FOUND",
			ErrorCode::EvalTypeMismatch => "EVAL_TYPE_MISMATCH",
			ErrorCode::EvalInvalidKey => "EVAL_INVALID_KEY",
			ErrorCode::EvalInvalidValue => "EVAL_INVALID_VALUE",
			ErrorCode::EvalDisabled => "EVAL_DISABLED",
			ErrorCode::EvalError => "EVAL_ERROR",
			ErrorCode::EvalContextError => "EVAL_CONTEXT_ERROR",
			ErrorCode::EvalDefaultUsed => "EVAL_DEFAULT_USED",
			ErrorCode::EvalStaleValue => "EVAL_STALE_VALUE",
			ErrorCode::EvalCacheMiss => "EVAL_CACHE_MISS",
			ErrorCode::EvalNetworkError => "EVAL_NETWORK_ERROR",
			ErrorCode::EvalParseError => "EVAL_PARSE_ERROR",
			ErrorCode::EvalTimeoutError => "EVAL_TIMEOUT_ERROR",
			ErrorCode::CacheReadError => "CACHE_READ_ERROR",
			ErrorCode::CacheWriteError => "CACHE_WRITE_ERROR",
			ErrorCode::CacheInvalidData => "CACHE_INVALID_DATA",
			ErrorCode::CacheExpired => "CACHE_EXPIRED",
			ErrorCode::CacheStorageError => "CACHE_STORAGE_ERROR",
			ErrorCode::EventQueueFull => "EVENT_QUEUE_FULL",
			ErrorCode::EventInvalidType => "EVENT_INVALID_TYPE",
			ErrorCode::EventInvalidData => "EVENT_INVALID_DATA",
			ErrorCode::EventSendFailed => "EVENT_SEND_FAILED",
			ErrorCode::EventFlushFailed => "EVENT_FLUSH_FAILED",
			ErrorCode::EventFlushTimeout => "EVENT_FLUSH_TIMEOUT",
			ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
			ErrorCode::ConfigInvalidUrl => "CONFIG_INVALID_URL",
			ErrorCode::ConfigInvalidInterval => "CONFIG_INVALID_INTERVAL",
			ErrorCode::ConfigMissingRequired => "CONFIG_MISSING_REQUIRED",
			ErrorCode::SecurityLocalPortInProduction => "SECURITY_LOCAL_PORT_IN_PRODUCTION",
			ErrorCode::SecurityPiiDetected => "SECURITY_PII_DETECTED",
			ErrorCode::SecuritySignatureInvalid => "SECURITY_SIGNATURE_INVALID",
			ErrorCode::SecurityEncryptionFailed => "SECURITY_ENCRYPTION_FAILED",
			ErrorCode::SecurityDecryptionFailed => "SECURITY_DECRYPTION_FAILED",
		}
	}

	/// Returns whether errors with this code are retryable by default.
	pub fn is_recoverable(&self) -> bool {
		matches!(
			self,
			ErrorCode::NetworkError
				| ErrorCode::NetworkTimeout
				| ErrorCode::NetworkRetryLimit
				| ErrorCode::CircuitOpen
				| ErrorCode::CacheExpired
				| ErrorCode::EvalStaleValue
				| ErrorCode::EvalCacheMiss
				| ErrorCode::EvalNetworkError
				| ErrorCode::EventSendFailed
		)
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// The SDK error type.
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct FlagKitError {
	code: ErrorCode,
	message: String,
	#[source]
	cause: Option<Box<dyn std::error::Error + Send + Sync>>,
	recoverable: bool,
	details: BTreeMap<String, serde_json::Value>,
}

impl FlagKitError {
	/// Creates a new error. Recoverability is derived from the code.
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			cause: None,
			recoverable: code.is_recoverable(),
			details: BTreeMap::new(),
		}
	}

	/// Creates a new error wrapping an underlying cause.
	pub fn with_cause(
		code: ErrorCode,
		message: impl Into<String>,
		cause: impl std::error::Error + Send + Sync + 'static,
	) -> Self {
		Self {
			cause: Some(Box::new(cause)),
			..Self::new(code, message)
		}
	}

	/// Overrides the derived recoverability. Used for status codes whose
	/// recoverability differs from their code's default (e.g. generic 4xx).
	pub fn non_recoverable(mut self) -> Self {
		self.recoverable = false;
		self
	}

	/// Attaches a detail entry.
	pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.details.insert(key.into(), value);
		self
	}

	pub fn code(&self) -> ErrorCode {
		self.code
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	/// Replaces the message, keeping code, cause and recoverability.
	pub fn set_message(&mut self, message: impl Into<String>) {
		self.message = message.into();
	}

	pub fn is_recoverable(&self) -> bool {
		self.recoverable
	}

	pub fn details(&self) -> &BTreeMap<String, serde_json::Value> {
		&self.details
	}
}

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, FlagKitError>;
