// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flagkit_core::api_key::ApiKey;
use flagkit_core::error::{ErrorCode, FlagKitError, Result};
use flagkit_core::flag::FlagState;
use flagkit_core::wire::UsageMetrics;
use flagkit_security::bootstrap::{BootstrapVerification, SignedBootstrap};
use flagkit_security::sanitize::ErrorSanitization;

/// Default FlagKit API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.flagkit.dev/api/v1";

/// Default polling interval.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);

/// Default cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of retry attempts.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default key rotation grace period.
pub const DEFAULT_KEY_ROTATION_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// Default cap on persisted events.
pub const DEFAULT_MAX_PERSISTED_EVENTS: usize = 10_000;

/// Default interval between persistence disk writes.
pub const DEFAULT_PERSISTENCE_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Evaluation timing jitter, a guard against cache timing attacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationJitter {
	pub enabled: bool,
	pub min_ms: u64,
	pub max_ms: u64,
}

impl Default for EvaluationJitter {
	fn default() -> Self {
		Self {
			enabled: false,
			min_ms: 5,
			max_ms: 15,
		}
	}
}

/// Callback hooks invoked by the client. All callbacks may fire from
/// background tasks and must not block.
#[derive(Clone, Default)]
pub struct Callbacks {
	pub on_ready: Option<Arc<dyn Fn() + Send + Sync>>,
	pub on_error: Option<Arc<dyn Fn(&FlagKitError) + Send + Sync>>,
	pub on_update: Option<Arc<dyn Fn(&[FlagState]) + Send + Sync>>,
	pub on_usage_update: Option<Arc<dyn Fn(&UsageMetrics) + Send + Sync>>,
	pub on_subscription_error: Option<Arc<dyn Fn(&str) + Send + Sync>>,
	pub on_connection_limit_error: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl std::fmt::Debug for Callbacks {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Callbacks")
			.field("on_ready", &self.on_ready.is_some())
			.field("on_error", &self.on_error.is_some())
			.field("on_update", &self.on_update.is_some())
			.field("on_usage_update", &self.on_usage_update.is_some())
			.field("on_subscription_error", &self.on_subscription_error.is_some())
			.field(
				"on_connection_limit_error",
				&self.on_connection_limit_error.is_some(),
			)
			.finish()
	}
}

/// Client options.
#[derive(Debug, Clone)]
pub struct Options {
	/// API key for authentication (required).
	pub api_key: String,
	/// Secondary key for rotation: on a 401 the client fails over to it.
	pub secondary_api_key: Option<String>,
	/// How long rotation state is tracked after a failover.
	pub key_rotation_grace_period: Duration,
	pub base_url: String,
	pub polling_interval: Duration,
	pub enable_polling: bool,
	pub cache_enabled: bool,
	pub cache_ttl: Duration,
	/// AES-256-GCM encryption for persisted cache data.
	pub enable_cache_encryption: bool,
	/// Offline mode disables all network requests.
	pub offline: bool,
	pub timeout: Duration,
	pub retries: u32,
	/// Initial flag values (legacy unsigned format).
	pub bootstrap: serde_json::Map<String, serde_json::Value>,
	/// Signed bootstrap values; takes precedence over `bootstrap`.
	pub signed_bootstrap: Option<SignedBootstrap>,
	pub bootstrap_verification: BootstrapVerification,
	/// Local development port (only non-zero outside production).
	pub local_port: u16,
	/// Upgrade PII warnings to hard errors on track/identify/set_context.
	pub strict_pii_mode: bool,
	pub enable_request_signing: bool,
	/// Crash-resilient event persistence.
	pub persist_events: bool,
	/// Event storage directory. Defaults to the OS temp directory.
	pub event_storage_path: Option<PathBuf>,
	pub max_persisted_events: usize,
	pub persistence_flush_interval: Duration,
	pub evaluation_jitter: EvaluationJitter,
	pub error_sanitization: ErrorSanitization,
	pub callbacks: Callbacks,
}

impl Options {
	/// Options with default values for the given API key.
	pub fn new(api_key: impl Into<String>) -> Self {
		Self {
			api_key: api_key.into(),
			secondary_api_key: None,
			key_rotation_grace_period: DEFAULT_KEY_ROTATION_GRACE_PERIOD,
			base_url: DEFAULT_BASE_URL.to_string(),
			polling_interval: DEFAULT_POLLING_INTERVAL,
			enable_polling: true,
			cache_enabled: true,
			cache_ttl: DEFAULT_CACHE_TTL,
			enable_cache_encryption: false,
			offline: false,
			timeout: DEFAULT_TIMEOUT,
			retries: DEFAULT_RETRIES,
			bootstrap: serde_json::Map::new(),
			signed_bootstrap: None,
			bootstrap_verification: BootstrapVerification::default(),
			local_port: 0,
			strict_pii_mode: false,
			enable_request_signing: true,
			persist_events: false,
			event_storage_path: None,
			max_persisted_events: DEFAULT_MAX_PERSISTED_EVENTS,
			persistence_flush_interval: DEFAULT_PERSISTENCE_FLUSH_INTERVAL,
			evaluation_jitter: EvaluationJitter::default(),
			error_sanitization: ErrorSanitization::default(),
			callbacks: Callbacks::default(),
		}
	}

	pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = url.into();
		self
	}

	pub fn with_secondary_api_key(mut self, key: impl Into<String>) -> Self {
		self.secondary_api_key = Some(key.into());
		self
	}

	pub fn with_key_rotation_grace_period(mut self, period: Duration) -> Self {
		self.key_rotation_grace_period = period;
		self
	}

	pub fn with_polling_interval(mut self, interval: Duration) -> Self {
		self.polling_interval = interval;
		self
	}

	pub fn with_polling_disabled(mut self) -> Self {
		self.enable_polling = false;
		self
	}

	pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
		self.cache_ttl = ttl;
		self
	}

	pub fn with_cache_disabled(mut self) -> Self {
		self.cache_enabled = false;
		self
	}

	pub fn with_cache_encryption(mut self) -> Self {
		self.enable_cache_encryption = true;
		self
	}

	pub fn with_offline(mut self) -> Self {
		self.offline = true;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_retries(mut self, retries: u32) -> Self {
		self.retries = retries;
		self
	}

	pub fn with_bootstrap(mut self, values: serde_json::Map<String, serde_json::Value>) -> Self {
		self.bootstrap = values;
		self
	}

	pub fn with_signed_bootstrap(mut self, bootstrap: SignedBootstrap) -> Self {
		self.signed_bootstrap = Some(bootstrap);
		self
	}

	pub fn with_bootstrap_verification(mut self, config: BootstrapVerification) -> Self {
		self.bootstrap_verification = config;
		self
	}

	pub fn with_local_port(mut self, port: u16) -> Self {
		self.local_port = port;
		self
	}

	pub fn with_strict_pii_mode(mut self) -> Self {
		self.strict_pii_mode = true;
		self
	}

	pub fn with_request_signing_disabled(mut self) -> Self {
		self.enable_request_signing = false;
		self
	}

	pub fn with_event_persistence(mut self, storage_path: impl Into<PathBuf>) -> Self {
		self.persist_events = true;
		self.event_storage_path = Some(storage_path.into());
		self
	}

	pub fn with_evaluation_jitter(mut self, jitter: EvaluationJitter) -> Self {
		self.evaluation_jitter = jitter;
		self
	}

	pub fn with_error_sanitization(mut self, config: ErrorSanitization) -> Self {
		self.error_sanitization = config;
		self
	}

	pub fn with_on_ready(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
		self.callbacks.on_ready = Some(Arc::new(f));
		self
	}

	pub fn with_on_error(mut self, f: impl Fn(&FlagKitError) + Send + Sync + 'static) -> Self {
		self.callbacks.on_error = Some(Arc::new(f));
		self
	}

	pub fn with_on_update(mut self, f: impl Fn(&[FlagState]) + Send + Sync + 'static) -> Self {
		self.callbacks.on_update = Some(Arc::new(f));
		self
	}

	pub fn with_on_usage_update(
		mut self,
		f: impl Fn(&UsageMetrics) + Send + Sync + 'static,
	) -> Self {
		self.callbacks.on_usage_update = Some(Arc::new(f));
		self
	}

	pub fn with_on_subscription_error(
		mut self,
		f: impl Fn(&str) + Send + Sync + 'static,
	) -> Self {
		self.callbacks.on_subscription_error = Some(Arc::new(f));
		self
	}

	pub fn with_on_connection_limit_error(
		mut self,
		f: impl Fn() + Send + Sync + 'static,
	) -> Self {
		self.callbacks.on_connection_limit_error = Some(Arc::new(f));
		self
	}

	/// Validates the options, normalizing zero values to their defaults.
	pub fn validate(&mut self) -> Result<()> {
		ApiKey::parse(&self.api_key)?;
		if let Some(secondary) = &self.secondary_api_key {
			ApiKey::parse(secondary)?;
		}

		validate_local_port(self.local_port)?;

		if self.base_url.is_empty() {
			self.base_url = DEFAULT_BASE_URL.to_string();
		}
		if self.local_port > 0 {
			self.base_url = format!("http://localhost:{}/api/v1", self.local_port);
		}

		if self.polling_interval < Duration::from_secs(1) {
			return Err(FlagKitError::new(
				ErrorCode::ConfigInvalidInterval,
				"polling interval must be at least 1 second",
			));
		}

		if self.timeout.is_zero() {
			self.timeout = DEFAULT_TIMEOUT;
		}
		if self.cache_ttl.is_zero() {
			self.cache_ttl = DEFAULT_CACHE_TTL;
		}
		if self.key_rotation_grace_period.is_zero() {
			self.key_rotation_grace_period = DEFAULT_KEY_ROTATION_GRACE_PERIOD;
		}
		if self.max_persisted_events == 0 {
			self.max_persisted_events = DEFAULT_MAX_PERSISTED_EVENTS;
		}
		if self.persistence_flush_interval.is_zero() {
			self.persistence_flush_interval = DEFAULT_PERSISTENCE_FLUSH_INTERVAL;
		}

		Ok(())
	}
}

/// Whether the environment looks like production (`GO_ENV` or `APP_ENV`
/// equal to "production", case-insensitive).
pub fn is_production_environment() -> bool {
	["GO_ENV", "APP_ENV"].iter().any(|name| {
		std::env::var(name)
			.map(|value| value.eq_ignore_ascii_case("production"))
			.unwrap_or(false)
	})
}

/// Rejects a non-zero local development port in production environments.
pub fn validate_local_port(local_port: u16) -> Result<()> {
	if local_port > 0 && is_production_environment() {
		return Err(FlagKitError::new(
			ErrorCode::SecurityLocalPortInProduction,
			"local_port cannot be used in production environments; \
			 this option is only for local development",
		));
	}
	Ok(())
}
