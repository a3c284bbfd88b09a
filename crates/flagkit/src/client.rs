// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The FlagKit client: wires the cache, request pipeline, polling engine,
//! and event queue together.
//!
//! The client owns exactly one of each component. Evaluation never fails:
//! failures degrade through fresh cache, stale cache, bootstrap, and finally
//! the caller's default. Initialization errors are surfaced but the client
//! still becomes ready, so applications can start offline-first.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::{debug, error, info, warn};

use flagkit_core::context::EvaluationContext;
use flagkit_core::error::{ErrorCode, FlagKitError, Result};
use flagkit_core::evaluation::{EvaluationReason, EvaluationResult};
use flagkit_core::flag::{FlagState, FlagType, FlagValue};
use flagkit_core::version;
use flagkit_core::wire::{InitResponse, UpdatesResponse, UsageMetrics, VersionMetadata};
use flagkit_events::event::rfc3339;
use flagkit_events::queue::{EventQueue, EventQueueConfig, EventSender};
use flagkit_events::wal::{EventWal, EventWalConfig};
use flagkit_http::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerStats};
use flagkit_http::pipeline::{PipelineConfig, RequestPipeline};
use flagkit_http::retry::RetryConfig;
use flagkit_http::transport::{HttpTransport, Transport};
use flagkit_security::bootstrap::{verify_bootstrap_signature, VerificationFailurePolicy};
use flagkit_security::encryption::EncryptedKvStore;
use flagkit_security::pii::check_pii;
use flagkit_security::sanitize::sanitize_error;

use crate::cache::{CacheConfig, CacheStats, FlagCache};
use crate::config::Options;
use crate::polling::{PollAction, PollingConfig, PollingEngine};

/// The SDK version reported to the server.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bootstrap entries never expire.
const BOOTSTRAP_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub(crate) struct ClientInner {
	options: Options,
	/// The effective bootstrap map after signature verification policy.
	bootstrap_flags: serde_json::Map<String, serde_json::Value>,
	cache: FlagCache,
	pipeline: Arc<RequestPipeline>,
	queue: Arc<EventQueue>,
	wal: Option<Arc<EventWal>>,
	encrypted_store: Option<EncryptedKvStore>,
	polling: StdMutex<Option<Arc<PollingEngine>>>,
	context: StdRwLock<Option<EvaluationContext>>,
	session_id: String,
	last_update: StdRwLock<Option<String>>,
	ready: AtomicBool,
	closed: AtomicBool,
}

/// The FlagKit SDK client. Cheap to clone; all clones share one instance.
#[derive(Clone)]
pub struct FlagKitClient {
	inner: Arc<ClientInner>,
}

impl std::fmt::Debug for FlagKitClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagKitClient").finish_non_exhaustive()
	}
}

/// Sends event batches through the request pipeline.
struct PipelineEventSender {
	pipeline: Arc<RequestPipeline>,
}

#[async_trait]
impl EventSender for PipelineEventSender {
	async fn send_batch(&self, events: &[flagkit_events::event::Event]) -> Result<()> {
		self
			.pipeline
			.post("/sdk/events/batch", &serde_json::json!({ "events": events }))
			.await
			.map(|_| ())
	}
}

/// The polling action: a delta fetch feeding the cache.
struct RefreshAction {
	inner: Weak<ClientInner>,
}

#[async_trait]
impl PollAction for RefreshAction {
	async fn poll(&self) {
		if let Some(inner) = self.inner.upgrade() {
			inner.refresh_once().await;
		}
	}
}

impl FlagKitClient {
	/// Creates a client with the production HTTP transport.
	pub fn new(options: Options) -> Result<Self> {
		let transport = HttpTransport::new(
			if options.timeout.is_zero() {
				crate::config::DEFAULT_TIMEOUT
			} else {
				options.timeout
			},
			SDK_VERSION,
		)?;
		Self::with_transport(options, Arc::new(transport))
	}

	/// Creates a client with an injected transport. The entry point for
	/// tests and embedders providing their own HTTP stack.
	pub fn with_transport(mut options: Options, transport: Arc<dyn Transport>) -> Result<Self> {
		options.validate()?;

		let session_id = uuid::Uuid::new_v4().simple().to_string();

		let pipeline = Arc::new(RequestPipeline::new(
			PipelineConfig {
				base_url: options.base_url.clone(),
				api_key: options.api_key.clone(),
				secondary_api_key: options.secondary_api_key.clone(),
				key_rotation_grace_period: options.key_rotation_grace_period,
				enable_request_signing: options.enable_request_signing,
				timeout: options.timeout,
				retry: RetryConfig {
					max_attempts: options.retries.max(1),
					..RetryConfig::default()
				},
				circuit_breaker: CircuitBreakerConfig::default(),
				sdk_version: SDK_VERSION.to_string(),
			},
			transport,
		));

		let wal = if options.persist_events {
			let storage_path = options
				.event_storage_path
				.clone()
				.unwrap_or_else(std::env::temp_dir);
			Some(Arc::new(EventWal::new(EventWalConfig {
				storage_path,
				max_events: options.max_persisted_events,
				flush_interval: options.persistence_flush_interval,
				buffer_size: 100,
			})?))
		} else {
			None
		};

		let queue = Arc::new(EventQueue::new(
			EventQueueConfig::default(),
			Arc::new(PipelineEventSender {
				pipeline: Arc::clone(&pipeline),
			}),
			wal.clone(),
			session_id.clone(),
			SDK_VERSION,
		));

		let cache = FlagCache::new(CacheConfig {
			ttl: options.cache_ttl,
			max_size: 1000,
		});

		let encrypted_store = if options.enable_cache_encryption {
			Some(EncryptedKvStore::new(&options.api_key)?)
		} else {
			None
		};

		let bootstrap_flags = resolve_bootstrap(&options);

		let inner = Arc::new(ClientInner {
			cache,
			pipeline,
			queue,
			wal,
			encrypted_store,
			polling: StdMutex::new(None),
			context: StdRwLock::new(None),
			session_id,
			last_update: StdRwLock::new(None),
			ready: AtomicBool::new(false),
			closed: AtomicBool::new(false),
			bootstrap_flags,
			options,
		});

		inner.apply_bootstrap();

		info!(offline = inner.options.offline, "FlagKit client created");
		Ok(Self { inner })
	}

	/// Fetches the initial flag configuration and starts background workers.
	///
	/// Errors are surfaced, but the client becomes ready regardless:
	/// subsequent evaluations fall back to cache, bootstrap, or defaults.
	pub async fn initialize(&self) -> Result<()> {
		let inner = &self.inner;

		if inner.closed.load(Ordering::SeqCst) {
			return Err(FlagKitError::new(ErrorCode::InitFailed, "client is closed"));
		}

		if inner.options.offline {
			info!("offline mode enabled, skipping initialization");
			inner.set_ready();
			return Ok(());
		}

		debug!("initializing SDK");

		let response = match inner.pipeline.get("/sdk/init").await {
			Ok(response) => response,
			Err(e) => {
				error!(error = %e, "SDK initialization failed");
				let e = inner.emit_error(e);
				inner.set_ready();
				return Err(e);
			}
		};

		inner.handle_usage(response.usage.as_ref());

		let data: InitResponse = match response.json() {
			Ok(data) => data,
			Err(e) => {
				error!(error = %e, "failed to parse init response");
				inner.set_ready();
				return Err(FlagKitError::with_cause(
					ErrorCode::InitFailed,
					"failed to parse init response",
					e,
				));
			}
		};

		inner.queue.set_environment_id(&data.environment_id);

		if inner.options.cache_enabled {
			inner
				.cache
				.set_many(data.flags.clone(), Some(inner.options.cache_ttl));
		}
		*inner.last_update.write().expect("update lock poisoned") =
			Some(data.server_time.clone());

		if let Some(metadata) = &data.metadata {
			check_version_metadata(metadata);
		}

		if inner.options.enable_polling {
			self.start_polling(Duration::from_secs(data.polling_interval_seconds));
		}

		inner.queue.recover().await;
		inner.queue.start();
		if let Some(wal) = &inner.wal {
			wal.start();
		}

		inner.set_ready();

		info!(
			flag_count = data.flags.len(),
			environment = %data.environment,
			"SDK initialized"
		);
		Ok(())
	}

	pub fn is_ready(&self) -> bool {
		self.inner.ready.load(Ordering::SeqCst)
	}

	/// Evaluates a boolean flag.
	pub async fn get_bool(&self, key: &str, default: bool) -> bool {
		self
			.inner
			.evaluate_internal(key, FlagValue::Bool(default), Some(FlagType::Boolean))
			.await
			.bool_value()
	}

	/// Evaluates a string flag.
	pub async fn get_string(&self, key: &str, default: &str) -> String {
		self
			.inner
			.evaluate_internal(key, FlagValue::from(default), Some(FlagType::String))
			.await
			.string_value()
	}

	/// Evaluates a numeric flag.
	pub async fn get_number(&self, key: &str, default: f64) -> f64 {
		self
			.inner
			.evaluate_internal(key, FlagValue::Number(default), Some(FlagType::Number))
			.await
			.f64_value()
	}

	/// Evaluates an integer flag. Fractional values floor.
	pub async fn get_int(&self, key: &str, default: i64) -> i64 {
		self
			.inner
			.evaluate_internal(key, FlagValue::Number(default as f64), Some(FlagType::Number))
			.await
			.i64_value()
	}

	/// Evaluates a JSON flag.
	pub async fn get_json(
		&self,
		key: &str,
		default: serde_json::Value,
	) -> serde_json::Value {
		let result = self
			.inner
			.evaluate_internal(key, FlagValue::Json(default.clone()), Some(FlagType::Json))
			.await;
		match result.json_value() {
			Some(value) => value.clone(),
			None => default,
		}
	}

	/// Evaluates a flag and returns the full result.
	pub async fn evaluate(&self, key: &str) -> EvaluationResult {
		self
			.inner
			.evaluate_internal(key, FlagValue::Json(serde_json::Value::Null), None)
			.await
	}

	/// Evaluates every known flag.
	pub async fn evaluate_all(&self) -> HashMap<String, EvaluationResult> {
		let mut results = HashMap::new();
		for key in self.all_flag_keys() {
			let result = self.evaluate(&key).await;
			results.insert(key, result);
		}
		results
	}

	/// Whether a flag exists in the cache or bootstrap.
	pub fn has_flag(&self, key: &str) -> bool {
		self.inner.cache.has(key) || self.inner.bootstrap_flags.contains_key(key)
	}

	/// All known flag keys (cache and bootstrap, deduplicated).
	pub fn all_flag_keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.inner.cache.all_keys();
		for key in self.inner.bootstrap_flags.keys() {
			if !keys.iter().any(|k| k == key) {
				keys.push(key.clone());
			}
		}
		keys
	}

	/// Sets the global evaluation context.
	///
	/// In strict-PII mode a detection is an error and the context is not
	/// stored; otherwise detections log a warning.
	pub fn set_context(&self, context: EvaluationContext) -> Result<()> {
		let detection = check_pii(&context.custom, "context", self.inner.options.strict_pii_mode)
			.map_err(|e| self.inner.emit_error(e))?;
		if detection.has_pii() {
			warn!("{}", detection.message);
		}

		*self.inner.context.write().expect("context lock poisoned") = Some(context);
		Ok(())
	}

	pub fn get_context(&self) -> Option<EvaluationContext> {
		self.inner.context.read().expect("context lock poisoned").clone()
	}

	pub fn clear_context(&self) {
		*self.inner.context.write().expect("context lock poisoned") = None;
	}

	/// Identifies a user: merges into the current context and tracks a
	/// `context.identified` event.
	pub async fn identify(
		&self,
		user_id: &str,
		attributes: BTreeMap<String, serde_json::Value>,
	) -> Result<()> {
		let mut context = EvaluationContext::new().with_user_id(user_id);
		context.custom = attributes;

		let detection = check_pii(&context.custom, "context", self.inner.options.strict_pii_mode)
			.map_err(|e| self.inner.emit_error(e))?;
		if detection.has_pii() {
			warn!("{}", detection.message);
		}

		{
			let mut stored = self.inner.context.write().expect("context lock poisoned");
			*stored = Some(match stored.as_ref() {
				Some(current) => current.merge(&context),
				None => context,
			});
		}

		let mut data = BTreeMap::new();
		data.insert("userId".to_string(), serde_json::json!(user_id));
		self.inner.queue.track("context.identified", data).await;
		Ok(())
	}

	/// Resets to an anonymous context.
	pub async fn reset(&self) {
		*self.inner.context.write().expect("context lock poisoned") =
			Some(EvaluationContext::anonymous());
		self.inner.queue.track("context.reset", BTreeMap::new()).await;
	}

	/// Tracks a custom event.
	pub async fn track(
		&self,
		event_type: &str,
		data: BTreeMap<String, serde_json::Value>,
	) -> Result<()> {
		let detection = check_pii(&data, "event", self.inner.options.strict_pii_mode)
			.map_err(|e| self.inner.emit_error(e))?;
		if detection.has_pii() {
			warn!("{}", detection.message);
		}

		self.inner.queue.track(event_type, data).await;
		Ok(())
	}

	/// Tracks a custom event with an explicit evaluation context.
	pub async fn track_with_context(
		&self,
		event_type: &str,
		data: BTreeMap<String, serde_json::Value>,
		context: &EvaluationContext,
	) -> Result<()> {
		let detection = check_pii(&data, "event", self.inner.options.strict_pii_mode)
			.map_err(|e| self.inner.emit_error(e))?;
		if detection.has_pii() {
			warn!("{}", detection.message);
		}

		self
			.inner
			.queue
			.track_with_context(event_type, data, context)
			.await;
		Ok(())
	}

	/// Flushes pending events now.
	pub async fn flush(&self) {
		self.inner.queue.flush().await;
	}

	/// Forces a flag refresh from the server.
	pub async fn refresh(&self) {
		if self.inner.options.offline || self.inner.closed.load(Ordering::SeqCst) {
			return;
		}
		self.inner.refresh_once().await;
	}

	pub fn session_id(&self) -> &str {
		&self.inner.session_id
	}

	/// The encrypted key-value store, when cache encryption is enabled.
	/// Values written here are AES-256-GCM encrypted at rest under a key
	/// derived from the API key.
	pub fn encrypted_store(&self) -> Option<&EncryptedKvStore> {
		self.inner.encrypted_store.as_ref()
	}

	pub fn cache_stats(&self) -> CacheStats {
		self.inner.cache.stats()
	}

	pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
		self.inner.pipeline.circuit_breaker_stats()
	}

	/// Shuts the client down: stops polling, drains the event queue with a
	/// final flush, closes the WAL. A second call is a no-op.
	pub async fn close(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return Ok(());
		}

		debug!("closing SDK");

		if let Some(polling) = self.inner.polling.lock().expect("polling lock poisoned").take()
		{
			polling.stop();
		}

		self.inner.queue.stop().await;

		if let Some(wal) = &self.inner.wal {
			if let Err(e) = wal.close() {
				warn!(error = %e, "failed to flush WAL on close");
			}
		}

		self.inner.pipeline.shutdown();

		info!("SDK closed");
		Ok(())
	}

	fn start_polling(&self, server_interval: Duration) {
		let mut polling = self.inner.polling.lock().expect("polling lock poisoned");
		if polling.is_some() {
			return;
		}

		let interval = server_interval.max(self.inner.options.polling_interval);
		let engine = Arc::new(PollingEngine::new(
			Arc::new(RefreshAction {
				inner: Arc::downgrade(&self.inner),
			}),
			PollingConfig {
				interval,
				jitter: Duration::from_secs(1),
				backoff_multiplier: 2.0,
				max_interval: Duration::from_secs(300),
			},
		));

		engine.start();
		*polling = Some(engine);
	}
}

impl ClientInner {
	async fn evaluate_internal(
		&self,
		key: &str,
		default: FlagValue,
		expected: Option<FlagType>,
	) -> EvaluationResult {
		if self.options.evaluation_jitter.enabled {
			let jitter = &self.options.evaluation_jitter;
			let jitter_ms = if jitter.max_ms > jitter.min_ms {
				rand::thread_rng().gen_range(jitter.min_ms..=jitter.max_ms)
			} else {
				jitter.min_ms
			};
			if jitter_ms > 0 {
				tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
			}
		}

		if key.is_empty() {
			warn!("invalid flag key: empty");
			return EvaluationResult::fallback(key, default, EvaluationReason::Default);
		}

		if self.options.cache_enabled {
			if let Some(cached) = self.cache.get(key) {
				if let Some(expected) = expected {
					if cached.flag_type != expected {
						warn!(
							key,
							expected = %expected,
							got = %cached.flag_type,
							"flag type mismatch"
						);
						return EvaluationResult::fallback(key, default, EvaluationReason::Error);
					}
				}

				return EvaluationResult::new(
					key,
					cached.value,
					cached.enabled,
					EvaluationReason::Cached,
					cached.version,
				);
			}

			if let Some(stale) = self.cache.get_stale(key) {
				debug!(key, "using stale cached value");
				return EvaluationResult::new(
					key,
					stale.value,
					stale.enabled,
					EvaluationReason::StaleCache,
					stale.version,
				);
			}
		}

		if let Some(value) = self.bootstrap_flags.get(key) {
			debug!(key, "using bootstrap value");
			return EvaluationResult::fallback(
				key,
				FlagValue::from_json(value.clone()),
				EvaluationReason::Bootstrap,
			);
		}

		debug!(key, "flag not found, using default");
		EvaluationResult::fallback(key, default, EvaluationReason::FlagNotFound)
	}

	async fn refresh_once(&self) {
		if self.closed.load(Ordering::SeqCst) || self.options.offline {
			return;
		}

		let since = self
			.last_update
			.read()
			.expect("update lock poisoned")
			.clone()
			.unwrap_or_else(|| rfc3339(Utc::now() - chrono::Duration::hours(1)));

		let response = match self.pipeline.get(&format!("/sdk/updates?since={since}")).await {
			Ok(response) => response,
			Err(e) => {
				warn!(error = %e, "failed to refresh flags");
				self.notify_connection_limit(&e);
				self.polling_on_failure();
				return;
			}
		};

		self.handle_usage(response.usage.as_ref());

		let data: UpdatesResponse = match response.json() {
			Ok(data) => data,
			Err(e) => {
				warn!(error = %e, "failed to parse updates response");
				return;
			}
		};

		if !data.flags.is_empty() {
			if self.options.cache_enabled {
				self.cache.set_many(data.flags.clone(), Some(self.options.cache_ttl));
			}
			*self.last_update.write().expect("update lock poisoned") =
				Some(data.checked_at.clone());

			debug!(count = data.flags.len(), "flags refreshed");

			if let Some(on_update) = &self.options.callbacks.on_update {
				on_update(&data.flags);
			}
		}

		self.polling_on_success();
	}

	fn polling_on_success(&self) {
		if let Some(polling) = &*self.polling.lock().expect("polling lock poisoned") {
			polling.on_success();
		}
	}

	fn polling_on_failure(&self) {
		if let Some(polling) = &*self.polling.lock().expect("polling lock poisoned") {
			polling.on_failure();
		}
	}

	fn handle_usage(&self, usage: Option<&UsageMetrics>) {
		let Some(usage) = usage else {
			return;
		};

		if let Some(on_usage_update) = &self.options.callbacks.on_usage_update {
			on_usage_update(usage);
		}

		if matches!(
			usage.subscription_status.as_str(),
			"suspended" | "past_due" | "cancelled"
		) {
			if let Some(on_subscription_error) = &self.options.callbacks.on_subscription_error {
				on_subscription_error(&usage.subscription_status);
			}
		}
	}

	fn notify_connection_limit(&self, error: &FlagKitError) {
		if error.code() == ErrorCode::NetworkRetryLimit
			&& error.message().contains("connection limit")
		{
			if let Some(on_limit) = &self.options.callbacks.on_connection_limit_error {
				on_limit();
			}
		}
	}

	fn apply_bootstrap(&self) {
		if !self.options.cache_enabled {
			return;
		}

		for (key, value) in &self.bootstrap_flags {
			let value = FlagValue::from_json(value.clone());
			let flag = FlagState {
				key: key.clone(),
				flag_type: value.flag_type(),
				value,
				enabled: true,
				version: 0,
				last_modified: rfc3339(Utc::now()),
			};
			self.cache.set(key, flag, Some(BOOTSTRAP_TTL));
		}
	}

	fn set_ready(&self) {
		self.ready.store(true, Ordering::SeqCst);
		if let Some(on_ready) = &self.options.callbacks.on_ready {
			on_ready();
		}
	}

	/// Sanitizes an error, routes it to the error callback, and returns it
	/// for surfacing.
	fn emit_error(&self, error: FlagKitError) -> FlagKitError {
		let error = sanitize_error(error, &self.options.error_sanitization);
		self.notify_connection_limit(&error);
		if let Some(on_error) = &self.options.callbacks.on_error {
			on_error(&error);
		}
		error
	}
}

/// Resolves the effective bootstrap map, applying signature verification.
fn resolve_bootstrap(options: &Options) -> serde_json::Map<String, serde_json::Value> {
	let Some(signed) = &options.signed_bootstrap else {
		return options.bootstrap.clone();
	};

	match verify_bootstrap_signature(signed, &options.api_key, &options.bootstrap_verification) {
		Ok(()) => {
			debug!("bootstrap signature verified");
			signed.flags.clone()
		}
		Err(e) => match options.bootstrap_verification.on_failure {
			VerificationFailurePolicy::Error => {
				error!(error = %e, "bootstrap signature verification failed");
				let e = sanitize_error(e, &options.error_sanitization);
				if let Some(on_error) = &options.callbacks.on_error {
					on_error(&e);
				}
				serde_json::Map::new()
			}
			VerificationFailurePolicy::Warn => {
				warn!(error = %e, "bootstrap signature verification failed, using values anyway");
				signed.flags.clone()
			}
			VerificationFailurePolicy::Ignore => signed.flags.clone(),
		},
	}
}

fn check_version_metadata(metadata: &VersionMetadata) {
	if let Some(warning) = &metadata.deprecation_warning {
		warn!("FlagKit deprecation warning: {warning}");
	}

	if let Some(min) = &metadata.sdk_version_min {
		if version::is_less_than(SDK_VERSION, min) {
			error!(
				current = SDK_VERSION,
				minimum = %min,
				"SDK version is below the minimum required version; some features may not work correctly"
			);
		}
	}

	let mut warned_about_recommended = false;
	if let Some(recommended) = &metadata.sdk_version_recommended {
		if version::is_less_than(SDK_VERSION, recommended) {
			warn!(
				current = SDK_VERSION,
				recommended = %recommended,
				"SDK version is below the recommended version"
			);
			warned_about_recommended = true;
		}
	}

	if let Some(latest) = &metadata.sdk_version_latest {
		if version::is_less_than(SDK_VERSION, latest) && !warned_about_recommended {
			info!(current = SDK_VERSION, latest = %latest, "a newer SDK version is available");
		}
	}
}
