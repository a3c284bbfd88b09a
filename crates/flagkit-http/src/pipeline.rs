// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The request pipeline.
//!
//! Takes a logical request (method, path, optional body) and produces a
//! response or a categorized error while upholding four policies: retry with
//! jittered backoff, circuit breaking, HMAC request signing, and
//! primary-to-secondary key failover.
//!
//! The pipeline is stateless across calls except for the breaker and the
//! active-key cell. Key swaps take a write lock; request construction reads
//! the key under a short read lock. No lock is held across I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use flagkit_core::api_key::key_id;
use flagkit_core::error::{ErrorCode, FlagKitError, Result};
use flagkit_core::wire::UsageMetrics;
use flagkit_security::signing::create_request_signature;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::retry::{backoff_delay, RetryConfig};
use crate::transport::{HttpMethod, Transport, TransportRequest, TransportResponse};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
	pub base_url: String,
	pub api_key: String,
	pub secondary_api_key: Option<String>,
	pub key_rotation_grace_period: Duration,
	pub enable_request_signing: bool,
	pub timeout: Duration,
	pub retry: RetryConfig,
	pub circuit_breaker: CircuitBreakerConfig,
	pub sdk_version: String,
}

struct KeyCell {
	current: String,
	rotated_at: Option<Instant>,
}

/// A processed response from the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineResponse {
	pub status: u16,
	pub body: Vec<u8>,
	/// Usage metrics extracted from response headers, when present.
	pub usage: Option<UsageMetrics>,
}

impl PipelineResponse {
	/// Deserializes the response body.
	pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
		serde_json::from_slice(&self.body).map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::EvalParseError,
				"failed to parse response body",
				e,
			)
		})
	}
}

/// The resilient request pipeline.
pub struct RequestPipeline {
	config: PipelineConfig,
	keys: RwLock<KeyCell>,
	breaker: CircuitBreaker,
	transport: Arc<dyn Transport>,
	cancelled: AtomicBool,
	cancel_notify: Notify,
}

impl RequestPipeline {
	pub fn new(config: PipelineConfig, transport: Arc<dyn Transport>) -> Self {
		let breaker = CircuitBreaker::new(config.circuit_breaker.clone());
		let keys = RwLock::new(KeyCell {
			current: config.api_key.clone(),
			rotated_at: None,
		});

		Self {
			config,
			keys,
			breaker,
			transport,
			cancelled: AtomicBool::new(false),
			cancel_notify: Notify::new(),
		}
	}

	/// Performs a GET request.
	pub async fn get(&self, path: &str) -> Result<PipelineResponse> {
		self.with_key_rotation(HttpMethod::Get, path, None).await
	}

	/// Performs a POST request with automatic signing.
	pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<PipelineResponse> {
		let bytes = serde_json::to_vec(body).map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::NetworkError,
				"failed to serialize request body",
				e,
			)
			.non_recoverable()
		})?;
		self
			.with_key_rotation(HttpMethod::Post, path, Some(bytes))
			.await
	}

	/// The currently active API key.
	pub fn active_api_key(&self) -> String {
		self.keys.read().expect("key lock poisoned").current.clone()
	}

	/// First eight characters of the active key.
	pub fn key_id(&self) -> String {
		key_id(&self.active_api_key()).to_string()
	}

	/// Whether the rotation grace period is still in effect.
	pub fn is_in_key_rotation(&self) -> bool {
		let keys = self.keys.read().expect("key lock poisoned");
		match keys.rotated_at {
			Some(at) => at.elapsed() < self.config.key_rotation_grace_period,
			None => false,
		}
	}

	pub fn circuit_breaker_stats(&self) -> CircuitBreakerStats {
		self.breaker.stats()
	}

	/// Cancels in-flight backoff sleeps and rejects further requests.
	pub fn shutdown(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
		self.cancel_notify.notify_waiters();
	}

	async fn with_key_rotation(
		&self,
		method: HttpMethod,
		path: &str,
		body: Option<Vec<u8>>,
	) -> Result<PipelineResponse> {
		let result = self.request(method, path, body.clone()).await;

		if let Err(e) = &result {
			let auth_failure = matches!(
				e.code(),
				ErrorCode::AuthUnauthorized | ErrorCode::AuthInvalidKey
			);
			if auth_failure && self.rotate_to_secondary() {
				debug!("retrying request with secondary API key");
				return self.request(method, path, body).await;
			}
		}

		result
	}

	/// Rotates to the secondary key. Returns false when no secondary is
	/// configured or it is already active.
	fn rotate_to_secondary(&self) -> bool {
		let Some(secondary) = &self.config.secondary_api_key else {
			return false;
		};

		let mut keys = self.keys.write().expect("key lock poisoned");
		if keys.current == *secondary {
			return false;
		}

		info!("rotating to secondary API key after authentication failure");
		keys.current = secondary.clone();
		keys.rotated_at = Some(Instant::now());
		true
	}

	async fn request(
		&self,
		method: HttpMethod,
		path: &str,
		body: Option<Vec<u8>>,
	) -> Result<PipelineResponse> {
		let mut last_err: Option<FlagKitError> = None;

		for attempt in 1..=self.config.retry.max_attempts.max(1) {
			if self.cancelled.load(Ordering::SeqCst) {
				return Err(cancelled_error());
			}

			let err = if !self.breaker.allow() {
				FlagKitError::new(ErrorCode::CircuitOpen, "circuit breaker is open")
			} else {
				match self.execute_once(method, path, body.as_deref()).await {
					Ok(response) => {
						self.breaker.record_success();
						return Ok(response);
					}
					Err(e) => {
						if !e.is_recoverable() {
							self.breaker.record_failure();
							return Err(e);
						}
						e
					}
				}
			};

			if attempt < self.config.retry.max_attempts {
				let delay = backoff_delay(attempt, &self.config.retry);
				debug!(
					attempt,
					max_attempts = self.config.retry.max_attempts,
					delay_ms = delay.as_millis() as u64,
					error = %err,
					"retrying request"
				);

				last_err = Some(err);
				tokio::select! {
					_ = tokio::time::sleep(delay) => {}
					_ = self.cancel_notify.notified() => return Err(cancelled_error()),
				}
			} else {
				last_err = Some(err);
			}
		}

		let last_err = last_err.expect("at least one attempt ran");
		if last_err.code() == ErrorCode::CircuitOpen {
			// A denied admission is not a backend failure; recording one
			// would push the half-open probe further out.
			return Err(last_err);
		}

		self.breaker.record_failure();
		Err(FlagKitError::with_cause(
			ErrorCode::NetworkRetryLimit,
			"max retries exceeded",
			last_err,
		))
	}

	async fn execute_once(
		&self,
		method: HttpMethod,
		path: &str,
		body: Option<&[u8]>,
	) -> Result<PipelineResponse> {
		let api_key = self.active_api_key();
		let mut headers = vec![
			("X-API-Key".to_string(), api_key.clone()),
			("Content-Type".to_string(), "application/json".to_string()),
			("Accept".to_string(), "application/json".to_string()),
			(
				"User-Agent".to_string(),
				format!("FlagKit/{}", self.config.sdk_version),
			),
			(
				"X-FlagKit-SDK-Version".to_string(),
				self.config.sdk_version.clone(),
			),
			("X-FlagKit-SDK-Language".to_string(), "rust".to_string()),
		];

		if method == HttpMethod::Post && self.config.enable_request_signing {
			if let Some(body) = body {
				if !body.is_empty() {
					let signature = create_request_signature(body, &api_key);
					headers.push(("X-Signature".to_string(), signature.signature));
					headers.push(("X-Timestamp".to_string(), signature.timestamp.to_string()));
					headers.push(("X-Key-Id".to_string(), signature.key_id));
				}
			}
		}

		let request = TransportRequest {
			method,
			url: format!("{}{}", self.config.base_url, path),
			headers,
			body: body.map(|b| b.to_vec()),
			timeout: self.config.timeout,
		};

		let response = self.transport.execute(request).await?;

		if response.status >= 400 {
			return Err(map_status_error(&response));
		}

		let usage = parse_usage_metrics(&response);
		Ok(PipelineResponse {
			status: response.status,
			body: response.body,
			usage,
		})
	}
}

fn cancelled_error() -> FlagKitError {
	FlagKitError::new(ErrorCode::NetworkError, "request cancelled").non_recoverable()
}

fn map_status_error(response: &TransportResponse) -> FlagKitError {
	let message = if response.body.is_empty() {
		format!("HTTP {}", response.status)
	} else {
		String::from_utf8_lossy(&response.body).into_owned()
	};

	match response.status {
		401 => FlagKitError::new(ErrorCode::AuthUnauthorized, message),
		403 => FlagKitError::new(ErrorCode::AuthInvalidKey, message),
		404 => FlagKitError::new(ErrorCode::EvalFlagNotFound, message),
		429 => FlagKitError::new(ErrorCode::NetworkRetryLimit, message),
		500..=599 => FlagKitError::new(ErrorCode::NetworkError, message),
		status => FlagKitError::new(ErrorCode::NetworkError, format!("HTTP {status}: {message}"))
			.non_recoverable(),
	}
}

fn parse_usage_metrics(response: &TransportResponse) -> Option<UsageMetrics> {
	let headers = &response.headers;
	let api_usage = headers.get("x-flagkit-api-usage");
	let eval_usage = headers.get("x-flagkit-eval-usage");
	let rate_warning = headers.get("x-flagkit-rate-limit-warning");
	let status = headers.get("x-flagkit-subscription-status");

	if api_usage.is_none() && eval_usage.is_none() && rate_warning.is_none() && status.is_none() {
		return None;
	}

	let parse_percent = |value: Option<&String>| {
		value
			.and_then(|v| v.parse::<f64>().ok())
			.unwrap_or_default()
	};

	let metrics = UsageMetrics {
		api_usage_percent: parse_percent(api_usage),
		evaluation_usage_percent: parse_percent(eval_usage),
		rate_limit_warning: rate_warning.map(|v| v == "true").unwrap_or(false),
		subscription_status: status.cloned().unwrap_or_default(),
	};

	if metrics.rate_limit_warning {
		warn!(
			api_usage = metrics.api_usage_percent,
			eval_usage = metrics.evaluation_usage_percent,
			"approaching FlagKit rate limit"
		);
	}

	Some(metrics)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::circuit_breaker::CircuitState;
	use std::collections::HashMap;
	use std::sync::Mutex;

	/// A transport that replays a scripted sequence of outcomes and records
	/// every request it sees.
	struct ScriptedTransport {
		script: Mutex<Vec<std::result::Result<TransportResponse, ErrorCode>>>,
		requests: Mutex<Vec<TransportRequest>>,
	}

	impl ScriptedTransport {
		fn new(script: Vec<std::result::Result<TransportResponse, ErrorCode>>) -> Arc<Self> {
			Arc::new(Self {
				script: Mutex::new(script),
				requests: Mutex::new(Vec::new()),
			})
		}

		fn requests(&self) -> Vec<TransportRequest> {
			self.requests.lock().unwrap().clone()
		}
	}

	#[async_trait::async_trait]
	impl Transport for ScriptedTransport {
		async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
			self.requests.lock().unwrap().push(request);

			let mut script = self.script.lock().unwrap();
			let outcome = if script.is_empty() {
				Ok(ok_response(200))
			} else {
				script.remove(0)
			};

			outcome.map_err(|code| FlagKitError::new(code, "scripted failure"))
		}
	}

	fn ok_response(status: u16) -> TransportResponse {
		TransportResponse {
			status,
			headers: HashMap::new(),
			body: br#"{"success": true}"#.to_vec(),
		}
	}

	fn status_response(status: u16) -> TransportResponse {
		TransportResponse {
			status,
			headers: HashMap::new(),
			body: Vec::new(),
		}
	}

	fn config() -> PipelineConfig {
		PipelineConfig {
			base_url: "https://api.flagkit.dev/api/v1".to_string(),
			api_key: "sdk_primary_1234567890".to_string(),
			secondary_api_key: None,
			key_rotation_grace_period: Duration::from_secs(300),
			enable_request_signing: true,
			timeout: Duration::from_secs(5),
			retry: RetryConfig {
				max_attempts: 3,
				base_delay: Duration::from_millis(1),
				max_delay: Duration::from_millis(5),
				backoff_multiplier: 2.0,
				jitter: Duration::ZERO,
			},
			circuit_breaker: CircuitBreakerConfig::default(),
			sdk_version: "1.0.0".to_string(),
		}
	}

	#[tokio::test]
	async fn get_success() {
		let transport = ScriptedTransport::new(vec![Ok(ok_response(200))]);
		let pipeline = RequestPipeline::new(config(), transport.clone());

		let response = pipeline.get("/sdk/init").await.unwrap();
		assert_eq!(response.status, 200);

		let requests = transport.requests();
		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].url, "https://api.flagkit.dev/api/v1/sdk/init");
	}

	#[tokio::test]
	async fn standard_headers_are_attached() {
		let transport = ScriptedTransport::new(vec![Ok(ok_response(200))]);
		let pipeline = RequestPipeline::new(config(), transport.clone());
		pipeline.get("/sdk/init").await.unwrap();

		let requests = transport.requests();
		let headers: HashMap<_, _> = requests[0].headers.iter().cloned().collect();
		assert_eq!(headers["X-API-Key"], "sdk_primary_1234567890");
		assert_eq!(headers["User-Agent"], "FlagKit/1.0.0");
		assert_eq!(headers["X-FlagKit-SDK-Version"], "1.0.0");
		assert_eq!(headers["X-FlagKit-SDK-Language"], "rust");
	}

	#[tokio::test]
	async fn post_attaches_signature_headers() {
		let transport = ScriptedTransport::new(vec![Ok(ok_response(200))]);
		let pipeline = RequestPipeline::new(config(), transport.clone());

		pipeline
			.post("/sdk/events/batch", &serde_json::json!({"events": []}))
			.await
			.unwrap();

		let requests = transport.requests();
		let headers: HashMap<_, _> = requests[0].headers.iter().cloned().collect();
		assert_eq!(headers["X-Signature"].len(), 64);
		assert!(headers["X-Timestamp"].parse::<i64>().unwrap() > 0);
		assert_eq!(headers["X-Key-Id"], "sdk_prim");
	}

	#[tokio::test]
	async fn signing_disabled_omits_signature_headers() {
		let transport = ScriptedTransport::new(vec![Ok(ok_response(200))]);
		let mut cfg = config();
		cfg.enable_request_signing = false;
		let pipeline = RequestPipeline::new(cfg, transport.clone());

		pipeline
			.post("/sdk/events/batch", &serde_json::json!({"events": []}))
			.await
			.unwrap();

		let requests = transport.requests();
		assert!(!requests[0].headers.iter().any(|(k, _)| k == "X-Signature"));
	}

	#[tokio::test]
	async fn recoverable_errors_are_retried() {
		let transport = ScriptedTransport::new(vec![
			Err(ErrorCode::NetworkError),
			Err(ErrorCode::NetworkError),
			Ok(ok_response(200)),
		]);
		let pipeline = RequestPipeline::new(config(), transport.clone());

		let response = pipeline.get("/sdk/updates").await.unwrap();
		assert_eq!(response.status, 200);
		assert_eq!(transport.requests().len(), 3);
	}

	#[tokio::test]
	async fn exhausted_retries_surface_retry_limit() {
		let transport = ScriptedTransport::new(vec![
			Err(ErrorCode::NetworkError),
			Err(ErrorCode::NetworkError),
			Err(ErrorCode::NetworkError),
		]);
		let pipeline = RequestPipeline::new(config(), transport.clone());

		let err = pipeline.get("/sdk/updates").await.unwrap_err();
		assert_eq!(err.code(), ErrorCode::NetworkRetryLimit);
		assert_eq!(transport.requests().len(), 3);
	}

	#[tokio::test]
	async fn non_recoverable_error_stops_immediately() {
		let transport =
			ScriptedTransport::new(vec![Ok(status_response(404)), Ok(ok_response(200))]);
		let pipeline = RequestPipeline::new(config(), transport.clone());

		let err = pipeline.get("/sdk/flags/missing").await.unwrap_err();
		assert_eq!(err.code(), ErrorCode::EvalFlagNotFound);
		assert_eq!(transport.requests().len(), 1);
	}

	#[tokio::test]
	async fn status_mapping() {
		for (status, code, recoverable) in [
			(401, ErrorCode::AuthUnauthorized, false),
			(403, ErrorCode::AuthInvalidKey, false),
			(404, ErrorCode::EvalFlagNotFound, false),
			(429, ErrorCode::NetworkRetryLimit, true),
			(500, ErrorCode::NetworkError, true),
			(503, ErrorCode::NetworkError, true),
			(418, ErrorCode::NetworkError, false),
		] {
			let err = map_status_error(&status_response(status));
			assert_eq!(err.code(), code, "status {status}");
			assert_eq!(err.is_recoverable(), recoverable, "status {status}");
		}
	}

	#[tokio::test]
	async fn key_rotation_on_401() {
		let transport =
			ScriptedTransport::new(vec![Ok(status_response(401)), Ok(ok_response(200))]);
		let mut cfg = config();
		cfg.secondary_api_key = Some("sdk_secondary_0987654321".to_string());
		let pipeline = RequestPipeline::new(cfg, transport.clone());

		let response = pipeline
			.post("/sdk/events/batch", &serde_json::json!({"events": []}))
			.await
			.unwrap();
		assert_eq!(response.status, 200);

		assert_eq!(pipeline.active_api_key(), "sdk_secondary_0987654321");
		assert!(pipeline.is_in_key_rotation());

		// The retried request was signed with the secondary key.
		let requests = transport.requests();
		assert_eq!(requests.len(), 2);
		let headers: HashMap<_, _> = requests[1].headers.iter().cloned().collect();
		assert_eq!(headers["X-API-Key"], "sdk_secondary_0987654321");
		assert_eq!(headers["X-Key-Id"], "sdk_seco");
	}

	#[tokio::test]
	async fn second_auth_failure_surfaces_after_rotation() {
		let transport = ScriptedTransport::new(vec![
			Ok(status_response(401)),
			Ok(status_response(401)),
			Ok(status_response(401)),
		]);
		let mut cfg = config();
		cfg.secondary_api_key = Some("sdk_secondary_0987654321".to_string());
		let pipeline = RequestPipeline::new(cfg, transport.clone());

		let err = pipeline
			.post("/sdk/events/batch", &serde_json::json!({"events": []}))
			.await
			.unwrap_err();
		assert_eq!(err.code(), ErrorCode::AuthUnauthorized);

		// Once rotated, later failures do not rotate back.
		let err = pipeline
			.post("/sdk/events/batch", &serde_json::json!({"events": []}))
			.await
			.unwrap_err();
		assert_eq!(err.code(), ErrorCode::AuthUnauthorized);
		assert_eq!(pipeline.active_api_key(), "sdk_secondary_0987654321");
	}

	#[tokio::test]
	async fn no_rotation_without_secondary_key() {
		let transport = ScriptedTransport::new(vec![Ok(status_response(401))]);
		let pipeline = RequestPipeline::new(config(), transport.clone());

		let err = pipeline.get("/sdk/init").await.unwrap_err();
		assert_eq!(err.code(), ErrorCode::AuthUnauthorized);
		assert_eq!(transport.requests().len(), 1);
		assert!(!pipeline.is_in_key_rotation());
	}

	#[tokio::test]
	async fn breaker_trips_and_recovers() {
		let transport = ScriptedTransport::new(vec![
			Err(ErrorCode::NetworkError),
			Err(ErrorCode::NetworkError),
			Err(ErrorCode::NetworkError),
			Ok(ok_response(200)),
		]);
		let mut cfg = config();
		cfg.retry.max_attempts = 1;
		cfg.circuit_breaker = CircuitBreakerConfig {
			failure_threshold: 3,
			success_threshold: 1,
			reset_timeout: Duration::from_millis(50),
			half_open_max_allowed: 1,
		};
		let pipeline = RequestPipeline::new(cfg, transport.clone());

		for _ in 0..3 {
			let _ = pipeline.get("/sdk/updates").await;
		}
		assert_eq!(
			pipeline.circuit_breaker_stats().state,
			CircuitState::Open
		);

		// While open, calls fail fast without reaching the transport.
		let err = pipeline.get("/sdk/updates").await.unwrap_err();
		assert_eq!(err.code(), ErrorCode::CircuitOpen);
		assert_eq!(transport.requests().len(), 3);

		tokio::time::sleep(Duration::from_millis(100)).await;

		// The next call is the half-open probe; success closes the breaker.
		let response = pipeline.get("/sdk/updates").await.unwrap();
		assert_eq!(response.status, 200);
		assert_eq!(
			pipeline.circuit_breaker_stats().state.as_str(),
			"CLOSED"
		);
	}

	#[tokio::test]
	async fn usage_metrics_are_extracted() {
		let mut headers = HashMap::new();
		headers.insert("x-flagkit-api-usage".to_string(), "82.5".to_string());
		headers.insert("x-flagkit-eval-usage".to_string(), "40".to_string());
		headers.insert(
			"x-flagkit-rate-limit-warning".to_string(),
			"true".to_string(),
		);
		headers.insert(
			"x-flagkit-subscription-status".to_string(),
			"active".to_string(),
		);
		let transport = ScriptedTransport::new(vec![Ok(TransportResponse {
			status: 200,
			headers,
			body: b"{}".to_vec(),
		})]);
		let pipeline = RequestPipeline::new(config(), transport);

		let response = pipeline.get("/sdk/init").await.unwrap();
		let usage = response.usage.unwrap();
		assert_eq!(usage.api_usage_percent, 82.5);
		assert_eq!(usage.evaluation_usage_percent, 40.0);
		assert!(usage.rate_limit_warning);
		assert_eq!(usage.subscription_status, "active");
	}

	#[tokio::test]
	async fn responses_without_usage_headers_have_none() {
		let transport = ScriptedTransport::new(vec![Ok(ok_response(200))]);
		let pipeline = RequestPipeline::new(config(), transport);

		let response = pipeline.get("/sdk/init").await.unwrap();
		assert!(response.usage.is_none());
	}

	#[tokio::test]
	async fn shutdown_cancels_requests() {
		let transport = ScriptedTransport::new(vec![]);
		let pipeline = RequestPipeline::new(config(), transport);

		pipeline.shutdown();
		let err = pipeline.get("/sdk/init").await.unwrap_err();
		assert_eq!(err.code(), ErrorCode::NetworkError);
		assert!(!err.is_recoverable());
	}
}
