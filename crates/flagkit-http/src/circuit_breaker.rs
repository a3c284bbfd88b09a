// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Circuit breaker.
//!
//! Exposed as a gate (`allow`) plus reporters (`record_success`,
//! `record_failure`) rather than a call wrapper, so the retry loop decides
//! how to treat a breaker-open condition. All transitions run under one
//! mutex held only for O(1) work; the network call happens outside.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
	/// Normal operation.
	Closed,
	/// Failing; requests are rejected.
	Open,
	/// Probing whether the backend recovered.
	HalfOpen,
}

impl CircuitState {
	pub fn as_str(&self) -> &'static str {
		match self {
			CircuitState::Closed => "CLOSED",
			CircuitState::Open => "OPEN",
			CircuitState::HalfOpen => "HALF_OPEN",
		}
	}
}

impl std::fmt::Display for CircuitState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
	/// Consecutive failures in CLOSED before opening.
	pub failure_threshold: u32,
	/// Successes in HALF_OPEN before closing.
	pub success_threshold: u32,
	/// Time the breaker stays OPEN before admitting a probe.
	pub reset_timeout: Duration,
	/// Maximum concurrent probes admitted in HALF_OPEN.
	pub half_open_max_allowed: u32,
}

impl Default for CircuitBreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: 5,
			success_threshold: 2,
			reset_timeout: Duration::from_secs(30),
			half_open_max_allowed: 1,
		}
	}
}

#[derive(Debug)]
struct Inner {
	state: CircuitState,
	failures: u32,
	successes: u32,
	last_failure_at: Option<Instant>,
	half_open_allowed: u32,
	half_open_in_progress: u32,
}

/// A circuit breaker guarding one backend.
#[derive(Debug)]
pub struct CircuitBreaker {
	config: CircuitBreakerConfig,
	inner: Mutex<Inner>,
}

/// A point-in-time snapshot of breaker state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerStats {
	pub state: CircuitState,
	pub failures: u32,
	pub successes: u32,
	pub failure_threshold: u32,
	pub success_threshold: u32,
	pub half_open_in_progress: u32,
}

impl CircuitBreaker {
	pub fn new(config: CircuitBreakerConfig) -> Self {
		Self {
			config,
			inner: Mutex::new(Inner {
				state: CircuitState::Closed,
				failures: 0,
				successes: 0,
				last_failure_at: None,
				half_open_allowed: 0,
				half_open_in_progress: 0,
			}),
		}
	}

	/// Consults the breaker. Returns whether this call may proceed.
	///
	/// In HALF_OPEN an admission counts against the probe budget; the caller
	/// must follow up with `record_success` or `record_failure`.
	pub fn allow(&self) -> bool {
		let mut inner = self.inner.lock().expect("breaker lock poisoned");

		match inner.state {
			CircuitState::Closed => true,
			CircuitState::Open => {
				let elapsed_enough = inner
					.last_failure_at
					.map(|t| t.elapsed() >= self.config.reset_timeout)
					.unwrap_or(true);
				if !elapsed_enough {
					return false;
				}

				transition(&mut inner, CircuitState::HalfOpen);
				inner.half_open_allowed = self.config.half_open_max_allowed;
				inner.half_open_in_progress = 0;
				admit_half_open(&mut inner)
			}
			CircuitState::HalfOpen => admit_half_open(&mut inner),
		}
	}

	/// Reports a successful call.
	pub fn record_success(&self) {
		let mut inner = self.inner.lock().expect("breaker lock poisoned");

		match inner.state {
			CircuitState::HalfOpen => {
				inner.successes += 1;
				inner.half_open_in_progress = inner.half_open_in_progress.saturating_sub(1);
				if inner.successes >= self.config.success_threshold {
					transition(&mut inner, CircuitState::Closed);
				}
			}
			CircuitState::Closed => {
				inner.failures = 0;
			}
			CircuitState::Open => {}
		}
	}

	/// Reports a failed call.
	pub fn record_failure(&self) {
		let mut inner = self.inner.lock().expect("breaker lock poisoned");
		inner.last_failure_at = Some(Instant::now());

		match inner.state {
			CircuitState::Closed => {
				inner.failures += 1;
				if inner.failures >= self.config.failure_threshold {
					transition(&mut inner, CircuitState::Open);
				}
			}
			CircuitState::HalfOpen => {
				inner.half_open_in_progress = inner.half_open_in_progress.saturating_sub(1);
				transition(&mut inner, CircuitState::Open);
			}
			CircuitState::Open => {}
		}
	}

	pub fn state(&self) -> CircuitState {
		self.inner.lock().expect("breaker lock poisoned").state
	}

	/// Resets the breaker to CLOSED with cleared counters.
	pub fn reset(&self) {
		let mut inner = self.inner.lock().expect("breaker lock poisoned");
		inner.state = CircuitState::Closed;
		inner.failures = 0;
		inner.successes = 0;
		inner.last_failure_at = None;
		inner.half_open_allowed = 0;
		inner.half_open_in_progress = 0;
	}

	pub fn stats(&self) -> CircuitBreakerStats {
		let inner = self.inner.lock().expect("breaker lock poisoned");
		CircuitBreakerStats {
			state: inner.state,
			failures: inner.failures,
			successes: inner.successes,
			failure_threshold: self.config.failure_threshold,
			success_threshold: self.config.success_threshold,
			half_open_in_progress: inner.half_open_in_progress,
		}
	}
}

fn admit_half_open(inner: &mut Inner) -> bool {
	if inner.half_open_in_progress < inner.half_open_allowed {
		inner.half_open_in_progress += 1;
		true
	} else {
		false
	}
}

fn transition(inner: &mut Inner, to: CircuitState) {
	let from = inner.state;
	inner.state = to;
	inner.failures = 0;
	inner.successes = 0;
	debug!(from = %from, to = %to, "circuit breaker state change");
}
