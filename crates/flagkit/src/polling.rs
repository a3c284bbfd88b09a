// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Polling engine: runs a poll action on a dynamic interval with
//! exponential backoff on failure and random jitter on every sleep.
//!
//! One cooperative worker per engine. The worker sleeps for
//! `current_interval + uniform(0, jitter)` or until cancellation, runs the
//! action, then reads the possibly-updated interval. A panic in the action
//! is caught, logged, and counted as a failure; the worker never dies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use rand::Rng;
use tokio::sync::Notify;
use tracing::{debug, error};

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct PollingConfig {
	/// Base interval between polls.
	pub interval: Duration,
	/// Upper bound of the uniform jitter added to every sleep.
	pub jitter: Duration,
	/// Backoff multiplier applied per consecutive failure.
	pub backoff_multiplier: f64,
	/// Ceiling for the backed-off interval.
	pub max_interval: Duration,
}

impl Default for PollingConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(30),
			jitter: Duration::from_secs(1),
			backoff_multiplier: 2.0,
			max_interval: Duration::from_secs(300),
		}
	}
}

/// The action invoked on every poll tick.
///
/// Implementations report their own outcome to the engine via
/// [`PollingEngine::on_success`] / [`PollingEngine::on_failure`].
#[async_trait]
pub trait PollAction: Send + Sync {
	async fn poll(&self);
}

#[derive(Debug)]
struct PollState {
	current_interval: Duration,
	consecutive_errors: u32,
}

/// Schedules a poll action with backoff and jitter.
pub struct PollingEngine {
	config: PollingConfig,
	action: Arc<dyn PollAction>,
	state: Mutex<PollState>,
	running: AtomicBool,
	stop: Notify,
}

impl PollingEngine {
	pub fn new(action: Arc<dyn PollAction>, config: PollingConfig) -> Self {
		let state = PollState {
			current_interval: config.interval,
			consecutive_errors: 0,
		};
		Self {
			config,
			action,
			state: Mutex::new(state),
			running: AtomicBool::new(false),
			stop: Notify::new(),
		}
	}

	/// Starts the background worker. Calling twice while running is a no-op.
	pub fn start(self: &Arc<Self>) {
		if self.running.swap(true, Ordering::SeqCst) {
			return;
		}

		debug!(interval_secs = self.config.interval.as_secs(), "polling started");

		let engine = Arc::clone(self);
		tokio::spawn(async move {
			engine.run().await;
		});
	}

	/// Signals cancellation and returns promptly. Idempotent.
	pub fn stop(&self) {
		if self.running.swap(false, Ordering::SeqCst) {
			self.stop.notify_waiters();
			debug!("polling stopped");
		}
	}

	pub fn is_active(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	/// The interval that will be used for the next sleep.
	pub fn current_interval(&self) -> Duration {
		self.state.lock().expect("polling lock poisoned").current_interval
	}

	pub fn consecutive_errors(&self) -> u32 {
		self
			.state
			.lock()
			.expect("polling lock poisoned")
			.consecutive_errors
	}

	/// Resets the interval to base after a successful poll.
	pub fn on_success(&self) {
		let mut state = self.state.lock().expect("polling lock poisoned");
		state.consecutive_errors = 0;
		state.current_interval = self.config.interval;
	}

	/// Backs off the interval after a failed poll. Never decreases
	/// mid-failure.
	pub fn on_failure(&self) {
		let mut state = self.state.lock().expect("polling lock poisoned");
		state.consecutive_errors += 1;

		let scaled = state.current_interval.as_secs_f64() * self.config.backoff_multiplier;
		let capped = scaled.min(self.config.max_interval.as_secs_f64());
		state.current_interval = Duration::from_secs_f64(capped);

		debug!(
			interval_ms = state.current_interval.as_millis() as u64,
			consecutive_errors = state.consecutive_errors,
			"polling backoff"
		);
	}

	/// Resets interval and error counters to their initial values.
	pub fn reset(&self) {
		let mut state = self.state.lock().expect("polling lock poisoned");
		state.consecutive_errors = 0;
		state.current_interval = self.config.interval;
	}

	/// Runs the action once, synchronously on the caller. Does not touch the
	/// worker's schedule; the scheduler may still fire on its own cadence.
	pub async fn poll_now(&self) {
		self.invoke().await;
	}

	async fn run(&self) {
		loop {
			let delay = self.next_delay();

			tokio::select! {
				_ = self.stop.notified() => return,
				_ = tokio::time::sleep(delay) => {
					if !self.running.load(Ordering::SeqCst) {
						return;
					}
					self.invoke().await;
				}
			}
		}
	}

	async fn invoke(&self) {
		let action = Arc::clone(&self.action);
		let result = std::panic::AssertUnwindSafe(async move {
			action.poll().await;
		})
		.catch_unwind()
		.await;

		if let Err(panic) = result {
			let message = panic
				.downcast_ref::<&str>()
				.map(|s| s.to_string())
				.or_else(|| panic.downcast_ref::<String>().cloned())
				.unwrap_or_else(|| "unknown panic".to_string());
			error!(panic = %message, "poll action panicked");
			self.on_failure();
		}
	}

	fn next_delay(&self) -> Duration {
		let interval = self.current_interval();
		if self.config.jitter.is_zero() {
			return interval;
		}

		let jitter =
			rand::thread_rng().gen_range(Duration::ZERO..=self.config.jitter);
		interval + jitter
	}
}
