// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry configuration and backoff computation.

use std::time::Duration;

use rand::Rng;

/// Retry configuration for the request pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_multiplier: f64,
	pub jitter: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			backoff_multiplier: 2.0,
			jitter: Duration::from_millis(100),
		}
	}
}

/// Computes the backoff delay for a retry attempt (1-based).
///
/// `base × multiplier^(attempt-1)` capped at `max_delay`, plus
/// `uniform(0, jitter)`.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
	let exponent = attempt.saturating_sub(1);
	let exponential =
		config.base_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent as i32);
	let capped = exponential.min(config.max_delay.as_secs_f64());

	let jitter = if config.jitter.is_zero() {
		0.0
	} else {
		rand::thread_rng().gen_range(0.0..config.jitter.as_secs_f64())
	};

	Duration::from_secs_f64(capped + jitter)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn no_jitter(base_ms: u64, max_ms: u64) -> RetryConfig {
		RetryConfig {
			max_attempts: 5,
			base_delay: Duration::from_millis(base_ms),
			max_delay: Duration::from_millis(max_ms),
			backoff_multiplier: 2.0,
			jitter: Duration::ZERO,
		}
	}

	#[test]
	fn delays_grow_exponentially_without_jitter() {
		let config = no_jitter(100, 10_000);

		assert_eq!(backoff_delay(1, &config), Duration::from_millis(100));
		assert_eq!(backoff_delay(2, &config), Duration::from_millis(200));
		assert_eq!(backoff_delay(3, &config), Duration::from_millis(400));
		assert_eq!(backoff_delay(4, &config), Duration::from_millis(800));
	}

	#[test]
	fn delay_is_capped_at_max() {
		let config = no_jitter(1000, 2500);

		assert_eq!(backoff_delay(1, &config), Duration::from_millis(1000));
		assert_eq!(backoff_delay(2, &config), Duration::from_millis(2000));
		assert_eq!(backoff_delay(3, &config), Duration::from_millis(2500));
		assert_eq!(backoff_delay(10, &config), Duration::from_millis(2500));
	}

	#[test]
	fn jitter_stays_within_bounds() {
		let config = RetryConfig {
			jitter: Duration::from_millis(50),
			..no_jitter(100, 10_000)
		};

		for _ in 0..100 {
			let delay = backoff_delay(1, &config);
			assert!(delay >= Duration::from_millis(100));
			assert!(delay < Duration::from_millis(151));
		}
	}

	#[test]
	fn default_config() {
		let config = RetryConfig::default();
		assert_eq!(config.max_attempts, 3);
		assert_eq!(config.backoff_multiplier, 2.0);
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn delay_never_exceeds_cap_plus_jitter(
			attempt in 1u32..20,
			base_ms in 1u64..1000,
			max_ms in 1u64..5000,
			jitter_ms in 0u64..200,
		) {
			let config = RetryConfig {
				max_attempts: 20,
				base_delay: Duration::from_millis(base_ms),
				max_delay: Duration::from_millis(max_ms),
				backoff_multiplier: 2.0,
				jitter: Duration::from_millis(jitter_ms),
			};

			let delay = backoff_delay(attempt, &config);
			let ceiling = config.max_delay + config.jitter;
			prop_assert!(delay <= ceiling + Duration::from_millis(1));
		}

		#[test]
		fn delay_is_monotonic_before_cap(base_ms in 1u64..100) {
			let config = RetryConfig {
				max_attempts: 10,
				base_delay: Duration::from_millis(base_ms),
				max_delay: Duration::from_secs(3600),
				backoff_multiplier: 2.0,
				jitter: Duration::ZERO,
			};

			for attempt in 1..8 {
				prop_assert!(backoff_delay(attempt + 1, &config) >= backoff_delay(attempt, &config));
			}
		}
	}
}
