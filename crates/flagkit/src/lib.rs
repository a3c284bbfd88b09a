// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! FlagKit feature flags SDK for Rust.
//!
//! A client for evaluating feature flags against the FlagKit service,
//! built to stay useful through partial failure: flags are served from a
//! TTL cache with a stale-read fallback, updates arrive through a polling
//! engine with exponential backoff, requests flow through a pipeline
//! combining retry, a circuit breaker, HMAC request signing, and API key
//! failover, and analytics events survive crashes via a write-ahead log.
//!
//! # Features
//!
//! - **Resilient evaluation**: reads never fail; they degrade through
//!   fresh cache, stale cache, bootstrap values, and the caller's default
//! - **Signed bootstrap**: initial flag values can carry an HMAC-SHA256
//!   signature verified at construction
//! - **Crash-safe analytics**: events are persisted before delivery and
//!   recovered on restart (at-least-once)
//! - **Key rotation**: automatic failover to a secondary API key on
//!   authentication failures
//! - **Cache encryption**: optional AES-256-GCM encryption of persisted
//!   cache data
//!
//! # Example
//!
//! ```ignore
//! use flagkit::{FlagKitClient, Options};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlagKitClient::new(Options::new("sdk_your_api_key"))?;
//!     client.initialize().await?;
//!
//!     let enabled = client.get_bool("checkout.new_flow", false).await;
//!     let theme = client.get_string("ui.theme", "light").await;
//!
//!     client.track("app_started", Default::default()).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod global;
pub mod polling;

pub use cache::{CacheConfig, CacheStats, FlagCache};
pub use client::{FlagKitClient, SDK_VERSION};
pub use config::{Callbacks, EvaluationJitter, Options};
pub use global::{global, initialize, is_initialized, shutdown};
pub use polling::{PollAction, PollingConfig, PollingEngine};

// Re-export the shared vocabulary so most applications only need this crate.
pub use flagkit_core::{
	ApiKey, ApiKeyKind, ErrorCode, EvaluationContext, EvaluationReason, EvaluationResult,
	FlagKitError, FlagState, FlagType, FlagValue, Result, UsageMetrics,
};
pub use flagkit_events::{Event, EventStatus};
pub use flagkit_security::{
	create_bootstrap_signature, BootstrapVerification, ErrorSanitization, SignedBootstrap,
	VerificationFailurePolicy,
};
