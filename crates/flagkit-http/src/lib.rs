// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resilient request pipeline for the FlagKit SDK.
//!
//! This crate wraps a single injected transport call with four cross-cutting
//! policies:
//! - Retry with jittered exponential backoff
//! - A circuit breaker that fast-fails while the backend is unhealthy
//! - HMAC-SHA256 request signing for POST bodies
//! - Primary-to-secondary API key failover on authentication failures
//!
//! The actual HTTP transport is behind the [`Transport`] trait; a
//! reqwest-backed [`HttpTransport`] is the production implementation and
//! tests inject scripted mocks.

pub mod circuit_breaker;
pub mod pipeline;
pub mod retry;
pub mod transport;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use pipeline::{PipelineConfig, PipelineResponse, RequestPipeline};
pub use retry::{backoff_delay, RetryConfig};
pub use transport::{HttpMethod, HttpTransport, Transport, TransportRequest, TransportResponse};
