// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The transport seam.
//!
//! The pipeline is written against [`Transport`], a one-method contract for
//! executing a single HTTP exchange. Production uses the reqwest-backed
//! [`HttpTransport`]; tests inject scripted mocks.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use flagkit_core::error::{ErrorCode, FlagKitError, Result};

/// HTTP methods used by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
	Get,
	Post,
}

impl HttpMethod {
	pub fn as_str(&self) -> &'static str {
		match self {
			HttpMethod::Get => "GET",
			HttpMethod::Post => "POST",
		}
	}
}

/// A single logical HTTP request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
	pub method: HttpMethod,
	pub url: String,
	pub headers: Vec<(String, String)>,
	pub body: Option<Vec<u8>>,
	pub timeout: Duration,
}

/// The transport-level response. Error statuses are returned as responses;
/// mapping to SDK errors happens in the pipeline.
#[derive(Debug, Clone)]
pub struct TransportResponse {
	pub status: u16,
	/// Header names lowercased.
	pub headers: HashMap<String, String>,
	pub body: Vec<u8>,
}

/// Executes a single HTTP exchange.
///
/// Implementations return `Err` only for transport-level failures
/// (connectivity, timeout); any response from the server, including error
/// statuses, is a successful execution.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// The production transport backed by reqwest.
pub struct HttpTransport {
	client: reqwest::Client,
}

impl HttpTransport {
	/// Builds a transport with the standard FlagKit user agent and timeout.
	pub fn new(timeout: Duration, sdk_version: &str) -> Result<Self> {
		let client = reqwest::Client::builder()
			.user_agent(format!("FlagKit/{sdk_version}"))
			.timeout(timeout)
			.build()
			.map_err(|e| {
				FlagKitError::with_cause(ErrorCode::NetworkError, "failed to build HTTP client", e)
			})?;

		Ok(Self { client })
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
		let mut builder = match request.method {
			HttpMethod::Get => self.client.get(&request.url),
			HttpMethod::Post => self.client.post(&request.url),
		};

		builder = builder.timeout(request.timeout);
		for (name, value) in &request.headers {
			builder = builder.header(name, value);
		}
		if let Some(body) = request.body {
			builder = builder.body(body);
		}

		let response = builder.send().await.map_err(|e| {
			if e.is_timeout() {
				FlagKitError::with_cause(ErrorCode::NetworkTimeout, "request timed out", e)
			} else {
				FlagKitError::with_cause(ErrorCode::NetworkError, "request failed", e)
			}
		})?;

		let status = response.status().as_u16();
		let headers = response
			.headers()
			.iter()
			.filter_map(|(name, value)| {
				value
					.to_str()
					.ok()
					.map(|v| (name.as_str().to_lowercase(), v.to_string()))
			})
			.collect();

		let body = response
			.bytes()
			.await
			.map_err(|e| {
				FlagKitError::with_cause(
					ErrorCode::NetworkError,
					"failed to read response body",
					e,
				)
			})?
			.to_vec();

		Ok(TransportResponse {
			status,
			headers,
			body,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn method_strings() {
		assert_eq!(HttpMethod::Get.as_str(), "GET");
		assert_eq!(HttpMethod::Post.as_str(), "POST");
	}

	#[test]
	fn http_transport_builds() {
		let transport = HttpTransport::new(Duration::from_secs(5), "1.0.0");
		assert!(transport.is_ok());
	}
}
