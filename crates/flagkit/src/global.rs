// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-wide singleton entry point.
//!
//! Holds at most one active client. [`initialize`] and [`shutdown`] are the
//! only mutators: initialization fails when a client is already registered,
//! shutdown is idempotent and empties the slot.

use std::sync::RwLock;

use tracing::warn;

use flagkit_core::error::{ErrorCode, FlagKitError, Result};

use crate::client::FlagKitClient;
use crate::config::Options;

static GLOBAL: RwLock<Option<FlagKitClient>> = RwLock::new(None);

/// Initializes the process-wide client.
///
/// The client is registered before its first network fetch, and an
/// initialization fetch failure does not unregister it: the client is ready
/// and serves cache/bootstrap/defaults (the error reaches the `on_error`
/// callback). Fails when a client is already registered.
pub async fn initialize(options: Options) -> Result<FlagKitClient> {
	let client = FlagKitClient::new(options)?;

	{
		let mut slot = GLOBAL.write().expect("global lock poisoned");
		if slot.is_some() {
			return Err(FlagKitError::new(
				ErrorCode::InitAlreadyInitialized,
				"FlagKit is already initialized; call shutdown first",
			));
		}
		*slot = Some(client.clone());
	}

	if let Err(e) = client.initialize().await {
		warn!(error = %e, "initialization failed; continuing with cache/bootstrap/defaults");
	}

	Ok(client)
}

/// Returns the process-wide client.
pub fn global() -> Result<FlagKitClient> {
	GLOBAL
		.read()
		.expect("global lock poisoned")
		.clone()
		.ok_or_else(|| {
			FlagKitError::new(
				ErrorCode::InitNotInitialized,
				"FlagKit is not initialized; call initialize first",
			)
		})
}

pub fn is_initialized() -> bool {
	GLOBAL.read().expect("global lock poisoned").is_some()
}

/// Shuts down and unregisters the process-wide client. Idempotent.
pub async fn shutdown() -> Result<()> {
	let client = GLOBAL.write().expect("global lock poisoned").take();

	if let Some(client) = client {
		client.close().await?;
	}
	Ok(())
}
