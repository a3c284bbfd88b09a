// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the FlagKit feature flags SDK.
//!
//! This crate provides the shared vocabulary used across the SDK crates:
//! flag states and their dynamically typed values, evaluation contexts and
//! results, the error taxonomy, API key classification, and the wire types
//! for the FlagKit service endpoints.
//!
//! # Overview
//!
//! Flag values are dynamically typed ([`FlagValue`]) and tagged with a
//! [`FlagType`]. Evaluation never fails: every read produces an
//! [`EvaluationResult`] whose [`EvaluationReason`] explains where the value
//! came from (fresh cache, stale cache, bootstrap, or the caller's default).
//!
//! # Example
//!
//! ```
//! use flagkit_core::{EvaluationContext, EvaluationReason, EvaluationResult, FlagValue};
//!
//! let ctx = EvaluationContext::new()
//!     .with_user_id("user123")
//!     .with_custom("plan", serde_json::json!("enterprise"));
//!
//! let result = EvaluationResult::new(
//!     "feature.new_flow",
//!     FlagValue::Bool(true),
//!     true,
//!     EvaluationReason::Cached,
//!     3,
//! );
//! assert!(result.bool_value());
//! assert_eq!(ctx.user_id.as_deref(), Some("user123"));
//! ```

pub mod api_key;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod flag;
pub mod version;
pub mod wire;

pub use api_key::{key_id, ApiKey, ApiKeyKind};
pub use context::EvaluationContext;
pub use error::{ErrorCode, FlagKitError, Result};
pub use evaluation::{EvaluationReason, EvaluationResult};
pub use flag::{FlagState, FlagType, FlagValue};
pub use wire::{
	EventsBatchResponse, InitResponse, UpdatesResponse, UsageMetrics, VersionMetadata,
};
