// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Analytics event pipeline for the FlagKit SDK.
//!
//! Events are buffered in a bounded in-memory queue and delivered in batches
//! by a background worker. When persistence is enabled, every event is
//! written to an append-only write-ahead log before it becomes eligible for
//! flush, and delivery progress is tracked through a status state machine
//! (`pending → sending → sent | failed`). On startup the log is replayed and
//! unsent events are re-queued, giving at-least-once delivery across process
//! crashes.

pub mod event;
pub mod id;
pub mod queue;
pub mod wal;

pub use event::{Event, EventStatus, PersistedEvent};
pub use id::generate_event_id;
pub use queue::{EventQueue, EventQueueConfig, EventSender};
pub use wal::{EventWal, EventWalConfig};
