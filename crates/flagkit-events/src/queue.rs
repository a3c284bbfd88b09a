// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory event queue with batching and background flush.
//!
//! The queue is a bounded vector guarded by one mutex. A single background
//! worker selects on shutdown, a periodic ticker, and a batch-full signal.
//! Flushes snapshot and clear the vector under the lock, then send outside
//! it; the lock is never held across I/O. A failing send does not re-enqueue
//! in memory: when the WAL is enabled it is the source of truth and the
//! batch is marked `failed` there instead.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use flagkit_core::context::EvaluationContext;
use flagkit_core::error::Result;

use crate::event::{rfc3339, Event, EventStatus, PersistedEvent};
use crate::id::generate_event_id;
use crate::wal::EventWal;

/// Event queue configuration.
#[derive(Debug, Clone)]
pub struct EventQueueConfig {
	/// Maximum in-memory events; beyond this, new events are dropped.
	pub max_size: usize,
	/// Interval between automatic flushes.
	pub flush_interval: Duration,
	/// Queue length that triggers an early flush.
	pub batch_size: usize,
}

impl Default for EventQueueConfig {
	fn default() -> Self {
		Self {
			max_size: 1000,
			flush_interval: Duration::from_secs(30),
			batch_size: 10,
		}
	}
}

/// Delivers event batches to the server.
#[async_trait]
pub trait EventSender: Send + Sync {
	async fn send_batch(&self, events: &[Event]) -> Result<()>;
}

/// The batching event queue.
pub struct EventQueue {
	config: EventQueueConfig,
	sender: Arc<dyn EventSender>,
	wal: Option<Arc<EventWal>>,
	events: Mutex<Vec<Event>>,
	environment_id: std::sync::RwLock<String>,
	session_id: String,
	sdk_version: String,
	running: AtomicBool,
	stop: Notify,
	flush_signal: Notify,
}

impl EventQueue {
	pub fn new(
		config: EventQueueConfig,
		sender: Arc<dyn EventSender>,
		wal: Option<Arc<EventWal>>,
		session_id: impl Into<String>,
		sdk_version: impl Into<String>,
	) -> Self {
		Self {
			config,
			sender,
			wal,
			events: Mutex::new(Vec::new()),
			environment_id: std::sync::RwLock::new(String::new()),
			session_id: session_id.into(),
			sdk_version: sdk_version.into(),
			running: AtomicBool::new(false),
			stop: Notify::new(),
			flush_signal: Notify::new(),
		}
	}

	/// Sets the environment id stamped onto subsequent events.
	pub fn set_environment_id(&self, id: impl Into<String>) {
		*self.environment_id.write().expect("env lock poisoned") = id.into();
	}

	/// Queues an event. When the queue is full the event is dropped with a
	/// warning; the caller is never blocked.
	pub async fn track(&self, event_type: &str, data: BTreeMap<String, serde_json::Value>) {
		self.enqueue(event_type, data, None).await;
	}

	/// Queues an event carrying a stripped evaluation context.
	pub async fn track_with_context(
		&self,
		event_type: &str,
		data: BTreeMap<String, serde_json::Value>,
		context: &EvaluationContext,
	) {
		let context_map = context.strip_private().to_map();
		self.enqueue(event_type, data, Some(context_map)).await;
	}

	async fn enqueue(
		&self,
		event_type: &str,
		data: BTreeMap<String, serde_json::Value>,
		context: Option<BTreeMap<String, serde_json::Value>>,
	) {
		{
			let events = self.events.lock().await;
			if events.len() >= self.config.max_size {
				warn!(event_type, "event queue full, dropping event");
				return;
			}
		}

		let id = generate_event_id();
		let now = Utc::now();
		let event = Event {
			id: id.clone(),
			event_type: event_type.to_string(),
			timestamp: rfc3339(now),
			session_id: self.session_id.clone(),
			environment_id: self
				.environment_id
				.read()
				.expect("env lock poisoned")
				.clone(),
			sdk_version: self.sdk_version.clone(),
			data: data.clone(),
			context: context.clone(),
		};

		// Persist before the event becomes eligible for flush, so a crash
		// after this point cannot lose it. The queue lock is not held here:
		// it must never span WAL or network I/O.
		if let Some(wal) = &self.wal {
			let persisted = PersistedEvent {
				id,
				event_type: event_type.to_string(),
				data,
				context,
				timestamp: now.timestamp_millis(),
				status: EventStatus::Pending,
				sent_at: None,
			};
			if let Err(e) = wal.persist(persisted) {
				warn!(error = %e, event_id = %event.id, "failed to persist event");
			}
		}

		let mut events = self.events.lock().await;
		if events.len() >= self.config.max_size {
			// Filled up while persisting. The WAL copy (if any) stays
			// pending and is re-delivered on the next recovery.
			warn!(event_type, "event queue full, dropping event");
			return;
		}
		events.push(event);
		let len = events.len();
		drop(events);

		debug!(event_type, queue_size = len, "event tracked");

		if len >= self.config.batch_size {
			self.flush_signal.notify_one();
		}
	}

	/// Snapshots and sends all queued events.
	pub async fn flush(&self) {
		let batch = {
			let mut events = self.events.lock().await;
			std::mem::take(&mut *events)
		};

		if batch.is_empty() {
			return;
		}

		debug!(count = batch.len(), "flushing events");
		self.send_batch(batch).await;
	}

	async fn send_batch(&self, batch: Vec<Event>) {
		let ids: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();

		if let Some(wal) = &self.wal {
			if let Err(e) = wal.mark_sending(&ids) {
				warn!(error = %e, "failed to mark events as sending");
			}
		}

		match self.sender.send_batch(&batch).await {
			Ok(()) => {
				if let Some(wal) = &self.wal {
					if let Err(e) = wal.mark_sent(&ids) {
						warn!(error = %e, "failed to mark events as sent");
					}
				}
			}
			Err(e) => {
				warn!(error = %e, count = batch.len(), "failed to send events");
				if let Some(wal) = &self.wal {
					if let Err(e) = wal.mark_failed(&ids) {
						warn!(error = %e, "failed to mark events as failed");
					}
				}
			}
		}
	}

	/// Replays the WAL and queues unsent events ahead of new ones.
	pub async fn recover(&self) {
		let Some(wal) = &self.wal else {
			return;
		};

		let recovered = match wal.recover() {
			Ok(recovered) => recovered,
			Err(e) => {
				warn!(error = %e, "event recovery failed");
				return;
			}
		};
		if recovered.is_empty() {
			return;
		}

		let mut events = self.events.lock().await;
		let mut restored = Vec::with_capacity(recovered.len());
		for persisted in recovered {
			if restored.len() + events.len() >= self.config.max_size {
				warn!("event queue full during recovery, some events dropped");
				break;
			}
			restored.push(persisted.into_event(&self.session_id, &self.sdk_version));
		}

		let count = restored.len();
		restored.append(&mut events);
		*events = restored;

		info!(count, "recovered persisted events");
	}

	/// Current queue length.
	pub async fn queue_size(&self) -> usize {
		self.events.lock().await.len()
	}

	/// Starts the background flush worker. Idempotent.
	pub fn start(self: &Arc<Self>) {
		if self.running.swap(true, Ordering::SeqCst) {
			return;
		}

		let queue = Arc::clone(self);
		tokio::spawn(async move {
			queue.run().await;
		});
	}

	async fn run(&self) {
		debug!(
			flush_interval_secs = self.config.flush_interval.as_secs(),
			batch_size = self.config.batch_size,
			"event queue worker started"
		);

		loop {
			tokio::select! {
				_ = self.stop.notified() => break,
				_ = tokio::time::sleep(self.config.flush_interval) => {
					if !self.running.load(Ordering::SeqCst) {
						break;
					}
					self.flush().await;
				}
				_ = self.flush_signal.notified() => {
					if !self.running.load(Ordering::SeqCst) {
						break;
					}
					self.flush().await;
				}
			}
		}

		debug!("event queue worker stopped");
	}

	/// Stops the worker and performs a final flush. Idempotent.
	pub async fn stop(&self) {
		if self.running.swap(false, Ordering::SeqCst) {
			self.stop.notify_waiters();
		}
		self.flush().await;
	}
}
