// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash-resilient event persistence: an append-only write-ahead log.
//!
//! The log is a directory of JSON-Lines files named
//! `flagkit-events-<timestamp-ms>-<random>.jsonl`. A line is either a full
//! event or a status update (`{id, status, sentAt?}`); replay resolves each
//! id to the last observed record, except that records after a terminal
//! status (`sent`, `failed`) are ignored.
//!
//! Writers serialize through an in-process mutex plus an OS advisory
//! exclusive lock on `flagkit-events.lock`, so multiple processes can share
//! one storage directory. Every append batch is fsynced before the caller is
//! told the write succeeded. File handles are scoped to one operation; no
//! descriptor outlives a call. A crash mid-append can leave a truncated last
//! line, which replay drops.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use fs2::FileExt;
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use flagkit_core::error::{ErrorCode, FlagKitError, Result};

use crate::event::{EventStatus, PersistedEvent};
use crate::id::random_hex;

const LOCK_FILE_NAME: &str = "flagkit-events.lock";
const EVENT_FILE_PREFIX: &str = "flagkit-events-";
const EVENT_FILE_SUFFIX: &str = ".jsonl";

/// Write-ahead log configuration.
#[derive(Debug, Clone)]
pub struct EventWalConfig {
	/// Directory owning the log files. Created (0700) if missing.
	pub storage_path: PathBuf,
	/// Upper bound on events returned by recovery.
	pub max_events: usize,
	/// Interval between background buffer flushes.
	pub flush_interval: Duration,
	/// Buffered events that trigger an immediate flush.
	pub buffer_size: usize,
}

impl Default for EventWalConfig {
	fn default() -> Self {
		Self {
			storage_path: std::env::temp_dir(),
			max_events: 10_000,
			flush_interval: Duration::from_secs(1),
			buffer_size: 100,
		}
	}
}

#[derive(Debug)]
struct WalInner {
	buffer: Vec<PersistedEvent>,
	current_file: String,
}

/// The write-ahead log.
#[derive(Debug)]
pub struct EventWal {
	config: EventWalConfig,
	inner: Mutex<WalInner>,
	running: AtomicBool,
	stop: Notify,
}

/// A status-update line. Full events also carry these fields; parsing tries
/// the full shape first, so this only matches bare updates.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusUpdate {
	id: String,
	status: EventStatus,
	#[serde(default)]
	sent_at: Option<i64>,
}

impl EventWal {
	/// Opens (and creates if needed) the storage directory.
	pub fn new(config: EventWalConfig) -> Result<Self> {
		std::fs::create_dir_all(&config.storage_path).map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::CacheStorageError,
				"failed to create storage directory",
				e,
			)
		})?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let perms = std::fs::Permissions::from_mode(0o700);
			if let Err(e) = std::fs::set_permissions(&config.storage_path, perms) {
				warn!(path = ?config.storage_path, error = %e, "failed to restrict storage directory permissions");
			}
		}

		let current_file = generate_file_name();
		Ok(Self {
			config,
			inner: Mutex::new(WalInner {
				buffer: Vec::new(),
				current_file,
			}),
			running: AtomicBool::new(false),
			stop: Notify::new(),
		})
	}

	pub fn storage_path(&self) -> &Path {
		&self.config.storage_path
	}

	/// Number of events buffered but not yet flushed to disk.
	pub fn buffer_len(&self) -> usize {
		self.inner.lock().expect("wal lock poisoned").buffer.len()
	}

	/// Buffers an event, flushing when the buffer is full.
	pub fn persist(&self, event: PersistedEvent) -> Result<()> {
		let mut inner = self.inner.lock().expect("wal lock poisoned");
		inner.buffer.push(event);

		if inner.buffer.len() >= self.config.buffer_size {
			return self.flush_locked(&mut inner);
		}
		Ok(())
	}

	/// Flushes buffered events to disk under the directory lock.
	pub fn flush(&self) -> Result<()> {
		let mut inner = self.inner.lock().expect("wal lock poisoned");
		self.flush_locked(&mut inner)
	}

	fn flush_locked(&self, inner: &mut WalInner) -> Result<()> {
		if inner.buffer.is_empty() {
			return Ok(());
		}

		let lines: Vec<String> = inner
			.buffer
			.iter()
			.filter_map(|event| match serde_json::to_string(event) {
				Ok(line) => Some(line),
				Err(e) => {
					warn!(event_id = %event.id, error = %e, "failed to serialize event");
					None
				}
			})
			.collect();

		let _guard = self.acquire_dir_lock()?;
		self.append_lines(&inner.current_file, &lines)?;

		debug!(count = inner.buffer.len(), "flushed events to disk");
		inner.buffer.clear();
		Ok(())
	}

	/// Marks events as in-flight.
	pub fn mark_sending(&self, event_ids: &[String]) -> Result<()> {
		self.append_status_updates(event_ids, EventStatus::Sending, None)
	}

	/// Marks events as delivered.
	pub fn mark_sent(&self, event_ids: &[String]) -> Result<()> {
		self.append_status_updates(
			event_ids,
			EventStatus::Sent,
			Some(Utc::now().timestamp_millis()),
		)
	}

	/// Marks events as terminally failed.
	pub fn mark_failed(&self, event_ids: &[String]) -> Result<()> {
		self.append_status_updates(event_ids, EventStatus::Failed, None)
	}

	fn append_status_updates(
		&self,
		event_ids: &[String],
		status: EventStatus,
		sent_at: Option<i64>,
	) -> Result<()> {
		if event_ids.is_empty() {
			return Ok(());
		}

		let lines: Vec<String> = event_ids
			.iter()
			.map(|id| {
				let mut update = serde_json::json!({
					"id": id,
					"status": status,
				});
				if let Some(sent_at) = sent_at {
					update["sentAt"] = serde_json::json!(sent_at);
				}
				update.to_string()
			})
			.collect();

		let inner = self.inner.lock().expect("wal lock poisoned");
		let _guard = self.acquire_dir_lock()?;
		self.append_lines(&inner.current_file, &lines)?;

		debug!(count = event_ids.len(), status = status.as_str(), "marked events");
		Ok(())
	}

	/// Replays the log and returns events that still need delivery.
	///
	/// `sending` events imply the previous process crashed mid-send; they
	/// come back as `pending`. Terminal events are never returned.
	pub fn recover(&self) -> Result<Vec<PersistedEvent>> {
		let _inner = self.inner.lock().expect("wal lock poisoned");
		let _guard = self.acquire_dir_lock()?;

		let event_map = self.replay_files()?;

		let mut pending: Vec<PersistedEvent> = event_map
			.into_values()
			.filter(|event| !event.status.is_terminal())
			.map(|mut event| {
				event.status = EventStatus::Pending;
				event
			})
			.collect();
		// Oldest first, so recovered events keep their original order.
		pending.sort_by_key(|event| event.timestamp);

		if pending.len() > self.config.max_events {
			warn!(
				recovered = pending.len(),
				max_events = self.config.max_events,
				"recovered events exceed limit, dropping newest"
			);
			pending.truncate(self.config.max_events);
		}

		info!(count = pending.len(), "recovered pending events");
		Ok(pending)
	}

	/// Compacts the log: live events are rewritten into one fresh file and
	/// all older files are deleted. Safe because it runs under the same lock
	/// as writers.
	pub fn cleanup(&self) -> Result<()> {
		let mut inner = self.inner.lock().expect("wal lock poisoned");
		let _guard = self.acquire_dir_lock()?;

		let event_map = self.replay_files()?;
		let mut live: Vec<PersistedEvent> = event_map
			.into_values()
			.filter(|event| !event.status.is_terminal())
			.collect();
		live.sort_by_key(|event| event.timestamp);

		let old_files = self.event_files()?;
		for path in &old_files {
			if let Err(e) = std::fs::remove_file(path) {
				warn!(path = ?path, error = %e, "failed to remove old event file");
			}
		}

		inner.current_file = generate_file_name();

		if !live.is_empty() {
			let lines: Vec<String> = live
				.iter()
				.filter_map(|event| serde_json::to_string(event).ok())
				.collect();
			self.append_lines(&inner.current_file, &lines)?;
		}

		info!(
			live_count = live.len(),
			removed_files = old_files.len(),
			"compacted event log"
		);
		Ok(())
	}

	/// Starts the periodic background flusher. Idempotent.
	pub fn start(self: &Arc<Self>) {
		if self.running.swap(true, Ordering::SeqCst) {
			return;
		}

		let wal = Arc::clone(self);
		tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = wal.stop.notified() => break,
					_ = tokio::time::sleep(wal.config.flush_interval) => {
						if !wal.running.load(Ordering::SeqCst) {
							break;
						}
						if let Err(e) = wal.flush() {
							warn!(error = %e, "background WAL flush failed");
						}
					}
				}
			}
		});
	}

	/// Stops the background flusher. Idempotent.
	pub fn stop(&self) {
		if self.running.swap(false, Ordering::SeqCst) {
			self.stop.notify_waiters();
		}
	}

	/// Stops the flusher and flushes once.
	pub fn close(&self) -> Result<()> {
		self.stop();
		self.flush()
	}

	fn acquire_dir_lock(&self) -> Result<DirLock> {
		let lock_path = self.config.storage_path.join(LOCK_FILE_NAME);
		let file = open_for_append(&lock_path)?;

		file.lock_exclusive().map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::CacheStorageError,
				"failed to acquire event log lock",
				e,
			)
		})?;

		Ok(DirLock { file })
	}

	fn append_lines(&self, file_name: &str, lines: &[String]) -> Result<()> {
		if lines.is_empty() {
			return Ok(());
		}

		let path = self.config.storage_path.join(file_name);
		let mut file = open_for_append(&path)?;

		for line in lines {
			file
				.write_all(line.as_bytes())
				.and_then(|_| file.write_all(b"\n"))
				.map_err(|e| {
					FlagKitError::with_cause(
						ErrorCode::CacheWriteError,
						"failed to write event record",
						e,
					)
				})?;
		}

		file.sync_all().map_err(|e| {
			FlagKitError::with_cause(ErrorCode::CacheWriteError, "failed to sync event file", e)
		})
	}

	fn event_files(&self) -> Result<Vec<PathBuf>> {
		let entries = std::fs::read_dir(&self.config.storage_path).map_err(|e| {
			FlagKitError::with_cause(
				ErrorCode::CacheReadError,
				"failed to list storage directory",
				e,
			)
		})?;

		let mut files: Vec<PathBuf> = entries
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.path())
			.filter(|path| {
				path
					.file_name()
					.and_then(|name| name.to_str())
					.map(|name| {
						name.starts_with(EVENT_FILE_PREFIX) && name.ends_with(EVENT_FILE_SUFFIX)
					})
					.unwrap_or(false)
			})
			.collect();
		files.sort();
		Ok(files)
	}

	fn replay_files(&self) -> Result<HashMap<String, PersistedEvent>> {
		let mut event_map = HashMap::new();

		for path in self.event_files()? {
			if let Err(e) = replay_file(&path, &mut event_map) {
				warn!(path = ?path, error = %e, "failed to read event file");
			}
		}

		Ok(event_map)
	}
}

/// Holds the advisory lock for the duration of one operation.
struct DirLock {
	file: File,
}

impl Drop for DirLock {
	fn drop(&mut self) {
		if let Err(e) = fs2::FileExt::unlock(&self.file) {
			warn!(error = %e, "failed to release event log lock");
		}
	}
}

fn open_for_append(path: &Path) -> Result<File> {
	let mut options = OpenOptions::new();
	options.create(true).append(true).read(true);

	#[cfg(unix)]
	{
		use std::os::unix::fs::OpenOptionsExt;
		options.mode(0o600);
	}

	options.open(path).map_err(|e| {
		FlagKitError::with_cause(ErrorCode::CacheStorageError, "failed to open event file", e)
	})
}

fn replay_file(path: &Path, event_map: &mut HashMap<String, PersistedEvent>) -> std::io::Result<()> {
	let file = File::open(path)?;
	let reader = BufReader::new(file);

	for line in reader.lines() {
		let line = line?;
		if line.is_empty() {
			continue;
		}

		if let Ok(event) = serde_json::from_str::<PersistedEvent>(&line) {
			if event.id.is_empty() {
				continue;
			}
			// A terminal record wins over anything that follows it.
			if let Some(existing) = event_map.get(&event.id) {
				if existing.status.is_terminal() {
					continue;
				}
			}
			event_map.insert(event.id.clone(), event);
			continue;
		}

		if let Ok(update) = serde_json::from_str::<StatusUpdate>(&line) {
			if let Some(existing) = event_map.get_mut(&update.id) {
				if existing.status.is_terminal() {
					continue;
				}
				existing.status = update.status;
				existing.sent_at = update.sent_at;
			}
		}
		// Unparsable lines (e.g. a truncated tail after a crash) are dropped.
	}

	Ok(())
}

fn generate_file_name() -> String {
	format!(
		"{EVENT_FILE_PREFIX}{}-{}{EVENT_FILE_SUFFIX}",
		Utc::now().timestamp_millis(),
		random_hex(8)
	)
}
