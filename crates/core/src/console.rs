//! Console buffer and broadcaster
//!
//! Every execution owns an append-only, size-bounded sequence of log entries
//! (bounded by entry count and by total content bytes, whichever trips
//! first) plus a subscriber fan-out. Appending an entry evicts from the head
//! until back under both limits, mirrors the entry to a durable JSON Lines
//! file named after the execution id, and pushes it to every subscriber.
//!
//! Output is captured even with zero subscribers so a late observer can
//! catch up; catch-up replay is delivered under the same lock that registers
//! the subscriber, so the catch-up/live boundary can neither reorder nor
//! duplicate entries.

use crate::config::ConsoleConfig;
use crate::errors::{ConsoleError, Result};
use crate::orchestrator::{InputStream, StreamKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Extra channel capacity beyond the buffer bound so a catch-up snapshot
/// always fits ahead of live entries.
const SUBSCRIBER_HEADROOM: usize = 64;

/// Origin of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStreamKind {
    Stdout,
    Stderr,
    /// Lifecycle status announcements (started, exited, …)
    Status,
    /// Engine-generated messages (deploy progress, reaper notices)
    System,
}

impl From<StreamKind> for LogStreamKind {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Stdout => LogStreamKind::Stdout,
            StreamKind::Stderr => LogStreamKind::Stderr,
        }
    }
}

impl LogStreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStreamKind::Stdout => "stdout",
            LogStreamKind::Stderr => "stderr",
            LogStreamKind::Status => "status",
            LogStreamKind::System => "system",
        }
    }
}

/// Severity attached to a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One captured chunk of console output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Owning execution id
    pub execution_id: String,
    /// Stream the content came from
    pub stream: LogStreamKind,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Entry content (one logical line in line-buffered mode)
    pub content: String,
    /// Severity
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(
        execution_id: &str,
        stream: LogStreamKind,
        content: impl Into<String>,
        level: LogLevel,
    ) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            stream,
            timestamp: Utc::now(),
            content: content.into(),
            level,
        }
    }

    /// Process stdout line.
    pub fn stdout(execution_id: &str, content: impl Into<String>) -> Self {
        Self::new(execution_id, LogStreamKind::Stdout, content, LogLevel::Info)
    }

    /// Process stderr line.
    pub fn stderr(execution_id: &str, content: impl Into<String>) -> Self {
        Self::new(execution_id, LogStreamKind::Stderr, content, LogLevel::Warn)
    }

    /// Lifecycle status announcement.
    pub fn status(execution_id: &str, content: impl Into<String>) -> Self {
        Self::new(execution_id, LogStreamKind::Status, content, LogLevel::Info)
    }

    /// Engine-generated message.
    pub fn system(execution_id: &str, content: impl Into<String>, level: LogLevel) -> Self {
        Self::new(execution_id, LogStreamKind::System, content, level)
    }
}

/// Coalesces partial output chunks into whole lines.
///
/// OS-level writes arrive in arbitrary chunks; in line-buffered mode each
/// emitted entry should correspond to one logical output line so logs stay
/// readable. Carriage returns ahead of the newline are stripped.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every line completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                if self.partial.last() == Some(&b'\r') {
                    self.partial.pop();
                }
                lines.push(String::from_utf8_lossy(&self.partial).into_owned());
                self.partial.clear();
            } else {
                self.partial.push(byte);
            }
        }
        lines
    }

    /// Flush any trailing partial line (called when the stream closes).
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            let line = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            Some(line)
        }
    }
}

/// Bounded in-memory window of an execution's recent output
#[derive(Debug)]
struct ConsoleBuffer {
    entries: VecDeque<Arc<LogEntry>>,
    total_bytes: usize,
    max_entries: usize,
    max_bytes: usize,
}

impl ConsoleBuffer {
    fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            total_bytes: 0,
            max_entries,
            max_bytes,
        }
    }

    /// Append an entry, evicting from the head until back under both limits.
    /// The newest entry always survives even if it alone exceeds the byte
    /// bound.
    fn push(&mut self, entry: Arc<LogEntry>) {
        self.total_bytes += entry.content.len();
        self.entries.push_back(entry);
        while (self.entries.len() > self.max_entries || self.total_bytes > self.max_bytes)
            && self.entries.len() > 1
        {
            if let Some(evicted) = self.entries.pop_front() {
                self.total_bytes -= evicted.content.len();
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<LogEntry>> {
        self.entries.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<LogEntry>>,
}

/// Per-execution console state
struct ExecutionConsole {
    buffer: ConsoleBuffer,
    subscribers: Vec<Subscriber>,
    writer: Option<File>,
    input: Option<InputStream>,
    last_entry_at: Option<DateTime<Utc>>,
}

/// Console hub: owns every execution's buffer, subscriber fan-out, durable
/// file mirror, and optional input stream.
pub struct ConsoleHub {
    config: ConsoleConfig,
    logs_dir: PathBuf,
    inner: Mutex<HashMap<String, ExecutionConsole>>,
    next_subscriber_id: Mutex<u64>,
}

impl ConsoleHub {
    /// Create a hub writing durable mirrors under `logs_dir`.
    pub fn new(config: ConsoleConfig, logs_dir: impl Into<PathBuf>) -> Result<Self> {
        let logs_dir = logs_dir.into();
        std::fs::create_dir_all(&logs_dir).map_err(ConsoleError::Io)?;
        Ok(Self {
            config,
            logs_dir,
            inner: Mutex::new(HashMap::new()),
            next_subscriber_id: Mutex::new(0),
        })
    }

    /// Whether line-buffered coalescing is enabled.
    pub fn line_buffered(&self) -> bool {
        self.config.line_buffered
    }

    /// Durable mirror path for an execution, derived deterministically from
    /// its id so the buffer can be rebuilt after a restart.
    pub fn log_file_path(&self, execution_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{}.log", execution_id))
    }

    /// Register a fresh execution console with an empty buffer.
    pub fn register(&self, execution_id: &str) -> Result<()> {
        let writer = self.open_writer(execution_id)?;
        let mut inner = self.inner.lock().unwrap();
        inner.insert(
            execution_id.to_string(),
            ExecutionConsole {
                buffer: ConsoleBuffer::new(self.config.max_entries, self.config.max_bytes),
                subscribers: Vec::new(),
                writer: Some(writer),
                input: None,
                last_entry_at: None,
            },
        );
        Ok(())
    }

    /// Reconstruct an execution console from its durable mirror, applying
    /// the same bounds as live appends, then reopen the mirror for append.
    /// Returns the number of entries restored into the window.
    pub fn restore(&self, execution_id: &str) -> Result<usize> {
        let path = self.log_file_path(execution_id);
        let mut buffer = ConsoleBuffer::new(self.config.max_entries, self.config.max_bytes);
        let mut last_entry_at = None;

        if path.exists() {
            let file = File::open(&path).map_err(ConsoleError::Io)?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(ConsoleError::Io)?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: LogEntry = serde_json::from_str(&line).map_err(ConsoleError::Codec)?;
                last_entry_at = Some(entry.timestamp);
                buffer.push(Arc::new(entry));
            }
        }

        let restored = buffer.len();
        let writer = self.open_writer(execution_id)?;
        let mut inner = self.inner.lock().unwrap();
        inner.insert(
            execution_id.to_string(),
            ExecutionConsole {
                buffer,
                subscribers: Vec::new(),
                writer: Some(writer),
                input: None,
                last_entry_at,
            },
        );
        Ok(restored)
    }

    fn open_writer(&self, execution_id: &str) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file_path(execution_id))
            .map_err(|e| ConsoleError::Io(e).into())
    }

    /// Append an entry: evict, mirror to disk, fan out to subscribers.
    ///
    /// Subscribers whose channel is closed or full are disconnected; the
    /// buffer and the durable mirror are unaffected, so they can resubscribe
    /// with catch-up.
    pub fn append(&self, entry: LogEntry) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let console = inner
            .get_mut(&entry.execution_id)
            .ok_or_else(|| ConsoleError::UnknownExecution {
                execution_id: entry.execution_id.clone(),
            })?;

        let entry = Arc::new(entry);
        console.last_entry_at = Some(entry.timestamp);
        console.buffer.push(Arc::clone(&entry));

        if let Some(writer) = console.writer.as_mut() {
            let line = serde_json::to_string(entry.as_ref()).map_err(ConsoleError::Codec)?;
            writeln!(writer, "{}", line).map_err(ConsoleError::Io)?;
            writer.flush().map_err(ConsoleError::Io)?;
        }

        console.subscribers.retain(|sub| {
            match sub.tx.try_send(Arc::clone(&entry)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        execution_id = %entry.execution_id,
                        subscriber = sub.id,
                        "disconnecting subscriber that stopped draining"
                    );
                    false
                }
            }
        });

        Ok(())
    }

    /// Subscribe to an execution's output.
    ///
    /// With `catch_up`, the current buffer contents are replayed into the
    /// channel ahead of any live entry; the returned receiver observes a
    /// prefix-consistent view with no gap and no duplicates across the
    /// catch-up/live boundary.
    pub fn subscribe(
        &self,
        execution_id: &str,
        catch_up: bool,
    ) -> Result<(u64, mpsc::Receiver<Arc<LogEntry>>)> {
        let mut inner = self.inner.lock().unwrap();
        let console =
            inner
                .get_mut(execution_id)
                .ok_or_else(|| ConsoleError::UnknownExecution {
                    execution_id: execution_id.to_string(),
                })?;

        let id = {
            let mut next = self.next_subscriber_id.lock().unwrap();
            *next += 1;
            *next
        };

        let capacity = self.config.max_entries + SUBSCRIBER_HEADROOM;
        let (tx, rx) = mpsc::channel(capacity);

        if catch_up {
            for entry in console.buffer.snapshot() {
                // Capacity always covers a full buffer snapshot.
                let _ = tx.try_send(entry);
            }
        }

        console.subscribers.push(Subscriber { id, tx });
        debug!(execution_id, subscriber = id, catch_up, "subscriber attached");
        Ok((id, rx))
    }

    /// Remove a subscriber from fan-out. The buffer is unaffected.
    pub fn unsubscribe(&self, execution_id: &str, subscriber_id: u64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let console =
            inner
                .get_mut(execution_id)
                .ok_or_else(|| ConsoleError::UnknownExecution {
                    execution_id: execution_id.to_string(),
                })?;
        let before = console.subscribers.len();
        console.subscribers.retain(|sub| sub.id != subscriber_id);
        Ok(console.subscribers.len() < before)
    }

    /// Attach (or detach, with `None`) the execution's input stream.
    pub fn set_input(&self, execution_id: &str, input: Option<InputStream>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let console =
            inner
                .get_mut(execution_id)
                .ok_or_else(|| ConsoleError::UnknownExecution {
                    execution_id: execution_id.to_string(),
                })?;
        console.input = input;
        Ok(())
    }

    /// Forward bytes to the execution's stdin.
    ///
    /// Fails explicitly when the execution is unknown, has no input stream
    /// attached (not running, or the runtime offers none), or the stream has
    /// closed; input is never silently dropped.
    pub async fn send_input(&self, execution_id: &str, bytes: Vec<u8>) -> Result<()> {
        let input = {
            let inner = self.inner.lock().unwrap();
            let console =
                inner
                    .get(execution_id)
                    .ok_or_else(|| ConsoleError::UnknownExecution {
                        execution_id: execution_id.to_string(),
                    })?;
            console
                .input
                .clone()
                .ok_or_else(|| ConsoleError::InputRejected {
                    execution_id: execution_id.to_string(),
                    reason: "execution is not running or has no input stream".to_string(),
                })?
        };

        input
            .send(bytes)
            .await
            .map_err(|_| ConsoleError::InputRejected {
                execution_id: execution_id.to_string(),
                reason: "input stream closed".to_string(),
            })?;
        Ok(())
    }

    /// Current buffer contents (oldest first).
    pub fn snapshot(&self, execution_id: &str) -> Result<Vec<Arc<LogEntry>>> {
        let inner = self.inner.lock().unwrap();
        let console = inner
            .get(execution_id)
            .ok_or_else(|| ConsoleError::UnknownExecution {
                execution_id: execution_id.to_string(),
            })?;
        Ok(console.buffer.snapshot())
    }

    /// Timestamp of the most recent captured entry, if any.
    pub fn last_entry_at(&self, execution_id: &str) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().unwrap();
        inner.get(execution_id).and_then(|c| c.last_entry_at)
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self, execution_id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .get(execution_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    /// Whether a console exists for the execution.
    pub fn contains(&self, execution_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(execution_id)
    }

    /// Total number of registered consoles.
    pub fn console_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Delete durable mirrors older than the configured retention window.
    /// In-memory buffers of registered executions are untouched (they are
    /// bounded by size, not age).
    pub fn prune_files(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::hours(self.config.retention_hours as i64);
        let mut pruned = 0;

        for dir_entry in std::fs::read_dir(&self.logs_dir).map_err(ConsoleError::Io)? {
            let dir_entry = dir_entry.map_err(ConsoleError::Io)?;
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            let modified = dir_entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(ConsoleError::Io)?;
            let modified: DateTime<Utc> = modified.into();
            if modified < cutoff {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "failed to prune log file");
                } else {
                    pruned += 1;
                }
            }
        }

        Ok(pruned)
    }

    /// Remove an execution's console and its durable mirror (used when the
    /// owning application is uninstalled).
    pub fn remove(&self, execution_id: &str) -> Result<()> {
        self.inner.lock().unwrap().remove(execution_id);
        let path = self.log_file_path(execution_id);
        if path.exists() {
            std::fs::remove_file(path).map_err(ConsoleError::Io)?;
        }
        Ok(())
    }
}

/// Reconstruct log entries directly from a durable mirror file (oldest
/// first), independent of any hub.
pub fn read_log_file(path: &Path) -> Result<Vec<LogEntry>> {
    let file = File::open(path).map_err(ConsoleError::Io)?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(ConsoleError::Io)?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line).map_err(ConsoleError::Codec)?);
    }
    Ok(entries)
}
