//! Fire-and-forget exchange log.
//!
//! Every request, backend reply, streamed chunk and outbound SSE frame can be
//! recorded here as one JSON line. Writes never fail from the caller's point of
//! view: I/O and serialization errors are dropped so that logging cannot change
//! what the translators produce.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Kinds of traffic recorded in the exchange log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeEvent {
    AnthropicRequest,
    ChatRequest,
    BackendResponse,
    BackendStreamChunk,
    AnthropicResponse,
    AnthropicSseEvent,
    MalformedChunk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<ExchangeEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            event_type: None,
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }

    pub fn with_event(mut self, event: ExchangeEvent) -> Self {
        self.event_type = Some(event);
        self
    }
}

/// Bytes written to one day's file before further lines are dropped.
pub const MAX_LOG_FILE_BYTES: u64 = 10 * 1024 * 1024;
/// Daily files kept on disk, today's included.
pub const RETAINED_LOG_FILES: usize = 7;

/// Ring-buffer logger, optionally persisted as daily-rotated JSONL files
pub struct Logger {
    entries: VecDeque<LogEntry>,
    writer: Option<RollingFileAppender>,
    max_bytes: u64,
    day: NaiveDate,
    written_today: u64,
    capped: bool,
}

impl Logger {
    /// Log to `<dir>/<stem>.<YYYY-MM-DD>.<ext>`, rotating daily and keeping
    /// [`RETAINED_LOG_FILES`] files.
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::with_limit(file_path, MAX_LOG_FILE_BYTES)
    }

    pub fn with_limit(file_path: impl AsRef<Path>, max_bytes: u64) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();
        let dir = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let prefix = file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("claude-azure-proxy");
        let suffix = file_path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("log");

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix(suffix)
            .max_log_files(RETAINED_LOG_FILES)
            .build(dir)
            .map_err(std::io::Error::other)?;

        // Appending to a file that already holds part of today's budget
        let today = Utc::now().date_naive();
        let existing = std::fs::metadata(dir.join(format!(
            "{prefix}.{}.{suffix}",
            today.format("%Y-%m-%d")
        )))
        .map(|m| m.len())
        .unwrap_or(0);

        Ok(Self {
            entries: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            writer: Some(appender),
            max_bytes,
            day: today,
            written_today: existing,
            capped: false,
        })
    }

    /// A logger that keeps entries in memory only.
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            writer: None,
            max_bytes: MAX_LOG_FILE_BYTES,
            day: Utc::now().date_naive(),
            written_today: 0,
            capped: false,
        }
    }

    pub fn log(&mut self, entry: LogEntry) {
        self.write_line(&entry);
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn write_line(&mut self, entry: &LogEntry) {
        let Some(ref mut writer) = self.writer else {
            return;
        };

        // The appender rolls over on UTC days; the byte budget follows it
        let day = entry.timestamp.date_naive();
        if day != self.day {
            self.day = day;
            self.written_today = 0;
            self.capped = false;
        }

        let Ok(mut line) = serde_json::to_string(entry) else {
            return;
        };
        line.push('\n');

        if self.written_today + line.len() as u64 > self.max_bytes {
            if !self.capped {
                self.capped = true;
                tracing::warn!(
                    limit = self.max_bytes,
                    "Exchange log reached its daily size limit, dropping file output until tomorrow"
                );
            }
            return;
        }

        if writer.write_all(line.as_bytes()).is_ok() {
            let _ = writer.flush();
            self.written_today += line.len() as u64;
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path)?))))
    }

    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Logger::in_memory())))
    }

    pub fn log(&self, entry: LogEntry) {
        if let Ok(mut logger) = self.0.lock() {
            logger.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    /// Record one piece of traffic. `payload` is serialized lazily here so a
    /// payload that cannot be serialized is simply logged without context.
    pub fn exchange<T: Serialize + ?Sized>(
        &self,
        event: ExchangeEvent,
        component: impl Into<String>,
        message: impl Into<String>,
        payload: &T,
    ) {
        let level = match event {
            ExchangeEvent::MalformedChunk => LogLevel::Warn,
            _ => LogLevel::Debug,
        };
        let mut entry = LogEntry::new(level, component, message).with_event(event);
        if let Ok(ctx) = serde_json::to_value(payload) {
            entry = entry.with_context(ctx);
        }
        self.log(entry);
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

/// Collapse a multi-line SSE frame into one log-friendly line.
pub fn single_line(raw: &str) -> String {
    raw.replace('\r', "\\r").replace('\n', "\\n")
}
