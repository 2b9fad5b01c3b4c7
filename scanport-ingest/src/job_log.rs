//! Per-job logger
//!
//! Mirrors each message to `tracing` (with the job and scan ids attached)
//! and accumulates the lines in order, so the full job log can be stored
//! next to the published scan and inspected by tests.

use scanport_common::BlobStore;
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug)]
pub struct JobLog {
    job_id: String,
    scan_id: Mutex<String>,
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl JobLog {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            scan_id: Mutex::new(String::new()),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Attach the scan id once the trigger has been decoded
    pub fn set_scan_id(&self, scan_id: &str) {
        if let Ok(mut guard) = self.scan_id.lock() {
            *guard = scan_id.to_string();
        }
    }

    fn scan_id(&self) -> String {
        self.scan_id.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&self, level: LogLevel, message: String) {
        let scan_id = self.scan_id();
        match level {
            LogLevel::Info => info!(job_id = %self.job_id, scan_id = %scan_id, "{}", message),
            LogLevel::Warn => warn!(job_id = %self.job_id, scan_id = %scan_id, "{}", message),
            LogLevel::Error => error!(job_id = %self.job_id, scan_id = %scan_id, "{}", message),
        }
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, message));
        }
    }

    /// Messages logged so far, in order
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    /// True if any logged message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .map(|lines| lines.iter().any(|(_, m)| m.contains(needle)))
            .unwrap_or(false)
    }

    /// Render as text, one `LEVEL message` line per entry
    pub fn render(&self) -> String {
        let lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(_) => return String::new(),
        };
        let mut out = String::new();
        for (level, message) in lines.iter() {
            out.push_str(level.tag());
            out.push(' ');
            out.push_str(message);
            out.push('\n');
        }
        out
    }

    /// Write the accumulated log to `<root>/<jobId>.log` and return that key
    pub async fn flush(&self, store: &dyn BlobStore, container: &str, root: &str) -> Result<String> {
        let key = format!("{}/{}.log", root, self.job_id);
        store.write(container, &key, self.render().as_bytes()).await?;
        Ok(key)
    }
}
