//! Request-scoped logging.
//!
//! Every webhook request gets its own [`Logger`] carrying a short request id.
//! The logger forwards to `tracing` (so output goes wherever the subscriber
//! sends it) and additionally records every line into a history buffer that
//! tests and operators can inspect after a command finishes. The logger is
//! threaded through every call as an explicit value; there is no process
//! global.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Log level for history entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "DBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "EROR",
        };
        f.write_str(s)
    }
}

/// A request-scoped logger.
///
/// Cheap to clone; clones share the same history buffer.
#[derive(Clone)]
pub struct Logger {
    reqid: String,
    history: Arc<Mutex<String>>,
}

impl Logger {
    pub fn new(reqid: impl Into<String>) -> Self {
        Self {
            reqid: reqid.into(),
            history: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn reqid(&self) -> &str {
        &self.reqid
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        tracing::debug!(reqid = %self.reqid, "{}", msg);
        self.record(Level::Debug, msg);
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        tracing::info!(reqid = %self.reqid, "{}", msg);
        self.record(Level::Info, msg);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        tracing::warn!(reqid = %self.reqid, "{}", msg);
        self.record(Level::Warn, msg);
    }

    pub fn err(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        tracing::error!(reqid = %self.reqid, "{}", msg);
        self.record(Level::Error, msg);
    }

    /// Everything this logger (and its clones) logged, one line per entry.
    pub fn history(&self) -> String {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, level: Level, msg: &str) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_str(&format!("[{}] {} {}\n", level, self.reqid, msg));
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("reqid", &self.reqid).finish()
    }
}
