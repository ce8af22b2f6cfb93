//! Process-global, level-filtered sink with per-record formatting (§4.11).
//!
//! This is the product-facing sink spec.md describes as a core component, distinct from
//! the `tracing` instrumentation used for developer-facing diagnostics elsewhere in the
//! crate (see `crate::init_logging`). The level check happens before formatting so a
//! filtered record never pays for building its message.

use std::fmt;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Debug < Info < Warning < Error < Silent; thresholds are inclusive, Silent suppresses
/// everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Silent,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Silent => "SILENT",
        };
        f.write_str(s)
    }
}

/// Where formatted lines go. Abstracted so tests can install an in-memory sink instead
/// of capturing process stdout.
pub trait LogSink: Send {
    fn write_line(&mut self, line: &str);
}

struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&mut self, line: &str) {
        println!("{line}");
    }
}

struct LoggerState {
    level: LogLevel,
    sink: Box<dyn LogSink>,
}

fn state() -> &'static Mutex<LoggerState> {
    static STATE: OnceLock<Mutex<LoggerState>> = OnceLock::new();
    STATE.get_or_init(|| {
        Mutex::new(LoggerState {
            level: LogLevel::Info,
            sink: Box::new(StdoutSink),
        })
    })
}

pub fn set_level(level: LogLevel) {
    state().lock().unwrap().level = level;
}

pub fn set_sink(sink: Box<dyn LogSink>) {
    state().lock().unwrap().sink = sink;
}

pub fn current_level() -> LogLevel {
    state().lock().unwrap().level
}

fn timestamp() -> String {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let total_millis = since_epoch.as_millis();
    let ms = total_millis % 1000;
    let total_secs = total_millis / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = (total_secs / 3600) % 24;
    format!("{hours:02}:{mins:02}:{secs:02}.{ms:03}")
}

/// Formats and writes a record if `level` passes the current threshold. Callers should
/// go through [`log_debug`]/[`log_info`]/etc rather than this directly so message
/// construction is skipped entirely when filtered.
pub fn log(level: LogLevel, message: impl fmt::Display) {
    let mut guard = state().lock().unwrap();
    if level < guard.level {
        return;
    }
    let line = format!("[{}] [{}] {}", level, timestamp(), message);
    guard.sink.write_line(&line);
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::logger::current_level() <= $crate::logger::LogLevel::Debug {
            $crate::logger::log($crate::logger::LogLevel::Debug, format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if $crate::logger::current_level() <= $crate::logger::LogLevel::Error {
            $crate::logger::log($crate::logger::LogLevel::Error, format!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    struct MemSink(Arc<StdMutex<Vec<String>>>);

    impl LogSink for MemSink {
        fn write_line(&mut self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn filtered_records_are_not_written() {
        let lines = Arc::new(StdMutex::new(Vec::new()));
        set_sink(Box::new(MemSink(Arc::clone(&lines))));
        set_level(LogLevel::Error);

        log(LogLevel::Debug, "should be filtered");
        log(LogLevel::Error, "should appear");

        let captured = lines.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].contains("should appear"));
        assert!(captured[0].starts_with("[ERROR]"));
    }

    #[test]
    fn silent_suppresses_everything() {
        let lines = Arc::new(StdMutex::new(Vec::new()));
        set_sink(Box::new(MemSink(Arc::clone(&lines))));
        set_level(LogLevel::Silent);

        log(LogLevel::Error, "still filtered");
        assert!(lines.lock().unwrap().is_empty());

        // restore a usable default for any test run after this one in the same process
        set_level(LogLevel::Info);
        set_sink(Box::new(StdoutSink));
    }
}
