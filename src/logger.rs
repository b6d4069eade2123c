//! Session log for roi-mask.
//!
//! One file per launch, truncated at startup:
//!   Windows:  `%APPDATA%\roi-mask\roi-mask.log`
//!   Linux:    `~/.local/share/roi-mask/roi-mask.log`
//!   macOS:    `~/Library/Application Support/roi-mask/roi-mask.log`
//!
//! Lines look like `[12:04:31] [INFO ] [session-…] -> save_mask`. Form handlers
//! go through [`timed`] so every user action is logged with the session or
//! image it ran for and how long it took. Until [`init`] runs (unit tests, CLI
//! mode) nothing is written.

use std::backtrace::Backtrace;
use std::fmt::{self, Display};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Panic,
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "INFO ",
            Level::Warn => "WARN ",
            Level::Error => "ERROR",
            Level::Panic => "PANIC",
        })
    }
}

struct SessionLog {
    path: PathBuf,
    file: Mutex<File>,
}

static SESSION_LOG: OnceLock<SessionLog> = OnceLock::new();

pub fn log_path() -> Option<&'static Path> {
    SESSION_LOG.get().map(|log| log.path.as_path())
}

/// Append a raw line. I/O errors are dropped.
pub fn write_line(line: &str) {
    if let Some(log) = SESSION_LOG.get()
        && let Ok(mut file) = log.file.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

pub fn write(level: Level, msg: &str) {
    if SESSION_LOG.get().is_some() {
        write_line(&format_line(&clock(), level, None, msg));
    }
}

fn format_line(clock: &str, level: Level, scope: Option<&str>, msg: &str) -> String {
    match scope {
        Some(scope) => format!("[{}] [{}] [{}] {}", clock, level, scope, msg),
        None => format!("[{}] [{}] {}", clock, level, msg),
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*));
    };
}

/// Log `err` under `context`, followed by the caller's backtrace.
pub fn write_error_with_trace(context: &str, err: &dyn Display) {
    if SESSION_LOG.get().is_none() {
        return;
    }
    write_line(&format_line(&clock(), Level::Error, Some(context), &err.to_string()));
    for frame in Backtrace::force_capture().to_string().lines() {
        write_line(&format!("    {}", frame));
    }
}

/// Run a form handler for `scope` (a session token or image id), logging
/// entry and completion with the elapsed time.
pub fn timed<T>(handler: &str, scope: impl Display, f: impl FnOnce() -> T) -> T {
    let scope = scope.to_string();
    write_line_if_open(Level::Info, &scope, &format!("-> {}", handler));
    let start = Instant::now();
    let out = f();
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    write_line_if_open(Level::Info, &scope, &format!("<- {} ({:.1}ms)", handler, ms));
    out
}

fn write_line_if_open(level: Level, scope: &str, msg: &str) {
    if SESSION_LOG.get().is_some() {
        write_line(&format_line(&clock(), level, Some(scope), msg));
    }
}

/// Open (truncate) the session log and mirror panics into it.
pub fn init() {
    let path = data_dir().join("roi-mask").join("roi-mask.log");
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[logger] cannot open {}: {}", path.display(), e);
            return;
        }
    };
    let _ = SESSION_LOG.set(SessionLog {
        path: path.clone(),
        file: Mutex::new(file),
    });

    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    write_line(&format!(
        "=== roi-mask {} started (unix {}) ===",
        env!("CARGO_PKG_VERSION"),
        started
    ));
    write_line(&format!("Log file: {}", path.display()));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write_line(&format_line(&clock(), Level::Panic, None, &info.to_string()));
        prev(info);
    }));
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".local").join("share")))
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// UTC wall clock, HH:MM:SS.
fn clock() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs() % 86_400;
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
        Err(_) => "??:??:??".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_returns_closure_value_without_init() {
        let v = timed("noop", "session-test", || 41 + 1);
        assert_eq!(v, 42);
    }

    #[test]
    fn lines_carry_level_and_scope() {
        assert_eq!(
            format_line("10:00:00", Level::Info, Some("img-1"), "-> save_mask"),
            "[10:00:00] [INFO ] [img-1] -> save_mask"
        );
        assert_eq!(
            format_line("10:00:00", Level::Error, None, "boom"),
            "[10:00:00] [ERROR] boom"
        );
    }

    #[test]
    fn clock_has_hh_mm_ss_shape() {
        let ts = clock();
        assert_eq!(ts.len(), 8);
        assert_eq!(ts.as_bytes()[2], b':');
        assert_eq!(ts.as_bytes()[5], b':');
    }
}
