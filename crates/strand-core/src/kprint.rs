//! Leveled stderr logging for the runtime
//!
//! Lines go to stderr under the stderr lock so output from several
//! schedulers on different threads never interleaves mid-line. When a
//! coroutine is running on the current thread its id is prepended, which
//! makes scheduler traces readable without threading ids through every
//! call site.
//!
//! # Environment Variables
//!
//! - `STRAND_LOG_LEVEL=<level>` - off/error/warn/info/debug/trace or 0..5
//! - `STRAND_FLUSH_EPRINT=1` - flush stderr after every line
//!
//! ```ignore
//! use strand_core::{kinfo, kdebug};
//!
//! kinfo!("scheduler started with {} coroutines", n);
//! kdebug!("parking on fd {}", fd);
//! ```

use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

use crate::id::CoroutineId;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; unknown input yields `None`
    pub fn parse(s: &str) -> Option<Self> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "warning" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => return None,
        };
        Some(level)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "E",
            LogLevel::Warn => "W",
            LogLevel::Info => "I",
            LogLevel::Debug => "D",
            LogLevel::Trace => "T",
        }
    }
}

static INIT: Once = Once::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);

thread_local! {
    static CURRENT: Cell<CoroutineId> = const { Cell::new(CoroutineId::NONE) };
}

/// Read `STRAND_LOG_LEVEL` and `STRAND_FLUSH_EPRINT` once
///
/// Runs implicitly on the first log call; calling it up front only fixes
/// the point at which the environment is sampled.
pub fn init() {
    INIT.call_once(|| {
        if let Some(level) = std::env::var("STRAND_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
        if crate::env::env_get_bool("STRAND_FLUSH_EPRINT", false) {
            FLUSH.store(true, Ordering::Relaxed);
        }
    });
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Override the level; takes precedence over the environment
pub fn set_log_level(level: LogLevel) {
    init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

/// Tag subsequent log lines on this thread with `id`
#[inline]
pub fn set_coroutine_id(id: CoroutineId) {
    CURRENT.with(|c| c.set(id));
}

#[inline]
pub fn clear_coroutine_id() {
    CURRENT.with(|c| c.set(CoroutineId::NONE));
}

#[inline]
pub fn current_coroutine_id() -> CoroutineId {
    CURRENT.with(|c| c.get())
}

#[doc(hidden)]
pub fn _emit(level: Option<LogLevel>, newline: bool, args: std::fmt::Arguments<'_>) {
    if let Some(level) = level {
        if !level_enabled(level) {
            return;
        }
    }

    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    if let Some(level) = level {
        let co = current_coroutine_id();
        let _ = if co.is_some() {
            write!(out, "[strand {} {}] ", level.tag(), co)
        } else {
            write!(out, "[strand {}] ", level.tag())
        };
    }
    let _ = out.write_fmt(args);
    if newline {
        let _ = out.write_all(b"\n");
    }
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

/// Unleveled stderr print, no newline
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::kprint::_emit(None, false, format_args!($($arg)*))
    };
}

/// Unleveled stderr print with newline
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint::_emit(None, true, format_args!(""))
    };
    ($($arg:tt)*) => {
        $crate::kprint::_emit(None, true, format_args!($($arg)*))
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_emit(
            Some($crate::kprint::LogLevel::$level),
            true,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) };
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::__klog!(Trace, $($arg)*) };
}
