//! Leveled stderr logging behind `info!`/`warn!`/`error!` macros.
//!
//! The maximum level comes from the `NODE_LOG` environment variable
//! (`info`, `warn`, `error`, or `off`), read once on first use. Test
//! builds log nothing.

use std::fmt::Display;
use std::io::Write;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Severity of a log line.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

fn min_level() -> Option<Level> {
    static MIN_LEVEL: OnceLock<Option<Level>> = OnceLock::new();
    *MIN_LEVEL.get_or_init(|| {
        match std::env::var("NODE_LOG").as_deref() {
            Ok("off") => None,
            Ok("error") => Some(Level::Error),
            Ok("warn") => Some(Level::Warn),
            _ => Some(Level::Info),
        }
    })
}

/// Internal sink for the logging macros.
#[doc(hidden)]
pub fn log(level: Level, message: &str) {
    let Some(min) = min_level() else { return };
    if level < min {
        return;
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();

    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let mut spec = ColorSpec::new();
    match level {
        Level::Info => {
            spec.set_fg(Some(Color::Green));
        }
        Level::Warn => {
            spec.set_fg(Some(Color::Yellow));
        }
        Level::Error => {
            spec.set_fg(Some(Color::Red)).set_bold(true);
        }
    }

    let _ = stderr.set_color(&spec);
    let _ = write!(stderr, "{:5}", level);
    let _ = stderr.reset();
    let _ = writeln!(
        stderr,
        " {:02}:{:02}:{:02}.{:03} {}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60,
        now.subsec_millis(),
        message
    );
}

/// Logs at info level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Info, &format!($($arg)*));
        }
    }};
}

/// Logs at warn level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Warn, &format!($($arg)*));
        }
    }};
}

/// Logs at error level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Error, &format!($($arg)*));
        }
    }};
}
