//! Log lines with timestamps, source locations, and ANSI colour support.
//!
//! Provides the [`nlog!`] macro for consistent log output in the format:
//!
//! ```text
//! 20261014T09:12:44.031 - src/remote.rs:88 - upload: 3 note(s), 412 bytes for u-alice
//! ```
//!
//! When writing to a terminal, timestamps and source locations are dimmed and
//! note/user ids get a colour derived from their content, so the same id
//! reads the same across lines.
//!
//! Output goes to stderr until [`set_writer`] installs another destination.
//! Installing a custom writer also disables ANSI colour codes.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};

use chrono::Utc;

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Initialize logging. Call once at startup; enables colour when stderr is a
/// terminal.
pub fn init() {
    COLOUR_ENABLED.store(io::stderr().is_terminal(), Ordering::Relaxed);
}

/// Replace the log writer. All subsequent [`nlog!`] output goes to `w`.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    *LOG_WRITER.lock().unwrap_or_else(PoisonError::into_inner) = w;
}

pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

const ID_COLOURS: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[93m", "\x1b[94m", "\x1b[95m", "\x1b[96m",
];

fn hash_colour(id: &str) -> &'static str {
    let hash: u32 = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    ID_COLOURS[(hash as usize) % ID_COLOURS.len()]
}

const LOG_ID_TRUNCATE_LEN: usize = 8;

fn truncate_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(LOG_ID_TRUNCATE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

fn tagged(prefix: &str, id: &str) -> String {
    let short = truncate_id(id);
    if colour_enabled() {
        format!("{}{prefix}-{short}{RESET}", hash_colour(id))
    } else {
        format!("{prefix}-{short}")
    }
}

/// Format a note id, e.g. `n-3f2a9c1e`.
pub fn note_id(id: &str) -> String {
    tagged("n", id)
}

/// Format a user id, e.g. `u-alice`.
pub fn user_id(id: &str) -> String {
    tagged("u", id)
}

/// Current wall-clock time as `YYYYMMDDTHH:MM:SS.mmm` (UTC).
pub fn format_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H:%M:%S%.3f").to_string()
}

/// Write a single log line. Called by [`nlog!`].
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let formatted = if colour_enabled() {
        format!("{DIM}{ts}{RESET} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    let mut writer = LOG_WRITER.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = writeln!(*writer, "{formatted}");
}

/// Emit a log line with timestamp and source location.
///
/// ```ignore
/// nlog!("download: no save found for {}", logging::user_id(&user));
/// ```
#[macro_export]
macro_rules! nlog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_fixed_shape() {
        let ts = format_timestamp();
        assert_eq!(ts.len(), "20261014T09:12:44.031".len());
        assert_eq!(&ts[8..9], "T");
    }

    #[test]
    fn ids_are_truncated_and_prefixed() {
        assert_eq!(truncate_id("0123456789abcdef"), "01234567");
        assert_eq!(truncate_id("abc"), "abc");
        if !colour_enabled() {
            assert_eq!(note_id("0123456789"), "n-01234567");
            assert_eq!(user_id("alice"), "u-alice");
        }
    }
}
