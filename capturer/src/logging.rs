//! Stderr logging plus an on-disk sink the teacher's daemon doesn't need
//! (it runs with a visible console; the Capturer is loaded inside someone
//! else's process and usually has none). `log_line` mirrors the teacher's
//! `eprintln!("[capture] ...")` calls in `capture.rs`/`pipeline.rs`, and
//! also appends to a log file path derived from `svr_path` at `init()` time
//! so failures are visible even without a console attached.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

static LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

fn log_path() -> &'static Mutex<Option<PathBuf>> {
    LOG_PATH.get_or_init(|| Mutex::new(None))
}

/// Called once from `svr_init` with the same `svr_path` the Encoder binary
/// ships alongside; the log file lives next to it as `svr.log`.
pub fn set_log_path(svr_path: &str) {
    *log_path().lock().unwrap() = Some(std::path::Path::new(svr_path).join("svr.log"));
}

/// `[capture] message` to stderr, and to the log file if one was set.
pub fn log_line(message: &str) {
    eprintln!("[capture] {message}");
    if let Some(path) = log_path().lock().unwrap().as_ref() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "[capture] {message}");
        }
    }
}
