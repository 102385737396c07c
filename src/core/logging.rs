//! Log backend for embedders of the queue client
//!
//! The library itself only emits through the `log` facade. Applications that
//! have no backend of their own can start `flexi_logger` here, with the same
//! line layout across text, extended and JSON output.

use flexi_logger::{DeferredNow, FileSpec, FormatFunction, Logger, LoggerHandle};
use std::io::Write;
use std::sync::{Mutex, OnceLock};

static LOGGER_HANDLE: OnceLock<Mutex<LoggerHandle>> = OnceLock::new();

const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Start the logger
///
/// `log_format` is one of `text` (default), `ext` (adds the source location)
/// or `json`. When `log_file` is given, output goes to that file instead of
/// stderr.
pub fn init_logging(
    log_level: Option<&str>,
    log_format: Option<&str>,
    log_file: Option<&str>,
    color_enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut logger = Logger::try_with_str(log_level.unwrap_or("info"))?
        .format(select_format(log_format.unwrap_or("text"), color_enabled));

    if let Some(path) = log_file {
        logger = logger.log_to_file(FileSpec::try_from(std::path::Path::new(path))?);
    }

    let handle = logger.start()?;
    let _ = LOGGER_HANDLE.set(Mutex::new(handle));
    Ok(())
}

/// Change the level of a running logger
///
/// Format, colour and file output are fixed once flexi_logger has started.
pub fn reconfigure_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.trim() {
        "" => "info",
        level => level,
    };

    LOGGER_HANDLE
        .get()
        .ok_or("Logger handle not initialised. Call init_logging first.")?
        .lock()
        .map_err(|_| "Could not acquire logger handle lock")?
        .parse_and_push_temp_spec(level)?;
    Ok(())
}

fn select_format(format: &str, color: bool) -> FormatFunction {
    match (format, color) {
        ("json", _) => json_line,
        ("ext", true) => located_color_line,
        ("ext", false) => located_line,
        (_, true) => color_line,
        (_, false) => plain_line,
    }
}

// "2024-01-02 03:04:05.678 INF message"
fn plain_line(w: &mut dyn Write, now: &mut DeferredNow, record: &log::Record) -> std::io::Result<()> {
    write_text_line(w, now, record, false, false)
}

fn color_line(w: &mut dyn Write, now: &mut DeferredNow, record: &log::Record) -> std::io::Result<()> {
    write_text_line(w, now, record, false, true)
}

// "2024-01-02 03:04:05.678 INF message (queue/lease.rs:42)"
fn located_line(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> std::io::Result<()> {
    write_text_line(w, now, record, true, false)
}

fn located_color_line(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &log::Record,
) -> std::io::Result<()> {
    write_text_line(w, now, record, true, true)
}

fn write_text_line(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &log::Record,
    with_location: bool,
    color: bool,
) -> std::io::Result<()> {
    use colored::Colorize;

    let timestamp = now.format(TIMESTAMP).to_string();
    let tag = level_tag(record.level());
    let location = with_location.then(|| source_location(record.target(), record.line()));

    if color {
        let tag = match record.level() {
            log::Level::Error => tag.red().bold(),
            log::Level::Warn => tag.yellow(),
            log::Level::Info => tag.green(),
            log::Level::Debug => tag.blue(),
            log::Level::Trace => tag.magenta(),
        };
        write!(w, "{} {} {}", timestamp.dimmed(), tag, record.args())?;
        if let Some(location) = location {
            write!(w, " ({})", location.dimmed())?;
        }
    } else {
        write!(w, "{} {} {}", timestamp, tag, record.args())?;
        if let Some(location) = location {
            write!(w, " ({})", location)?;
        }
    }
    Ok(())
}

// One compact object per line; flexi_logger appends the newline
fn json_line(w: &mut dyn Write, now: &mut DeferredNow, record: &log::Record) -> std::io::Result<()> {
    let line = serde_json::json!({
        "timestamp": now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": level_tag(record.level()),
        "message": record.args().to_string(),
        "target": source_location(record.target(), record.line()),
    });

    match serde_json::to_vec(&line) {
        Ok(bytes) => w.write_all(&bytes),
        Err(_) => w.write_all(b"{\"error\":\"Failed to serialize log message\"}"),
    }
}

fn level_tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERR",
        log::Level::Warn => "WRN",
        log::Level::Info => "INF",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRC",
    }
}

// hivequeue::queue::lease -> queue/lease.rs:LINE; other crates keep their path
fn source_location(target: &str, line: Option<u32>) -> String {
    let path = match target.strip_prefix("hivequeue::") {
        Some(module) => format!("{}.rs", module.replace("::", "/")),
        None => target.replace("::", "/"),
    };

    match line {
        Some(line) => format!("{}:{}", path, line),
        None => path,
    }
}
