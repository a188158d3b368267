//! Logging setup for benches, tests and downstream calibration tools.
//!
//! Events are printed as `[LEVEL timestamp location] message`, where the location is the
//! module path for INFO and above and `file:line` for DEBUG and TRACE.

use std::fmt::Write as _;

use chrono::Local;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Install the global subscriber at INFO, unless `RUST_LOG` says otherwise.
///
/// # Example
/// ```no_run
/// use calib_backend::init_logger;
///
/// init_logger();
/// tracing::info!("Calibration started");
/// ```
///
/// ```bash
/// RUST_LOG=calib_backend=debug cargo bench
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the global subscriber with `default_level` as the fallback directive.
///
/// Only the first call installs a subscriber. Later calls (several benches or tests in one
/// process) leave it in place and report that at DEBUG through the existing one.
pub fn init_logger_with_level(default_level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(CalibFormatter)
        .try_init();

    if let Err(reason) = installed {
        tracing::debug!("Logger already initialized, keeping it ({})", reason);
    }
}

/// ANSI-colored label for a level.
fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[31mERROR\x1b[0m",
        Level::WARN => "\x1b[33mWARN\x1b[0m",
        Level::INFO => "\x1b[32mINFO\x1b[0m",
        Level::DEBUG => "\x1b[34mDEBUG\x1b[0m",
        Level::TRACE => "\x1b[35mTRACE\x1b[0m",
    }
}

/// Source location shown for an event: `file:line` for DEBUG and TRACE, else the target.
fn location(level: &Level, target: &str, file: Option<&str>, line: Option<u32>) -> String {
    let verbose = *level >= Level::DEBUG;
    match (verbose, file) {
        (true, Some(file)) => {
            let name = file.rsplit(['/', '\\']).next().unwrap_or(file);
            let mut location = name.to_string();
            if let Some(line) = line {
                let _ = write!(location, ":{line}");
            }
            location
        }
        _ => target.to_string(),
    }
}

struct CalibFormatter;

impl<S, N> FormatEvent<S, N> for CalibFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        write!(
            writer,
            "[{} {} {}] ",
            level_label(metadata.level()),
            Local::now().format(TIMESTAMP_FORMAT),
            location(metadata.level(), metadata.target(), metadata.file(), metadata.line())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
