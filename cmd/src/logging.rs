//! Commissioner log file setup.
//!
//! Events are appended to one log file as `[timestamp] [level] message`
//! lines via a custom formatter.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::config::LogLevel;

/// Formatter producing the commissioner's historical log line shape.
pub struct CommLogFormatter;

impl<S, N> FormatEvent<S, N> for CommLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let level = match *event.metadata().level() {
            tracing::Level::ERROR => "error",
            tracing::Level::WARN => "warn",
            tracing::Level::INFO => "info",
            tracing::Level::DEBUG => "debug",
            tracing::Level::TRACE => "debug",
        };
        write!(writer, "[ {timestamp} ] [ {level} ] ")?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Off => LevelFilter::OFF,
        // The commissioner's "critical" maps onto the highest tracing level.
        LogLevel::Critical | LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
    }
}

/// Install the global subscriber writing to the configured log file.
pub fn init(log_file: Option<&Path>, level: LogLevel) -> anyhow::Result<()> {
    if level == LogLevel::Off {
        return Ok(());
    }
    let path = log_file.unwrap_or_else(|| Path::new("commissioner.log"));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| anyhow::anyhow!("cannot open log file {}: {err}", path.display()))?;

    tracing_subscriber::fmt()
        .event_format(CommLogFormatter)
        .with_writer(Mutex::new(file))
        .with_max_level(level_filter(level))
        .init();
    Ok(())
}
